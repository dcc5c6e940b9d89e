//! A background thread that posts diagnostic events on a fixed schedule.
use std::{
    sync::{
        mpsc::{RecvTimeoutError, SyncSender},
        Arc,
    },
    time::Duration,
};

use reqwest::Url;
use tokio::runtime::Runtime;

use super::{DiagnosticEvent, DiagnosticStore};
use crate::{
    event_sender::{EventDataKind, EventSender},
    events::DiagnosticCounters,
    Error, Result,
};

pub(crate) struct DiagnosticsThread {
    join_handle: std::thread::JoinHandle<()>,
    stop_sender: SyncSender<()>,
}

impl DiagnosticsThread {
    /// Post any persisted event and the init event, then a statistics event every `interval`.
    pub(crate) fn start(
        sender: EventSender,
        uri: Url,
        store: Arc<dyn DiagnosticStore>,
        counters: DiagnosticCounters,
        interval: Duration,
    ) -> Result<DiagnosticsThread> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        // A buffer of one is enough: a second stop command is redundant.
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);

        let join_handle = std::thread::Builder::new()
            .name("flag-events-diagnostics".to_owned())
            .spawn(move || {
                let poster = DiagnosticPoster {
                    runtime,
                    sender,
                    uri,
                };

                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    if let Some(event) = store.persisted_unsent_event() {
                        poster.post(&event);
                    }
                    if let Some(event) = store.init_event() {
                        poster.post(&event);
                    }

                    loop {
                        match stop_receiver.recv_timeout(interval) {
                            Err(RecvTimeoutError::Timeout) => {
                                let (dropped, deduplicated) = counters.take();
                                let event = store.create_event_and_reset(dropped, deduplicated);
                                poster.post(&event);
                            }
                            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                                log::debug!(target: "flag_events", "diagnostics thread stopping");
                                return;
                            }
                        }
                    }
                }));

                if result.is_err() {
                    log::error!(target: "flag_events", "diagnostics thread panicked");
                }
            })?;

        Ok(DiagnosticsThread {
            join_handle,
            stop_sender,
        })
    }

    /// Ask the thread to stop without waiting for it.
    pub(crate) fn stop(&self) {
        // Full buffer means a stop is already pending; disconnected means the thread is gone.
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the thread and wait for it to exit.
    pub(crate) fn shutdown(self) -> Result<()> {
        self.stop();
        self.join_handle
            .join()
            .map_err(|_| Error::WorkerPanicked)
    }
}

struct DiagnosticPoster {
    runtime: Runtime,
    sender: EventSender,
    uri: Url,
}

impl DiagnosticPoster {
    fn post(&self, event: &DiagnosticEvent) {
        let body = match serde_json::to_vec(&event.json) {
            Ok(body) => body,
            Err(err) => {
                log::warn!(target: "flag_events", "dropping diagnostic event: {}", Error::from(err));
                return;
            }
        };

        let result = self.runtime.block_on(self.sender.send_event_data(
            EventDataKind::DiagnosticEvent,
            &self.uri,
            &body,
            None,
        ));
        match result {
            Ok(_) => {
                log::debug!(target: "flag_events", "sent {:?} diagnostic event", event.kind);
            }
            // Diagnostics failures never affect analytics delivery.
            Err(err @ Error::Unauthorized(_)) => {
                log::error!(target: "flag_events", "diagnostic event rejected: {err}");
            }
            Err(err) => {
                log::warn!(target: "flag_events", "failed to send diagnostic event: {err}");
            }
        }
    }
}
