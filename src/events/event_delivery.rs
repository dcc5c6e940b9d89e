use std::sync::Arc;

use reqwest::Url;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::{now_millis, output::OutputEvent, EventsState};
use crate::{
    event_sender::{EventDataKind, EventSender},
    DiagnosticStore, Error,
};

/// A batch handed from the dispatcher to the delivery worker.
#[derive(Debug)]
pub(crate) struct FlushPayload {
    pub events: Vec<OutputEvent>,
    /// Reused verbatim by the retry of this batch.
    pub payload_id: Uuid,
}

#[derive(Debug)]
pub(crate) enum DeliveryCommand {
    Deliver(FlushPayload),
    /// Reply once every batch queued before this command has been delivered or dropped.
    Sync(oneshot::Sender<()>),
}

/// Single consumer of flushed batches. Batches are delivered one at a time, in flush order.
pub(crate) struct DeliveryWorker {
    sender: EventSender,
    events_uri: Url,
    state: Arc<EventsState>,
    diagnostic_store: Option<Arc<dyn DiagnosticStore>>,
    rx: mpsc::UnboundedReceiver<DeliveryCommand>,
}

impl DeliveryWorker {
    pub(crate) fn new(
        sender: EventSender,
        events_uri: Url,
        state: Arc<EventsState>,
        diagnostic_store: Option<Arc<dyn DiagnosticStore>>,
    ) -> (DeliveryWorker, mpsc::UnboundedSender<DeliveryCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = DeliveryWorker {
            sender,
            events_uri,
            state,
            diagnostic_store,
            rx,
        };
        (worker, tx)
    }

    /// Runs until the dispatcher drops its sender, delivering whatever is still queued.
    pub(crate) async fn run(mut self) {
        log::debug!(target: "flag_events", "delivery worker started");

        while let Some(command) = self.rx.recv().await {
            match command {
                DeliveryCommand::Deliver(payload) => self.deliver(payload).await,
                DeliveryCommand::Sync(reply) => {
                    // The waiter may have given up; nothing to do then.
                    let _ = reply.send(());
                }
            }
        }

        log::debug!(target: "flag_events", "delivery worker stopped");
    }

    async fn deliver(&self, payload: FlushPayload) {
        if self.state.is_disabled() {
            log::debug!(target: "flag_events", "event delivery is disabled, dropping {} events", payload.events.len());
            return;
        }

        let (body, count) = match serialize_batch(&payload.events) {
            Some(serialized) => serialized,
            None => return,
        };

        log::debug!(target: "flag_events", count = count; "delivering events with payload id {}", payload.payload_id);
        let result = self
            .sender
            .send_event_data(
                EventDataKind::AnalyticsEvents,
                &self.events_uri,
                &body,
                Some(payload.payload_id),
            )
            .await;

        match result {
            Ok(delivery) => {
                if let Some(server_time) = delivery.server_time {
                    self.state.set_server_time(server_time, now_millis());
                }
                if let Some(store) = &self.diagnostic_store {
                    store.record_events_in_batch(count);
                }
            }
            Err(err @ Error::Unauthorized(_)) => {
                log::error!(target: "flag_events", "{err}; no further events will be sent by this processor");
                self.state.disable();
            }
            Err(err) => {
                log::warn!(target: "flag_events", "dropping {count} events after failed delivery: {err}");
            }
        }
    }
}

/// Serialize each event on its own so one malformed event costs only itself. Returns the JSON
/// array body and the number of events in it, or `None` if nothing survived.
pub(crate) fn serialize_batch(events: &[OutputEvent]) -> Option<(Vec<u8>, usize)> {
    let values: Vec<serde_json::Value> = events
        .iter()
        .filter_map(|event| match serde_json::to_value(event) {
            Ok(value) => Some(value),
            Err(err) => {
                let err = Error::from(err);
                log::warn!(target: "flag_events", "dropping {} event: {err}", event.kind());
                None
            }
        })
        .collect();

    if values.is_empty() {
        return None;
    }

    match serde_json::to_vec(&values) {
        Ok(body) => Some((body, values.len())),
        Err(err) => {
            log::error!(target: "flag_events", "failed to serialize event batch: {err}");
            None
        }
    }
}
