//! The public handle to the event pipeline.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::RecvTimeoutError,
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot,
};

use crate::{
    diagnostics::diagnostics_thread::DiagnosticsThread,
    event_sender::EventSender,
    events::{
        event_delivery::DeliveryWorker,
        event_dispatcher::{spawn_periodic, EventCommand, EventDispatcher},
        DiagnosticCounters, EventsState,
    },
    DefaultDiagnosticStore, DefaultUserDeduplicator, DiagnosticStore, Error, Event, EventsConfig,
    Result, UserDeduplicator,
};

/// Asynchronous analytics event processor.
///
/// Events passed to [`EventProcessor::send_event`] are queued and processed on a background
/// thread, which summarizes feature evaluations, generates index and debug events, and posts
/// batches to the events collector on a fixed interval. `send_event` never blocks and never fails:
/// when the queue is full, the event is dropped and counted.
///
/// Dropping the processor closes it, see [`EventProcessor::close`].
///
/// # Examples
/// ```no_run
/// # use std::sync::Arc;
/// # use flag_events::{EventFactory, EventProcessor, EventsConfig, User};
/// let processor = EventProcessor::start(EventsConfig::new("sdk-key"))?;
///
/// let user = Arc::new(User::with_key("user-key"));
/// processor.send_event(EventFactory::default().new_identify_event(Some(user)));
///
/// processor.close()?;
/// # Ok::<(), flag_events::Error>(())
/// ```
pub struct EventProcessor {
    tx: mpsc::Sender<EventCommand>,
    state: Arc<EventsState>,
    closed: AtomicBool,
    /// Set while the command queue is full so that only the first drop is logged.
    exceeded_capacity: AtomicBool,
    worker: Mutex<Option<WorkerThread>>,
    diagnostics: Mutex<Option<DiagnosticsThread>>,
    shutdown_timeout: Duration,
}

struct WorkerThread {
    join_handle: std::thread::JoinHandle<()>,
    shutdown_sender: oneshot::Sender<()>,
    /// Receives the outcome of the thread once the final flush has been delivered.
    done_receiver: std::sync::mpsc::Receiver<Result<()>>,
}

impl EventProcessor {
    /// Start a processor with the default user deduplicator and diagnostic store.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidUri`] if either endpoint URI cannot be parsed.
    /// - [`Error::Network`] if the HTTP client cannot be initialized.
    /// - [`Error::Io`] if a background thread or runtime fails to start.
    pub fn start(config: EventsConfig) -> Result<EventProcessor> {
        let deduplicator = DefaultUserDeduplicator::new(config.user_keys_flush_interval);
        let store: Arc<dyn DiagnosticStore> = Arc::new(DefaultDiagnosticStore::new(&config));
        EventProcessor::start_with(config, Box::new(deduplicator), Some(store))
    }

    /// Start a processor with a custom user deduplicator and optional diagnostic store.
    ///
    /// Diagnostic events are sent only when `diagnostic_store` is `Some` and
    /// [`EventsConfig::diagnostic_opt_out`] is not set.
    ///
    /// # Errors
    ///
    /// Same as [`EventProcessor::start`].
    pub fn start_with(
        config: EventsConfig,
        deduplicator: Box<dyn UserDeduplicator + Send>,
        diagnostic_store: Option<Arc<dyn DiagnosticStore>>,
    ) -> Result<EventProcessor> {
        let diagnostic_interval = config.effective_diagnostic_interval();
        EventProcessor::spawn(config, deduplicator, diagnostic_store, diagnostic_interval)
    }

    /// Like [`EventProcessor::start_with`], but with the diagnostic interval taken as is.
    fn spawn(
        config: EventsConfig,
        deduplicator: Box<dyn UserDeduplicator + Send>,
        diagnostic_store: Option<Arc<dyn DiagnosticStore>>,
        diagnostic_interval: Duration,
    ) -> Result<EventProcessor> {
        let (events_uri, diagnostic_uri) = config.parsed_uris()?;
        let sender = EventSender::new(&config)?;
        let state = Arc::new(EventsState::default());
        let diagnostic_store = diagnostic_store.filter(|_| !config.diagnostic_opt_out);
        let config = Arc::new(config);

        // Building the runtime here so that a failure is reported to the caller.
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        // `mpsc::channel` panics on a zero capacity.
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();
        let (done_sender, done_receiver) = std::sync::mpsc::channel();

        let (delivery_worker, delivery_tx) = DeliveryWorker::new(
            sender.clone(),
            events_uri,
            Arc::clone(&state),
            diagnostic_store.clone(),
        );
        let dispatcher = EventDispatcher::new(
            Arc::clone(&config),
            deduplicator,
            Arc::clone(&state),
            delivery_tx,
        );

        let diagnostics = match diagnostic_store {
            Some(store) => Some(DiagnosticsThread::start(
                sender,
                diagnostic_uri,
                store,
                DiagnosticCounters::new(Arc::clone(&state)),
                diagnostic_interval,
            )?),
            None => None,
        };

        let join_handle = {
            let timer_tx = tx.clone();
            let flush_interval = config.flush_interval;
            std::thread::Builder::new()
                .name("flag-events".to_owned())
                .spawn(move || {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        runtime.block_on(async move {
                            let mut timers = Vec::new();
                            timers.extend(spawn_periodic(timer_tx.clone(), flush_interval, || {
                                EventCommand::Flush
                            }));
                            if let Some(period) = dispatcher.user_keys_flush_interval() {
                                timers.extend(spawn_periodic(timer_tx, period, || {
                                    EventCommand::ResetUsers
                                }));
                            }

                            let delivery = tokio::spawn(delivery_worker.run());
                            dispatcher.run(rx, shutdown_receiver).await;
                            for timer in timers {
                                timer.abort();
                            }

                            // The dispatcher is gone, so the worker stops once the final batch
                            // has been delivered.
                            delivery.await.map_err(|_| Error::WorkerPanicked)
                        })
                    }));

                    let result = result.unwrap_or(Err(Error::WorkerPanicked));
                    if let Err(err) = &result {
                        log::error!(target: "flag_events", "event processor thread failed: {err}");
                    }
                    // The handle may have stopped waiting already.
                    let _ = done_sender.send(result);
                })?
        };

        log::debug!(target: "flag_events", "event processor started");

        Ok(EventProcessor {
            tx,
            state,
            closed: AtomicBool::new(false),
            exceeded_capacity: AtomicBool::new(false),
            worker: Mutex::new(Some(WorkerThread {
                join_handle,
                shutdown_sender,
                done_receiver,
            })),
            diagnostics: Mutex::new(diagnostics),
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    /// Enqueue an event. Never blocks.
    ///
    /// The event is dropped if the queue is full or the processor has been closed.
    pub fn send_event(&self, event: impl Into<Event>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        match self.tx.try_send(EventCommand::Event(event.into())) {
            Ok(()) => {
                if self.exceeded_capacity.load(Ordering::Relaxed) {
                    self.exceeded_capacity.store(false, Ordering::Relaxed);
                }
            }
            Err(TrySendError::Full(_)) => {
                self.state.record_dropped_event();
                if !self.exceeded_capacity.swap(true, Ordering::Relaxed) {
                    log::warn!(target: "flag_events", "{}, dropping events until it drains", Error::QueueFull);
                }
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!(target: "flag_events", "event processor is shut down, dropping event");
            }
        }
    }

    /// Ask for buffered events to be delivered now instead of at the next flush interval. Does not
    /// wait for the delivery.
    pub fn flush(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if let Err(err) = self.tx.try_send(EventCommand::Flush) {
            log::debug!(target: "flag_events", "flush request not queued: {err}");
        }
    }

    /// Block until every command enqueued so far has been processed and every resulting batch has
    /// been delivered or dropped.
    ///
    /// Must not be called from within an async runtime.
    pub fn wait_until_inactive(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        let (reply, done) = oneshot::channel();
        if self.tx.blocking_send(EventCommand::Sync(reply)).is_err() {
            return;
        }
        // An error means the pipeline shut down, which is inactive too.
        let _ = done.blocking_recv();
    }

    /// Flush pending events and stop the background threads.
    ///
    /// Waits at most [`EventsConfig::shutdown_timeout`] for the final batch to be delivered, after
    /// which the worker thread is left to finish on its own. Calling `close` more than once is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// - [`Error::WorkerPanicked`] if a background thread panicked.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        log::debug!(target: "flag_events", "closing event processor");

        let diagnostics = lock(&self.diagnostics).take();
        if let Some(diagnostics) = &diagnostics {
            diagnostics.stop();
        }

        let mut result = Ok(());
        if let Some(worker) = lock(&self.worker).take() {
            // An error means the thread has already exited.
            let _ = worker.shutdown_sender.send(());

            match worker.done_receiver.recv_timeout(self.shutdown_timeout) {
                Ok(thread_result) => {
                    result = thread_result;
                    if worker.join_handle.join().is_err() {
                        result = Err(Error::WorkerPanicked);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    result = Err(Error::WorkerPanicked);
                }
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!(target: "flag_events", "timed out waiting for the final flush, pending events may be lost");
                }
            }
        }

        if let Some(diagnostics) = diagnostics {
            diagnostics.shutdown()?;
        }
        result
    }

    /// Number of events dropped because the queue or the output buffer was full, since start.
    pub fn dropped_events(&self) -> u64 {
        self.state.dropped_events_total()
    }
}

impl Drop for EventProcessor {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::error!(target: "flag_events", "error closing event processor: {err}");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
