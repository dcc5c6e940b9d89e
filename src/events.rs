//! Analytics events produced by flag evaluation, `identify` and `track` calls.
//!
//! Events are immutable values. They are handed to
//! [`EventProcessor::send_event`](crate::EventProcessor::send_event) and consumed exactly once by
//! the dispatcher, which turns them into wire events.
use std::sync::{
    atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
    Arc,
};

use derive_more::From;
use serde_json::Value;

use crate::User;

pub mod evaluation;
mod event_factory;

pub(crate) mod event_buffer;
pub(crate) mod event_delivery;
pub(crate) mod event_dispatcher;
pub(crate) mod event_summarizer;
pub(crate) mod output;

pub use evaluation::{EvaluationDetail, EvaluationErrorKind, EvaluationReason};
pub use event_factory::{EventFactory, FlagEventProperties};

/// Fields shared by every event kind.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBase {
    /// Milliseconds since the Unix epoch.
    pub creation_date: i64,
    /// Flag key for feature events, event key for custom events, user key for identify events.
    pub key: String,
    pub user: Option<Arc<User>>,
}

/// An event accepted by the pipeline.
#[derive(Debug, Clone, PartialEq, From)]
pub enum Event {
    Identify(IdentifyEvent),
    Custom(CustomEvent),
    FeatureRequest(FeatureRequestEvent),
}

impl Event {
    pub fn base(&self) -> &EventBase {
        match self {
            Event::Identify(e) => &e.base,
            Event::Custom(e) => &e.base,
            Event::FeatureRequest(e) => &e.base,
        }
    }

    pub fn creation_date(&self) -> i64 {
        self.base().creation_date
    }

    pub fn user(&self) -> Option<&Arc<User>> {
        self.base().user.as_ref()
    }
}

/// Generated by `identify`. Always sent with the full user.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentifyEvent {
    pub base: EventBase,
}

/// Generated by `track`.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomEvent {
    pub base: EventBase,
    /// Arbitrary data attached by the application. `Null` means none.
    pub data: Value,
    pub metric_value: Option<f64>,
}

/// Generated by every flag evaluation, including prerequisite evaluations.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRequestEvent {
    pub base: EventBase,
    pub variation: Option<i32>,
    pub value: Value,
    pub default: Option<Value>,
    /// `None` when the flag was not found.
    pub version: Option<i32>,
    /// Key of the flag this evaluation was a prerequisite of.
    pub prereq_of: Option<String>,
    /// Send a full `feature` event rather than only counting the evaluation.
    pub track_events: bool,
    /// Send `debug` events until this time (epoch milliseconds).
    pub debug_events_until_date: Option<i64>,
    pub reason: Option<EvaluationReason>,
}

/// Current time in milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Counters and flags shared between the ingestion handle, the dispatcher, the delivery worker
/// and the diagnostics thread.
///
/// Everything here is a single atomic word: the dispatcher's own state never leaves its task.
#[derive(Debug, Default)]
pub(crate) struct EventsState {
    /// Dropped since the last diagnostic event.
    dropped_events: AtomicU64,
    dropped_events_total: AtomicU64,
    deduplicated_users: AtomicU64,
    /// Server time minus local time at the moment the last successful response arrived.
    server_time_offset_ms: AtomicI64,
    /// Set after an unrecoverable HTTP status.
    disabled: AtomicBool,
}

impl EventsState {
    pub(crate) fn record_dropped_event(&self) {
        self.dropped_events.fetch_add(1, Ordering::Relaxed);
        self.dropped_events_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deduplicated_user(&self) {
        self.deduplicated_users.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dropped_events_total(&self) -> u64 {
        self.dropped_events_total.load(Ordering::Relaxed)
    }

    /// Read and zero the windowed counters: `(dropped_events, deduplicated_users)`.
    pub(crate) fn take_diagnostic_counters(&self) -> (u64, u64) {
        (
            self.dropped_events.swap(0, Ordering::Relaxed),
            self.deduplicated_users.swap(0, Ordering::Relaxed),
        )
    }

    pub(crate) fn set_server_time(&self, server_time: i64, local_time: i64) {
        self.server_time_offset_ms
            .store(server_time - local_time, Ordering::Relaxed);
    }

    /// Local time moved forward by the server clock's lead, if the server is ahead.
    pub(crate) fn effective_now(&self, local_now: i64) -> i64 {
        local_now + self.server_time_offset_ms.load(Ordering::Relaxed).max(0)
    }

    pub(crate) fn disable(&self) {
        self.disabled.store(true, Ordering::Relaxed);
    }

    pub(crate) fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }
}

/// Read-and-reset view of the windowed counters in [`EventsState`], handed to the diagnostics
/// thread. Diagnostics never see the disabled flag.
#[derive(Debug, Clone)]
pub(crate) struct DiagnosticCounters(Arc<EventsState>);

impl DiagnosticCounters {
    pub(crate) fn new(state: Arc<EventsState>) -> DiagnosticCounters {
        DiagnosticCounters(state)
    }

    /// `(dropped_events, deduplicated_users)` since the previous call.
    pub(crate) fn take(&self) -> (u64, u64) {
        self.0.take_diagnostic_counters()
    }
}
