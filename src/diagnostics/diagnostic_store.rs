use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex, MutexGuard, PoisonError,
};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use super::{DiagnosticEvent, DiagnosticKind};
use crate::EventsConfig;

/// Source of diagnostic events.
///
/// Shared between the delivery worker, which reports batch sizes, and the diagnostics thread,
/// which asks for events to post.
pub trait DiagnosticStore: Send + Sync {
    /// Start of the current statistics window.
    fn data_since(&self) -> DateTime<Utc>;

    /// The configuration event. Returns `Some` at most once.
    fn init_event(&self) -> Option<DiagnosticEvent>;

    /// A statistics event left over from a previous run that was never delivered.
    fn persisted_unsent_event(&self) -> Option<DiagnosticEvent>;

    /// Close the current statistics window and start a new one.
    fn create_event_and_reset(&self, dropped_events: u64, deduplicated_users: u64)
        -> DiagnosticEvent;

    /// Called after every successfully delivered analytics batch.
    fn record_events_in_batch(&self, count: usize);
}

/// In-memory [`DiagnosticStore`].
#[derive(Debug)]
pub struct DefaultDiagnosticStore {
    id: Value,
    init_event: Mutex<Option<DiagnosticEvent>>,
    persisted_event: Mutex<Option<DiagnosticEvent>>,
    data_since: Mutex<DateTime<Utc>>,
    events_in_last_batch: AtomicU64,
}

impl DefaultDiagnosticStore {
    pub fn new(config: &EventsConfig) -> DefaultDiagnosticStore {
        let now = Utc::now();
        let id = json!({
            "diagnosticId": Uuid::new_v4().to_string(),
            "sdkKeySuffix": sdk_key_suffix(&config.sdk_key),
        });
        let init_event = init_event(&id, config, now);

        DefaultDiagnosticStore {
            id,
            init_event: Mutex::new(Some(init_event)),
            persisted_event: Mutex::new(None),
            data_since: Mutex::new(now),
            events_in_last_batch: AtomicU64::new(0),
        }
    }

    /// Queue an event saved by a previous run to be posted before anything else.
    pub fn with_persisted_unsent_event(self, event: DiagnosticEvent) -> DefaultDiagnosticStore {
        *lock(&self.persisted_event) = Some(event);
        self
    }

    /// The `id` object carried by every event from this store.
    pub fn diagnostic_id(&self) -> &Value {
        &self.id
    }
}

impl DiagnosticStore for DefaultDiagnosticStore {
    fn data_since(&self) -> DateTime<Utc> {
        *lock(&self.data_since)
    }

    fn init_event(&self) -> Option<DiagnosticEvent> {
        lock(&self.init_event).take()
    }

    fn persisted_unsent_event(&self) -> Option<DiagnosticEvent> {
        lock(&self.persisted_event).take()
    }

    fn create_event_and_reset(
        &self,
        dropped_events: u64,
        deduplicated_users: u64,
    ) -> DiagnosticEvent {
        let now = Utc::now();
        let data_since = std::mem::replace(&mut *lock(&self.data_since), now);
        let creation_date = now.timestamp_millis();

        DiagnosticEvent {
            kind: DiagnosticKind::Periodic,
            creation_date,
            json: json!({
                "kind": DiagnosticKind::Periodic,
                "id": self.id,
                "creationDate": creation_date,
                "dataSinceDate": data_since.timestamp_millis(),
                "droppedEvents": dropped_events,
                "deduplicatedUsers": deduplicated_users,
                "eventsInLastBatch": self.events_in_last_batch.load(Ordering::Relaxed),
            }),
        }
    }

    fn record_events_in_batch(&self, count: usize) {
        self.events_in_last_batch
            .store(count as u64, Ordering::Relaxed);
    }
}

// The guarded values are plain data that stay consistent even if a holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn sdk_key_suffix(sdk_key: &str) -> &str {
    match sdk_key.char_indices().rev().nth(5) {
        Some((start, _)) => &sdk_key[start..],
        None => sdk_key,
    }
}

fn init_event(id: &Value, config: &EventsConfig, now: DateTime<Utc>) -> DiagnosticEvent {
    let creation_date = now.timestamp_millis();
    DiagnosticEvent {
        kind: DiagnosticKind::Init,
        creation_date,
        json: json!({
            "kind": DiagnosticKind::Init,
            "id": id,
            "creationDate": creation_date,
            "sdk": {
                "name": config.sdk_metadata.name,
                "version": config.sdk_metadata.version,
            },
            "configuration": {
                "customEventsURI": config.events_uri != EventsConfig::DEFAULT_EVENTS_URI,
                "eventsCapacity": config.capacity,
                "eventsFlushIntervalMillis": config.flush_interval.as_millis() as u64,
                "userKeysFlushIntervalMillis": config.user_keys_flush_interval.as_millis() as u64,
                "inlineUsersInEvents": config.inline_users_in_events,
                "allAttributesPrivate": config.all_attributes_private,
                "diagnosticRecordingIntervalMillis":
                    config.effective_diagnostic_interval().as_millis() as u64,
                "connectTimeoutMillis": config.http_timeout.as_millis() as u64,
            },
            "platform": {
                "name": "rust",
                "osName": std::env::consts::OS,
                "osArch": std::env::consts::ARCH,
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{sdk_key_suffix, DefaultDiagnosticStore, DiagnosticStore};
    use crate::{diagnostics::DiagnosticKind, EventsConfig};

    #[test]
    fn suffix_is_last_six_chars() {
        assert_eq!(sdk_key_suffix("sdk-0123456789"), "456789");
        assert_eq!(sdk_key_suffix("abc"), "abc");
    }

    #[test]
    fn init_event_is_returned_once() {
        let store = DefaultDiagnosticStore::new(&EventsConfig::new("sdk-key-123456"));

        let event = store.init_event().unwrap();
        assert_eq!(event.kind, DiagnosticKind::Init);
        assert_eq!(event.json["kind"], json!("diagnostic-init"));
        assert_eq!(event.json["id"]["sdkKeySuffix"], json!("123456"));
        assert_eq!(event.json["configuration"]["eventsCapacity"], json!(10_000));
        assert_eq!(event.json["configuration"]["customEventsURI"], json!(false));
        assert_eq!(event.json["platform"]["name"], json!("rust"));

        assert!(store.init_event().is_none());
    }

    #[test]
    fn periodic_event_reports_counters_and_moves_window() {
        let store = DefaultDiagnosticStore::new(&EventsConfig::new("sdk-key"));
        let first_since = store.data_since();
        store.record_events_in_batch(7);

        let event = store.create_event_and_reset(3, 2);
        assert_eq!(event.kind, DiagnosticKind::Periodic);
        assert_eq!(event.json["kind"], json!("diagnostic"));
        assert_eq!(event.json["droppedEvents"], json!(3));
        assert_eq!(event.json["deduplicatedUsers"], json!(2));
        assert_eq!(event.json["eventsInLastBatch"], json!(7));
        assert_eq!(
            event.json["dataSinceDate"],
            json!(first_since.timestamp_millis())
        );
        assert_eq!(event.json["id"], *store.diagnostic_id());
        assert_eq!(store.data_since().timestamp_millis(), event.creation_date);
    }

    #[test]
    fn persisted_event_is_returned_once() {
        let config = EventsConfig::new("sdk-key");
        let previous = DefaultDiagnosticStore::new(&config).create_event_and_reset(1, 0);
        let store =
            DefaultDiagnosticStore::new(&config).with_persisted_unsent_event(previous.clone());

        assert_eq!(store.persisted_unsent_event(), Some(previous));
        assert_eq!(store.persisted_unsent_event(), None);
    }
}
