use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use uuid::Uuid;

use super::{
    event_buffer::EventBuffer,
    event_delivery::{DeliveryCommand, FlushPayload},
    now_millis,
    output::{CustomOutput, FeatureOutput, IdentifyOutput, IndexOutput, OutputEvent, UserRef},
    Event, EventsState, FeatureRequestEvent,
};
use crate::{EventUser, EventsConfig, User, UserDeduplicator};

/// Messages on the single ordered command queue.
#[derive(Debug)]
pub(crate) enum EventCommand {
    Event(Event),
    Flush,
    /// Forget which users have been indexed.
    ResetUsers,
    /// Reply once everything enqueued before this command has been processed and delivered.
    Sync(oneshot::Sender<()>),
}

/// Owns every piece of mutable pipeline state and processes commands one at a time.
pub(crate) struct EventDispatcher {
    config: Arc<EventsConfig>,
    buffer: EventBuffer,
    deduplicator: Box<dyn UserDeduplicator + Send>,
    state: Arc<EventsState>,
    delivery_tx: mpsc::UnboundedSender<DeliveryCommand>,
}

impl EventDispatcher {
    pub(crate) fn new(
        config: Arc<EventsConfig>,
        deduplicator: Box<dyn UserDeduplicator + Send>,
        state: Arc<EventsState>,
        delivery_tx: mpsc::UnboundedSender<DeliveryCommand>,
    ) -> EventDispatcher {
        EventDispatcher {
            buffer: EventBuffer::new(config.capacity, Arc::clone(&state)),
            config,
            deduplicator,
            state,
            delivery_tx,
        }
    }

    /// Interval at which [`EventCommand::ResetUsers`] should be posted, if any.
    pub(crate) fn user_keys_flush_interval(&self) -> Option<Duration> {
        self.deduplicator.flush_interval()
    }

    /// Process commands until `shutdown` fires or every sender is gone, then flush one last time.
    ///
    /// Commands already queued when `shutdown` fires are processed before the final flush.
    pub(crate) async fn run(
        mut self,
        mut rx: mpsc::Receiver<EventCommand>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        log::debug!(target: "flag_events", "event dispatcher started");

        loop {
            tokio::select! {
                biased;
                command = rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                _ = &mut shutdown => {
                    while let Ok(command) = rx.try_recv() {
                        self.handle_command(command);
                    }
                    break;
                }
            }
        }

        log::debug!(target: "flag_events", "event dispatcher shutting down");
        self.flush();
    }

    pub(crate) fn handle_command(&mut self, command: EventCommand) {
        match command {
            EventCommand::Event(event) => self.process_event(event),
            EventCommand::Flush => self.flush(),
            EventCommand::ResetUsers => self.deduplicator.flush(),
            EventCommand::Sync(reply) => {
                // If the delivery worker is gone the reply is dropped, which also wakes the
                // waiter.
                let _ = self.delivery_tx.send(DeliveryCommand::Sync(reply));
            }
        }
    }

    fn process_event(&mut self, event: Event) {
        let now = now_millis();
        let mut debug_event = None;

        let will_add_full_event = match &event {
            Event::FeatureRequest(fe) => {
                self.buffer.add_to_summary(fe);
                if self.should_debug(fe, now) {
                    debug_event = Some(OutputEvent::Debug(self.feature_output(fe, true)));
                }
                fe.track_events
            }
            Event::Identify(_) | Event::Custom(_) => true,
        };

        // An event that carries its own user inline needs no index event. Identify events always
        // carry the user, so they only mark it as seen.
        if !(will_add_full_event && self.config.inline_users_in_events) {
            if let Some(user) = event.user() {
                let is_identify = matches!(event, Event::Identify(_));
                if self.deduplicator.process_user(user) {
                    if !is_identify {
                        let index = OutputEvent::Index(IndexOutput {
                            creation_date: event.creation_date(),
                            user: self.event_user(user),
                        });
                        self.buffer.add_event(index);
                    }
                } else if !is_identify {
                    self.state.record_deduplicated_user();
                }
            }
        }

        if will_add_full_event {
            let full_event = self.full_event(&event);
            self.buffer.add_event(full_event);
        }
        if let Some(debug_event) = debug_event {
            self.buffer.add_event(debug_event);
        }
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let events = self.buffer.take_payload();

        if self.state.is_disabled() {
            log::debug!(target: "flag_events", "event delivery is disabled, discarding {} events", events.len());
            return;
        }

        let payload = FlushPayload {
            events,
            payload_id: Uuid::new_v4(),
        };
        log::debug!(target: "flag_events", "flushing {} events", payload.events.len());
        if self
            .delivery_tx
            .send(DeliveryCommand::Deliver(payload))
            .is_err()
        {
            log::warn!(target: "flag_events", "delivery worker is gone, events were not sent");
        }
    }

    /// Whether `fe` is still inside its debug window, judged against the later of the local clock
    /// and the last known server clock.
    fn should_debug(&self, fe: &FeatureRequestEvent, local_now: i64) -> bool {
        fe.debug_events_until_date
            .is_some_and(|until| until > self.state.effective_now(local_now))
    }

    fn event_user(&self, user: &User) -> EventUser {
        EventUser::from_user(user, &self.config)
    }

    fn user_ref(&self, user: Option<&User>, inline: bool) -> Option<UserRef> {
        user.map(|user| {
            if inline {
                UserRef::Inline(self.event_user(user))
            } else {
                UserRef::Key(user.key.clone())
            }
        })
    }

    fn feature_output(&self, fe: &FeatureRequestEvent, debug: bool) -> FeatureOutput {
        FeatureOutput {
            creation_date: fe.base.creation_date,
            key: fe.base.key.clone(),
            user: self.user_ref(
                fe.base.user.as_deref(),
                debug || self.config.inline_users_in_events,
            ),
            version: fe.version,
            variation: fe.variation,
            value: fe.value.clone(),
            default: fe.default.clone(),
            prereq_of: fe.prereq_of.clone(),
            reason: fe.reason.clone(),
        }
    }

    fn full_event(&self, event: &Event) -> OutputEvent {
        match event {
            Event::Identify(e) => OutputEvent::Identify(IdentifyOutput {
                creation_date: e.base.creation_date,
                key: e.base.user.as_ref().map(|user| user.key.clone()),
                user: e.base.user.as_deref().map(|user| self.event_user(user)),
            }),
            Event::Custom(e) => OutputEvent::Custom(CustomOutput {
                creation_date: e.base.creation_date,
                key: e.base.key.clone(),
                user: self.user_ref(e.base.user.as_deref(), self.config.inline_users_in_events),
                data: e.data.clone(),
                metric_value: e.metric_value,
            }),
            Event::FeatureRequest(fe) => OutputEvent::Feature(self.feature_output(fe, false)),
        }
    }
}

/// Post `make()` into the command queue every `period`, starting one period from now.
///
/// Returns `None` for a zero period.
pub(crate) fn spawn_periodic(
    tx: mpsc::Sender<EventCommand>,
    period: Duration,
    make: fn() -> EventCommand,
) -> Option<JoinHandle<()>> {
    if period.is_zero() {
        log::warn!(target: "flag_events", "ignoring zero timer period");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if tx.send(make()).await.is_err() {
                break;
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    use super::{EventCommand, EventDispatcher};
    use crate::events::{
        event_delivery::{serialize_batch, DeliveryCommand},
        now_millis, EventsState,
    };
    use crate::{
        DefaultUserDeduplicator, EvaluationDetail, Event, EventFactory, EventsConfig,
        FlagEventProperties, User,
    };

    struct Harness {
        dispatcher: EventDispatcher,
        delivery_rx: mpsc::UnboundedReceiver<DeliveryCommand>,
        state: Arc<EventsState>,
    }

    impl Harness {
        fn new(config: EventsConfig) -> Harness {
            let state = Arc::new(EventsState::default());
            let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
            let dispatcher = EventDispatcher::new(
                Arc::new(config),
                Box::new(DefaultUserDeduplicator::new(Duration::from_secs(300))),
                Arc::clone(&state),
                delivery_tx,
            );
            Harness {
                dispatcher,
                delivery_rx,
                state,
            }
        }

        fn send(&mut self, event: impl Into<Event>) {
            self.dispatcher
                .handle_command(EventCommand::Event(event.into()));
        }

        /// Flush and return the delivered batch as JSON, or `None` if nothing was delivered.
        fn flush(&mut self) -> Option<Vec<Value>> {
            self.dispatcher.handle_command(EventCommand::Flush);
            match self.delivery_rx.try_recv() {
                Ok(DeliveryCommand::Deliver(payload)) => {
                    let (body, _) = serialize_batch(&payload.events)?;
                    Some(serde_json::from_slice(&body).unwrap())
                }
                _ => None,
            }
        }
    }

    fn user() -> Arc<User> {
        Arc::new(User::builder("userKey").name("Red").build().unwrap())
    }

    fn user_json() -> Value {
        json!({"key": "userKey", "name": "Red"})
    }

    fn kinds(output: &[Value]) -> Vec<&str> {
        output
            .iter()
            .map(|event| event["kind"].as_str().unwrap())
            .collect()
    }

    fn tracked_flag() -> FlagEventProperties {
        FlagEventProperties::new("flagkey")
            .with_version(11)
            .with_track_events(true)
    }

    fn feature_event(flag: &FlagEventProperties, user: Option<Arc<User>>) -> Event {
        EventFactory::default()
            .new_feature_request_event(
                flag,
                user,
                EvaluationDetail::new(json!("value"), Some(1), None),
                None,
            )
            .into()
    }

    #[test]
    fn identify_event_is_queued_with_user() {
        let mut harness = Harness::new(EventsConfig::new("key"));
        let event = EventFactory::default().new_identify_event(Some(user()));
        let creation_date = event.base.creation_date;
        harness.send(event);

        let output = harness.flush().unwrap();
        assert_eq!(
            output,
            vec![json!({
                "kind": "identify",
                "creationDate": creation_date,
                "key": "userKey",
                "user": user_json()
            })]
        );
    }

    #[test]
    fn identify_event_can_have_no_user() {
        let mut harness = Harness::new(EventsConfig::new("key"));
        harness.send(EventFactory::default().new_identify_event(None));

        let output = harness.flush().unwrap();
        assert_eq!(kinds(&output), vec!["identify"]);
        assert!(output[0].get("user").is_none());
    }

    #[test]
    fn tracked_feature_event_is_queued_with_index_event() {
        let mut harness = Harness::new(EventsConfig::new("key"));
        harness.send(feature_event(&tracked_flag(), Some(user())));

        let output = harness.flush().unwrap();
        assert_eq!(kinds(&output), vec!["index", "feature", "summary"]);
        assert_eq!(output[0]["user"], user_json());
        assert_eq!(output[1]["userKey"], json!("userKey"));
        assert_eq!(output[1]["version"], json!(11));
        assert_eq!(output[1]["variation"], json!(1));
        assert_eq!(output[1]["value"], json!("value"));
        assert!(output[1].get("user").is_none());
    }

    #[test]
    fn user_details_are_scrubbed_in_index_event() {
        let mut harness = Harness::new(EventsConfig::new("key").with_all_attributes_private(true));
        harness.send(feature_event(&tracked_flag(), Some(user())));

        let output = harness.flush().unwrap();
        assert_eq!(
            output[0]["user"],
            json!({"key": "userKey", "privateAttrs": ["name"]})
        );
    }

    #[test]
    fn feature_event_can_contain_inline_user() {
        let mut harness = Harness::new(EventsConfig::new("key").with_inline_users_in_events(true));
        harness.send(feature_event(&tracked_flag(), Some(user())));

        let output = harness.flush().unwrap();
        assert_eq!(kinds(&output), vec!["feature", "summary"]);
        assert_eq!(output[0]["user"], user_json());
        assert!(output[0].get("userKey").is_none());
    }

    #[test]
    fn feature_event_can_have_no_user() {
        let mut harness = Harness::new(EventsConfig::new("key"));
        harness.send(feature_event(&tracked_flag(), None));

        let output = harness.flush().unwrap();
        assert_eq!(kinds(&output), vec!["feature", "summary"]);
        assert!(output[0].get("user").is_none());
        assert!(output[0].get("userKey").is_none());
    }

    #[test]
    fn index_event_is_still_generated_if_inline_users_but_not_tracked() {
        let mut harness = Harness::new(EventsConfig::new("key").with_inline_users_in_events(true));
        let flag = FlagEventProperties::new("flagkey").with_version(11);
        harness.send(feature_event(&flag, Some(user())));

        let output = harness.flush().unwrap();
        assert_eq!(kinds(&output), vec!["index", "summary"]);
    }

    #[test]
    fn debug_event_is_generated_while_in_debug_window() {
        let mut harness = Harness::new(EventsConfig::new("key"));
        let flag = FlagEventProperties::new("flagkey")
            .with_version(11)
            .with_debug_events_until_date(now_millis() + 1_000_000);
        harness.send(feature_event(&flag, Some(user())));

        let output = harness.flush().unwrap();
        assert_eq!(kinds(&output), vec!["index", "debug", "summary"]);
        assert_eq!(output[1]["user"], user_json());
    }

    #[test]
    fn event_can_be_both_tracked_and_debugged() {
        let mut harness = Harness::new(EventsConfig::new("key"));
        let flag = tracked_flag().with_debug_events_until_date(now_millis() + 1_000_000);
        harness.send(feature_event(&flag, Some(user())));

        let output = harness.flush().unwrap();
        assert_eq!(kinds(&output), vec!["index", "feature", "debug", "summary"]);
        assert_eq!(output[1]["userKey"], json!("userKey"));
        assert_eq!(output[2]["user"], user_json());
    }

    #[test]
    fn debug_mode_expires_by_client_time_when_client_is_ahead() {
        let mut harness = Harness::new(EventsConfig::new("key"));
        let now = now_millis();
        let server_time = now - 20_000;
        harness.state.set_server_time(server_time, now);

        let flag = FlagEventProperties::new("flagkey")
            .with_version(11)
            .with_debug_events_until_date(server_time + 1_000);
        harness.send(feature_event(&flag, Some(user())));

        let output = harness.flush().unwrap();
        assert_eq!(kinds(&output), vec!["index", "summary"]);
    }

    #[test]
    fn debug_mode_expires_by_server_time_when_server_is_ahead() {
        let mut harness = Harness::new(EventsConfig::new("key"));
        let now = now_millis();
        let server_time = now + 20_000;
        harness.state.set_server_time(server_time, now);

        let flag = FlagEventProperties::new("flagkey")
            .with_version(11)
            .with_debug_events_until_date(server_time - 1_000);
        harness.send(feature_event(&flag, Some(user())));

        let output = harness.flush().unwrap();
        assert_eq!(kinds(&output), vec!["index", "summary"]);
    }

    #[test]
    fn two_feature_events_for_same_user_generate_one_index_event() {
        let mut harness = Harness::new(EventsConfig::new("key"));
        let flag2 = FlagEventProperties::new("flagkey2")
            .with_version(22)
            .with_track_events(true);
        harness.send(feature_event(&tracked_flag(), Some(user())));
        harness.send(feature_event(&flag2, Some(user())));

        let output = harness.flush().unwrap();
        assert_eq!(kinds(&output), vec!["index", "feature", "feature", "summary"]);
        let (dropped, deduplicated) = harness.state.take_diagnostic_counters();
        assert_eq!((dropped, deduplicated), (0, 1));
    }

    #[test]
    fn reset_users_allows_a_new_index_event() {
        let mut harness = Harness::new(EventsConfig::new("key"));
        harness.send(feature_event(&tracked_flag(), Some(user())));
        harness.dispatcher.handle_command(EventCommand::ResetUsers);
        harness.send(feature_event(&tracked_flag(), Some(user())));

        let output = harness.flush().unwrap();
        assert_eq!(
            kinds(&output),
            vec!["index", "feature", "index", "feature", "summary"]
        );
    }

    #[test]
    fn identify_marks_user_as_seen() {
        let mut harness = Harness::new(EventsConfig::new("key"));
        harness.send(EventFactory::default().new_identify_event(Some(user())));
        harness.send(feature_event(&tracked_flag(), Some(user())));

        let output = harness.flush().unwrap();
        assert_eq!(kinds(&output), vec!["identify", "feature", "summary"]);
    }

    #[test]
    fn non_tracked_events_are_summarized() {
        let mut harness = Harness::new(EventsConfig::new("key"));
        let factory = EventFactory::default();
        let fe1 = factory.new_feature_request_event(
            &FlagEventProperties::new("flagkey1").with_version(11),
            Some(user()),
            EvaluationDetail::new(json!("value"), Some(1), None),
            Some(json!("default1")),
        );
        let fe2 = factory.new_feature_request_event(
            &FlagEventProperties::new("flagkey2").with_version(22),
            Some(user()),
            EvaluationDetail::new(json!("value"), Some(1), None),
            Some(json!("default2")),
        );
        let (start, end) = (fe1.base.creation_date, fe2.base.creation_date);
        harness.send(fe1);
        harness.send(fe2);

        let output = harness.flush().unwrap();
        assert_eq!(kinds(&output), vec!["index", "summary"]);
        assert_eq!(
            output[1],
            json!({
                "kind": "summary",
                "startDate": start,
                "endDate": end,
                "features": {
                    "flagkey1": {
                        "default": "default1",
                        "counters": [{"value": "value", "variation": 1, "version": 11, "count": 1}]
                    },
                    "flagkey2": {
                        "default": "default2",
                        "counters": [{"value": "value", "variation": 1, "version": 22, "count": 1}]
                    }
                }
            })
        );
    }

    #[test]
    fn custom_event_is_queued_with_index_event() {
        let mut harness = Harness::new(EventsConfig::new("key"));
        let event =
            EventFactory::default().new_custom_event("eventkey", Some(user()), json!(3), Some(1.5));
        harness.send(event);

        let output = harness.flush().unwrap();
        assert_eq!(kinds(&output), vec!["index", "custom"]);
        assert_eq!(output[1]["key"], json!("eventkey"));
        assert_eq!(output[1]["data"], json!(3));
        assert_eq!(output[1]["metricValue"], json!(1.5));
        assert_eq!(output[1]["userKey"], json!("userKey"));
    }

    #[test]
    fn custom_event_can_contain_inline_user() {
        let mut harness = Harness::new(
            EventsConfig::new("key")
                .with_inline_users_in_events(true)
                .with_all_attributes_private(true),
        );
        harness.send(
            EventFactory::default().new_custom_event("eventkey", Some(user()), json!(3), None),
        );

        let output = harness.flush().unwrap();
        assert_eq!(kinds(&output), vec!["custom"]);
        assert_eq!(
            output[0]["user"],
            json!({"key": "userKey", "privateAttrs": ["name"]})
        );
        assert!(output[0].get("metricValue").is_none());
    }

    #[test]
    fn custom_event_can_have_no_user() {
        let mut harness = Harness::new(EventsConfig::new("key"));
        harness.send(EventFactory::default().new_custom_event("eventkey", None, "data", None));

        let output = harness.flush().unwrap();
        assert_eq!(kinds(&output), vec!["custom"]);
        assert_eq!(output[0]["data"], json!("data"));
        assert!(output[0].get("userKey").is_none());
    }

    #[test]
    fn flush_with_no_events_delivers_nothing() {
        let mut harness = Harness::new(EventsConfig::new("key"));
        assert!(harness.flush().is_none());
    }

    #[test]
    fn each_flush_gets_a_new_payload_id() {
        let mut harness = Harness::new(EventsConfig::new("key"));
        let mut ids = Vec::new();
        for _ in 0..2 {
            harness.send(EventFactory::default().new_identify_event(Some(user())));
            harness.dispatcher.handle_command(EventCommand::Flush);
            match harness.delivery_rx.try_recv() {
                Ok(DeliveryCommand::Deliver(payload)) => ids.push(payload.payload_id),
                other => panic!("expected a payload, got {other:?}"),
            }
        }
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn disabled_dispatcher_discards_batches() {
        let mut harness = Harness::new(EventsConfig::new("key"));
        harness.state.disable();
        harness.send(EventFactory::default().new_identify_event(Some(user())));
        assert!(harness.flush().is_none());
    }
}
