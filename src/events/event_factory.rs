use std::sync::Arc;

use serde_json::Value;

use super::{
    now_millis, CustomEvent, EvaluationDetail, EvaluationErrorKind, EvaluationReason, EventBase,
    FeatureRequestEvent, IdentifyEvent,
};
use crate::User;

/// Event-related properties of a flag, as known by the evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagEventProperties {
    pub key: String,
    pub version: Option<i32>,
    pub track_events: bool,
    pub debug_events_until_date: Option<i64>,
}

impl FlagEventProperties {
    pub fn new(key: impl Into<String>) -> FlagEventProperties {
        FlagEventProperties {
            key: key.into(),
            version: None,
            track_events: false,
            debug_events_until_date: None,
        }
    }

    pub fn with_version(mut self, version: i32) -> FlagEventProperties {
        self.version = Some(version);
        self
    }

    pub fn with_track_events(mut self, track_events: bool) -> FlagEventProperties {
        self.track_events = track_events;
        self
    }

    pub fn with_debug_events_until_date(mut self, until: i64) -> FlagEventProperties {
        self.debug_events_until_date = Some(until);
        self
    }
}

/// Builds timestamped events.
///
/// There is no global factory: SDKs keep one instance per client, configured with whether
/// evaluation reasons should travel with feature events.
#[derive(Debug, Clone, Copy)]
pub struct EventFactory {
    include_reasons: bool,
    clock: fn() -> i64,
}

impl Default for EventFactory {
    fn default() -> EventFactory {
        EventFactory::new(false)
    }
}

impl EventFactory {
    pub fn new(include_reasons: bool) -> EventFactory {
        EventFactory {
            include_reasons,
            clock: now_millis,
        }
    }

    /// Replace the clock used for `creation_date`.
    pub fn with_clock(mut self, clock: fn() -> i64) -> EventFactory {
        self.clock = clock;
        self
    }

    fn base(&self, key: String, user: Option<Arc<User>>) -> EventBase {
        EventBase {
            creation_date: (self.clock)(),
            key,
            user,
        }
    }

    pub fn new_feature_request_event(
        &self,
        flag: &FlagEventProperties,
        user: Option<Arc<User>>,
        detail: EvaluationDetail,
        default: Option<Value>,
    ) -> FeatureRequestEvent {
        self.feature_request_event(flag, user, detail, default, None)
    }

    /// Evaluation of `flag` performed while evaluating `prereq_of`.
    pub fn new_prerequisite_event(
        &self,
        flag: &FlagEventProperties,
        user: Option<Arc<User>>,
        detail: EvaluationDetail,
        prereq_of: impl Into<String>,
    ) -> FeatureRequestEvent {
        self.feature_request_event(flag, user, detail, None, Some(prereq_of.into()))
    }

    /// Evaluation of a flag key the evaluator does not know. Counted as `unknown` in summaries.
    pub fn new_unknown_feature_request_event(
        &self,
        key: impl Into<String>,
        user: Option<Arc<User>>,
        default: Value,
        error_kind: EvaluationErrorKind,
    ) -> FeatureRequestEvent {
        FeatureRequestEvent {
            base: self.base(key.into(), user),
            variation: None,
            value: default.clone(),
            default: Some(default),
            version: None,
            prereq_of: None,
            track_events: false,
            debug_events_until_date: None,
            reason: self
                .include_reasons
                .then_some(EvaluationReason::Error { error_kind }),
        }
    }

    pub fn new_custom_event(
        &self,
        key: impl Into<String>,
        user: Option<Arc<User>>,
        data: impl Into<Value>,
        metric_value: Option<f64>,
    ) -> CustomEvent {
        CustomEvent {
            base: self.base(key.into(), user),
            data: data.into(),
            metric_value,
        }
    }

    pub fn new_identify_event(&self, user: Option<Arc<User>>) -> IdentifyEvent {
        let key = user
            .as_ref()
            .map(|user| user.key.clone())
            .unwrap_or_default();
        IdentifyEvent {
            base: self.base(key, user),
        }
    }

    fn feature_request_event(
        &self,
        flag: &FlagEventProperties,
        user: Option<Arc<User>>,
        detail: EvaluationDetail,
        default: Option<Value>,
        prereq_of: Option<String>,
    ) -> FeatureRequestEvent {
        FeatureRequestEvent {
            base: self.base(flag.key.clone(), user),
            variation: detail.variation_index,
            value: detail.value,
            default,
            version: flag.version,
            prereq_of,
            track_events: flag.track_events,
            debug_events_until_date: flag.debug_events_until_date,
            reason: if self.include_reasons {
                detail.reason
            } else {
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::{EventFactory, FlagEventProperties};
    use crate::{EvaluationDetail, EvaluationErrorKind, EvaluationReason, User};

    fn fixed_clock() -> i64 {
        1_000
    }

    #[test]
    fn feature_request_event_copies_flag_properties() {
        let factory = EventFactory::new(false).with_clock(fixed_clock);
        let flag = FlagEventProperties::new("flagkey")
            .with_version(11)
            .with_track_events(true)
            .with_debug_events_until_date(2_000);
        let detail = EvaluationDetail::new(json!("value"), Some(1), Some(EvaluationReason::Off));

        let event = factory.new_feature_request_event(
            &flag,
            Some(Arc::new(User::with_key("u"))),
            detail,
            Some(json!("default")),
        );

        assert_eq!(event.base.creation_date, 1_000);
        assert_eq!(event.base.key, "flagkey");
        assert_eq!(event.variation, Some(1));
        assert_eq!(event.version, Some(11));
        assert!(event.track_events);
        assert_eq!(event.debug_events_until_date, Some(2_000));
        assert_eq!(event.reason, None, "reasons are not included unless requested");
    }

    #[test]
    fn reasons_are_kept_when_requested() {
        let factory = EventFactory::new(true);
        let detail =
            EvaluationDetail::new(json!(true), Some(0), Some(EvaluationReason::Fallthrough));
        let event =
            factory.new_feature_request_event(&FlagEventProperties::new("f"), None, detail, None);
        assert_eq!(event.reason, Some(EvaluationReason::Fallthrough));
    }

    #[test]
    fn unknown_flag_event_serves_default() {
        let factory = EventFactory::new(true);
        let event = factory.new_unknown_feature_request_event(
            "missing",
            None,
            json!(3),
            EvaluationErrorKind::FlagNotFound,
        );
        assert_eq!(event.value, json!(3));
        assert_eq!(event.version, None);
        assert_eq!(
            event.reason,
            Some(EvaluationReason::Error {
                error_kind: EvaluationErrorKind::FlagNotFound
            })
        );
    }

    #[test]
    fn identify_event_key_is_user_key() {
        let factory = EventFactory::default();
        let event = factory.new_identify_event(Some(Arc::new(User::with_key("userkey"))));
        assert_eq!(event.base.key, "userkey");

        let event = factory.new_identify_event(None);
        assert_eq!(event.base.key, "");
    }

    #[test]
    fn prerequisite_event_records_parent() {
        let factory = EventFactory::default();
        let event = factory.new_prerequisite_event(
            &FlagEventProperties::new("child"),
            None,
            EvaluationDetail::new(json!(1), Some(0), None),
            "parent",
        );
        assert_eq!(event.prereq_of.as_deref(), Some("parent"));
    }
}
