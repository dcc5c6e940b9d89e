use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Why a flag evaluated to the value it did.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationReason {
    /// The flag is off and served its off variation.
    Off,
    /// No target or rule matched; the fallthrough variation was served.
    Fallthrough,
    /// The user was individually targeted.
    TargetMatch,
    /// The user matched a rule.
    #[serde(rename_all = "camelCase")]
    RuleMatch { rule_index: usize, rule_id: String },
    /// A prerequisite flag was off or did not serve the required variation.
    #[serde(rename_all = "camelCase")]
    PrerequisiteFailed { prerequisite_key: String },
    /// The flag could not be evaluated.
    #[serde(rename_all = "camelCase")]
    Error { error_kind: EvaluationErrorKind },
}

impl fmt::Display for EvaluationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationReason::Off => f.write_str("OFF"),
            EvaluationReason::Fallthrough => f.write_str("FALLTHROUGH"),
            EvaluationReason::TargetMatch => f.write_str("TARGET_MATCH"),
            EvaluationReason::RuleMatch {
                rule_index,
                rule_id,
            } => write!(f, "RULE_MATCH({rule_index},{rule_id})"),
            EvaluationReason::PrerequisiteFailed { prerequisite_key } => {
                write!(f, "PREREQUISITE_FAILED({prerequisite_key})")
            }
            EvaluationReason::Error { error_kind } => write!(f, "ERROR({error_kind})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationErrorKind {
    ClientNotReady,
    FlagNotFound,
    UserNotSpecified,
    MalformedFlag,
    WrongType,
    Exception,
}

impl fmt::Display for EvaluationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EvaluationErrorKind::ClientNotReady => "CLIENT_NOT_READY",
            EvaluationErrorKind::FlagNotFound => "FLAG_NOT_FOUND",
            EvaluationErrorKind::UserNotSpecified => "USER_NOT_SPECIFIED",
            EvaluationErrorKind::MalformedFlag => "MALFORMED_FLAG",
            EvaluationErrorKind::WrongType => "WRONG_TYPE",
            EvaluationErrorKind::Exception => "EXCEPTION",
        })
    }
}

/// Result of a flag evaluation as reported to the event pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationDetail<T = Value> {
    pub value: T,
    /// Index of the served variation. `None` when the default value was returned.
    pub variation_index: Option<i32>,
    pub reason: Option<EvaluationReason>,
}

impl<T> EvaluationDetail<T> {
    pub fn new(
        value: T,
        variation_index: Option<i32>,
        reason: Option<EvaluationReason>,
    ) -> EvaluationDetail<T> {
        EvaluationDetail {
            value,
            variation_index,
            reason,
        }
    }

    /// True if evaluation fell back to the application's default value.
    pub fn is_default_value(&self) -> bool {
        self.variation_index.is_none()
    }
}
