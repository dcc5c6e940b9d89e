//! Wire representation of analytics events: one JSON object per entry of the POST body.
use serde::Serialize;
use serde_json::Value;
use serde_with::skip_serializing_none;

use super::{event_summarizer::EventSummary, EvaluationReason};
use crate::EventUser;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub(crate) enum OutputEvent {
    Identify(IdentifyOutput),
    Index(IndexOutput),
    Feature(FeatureOutput),
    Debug(FeatureOutput),
    Custom(CustomOutput),
    Summary(EventSummary),
}

impl OutputEvent {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            OutputEvent::Identify(_) => "identify",
            OutputEvent::Index(_) => "index",
            OutputEvent::Feature(_) => "feature",
            OutputEvent::Debug(_) => "debug",
            OutputEvent::Custom(_) => "custom",
            OutputEvent::Summary(_) => "summary",
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IdentifyOutput {
    pub creation_date: i64,
    pub key: Option<String>,
    pub user: Option<EventUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IndexOutput {
    pub creation_date: i64,
    pub user: EventUser,
}

/// Either the user inline or only its key. Absent entirely for events without a user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) enum UserRef {
    #[serde(rename = "user")]
    Inline(EventUser),
    #[serde(rename = "userKey")]
    Key(String),
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FeatureOutput {
    pub creation_date: i64,
    pub key: String,
    #[serialize_always]
    #[serde(flatten)]
    pub user: Option<UserRef>,
    pub version: Option<i32>,
    pub variation: Option<i32>,
    pub value: Value,
    pub default: Option<Value>,
    pub prereq_of: Option<String>,
    pub reason: Option<EvaluationReason>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CustomOutput {
    pub creation_date: i64,
    pub key: String,
    #[serialize_always]
    #[serde(flatten)]
    pub user: Option<UserRef>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
    pub metric_value: Option<f64>,
}
