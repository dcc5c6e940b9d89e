//! Aggregates flag evaluations into per-flag counters over a time window.
use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use serde_with::skip_serializing_none;

use super::FeatureRequestEvent;

/// Body of a `summary` wire event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EventSummary {
    pub start_date: i64,
    pub end_date: i64,
    pub features: BTreeMap<String, FlagSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct FlagSummary {
    /// Default value of the most recent evaluation of this flag.
    pub default: Value,
    /// In order of first appearance.
    pub counters: Vec<FlagCounter>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct FlagCounter {
    pub value: Value,
    pub variation: Option<i32>,
    pub version: Option<i32>,
    pub count: u64,
    /// `Some(true)` for evaluations of a flag that was not found.
    pub unknown: Option<bool>,
}

impl FlagCounter {
    fn matches(&self, variation: Option<i32>, value: &Value, version: Option<i32>) -> bool {
        self.variation == variation && self.version == version && self.value == *value
    }
}

/// Owned by the dispatcher; never shared.
#[derive(Debug, Default)]
pub(crate) struct EventSummarizer {
    start_date: i64,
    end_date: i64,
    features: BTreeMap<String, FlagSummary>,
}

impl EventSummarizer {
    pub(crate) fn new() -> EventSummarizer {
        EventSummarizer::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub(crate) fn summarize_event(&mut self, event: &FeatureRequestEvent) {
        self.record(
            &event.base.key,
            event.default.as_ref(),
            event.variation,
            &event.value,
            event.version,
            event.base.creation_date,
        );
    }

    /// Count one evaluation and widen the window to cover `creation_date`.
    pub(crate) fn record(
        &mut self,
        flag_key: &str,
        default: Option<&Value>,
        variation: Option<i32>,
        value: &Value,
        version: Option<i32>,
        creation_date: i64,
    ) {
        if self.is_empty() {
            self.start_date = creation_date;
            self.end_date = creation_date;
        } else {
            self.start_date = self.start_date.min(creation_date);
            self.end_date = self.end_date.max(creation_date);
        }

        let flag = self
            .features
            .entry(flag_key.to_owned())
            .or_insert_with(|| FlagSummary {
                default: Value::Null,
                counters: Vec::new(),
            });
        flag.default = default.cloned().unwrap_or(Value::Null);

        match flag
            .counters
            .iter_mut()
            .find(|counter| counter.matches(variation, value, version))
        {
            Some(counter) => counter.count += 1,
            None => flag.counters.push(FlagCounter {
                value: value.clone(),
                variation,
                version,
                count: 1,
                unknown: version.is_none().then_some(true),
            }),
        }
    }

    /// Take the accumulated summary and start a new window. `None` if nothing was recorded.
    pub(crate) fn reset(&mut self) -> Option<EventSummary> {
        if self.is_empty() {
            return None;
        }
        let summary = EventSummary {
            start_date: self.start_date,
            end_date: self.end_date,
            features: std::mem::take(&mut self.features),
        };
        self.start_date = 0;
        self.end_date = 0;
        Some(summary)
    }
}
