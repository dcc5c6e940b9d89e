//! An HTTP client that posts analytics batches and diagnostic events to the collector.
use chrono::DateTime;
use derive_more::Display;
use reqwest::{header, Url};
use uuid::Uuid;

use crate::{error::status_error, EventsConfig, Result};

pub(crate) const EVENT_SCHEMA_HEADER: &str = "X-LaunchDarkly-Event-Schema";
pub(crate) const EVENT_SCHEMA_VERSION: &str = "3";
pub(crate) const PAYLOAD_ID_HEADER: &str = "X-LaunchDarkly-Payload-ID";

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventDataKind {
    /// A batch of analytics events. Retried once on recoverable failures.
    #[display("analytics events")]
    AnalyticsEvents,
    /// A single diagnostic event. Never retried.
    #[display("diagnostic event")]
    DiagnosticEvent,
}

impl EventDataKind {
    fn max_attempts(self) -> u32 {
        match self {
            EventDataKind::AnalyticsEvents => 2,
            EventDataKind::DiagnosticEvent => 1,
        }
    }
}

/// Outcome of a successful POST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DeliveryResult {
    /// Time reported by the server's `Date` header, in epoch milliseconds.
    pub server_time: Option<i64>,
}

/// Posts serialized payloads. Keep one instance per channel so the connection pool is reused.
#[derive(Debug, Clone)]
pub(crate) struct EventSender {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
    sdk_key: String,
    user_agent: String,
}

impl EventSender {
    pub(crate) fn new(config: &EventsConfig) -> Result<EventSender> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;

        Ok(EventSender {
            client,
            sdk_key: config.sdk_key.clone(),
            user_agent: config.user_agent(),
        })
    }

    /// POST `body` to `uri`.
    ///
    /// Analytics batches that fail with a recoverable error are retried exactly once, immediately,
    /// with the same body and payload id. The error of the last attempt is returned.
    pub(crate) async fn send_event_data(
        &self,
        kind: EventDataKind,
        uri: &Url,
        body: &[u8],
        payload_id: Option<Uuid>,
    ) -> Result<DeliveryResult> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.post(kind, uri, body, payload_id).await {
                Ok(result) => return Ok(result),
                Err(err) if err.is_recoverable() && attempt < kind.max_attempts() => {
                    log::warn!(target: "flag_events", "error sending {kind}: {err}, will retry");
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn post(
        &self,
        kind: EventDataKind,
        uri: &Url,
        body: &[u8],
        payload_id: Option<Uuid>,
    ) -> Result<DeliveryResult> {
        let mut request = self
            .client
            .post(uri.clone())
            .header(header::AUTHORIZATION, &self.sdk_key)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::USER_AGENT, &self.user_agent)
            .body(body.to_vec());

        if kind == EventDataKind::AnalyticsEvents {
            request = request.header(EVENT_SCHEMA_HEADER, EVENT_SCHEMA_VERSION);
            if let Some(payload_id) = payload_id {
                request = request.header(PAYLOAD_ID_HEADER, payload_id.to_string());
            }
        }

        log::debug!(target: "flag_events", "posting {kind} ({} bytes)", body.len());
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status));
        }

        let server_time = response
            .headers()
            .get(header::DATE)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_http_date);

        Ok(DeliveryResult { server_time })
    }
}

/// Parse an HTTP `Date` header (IMF-fixdate, e.g. `Tue, 15 Nov 1994 08:12:31 GMT`).
fn parse_http_date(value: &str) -> Option<i64> {
    match DateTime::parse_from_rfc2822(value) {
        Ok(date) => Some(date.timestamp_millis()),
        Err(err) => {
            log::debug!(target: "flag_events", "ignoring unparsable Date header {value:?}: {err}");
            None
        }
    }
}
