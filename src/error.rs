use std::sync::Arc;

use reqwest::StatusCode;

use crate::user::UserBuilderError;

/// Represents a result type for operations in this crate.
///
/// Only constructing a processor, shutting it down, and building a [`User`](crate::User) can fail
/// visibly. Everything that happens on the event path is absorbed by the pipeline and reported
/// through logging and diagnostics counters instead.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the event pipeline.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Events or diagnostics URI could not be parsed.
    #[error("invalid events uri configuration")]
    InvalidUri(#[source] url::ParseError),

    /// The collector rejected the SDK key (401/403) or returned another status that cannot succeed
    /// on retry. The processor stops sending for the rest of its lifetime.
    #[error("events collector rejected the request with {0}, sdk_key is likely invalid")]
    Unauthorized(StatusCode),

    /// A delivery attempt failed in a way that may succeed on retry: a 400, 408, 429 or 5xx
    /// status. `None` means the request never got a response.
    #[error("events delivery failed with status {0:?}")]
    TransientDelivery(Option<StatusCode>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// An individual event could not be serialized and was dropped.
    #[error("failed to serialize event")]
    Serialization(#[source] Arc<serde_json::Error>),

    /// The command queue was at capacity and the event was dropped.
    #[error("event queue is full")]
    QueueFull,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// A background worker thread panicked. This should normally never happen.
    #[error("event worker thread panicked")]
    WorkerPanicked,

    /// User could not be built.
    #[error(transparent)]
    InvalidUser(#[from] UserBuilderError),
}

impl Error {
    /// Whether a failed delivery is worth retrying with the same payload.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::TransientDelivery(_) | Error::Network(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Serialization(Arc::new(value))
    }
}

/// Classify a non-success HTTP status from the collector.
///
/// 400, 408 and 429 are retryable client errors; any other 4xx (notably 401 and 403) means the
/// request can never succeed. Everything else (5xx, unexpected 3xx) is retried.
pub(crate) fn status_error(status: StatusCode) -> Error {
    if is_http_error_recoverable(status) {
        Error::TransientDelivery(Some(status))
    } else {
        Error::Unauthorized(status)
    }
}

pub(crate) fn is_http_error_recoverable(status: StatusCode) -> bool {
    if status.is_client_error() {
        matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS
        )
    } else {
        true
    }
}
