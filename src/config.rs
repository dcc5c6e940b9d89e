//! Immutable configuration for the event pipeline.
use std::{collections::HashSet, time::Duration};

use url::Url;

use crate::{Error, Result};

/// Name and version of the SDK embedding the pipeline. Sent in `User-Agent` and in diagnostic
/// events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdkMetadata {
    pub name: &'static str,
    pub version: &'static str,
}

impl Default for SdkMetadata {
    fn default() -> SdkMetadata {
        SdkMetadata {
            name: "flag-events-rust",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Configuration for [`EventProcessor`](crate::EventProcessor).
///
/// The value is passed to the processor when it starts and never changes afterwards.
///
/// # Examples
/// ```
/// # use std::time::Duration;
/// # use flag_events::EventsConfig;
/// let config = EventsConfig::new("sdk-key")
///     .with_flush_interval(Duration::from_secs(2))
///     .with_inline_users_in_events(true)
///     .with_private_attribute_name("email");
/// ```
// Not implementing `Copy` as we may add non-copyable fields in the future.
#[derive(Debug, Clone)]
pub struct EventsConfig {
    /// SDK key sent in the `Authorization` header.
    pub sdk_key: String,
    /// Full URI that receives analytics event batches.
    ///
    /// Defaults to [`EventsConfig::DEFAULT_EVENTS_URI`].
    pub events_uri: String,
    /// Full URI that receives diagnostic events.
    ///
    /// Defaults to [`EventsConfig::DEFAULT_DIAGNOSTIC_URI`].
    pub diagnostic_uri: String,
    /// Bound of the command queue and of the pending output buffer. Events arriving while either
    /// is full are dropped.
    pub capacity: usize,
    /// How often buffered events are flushed automatically.
    pub flush_interval: Duration,
    /// How often the set of already-indexed user keys is forgotten.
    pub user_keys_flush_interval: Duration,
    /// Include the full (redacted) user in every feature and custom event instead of a bare
    /// `userKey` plus a separate index event.
    pub inline_users_in_events: bool,
    /// Treat every optional user attribute as private.
    pub all_attributes_private: bool,
    /// Attribute names that are private for every user.
    pub private_attribute_names: HashSet<String>,
    /// Do not send diagnostic events.
    pub diagnostic_opt_out: bool,
    /// Interval between periodic diagnostic events. Values below
    /// [`EventsConfig::MIN_DIAGNOSTIC_RECORDING_INTERVAL`] are raised to it.
    pub diagnostic_recording_interval: Duration,
    /// Timeout applied to every HTTP request.
    pub http_timeout: Duration,
    /// Upper bound on how long [`EventProcessor::close`](crate::EventProcessor::close) waits for
    /// the final flush to be delivered.
    pub shutdown_timeout: Duration,
    /// SDK name and version.
    pub sdk_metadata: SdkMetadata,
}

impl EventsConfig {
    /// Default value for [`EventsConfig::events_uri`].
    pub const DEFAULT_EVENTS_URI: &'static str = "https://events.launchdarkly.com/bulk";
    /// Default value for [`EventsConfig::diagnostic_uri`].
    pub const DEFAULT_DIAGNOSTIC_URI: &'static str = "https://events.launchdarkly.com/diagnostic";
    /// Default value for [`EventsConfig::capacity`].
    pub const DEFAULT_CAPACITY: usize = 10_000;
    /// Default value for [`EventsConfig::flush_interval`].
    pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
    /// Default value for [`EventsConfig::user_keys_flush_interval`].
    pub const DEFAULT_USER_KEYS_FLUSH_INTERVAL: Duration = Duration::from_secs(5 * 60);
    /// Default value for [`EventsConfig::diagnostic_recording_interval`].
    pub const DEFAULT_DIAGNOSTIC_RECORDING_INTERVAL: Duration = Duration::from_secs(15 * 60);
    /// Lowest accepted value for [`EventsConfig::diagnostic_recording_interval`].
    pub const MIN_DIAGNOSTIC_RECORDING_INTERVAL: Duration = Duration::from_secs(60);
    /// Default value for [`EventsConfig::http_timeout`].
    pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default value for [`EventsConfig::shutdown_timeout`].
    pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create a default configuration for the given SDK key.
    pub fn new(sdk_key: impl Into<String>) -> EventsConfig {
        EventsConfig {
            sdk_key: sdk_key.into(),
            events_uri: EventsConfig::DEFAULT_EVENTS_URI.to_owned(),
            diagnostic_uri: EventsConfig::DEFAULT_DIAGNOSTIC_URI.to_owned(),
            capacity: EventsConfig::DEFAULT_CAPACITY,
            flush_interval: EventsConfig::DEFAULT_FLUSH_INTERVAL,
            user_keys_flush_interval: EventsConfig::DEFAULT_USER_KEYS_FLUSH_INTERVAL,
            inline_users_in_events: false,
            all_attributes_private: false,
            private_attribute_names: HashSet::new(),
            diagnostic_opt_out: false,
            diagnostic_recording_interval: EventsConfig::DEFAULT_DIAGNOSTIC_RECORDING_INTERVAL,
            http_timeout: EventsConfig::DEFAULT_HTTP_TIMEOUT,
            shutdown_timeout: EventsConfig::DEFAULT_SHUTDOWN_TIMEOUT,
            sdk_metadata: SdkMetadata::default(),
        }
    }

    /// Override the events URI.
    pub fn with_events_uri(mut self, uri: impl Into<String>) -> EventsConfig {
        self.events_uri = uri.into();
        self
    }

    /// Override the diagnostics URI.
    pub fn with_diagnostic_uri(mut self, uri: impl Into<String>) -> EventsConfig {
        self.diagnostic_uri = uri.into();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> EventsConfig {
        self.capacity = capacity;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> EventsConfig {
        self.flush_interval = interval;
        self
    }

    pub fn with_user_keys_flush_interval(mut self, interval: Duration) -> EventsConfig {
        self.user_keys_flush_interval = interval;
        self
    }

    pub fn with_inline_users_in_events(mut self, inline: bool) -> EventsConfig {
        self.inline_users_in_events = inline;
        self
    }

    pub fn with_all_attributes_private(mut self, all_private: bool) -> EventsConfig {
        self.all_attributes_private = all_private;
        self
    }

    /// Mark `name` private for every user. Works for both standard and custom attributes.
    pub fn with_private_attribute_name(mut self, name: impl Into<String>) -> EventsConfig {
        self.private_attribute_names.insert(name.into());
        self
    }

    pub fn with_diagnostic_opt_out(mut self, opt_out: bool) -> EventsConfig {
        self.diagnostic_opt_out = opt_out;
        self
    }

    pub fn with_diagnostic_recording_interval(mut self, interval: Duration) -> EventsConfig {
        self.diagnostic_recording_interval = interval;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> EventsConfig {
        self.http_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> EventsConfig {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_sdk_metadata(mut self, sdk_metadata: SdkMetadata) -> EventsConfig {
        self.sdk_metadata = sdk_metadata;
        self
    }

    /// Diagnostic interval with the lower bound applied.
    pub(crate) fn effective_diagnostic_interval(&self) -> Duration {
        self.diagnostic_recording_interval
            .max(EventsConfig::MIN_DIAGNOSTIC_RECORDING_INTERVAL)
    }

    /// Parse both endpoint URIs.
    pub(crate) fn parsed_uris(&self) -> Result<(Url, Url)> {
        let events = Url::parse(&self.events_uri).map_err(Error::InvalidUri)?;
        let diagnostic = Url::parse(&self.diagnostic_uri).map_err(Error::InvalidUri)?;
        Ok((events, diagnostic))
    }

    pub(crate) fn user_agent(&self) -> String {
        format!("{}/{}", self.sdk_metadata.name, self.sdk_metadata.version)
    }
}
