//! Analytics event pipeline for feature flag SDKs.
//!
//! # Overview
//!
//! An SDK creates one [`EventProcessor`] per client and hands it every [`Event`] it produces:
//! feature evaluations, `identify` calls and custom `track` calls. The processor runs on a
//! background thread where it
//!
//! - counts evaluations into a per-flag summary that is sent once per flush,
//! - emits full `feature` events for flags with event tracking enabled, and `debug` events while a
//!   flag is inside its debug window,
//! - sends each distinct user once in an `index` event (see [`UserDeduplicator`]) so that other
//!   events can refer to the user by key,
//! - redacts private user attributes (see [`EventUser`]),
//! - posts batches to the events collector, retrying once on transient failures.
//!
//! Events are constructed with an [`EventFactory`]. Users are built with [`User::builder`].
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum. Only [`EventProcessor::start`],
//! [`EventProcessor::close`] and [`UserBuilder::build`] return errors. Nothing on the event path
//! is reported to the caller: failures are logged, dropped events are counted, and an
//! authorization failure permanently disables delivery.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate with the `flag_events`
//! target. Consider integrating a `log`-compatible logger implementation for better visibility
//! into pipeline operations.

#![warn(rustdoc::missing_crate_level_docs)]

mod config;
mod error;
mod event_processor;
mod event_sender;
mod event_user;
mod user;
mod user_deduplicator;

pub mod diagnostics;
pub mod events;

pub use config::{EventsConfig, SdkMetadata};
pub use diagnostics::{DefaultDiagnosticStore, DiagnosticEvent, DiagnosticStore};
pub use error::{Error, Result};
pub use event_processor::EventProcessor;
pub use event_user::EventUser;
pub use events::{
    CustomEvent, EvaluationDetail, EvaluationErrorKind, EvaluationReason, Event, EventBase,
    EventFactory, FeatureRequestEvent, FlagEventProperties, IdentifyEvent,
};
pub use user::{User, UserAttribute, UserBuilder, UserBuilderError};
pub use user_deduplicator::{DefaultUserDeduplicator, UserDeduplicator};
