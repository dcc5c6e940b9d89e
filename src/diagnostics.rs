//! Diagnostic events: a one-off description of the SDK configuration plus periodic statistics
//! about the event pipeline itself.
use serde::{Deserialize, Serialize};
use serde_json::Value;

mod diagnostic_store;
pub(crate) mod diagnostics_thread;

pub use diagnostic_store::{DefaultDiagnosticStore, DiagnosticStore};

/// Which of the two diagnostic payloads an event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    #[serde(rename = "diagnostic-init")]
    Init,
    #[serde(rename = "diagnostic")]
    Periodic,
}

/// A diagnostic event ready to be posted.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticEvent {
    pub kind: DiagnosticKind,
    /// Milliseconds since the Unix epoch.
    pub creation_date: i64,
    /// Full JSON body, including `kind`.
    pub json: Value,
}
