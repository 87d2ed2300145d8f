//! Record-level and stage-level error values.
//!
//! These are data, not Rust errors: a stage that rejects a record or reports
//! a problem keeps running, and the values end up in the engine's error sink.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::record::Record;

/// Stage-level error message reported during a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub code: String,
    pub message: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
}

impl ErrorMessage {
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            timestamp_ms,
        }
    }
}

impl fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// A record rejected by a stage, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub record: Record,
    pub error_code: String,
    pub error_message: String,
}

impl ErrorRecord {
    #[must_use]
    pub fn new(record: Record, error_code: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            record,
            error_code: error_code.into(),
            error_message: error_message.into(),
        }
    }
}
