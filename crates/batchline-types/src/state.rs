//! State backend model types.
//!
//! Pure data types used by `StateBackend`
//! implementations. Kept in the types crate so both the engine and the state
//! crate can share them without circular dependencies.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque pipeline identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(String);

impl PipelineId {
    /// Create a new pipeline identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PipelineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for PipelineId {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

/// Pipeline configuration revision (e.g. `"0"`, `"12"`).
///
/// Offsets and rules are scoped per (pipeline, revision) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    /// Create a new revision.
    #[must_use]
    pub fn new(rev: impl Into<String>) -> Self {
        Self(rev.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for Revision {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

// ---------------------------------------------------------------------------
// Run tracking
// ---------------------------------------------------------------------------

/// Terminal status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate statistics for a completed pipeline run, summed over batches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub batches: u64,
    pub input_records: u64,
    pub output_records: u64,
    pub error_records: u64,
    pub error_messages: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

// ---------------------------------------------------------------------------
// Offsets
// ---------------------------------------------------------------------------

/// Durable source offset for a (pipeline, revision) pair.
///
/// `offset == None` is the "source exhausted / never read" sentinel.
/// `updated_at` is an ISO-8601 UTC string (e.g. `"2026-01-15T10:00:00Z"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetRecord {
    pub offset: Option<String>,
    pub updated_at: String,
}

impl OffsetRecord {
    /// Record holding the null offset.
    #[must_use]
    pub fn null(updated_at: impl Into<String>) -> Self {
        Self {
            offset: None,
            updated_at: updated_at.into(),
        }
    }

    /// Record holding `offset`.
    #[must_use]
    pub fn new(offset: Option<String>, updated_at: impl Into<String>) -> Self {
        Self {
            offset,
            updated_at: updated_at.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted error records
// ---------------------------------------------------------------------------

/// A rejected record as written to the error record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecordRow {
    /// Stage instance that rejected the record.
    pub stage_name: String,
    /// JSON-serialized record (header and value).
    pub record_json: String,
    /// Error code reported by the stage.
    pub error_code: String,
    /// Human-readable error description.
    pub error_message: String,
    /// ISO-8601 UTC time at which the record was persisted.
    pub failed_at: String,
}
