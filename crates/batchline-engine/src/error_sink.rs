//! Per-batch collector of rejected records and stage error messages.

use std::collections::BTreeMap;

use batchline_types::error::{ErrorMessage, ErrorRecord};

/// Rejected records and stage errors, keyed by stage instance name.
///
/// Created empty for every batch and discarded with it.
#[derive(Debug, Clone, Default)]
pub struct ErrorSink {
    error_records: BTreeMap<String, Vec<ErrorRecord>>,
    stage_errors: BTreeMap<String, Vec<ErrorMessage>>,
}

impl ErrorSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record(&mut self, stage: &str, record: ErrorRecord) {
        self.error_records
            .entry(stage.to_string())
            .or_default()
            .push(record);
    }

    pub fn add_stage_error(&mut self, stage: &str, message: ErrorMessage) {
        self.stage_errors
            .entry(stage.to_string())
            .or_default()
            .push(message);
    }

    /// Records rejected by `stage` so far in this batch.
    #[must_use]
    pub fn error_records(&self, stage: &str) -> &[ErrorRecord] {
        self.error_records.get(stage).map_or(&[], Vec::as_slice)
    }

    /// Error messages reported by `stage` so far in this batch.
    #[must_use]
    pub fn stage_errors(&self, stage: &str) -> &[ErrorMessage] {
        self.stage_errors.get(stage).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn total_error_records(&self) -> usize {
        self.error_records.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn total_error_messages(&self) -> usize {
        self.stage_errors.values().map(Vec::len).sum()
    }

    /// Number of stages with at least one error record or message.
    #[must_use]
    pub fn size(&self) -> usize {
        self.error_records
            .keys()
            .chain(self.stage_errors.keys().filter(|k| !self.error_records.contains_key(*k)))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.error_records.is_empty() && self.stage_errors.is_empty()
    }

    /// Iterate `(stage, records)` in stage-name order.
    pub fn iter_error_records(&self) -> impl Iterator<Item = (&str, &[ErrorRecord])> {
        self.error_records
            .iter()
            .map(|(stage, records)| (stage.as_str(), records.as_slice()))
    }

    /// Iterate `(stage, messages)` in stage-name order.
    pub fn iter_stage_errors(&self) -> impl Iterator<Item = (&str, &[ErrorMessage])> {
        self.stage_errors
            .iter()
            .map(|(stage, messages)| (stage.as_str(), messages.as_slice()))
    }
}
