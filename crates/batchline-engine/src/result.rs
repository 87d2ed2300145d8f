//! Pipeline execution result types.

use crate::error_sink::ErrorSink;
use crate::stage_output::StageOutput;

/// Outcome of one batch.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub input_records: usize,
    pub output_records: usize,
    pub error_records: usize,
    pub error_messages: usize,
    /// Offset committed at the end of the batch; `None` once the source is
    /// exhausted.
    pub committed_offset: Option<String>,
    pub finished: bool,
    pub error_sink: ErrorSink,
    /// Stage outputs in completion order, present in preview runs.
    pub snapshots: Option<Vec<StageOutput>>,
}

/// Aggregate result of a pipeline run.
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    pub run_id: i64,
    pub batches: u64,
    pub input_records: u64,
    pub output_records: u64,
    pub error_records: u64,
    pub error_messages: u64,
    pub finished: bool,
    pub duration_secs: f64,
}

impl RunResult {
    pub(crate) fn add_batch(&mut self, batch: &BatchSummary) {
        self.batches += 1;
        self.input_records += batch.input_records as u64;
        self.output_records += batch.output_records as u64;
        self.error_records += batch.error_records as u64;
        self.error_messages += batch.error_messages as u64;
        self.finished = batch.finished;
    }
}
