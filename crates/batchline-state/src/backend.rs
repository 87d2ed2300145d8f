//! State backend trait definition.
//!
//! [`StateBackend`] defines the storage contract for source offsets, run
//! history, and rejected records. Model types live in
//! [`batchline_types::state`].

use batchline_types::state::{ErrorRecordRow, OffsetRecord, PipelineId, Revision, RunStats, RunStatus};

use crate::error;

/// Storage contract for pipeline state.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn StateBackend>`.
pub trait StateBackend: Send + Sync {
    /// Read the offset record for a (pipeline, revision) pair.
    ///
    /// Returns `Ok(None)` when no offset has been persisted yet.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get_offset(
        &self,
        pipeline: &PipelineId,
        revision: &Revision,
    ) -> error::Result<Option<OffsetRecord>>;

    /// Overwrite the offset record for a (pipeline, revision) pair.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn put_offset(
        &self,
        pipeline: &PipelineId,
        revision: &Revision,
        record: &OffsetRecord,
    ) -> error::Result<()>;

    /// Begin a new pipeline run, returning its unique ID.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn start_run(&self, pipeline: &PipelineId, revision: &Revision) -> error::Result<i64>;

    /// Finalize a pipeline run with status and aggregate stats.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats) -> error::Result<()>;

    /// Persist rejected records of a run. Returns the count inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn insert_error_records(
        &self,
        pipeline: &PipelineId,
        run_id: i64,
        records: &[ErrorRecordRow],
    ) -> error::Result<u64>;
}
