//! Persistence of rejected records collected during a batch.

use batchline_state::StateBackend;
use batchline_types::state::{ErrorRecordRow, PipelineId};

use crate::error_sink::ErrorSink;

/// Flatten the rejected records of `sink` into storage rows.
pub(crate) fn error_record_rows(sink: &ErrorSink, failed_at: &str) -> Vec<ErrorRecordRow> {
    sink.iter_error_records()
        .flat_map(|(stage, records)| {
            records.iter().map(move |rejected| ErrorRecordRow {
                stage_name: stage.to_string(),
                record_json: rejected
                    .record
                    .to_json()
                    .unwrap_or_else(|e| format!("{{\"serialization_error\":\"{e}\"}}")),
                error_code: rejected.error_code.clone(),
                error_message: rejected.error_message.clone(),
                failed_at: failed_at.to_string(),
            })
        })
        .collect()
}

/// Persist the rejected records of a batch. Failures are logged, not
/// returned: losing error records never fails the run.
pub(crate) fn persist_error_records(
    state_backend: &dyn StateBackend,
    pipeline: &PipelineId,
    run_id: i64,
    sink: &ErrorSink,
) {
    if sink.total_error_records() == 0 {
        return;
    }

    let rows = error_record_rows(sink, &chrono::Utc::now().to_rfc3339());
    let error_count = rows.len();

    match state_backend.insert_error_records(pipeline, run_id, &rows) {
        Ok(inserted) => {
            tracing::info!(
                pipeline = pipeline.as_str(),
                error_records = inserted,
                "Persisted error records to state backend"
            );
        }
        Err(e) => {
            tracing::error!(
                pipeline = pipeline.as_str(),
                error_count,
                error = %e,
                "Failed to persist error records"
            );
        }
    }
}
