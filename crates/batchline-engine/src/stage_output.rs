//! Captured output of one stage for one batch, used for inspection and for
//! replaying a stage without running it.

use std::collections::BTreeMap;

use batchline_types::error::{ErrorMessage, ErrorRecord};
use batchline_types::lane;
use batchline_types::record::Record;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::error_sink::ErrorSink;

/// Immutable snapshot of a stage's emitted lanes (stage naming) and the
/// errors it reported in the same batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    instance_name: String,
    output: BTreeMap<String, Vec<Record>>,
    error_records: Vec<ErrorRecord>,
    stage_errors: Vec<ErrorMessage>,
}

impl StageOutput {
    /// Build a stage output.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Precondition`] when the instance name is
    /// empty or an output key is not a stage-naming lane.
    pub fn new(
        instance_name: impl Into<String>,
        output: BTreeMap<String, Vec<Record>>,
        error_records: Vec<ErrorRecord>,
        stage_errors: Vec<ErrorMessage>,
    ) -> Result<Self, PipelineError> {
        let instance_name = instance_name.into();
        if instance_name.trim().is_empty() {
            return Err(PipelineError::Precondition(
                "stage output requires an instance name".to_string(),
            ));
        }
        if let Some(bad) = output.keys().find(|l| !lane::is_valid_stage_lane(l)) {
            return Err(PipelineError::Precondition(format!(
                "stage output of '{instance_name}' must be keyed by stage lane names, got '{bad}'"
            )));
        }
        Ok(Self {
            instance_name,
            output,
            error_records,
            stage_errors,
        })
    }

    /// Capture `output` together with whatever `sink` holds for the stage.
    ///
    /// # Errors
    ///
    /// Same as [`StageOutput::new`].
    pub fn from_error_sink(
        instance_name: &str,
        output: BTreeMap<String, Vec<Record>>,
        sink: &ErrorSink,
    ) -> Result<Self, PipelineError> {
        Self::new(
            instance_name,
            output,
            sink.error_records(instance_name).to_vec(),
            sink.stage_errors(instance_name).to_vec(),
        )
    }

    #[must_use]
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// Emitted records keyed by stage-naming lane.
    #[must_use]
    pub fn output(&self) -> &BTreeMap<String, Vec<Record>> {
        &self.output
    }

    #[must_use]
    pub fn error_records(&self) -> &[ErrorRecord] {
        &self.error_records
    }

    #[must_use]
    pub fn stage_errors(&self) -> &[ErrorMessage] {
        &self.stage_errors
    }
}
