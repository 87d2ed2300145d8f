//! Pipeline error model.
//!
//! [`BatchError`] covers graph and lane-discipline violations detected while
//! a batch circulates; they point at an invalid pipeline graph and abort the
//! current batch. [`PipelineError`] is the crate-wide error, adding
//! persistence, rule store, and stage failures.

use batchline_state::StateError;
use batchline_types::state::{PipelineId, Revision};

use crate::rules::RuleStoreError;

/// Lane discipline and graph construction violations within one batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    /// A stage instance was started twice in the same batch.
    #[error("the stage '{0}' has been processed already")]
    StageAlreadyProcessed(String),

    /// A lane was consumed, moved, or combined without holding a payload.
    #[error("lane '{0}' does not exist")]
    MissingLane(String),

    /// Several lanes were referenced without holding a payload.
    #[error("lanes {0:?} do not exist")]
    MissingLanes(Vec<String>),

    /// The same lane was listed twice where each lane may appear once.
    #[error("lane '{0}' is listed more than once")]
    DuplicateLane(String),

    /// A fan-out destination is unknown to the batch.
    #[error("destination lane '{0}' is unknown to the batch")]
    UnknownLane(String),

    /// The stage-naming and pipe-naming output lane lists differ in length.
    #[error("stage '{stage}' declares {stage_lanes} output lanes but its pipe has {pipe_lanes}")]
    LaneCountMismatch {
        stage: String,
        stage_lanes: usize,
        pipe_lanes: usize,
    },

    /// A stage wrote to a lane it does not declare.
    #[error("stage '{stage}' has no output lane '{lane}'")]
    UnknownStageLane { stage: String, lane: String },

    /// A stage with several output lanes added a record without naming one.
    #[error("stage '{0}' has several output lanes, a lane must be given")]
    LaneRequired(String),

    /// A source emitted more records than the batch size allows.
    #[error("stage '{stage}' exceeded its record allowance of {allowance}")]
    RecordAllowanceExceeded { stage: String, allowance: usize },
}

/// Errors surfaced by the engine.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Invalid graph or lane discipline violation; aborts the batch.
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// Offset could not be read or written; aborts the run.
    #[error("offset persistence failed for pipeline '{pipeline}' revision '{revision}': {source}")]
    OffsetPersistence {
        pipeline: PipelineId,
        revision: Revision,
        #[source]
        source: StateError,
    },

    /// Run history or error record storage failed.
    #[error("state backend error: {0}")]
    State(#[from] StateError),

    /// Rule definitions could not be retrieved.
    #[error(transparent)]
    RuleStore(#[from] RuleStoreError),

    /// A stage implementation failed as a whole (not a record-level error).
    #[error("stage '{stage}' failed: {source:#}")]
    Stage {
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    /// A transfer object was built in violation of its contract.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// Configuration or wiring problem outside a single batch.
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl PipelineError {
    /// Returns `true` when the error must stop the whole run rather than
    /// just the current batch.
    #[must_use]
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            Self::OffsetPersistence { .. } | Self::State(_) | Self::Infrastructure(_)
        )
    }

    /// Returns the batch error if this is a `Batch` variant.
    #[must_use]
    pub fn as_batch_error(&self) -> Option<&BatchError> {
        match self {
            Self::Batch(e) => Some(e),
            _ => None,
        }
    }
}
