//! Runner configuration model, deserialized from YAML.

use std::path::PathBuf;

use batchline_types::stage::StageInfo;
use batchline_types::state::{PipelineId, Revision};
use serde::{Deserialize, Serialize};

use crate::runner::PipelineContext;

/// Default record allowance of the source per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_revision() -> String {
    "0".to_string()
}

/// Top-level runner configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub version: String,
    pub pipeline: String,
    #[serde(default = "default_revision")]
    pub revision: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub snapshot_stages_output: bool,
    #[serde(default)]
    pub max_batches: Option<u64>,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    /// Stage instances in topological order.
    #[serde(default)]
    pub stages: Vec<StageInfo>,
}

impl RunnerConfig {
    #[must_use]
    pub fn pipeline_id(&self) -> PipelineId {
        PipelineId::new(self.pipeline.clone())
    }

    #[must_use]
    pub fn revision_id(&self) -> Revision {
        Revision::new(self.revision.clone())
    }

    /// Per-run settings handed to the runner.
    #[must_use]
    pub fn pipeline_context(&self) -> PipelineContext {
        PipelineContext {
            pipeline: self.pipeline_id(),
            revision: self.revision_id(),
            batch_size: self.batch_size,
            snapshot_stages_output: self.snapshot_stages_output,
            max_batches: self.max_batches,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackendKind {
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackendKind,
    /// Database file; in-memory when absent.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Directory holding `<pipeline>/<revision>/rules.json`. No rule
    /// monitoring when absent.
    #[serde(default)]
    pub root: Option<PathBuf>,
}
