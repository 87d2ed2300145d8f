//! Monitoring rule retrieval and change detection.
//!
//! A [`RuleStore`] hands out immutable [`RuleDefinitions`] snapshots. The
//! [`RulesConfigLoader`] polls it once per batch and, whenever a different
//! snapshot instance comes back, diffs it against the previous one and pushes
//! a [`RulesConfigurationChangeRequest`] to the observer.

mod detector;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use batchline_types::rules::RuleDefinitions;
use batchline_types::state::{PipelineId, Revision};

pub use detector::{detect_changes, RulesConfigLoader, RulesConfigurationChangeRequest};
pub use store::{FileRuleStore, InMemoryRuleStore, RULES_FILE_NAME};

/// Rule store failures. Propagated unchanged by the loader.
#[derive(Debug, thiserror::Error)]
pub enum RuleStoreError {
    #[error("rule store unavailable: {0}")]
    Unavailable(String),

    #[error("failed to read rules from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse rules in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Source of rule definition snapshots.
///
/// Implementations return the same `Arc` for as long as the rules are
/// unchanged and a fresh instance once anything changes.
pub trait RuleStore: Send + Sync {
    /// Current rules of a pipeline revision.
    ///
    /// # Errors
    ///
    /// Returns [`RuleStoreError`] when the rules cannot be read.
    fn retrieve_rules(
        &self,
        pipeline: &PipelineId,
        revision: &Revision,
    ) -> Result<Arc<RuleDefinitions>, RuleStoreError>;
}
