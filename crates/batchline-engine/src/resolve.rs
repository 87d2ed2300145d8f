//! State backend and rule store creation from configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use batchline_state::{SqliteStateBackend, StateBackend};

use crate::config::types::{RunnerConfig, StateBackendKind};
use crate::rules::{FileRuleStore, RuleStore, RulesConfigLoader};

/// Open the configured state backend.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or initialised.
pub fn create_state_backend(config: &RunnerConfig) -> Result<Arc<dyn StateBackend>> {
    match config.state.backend {
        StateBackendKind::Sqlite => {
            let backend = if let Some(path) = &config.state.path {
                SqliteStateBackend::open(path)
                    .with_context(|| format!("Failed to open state DB {}", path.display()))?
            } else {
                tracing::warn!(
                    pipeline = config.pipeline,
                    "No state path configured, offsets will not survive the process"
                );
                SqliteStateBackend::in_memory().context("Failed to open in-memory state DB")?
            };
            Ok(Arc::new(backend) as Arc<dyn StateBackend>)
        }
    }
}

/// Rule store of the configuration, if rule monitoring is configured.
#[must_use]
pub fn create_rule_store(config: &RunnerConfig) -> Option<Arc<dyn RuleStore>> {
    config
        .rules
        .root
        .as_ref()
        .map(|root| Arc::new(FileRuleStore::new(root.clone())) as Arc<dyn RuleStore>)
}

/// Rule loader for the configured pipeline revision, if rule monitoring is
/// configured.
#[must_use]
pub fn create_rules_loader(config: &RunnerConfig) -> Option<RulesConfigLoader> {
    create_rule_store(config)
        .map(|store| RulesConfigLoader::new(config.pipeline_id(), config.revision_id(), store))
}

/// Open the state backend and report the outcome in the log.
#[must_use]
pub fn check_state_backend(config: &RunnerConfig) -> bool {
    match create_state_backend(config) {
        Ok(_) => {
            tracing::info!("State backend: OK");
            true
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "State backend: FAILED");
            false
        }
    }
}
