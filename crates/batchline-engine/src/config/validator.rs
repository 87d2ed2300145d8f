//! Semantic validation for parsed runner configuration values.

use anyhow::{bail, Result};

use crate::config::types::RunnerConfig;
use crate::graph::PipeGraph;

/// Validate a parsed runner configuration.
///
/// # Errors
///
/// Returns an error listing every validation failure.
pub fn validate_config(config: &RunnerConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported config version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.pipeline.trim().is_empty() {
        errors.push("Pipeline name must not be empty".to_string());
    }

    if config.revision.trim().is_empty() {
        errors.push("Revision must not be empty".to_string());
    }

    if config.batch_size == 0 {
        errors.push("batch_size must be at least 1".to_string());
    }

    if config.max_batches == Some(0) {
        errors.push("max_batches must be at least 1 when set".to_string());
    }

    if !config.stages.is_empty() {
        if let Err(e) = PipeGraph::build(&config.stages) {
            errors.push(e.to_string());
        }
    }

    if !errors.is_empty() {
        bail!(
            "Configuration validation failed:\n  - {}",
            errors.join("\n  - ")
        );
    }
    Ok(())
}
