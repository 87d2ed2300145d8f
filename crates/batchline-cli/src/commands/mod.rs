pub mod check;
pub mod offset;
pub mod rules;

use std::path::Path;

use anyhow::{Context, Result};
use batchline_engine::config::types::RunnerConfig;
use batchline_engine::config::{parser, validator};

/// Parse and validate a runner config file.
fn load_config(path: &Path) -> Result<RunnerConfig> {
    let config = parser::parse_config(path)
        .with_context(|| format!("Failed to parse config: {}", path.display()))?;
    validator::validate_config(&config)?;
    Ok(config)
}
