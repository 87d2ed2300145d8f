use std::path::Path;

use anyhow::{Context, Result};
use batchline_engine::config::types::RunnerConfig;
use batchline_engine::resolve;
use batchline_engine::{ProductionOffsetTracker, SourceOffsetTracker};

fn tracker(config: &RunnerConfig) -> Result<ProductionOffsetTracker> {
    let backend = resolve::create_state_backend(config)?;
    Ok(ProductionOffsetTracker::new(
        config.pipeline_id(),
        config.revision_id(),
        backend,
    ))
}

/// Execute `offset show`: print the committed offset.
pub fn show(config_path: &Path) -> Result<()> {
    let config = super::load_config(config_path)?;
    let offset = tracker(&config)?
        .get_offset()
        .context("Failed to read source offset")?;
    match offset {
        Some(offset) => println!("{offset}"),
        None => println!("(none)"),
    }
    Ok(())
}

/// Execute `offset reset`: store the null offset.
pub fn reset(config_path: &Path) -> Result<()> {
    let config = super::load_config(config_path)?;
    tracker(&config)?
        .reset_offset()
        .context("Failed to reset source offset")?;
    tracing::info!(
        pipeline = config.pipeline,
        revision = config.revision,
        "Source offset reset"
    );
    println!("Offset reset for {} revision {}", config.pipeline, config.revision);
    Ok(())
}
