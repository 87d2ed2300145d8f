use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use batchline_engine::rules::detect_changes;
use batchline_types::rules::RuleDefinitions;

fn read_rules(path: &Path) -> Result<RuleDefinitions> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read rules file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse rules file: {}", path.display()))
}

/// Execute `rules diff`: print what moving from `previous` to `next` tears
/// down and resizes.
pub fn diff(previous_path: &Path, next_path: &Path) -> Result<()> {
    let previous = read_rules(previous_path)?;
    let next = Arc::new(read_rules(next_path)?);
    let request = detect_changes(Some(&previous), &next);
    tracing::debug!(
        rules_to_remove = request.rules_to_remove().len(),
        alerts_to_remove = request.metric_alerts_to_remove().len(),
        "Computed rule change request"
    );
    println!("{}", serde_json::to_string_pretty(&request)?);
    Ok(())
}
