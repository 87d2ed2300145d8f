use std::path::Path;

use anyhow::Result;
use batchline_engine::graph::PipeGraph;
use batchline_engine::resolve;

/// Execute the `check` command: validate config, stage graph, and state.
pub fn execute(config_path: &Path) -> Result<()> {
    let config = super::load_config(config_path)?;
    println!("Configuration:     OK");

    if config.stages.is_empty() {
        println!("Stage graph:       SKIPPED (no stages declared)");
    } else {
        let graph = PipeGraph::build(&config.stages)?;
        println!(
            "Stage graph:       OK ({} stages, {} pipes)",
            graph.stage_pipes().count(),
            graph.pipes().len()
        );
    }

    match resolve::create_rule_store(&config) {
        Some(_) => println!("Rule store:        OK"),
        None => println!("Rule store:        NOT CONFIGURED"),
    }

    if resolve::check_state_backend(&config) {
        println!("State backend:     OK");
        println!("\nAll checks passed.");
        Ok(())
    } else {
        println!("State backend:     FAILED");
        anyhow::bail!("One or more checks failed")
    }
}
