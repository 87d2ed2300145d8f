//! Pipe graph: the ordered list of pipes one batch flows through.
//!
//! Each configured stage becomes a [`StagePipe`]. Every stage output lane is
//! followed by an observer pipe (sampling hook) and a multiplexer pipe (one
//! copy per consumer). Stages with several input lanes get a combiner pipe
//! merging them into one lane. Pipes are ordered so that every lane is
//! produced before it is consumed.

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};
use batchline_types::lane;
use batchline_types::stage::{StageInfo, StageType};

/// A stage instance with its lanes translated to pipe naming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePipe {
    stage: StageInfo,
    input_lanes: Vec<String>,
    output_lanes: Vec<String>,
}

impl StagePipe {
    /// Build a stage pipe from explicit pipe-naming lanes.
    ///
    /// `output_lanes` must correspond position by position to
    /// `stage.output_lanes`.
    #[must_use]
    pub fn new(stage: StageInfo, input_lanes: Vec<String>, output_lanes: Vec<String>) -> Self {
        Self {
            stage,
            input_lanes,
            output_lanes,
        }
    }

    #[must_use]
    pub fn stage(&self) -> &StageInfo {
        &self.stage
    }

    #[must_use]
    pub fn instance_name(&self) -> &str {
        &self.stage.instance_name
    }

    #[must_use]
    pub fn stage_type(&self) -> StageType {
        self.stage.stage_type
    }

    /// Input lanes, pipe naming.
    #[must_use]
    pub fn input_lanes(&self) -> &[String] {
        &self.input_lanes
    }

    /// Output lanes, pipe naming.
    #[must_use]
    pub fn output_lanes(&self) -> &[String] {
        &self.output_lanes
    }
}

/// A node of the pipe graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pipe {
    /// Runs a stage.
    Stage(StagePipe),
    /// Renames a stage output lane and exposes it to the observer.
    Observer {
        stage: String,
        input: String,
        output: String,
    },
    /// Hands a lane to every consumer, copying records per consumer.
    Multiplexer { input: String, outputs: Vec<String> },
    /// Merges the input lanes of a multi-input stage.
    Combiner {
        stage: String,
        inputs: Vec<String>,
        output: String,
    },
}

/// Validated, ordered pipes of one pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipeGraph {
    pipes: Vec<Pipe>,
}

impl PipeGraph {
    /// Build the pipe graph for `stages`, given in topological order.
    ///
    /// # Errors
    ///
    /// Returns an error listing every validation failure: no or several
    /// sources, a source that is not first, duplicate instance or lane names,
    /// invalid lane names, inputs not produced by an earlier stage, or
    /// lanes on the wrong side of a source/target.
    pub fn build(stages: &[StageInfo]) -> Result<Self> {
        validate_stages(stages)?;

        let mut consumers: HashMap<&str, Vec<&str>> = HashMap::new();
        for stage in stages {
            for input in &stage.input_lanes {
                consumers
                    .entry(input.as_str())
                    .or_default()
                    .push(stage.instance_name.as_str());
            }
        }

        let mut pipes = Vec::new();
        for stage in stages {
            let name = stage.instance_name.as_str();
            let routed: Vec<String> = stage
                .input_lanes
                .iter()
                .map(|l| lane::multiplexer_lane(l, name))
                .collect();

            let input_lanes = if routed.len() > 1 {
                let output = lane::combiner_lane(name);
                pipes.push(Pipe::Combiner {
                    stage: name.to_string(),
                    inputs: routed,
                    output: output.clone(),
                });
                vec![output]
            } else {
                routed
            };

            let output_lanes: Vec<String> = stage.output_lanes.iter().map(|l| lane::stage_out(l)).collect();
            pipes.push(Pipe::Stage(StagePipe::new(stage.clone(), input_lanes, output_lanes)));

            for out in &stage.output_lanes {
                let observed = lane::observer_lane(out);
                pipes.push(Pipe::Observer {
                    stage: name.to_string(),
                    input: lane::stage_out(out),
                    output: observed.clone(),
                });
                let outputs: Vec<String> = consumers
                    .get(out.as_str())
                    .map(|cs| cs.iter().map(|c| lane::multiplexer_lane(out, c)).collect())
                    .unwrap_or_default();
                pipes.push(Pipe::Multiplexer {
                    input: observed,
                    outputs,
                });
            }
        }

        Ok(Self { pipes })
    }

    #[must_use]
    pub fn pipes(&self) -> &[Pipe] {
        &self.pipes
    }

    /// Stage pipes in execution order.
    pub fn stage_pipes(&self) -> impl Iterator<Item = &StagePipe> {
        self.pipes.iter().filter_map(|p| match p {
            Pipe::Stage(sp) => Some(sp),
            _ => None,
        })
    }

    #[must_use]
    pub fn stage_pipe(&self, instance_name: &str) -> Option<&StagePipe> {
        self.stage_pipes().find(|sp| sp.instance_name() == instance_name)
    }
}

fn validate_stages(stages: &[StageInfo]) -> Result<()> {
    let mut errors = Vec::new();

    if stages.is_empty() {
        bail!("Pipeline must define at least one stage");
    }

    let source_count = stages
        .iter()
        .filter(|s| s.stage_type == StageType::Source)
        .count();
    if source_count != 1 {
        errors.push(format!("Pipeline must have exactly one source, found {source_count}"));
    }
    if stages[0].stage_type != StageType::Source {
        errors.push(format!(
            "First stage '{}' must be the source",
            stages[0].instance_name
        ));
    }

    let mut names = HashSet::new();
    let mut produced: HashSet<&str> = HashSet::new();
    for stage in stages {
        let name = stage.instance_name.as_str();
        if !lane::is_valid_stage_lane(name) {
            errors.push(format!("Invalid stage instance name '{name}'"));
        }
        if !names.insert(name) {
            errors.push(format!("Duplicate stage instance name '{name}'"));
        }

        match stage.stage_type {
            StageType::Source if !stage.input_lanes.is_empty() => {
                errors.push(format!("Source '{name}' must not have input lanes"));
            }
            StageType::Target if !stage.output_lanes.is_empty() => {
                errors.push(format!("Target '{name}' must not have output lanes"));
            }
            StageType::Processor | StageType::Target if stage.input_lanes.is_empty() => {
                errors.push(format!("Stage '{name}' must have at least one input lane"));
            }
            _ => {}
        }

        let mut seen_inputs = HashSet::new();
        for input in &stage.input_lanes {
            if !seen_inputs.insert(input.as_str()) {
                errors.push(format!("Stage '{name}' reads lane '{input}' more than once"));
            }
            if !produced.contains(input.as_str()) {
                errors.push(format!(
                    "Stage '{name}' reads lane '{input}' which no earlier stage produces"
                ));
            }
        }
        for output in &stage.output_lanes {
            if !lane::is_valid_stage_lane(output) {
                errors.push(format!("Stage '{name}' has invalid output lane '{output}'"));
            }
            if !produced.insert(output.as_str()) {
                errors.push(format!("Lane '{output}' is produced by more than one stage"));
            }
        }
    }

    if !errors.is_empty() {
        bail!("Invalid pipeline graph:\n  - {}", errors.join("\n  - "));
    }
    Ok(())
}
