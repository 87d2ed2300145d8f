//! Stage descriptors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Role of a configured stage in the pipeline graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    /// Reads records from outside the pipeline; bounded by the batch size.
    Source,
    /// Transforms records from its input lanes into its output lanes.
    Processor,
    /// Writes records outside the pipeline; has no output lanes.
    Target,
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Source => "source",
            Self::Processor => "processor",
            Self::Target => "target",
        };
        f.write_str(s)
    }
}

/// A configured stage instance, with lanes in stage naming.
///
/// Lane lists are ordered; the engine relies on the output lane order
/// matching the pipe-naming output lanes position by position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageInfo {
    pub instance_name: String,
    pub stage_type: StageType,
    #[serde(default)]
    pub input_lanes: Vec<String>,
    #[serde(default)]
    pub output_lanes: Vec<String>,
}

impl StageInfo {
    #[must_use]
    pub fn source(instance_name: impl Into<String>, output_lanes: &[&str]) -> Self {
        Self::new(instance_name, StageType::Source, &[], output_lanes)
    }

    #[must_use]
    pub fn processor(
        instance_name: impl Into<String>,
        input_lanes: &[&str],
        output_lanes: &[&str],
    ) -> Self {
        Self::new(instance_name, StageType::Processor, input_lanes, output_lanes)
    }

    #[must_use]
    pub fn target(instance_name: impl Into<String>, input_lanes: &[&str]) -> Self {
        Self::new(instance_name, StageType::Target, input_lanes, &[])
    }

    fn new(
        instance_name: impl Into<String>,
        stage_type: StageType,
        input_lanes: &[&str],
        output_lanes: &[&str],
    ) -> Self {
        Self {
            instance_name: instance_name.into(),
            stage_type,
            input_lanes: input_lanes.iter().map(|l| (*l).to_string()).collect(),
            output_lanes: output_lanes.iter().map(|l| (*l).to_string()).collect(),
        }
    }
}
