//! Records flowing through pipeline lanes.
//!
//! A [`Record`] is a header plus a JSON value tree. `Clone` is a deep copy:
//! two clones never share mutable state, which is what lets the engine fan a
//! lane out to several consumers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Record metadata maintained by the engine and the stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordHeader {
    /// Source-defined identifier of the record (e.g. `"file.csv::42"`).
    pub source_id: String,
    /// Instance name of the stage that created the record.
    pub stage_creator: String,
    /// Instance names of every stage the record has been emitted by.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages_path: Vec<String>,
    /// Free-form attributes set by stages.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// Unit of data moved between stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    header: RecordHeader,
    value: serde_json::Value,
}

impl Record {
    /// Create a record created by `stage_creator`.
    #[must_use]
    pub fn new(
        stage_creator: impl Into<String>,
        source_id: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            header: RecordHeader {
                source_id: source_id.into(),
                stage_creator: stage_creator.into(),
                ..RecordHeader::default()
            },
            value,
        }
    }

    #[must_use]
    pub fn header(&self) -> &RecordHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }

    #[must_use]
    pub fn value(&self) -> &serde_json::Value {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut serde_json::Value {
        &mut self.value
    }

    pub fn set_value(&mut self, value: serde_json::Value) {
        self.value = value;
    }

    /// Append a stage instance to the record's stage path.
    pub fn add_stage_to_path(&mut self, instance_name: &str) {
        self.header.stages_path.push(instance_name.to_string());
    }

    /// Serialize header and value as a single JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the value tree cannot be serialized.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
