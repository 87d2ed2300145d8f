//! What a stage sees during a batch: the [`Batch`] it reads and the
//! [`BatchMaker`] it writes into.

use std::collections::{HashMap, HashSet};

use batchline_types::record::Record;
use batchline_types::stage::StageType;

use crate::error::BatchError;
use crate::graph::StagePipe;

/// Input records of one stage for the current batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    instance_name: String,
    source_offset: Option<String>,
    records: Vec<Record>,
}

impl Batch {
    #[must_use]
    pub fn new(
        instance_name: impl Into<String>,
        source_offset: Option<String>,
        records: Vec<Record>,
    ) -> Self {
        Self {
            instance_name: instance_name.into(),
            source_offset,
            records,
        }
    }

    /// Stage instance the batch was assembled for.
    #[must_use]
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// Committed source offset the batch started from.
    #[must_use]
    pub fn source_offset(&self) -> Option<&str> {
        self.source_offset.as_deref()
    }

    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

/// Collects the records one stage emits, keyed by stage-naming lane.
///
/// Sources are capped at the batch size; other stages are unbounded.
#[derive(Debug)]
pub struct BatchMaker {
    pipe: StagePipe,
    output: HashMap<String, Vec<Record>>,
    snapshot: Option<HashMap<String, Vec<Record>>>,
    record_allowance: Option<usize>,
    size: usize,
}

pub(crate) struct BatchMakerParts {
    pub(crate) pipe: StagePipe,
    pub(crate) output: HashMap<String, Vec<Record>>,
    pub(crate) snapshot: Option<HashMap<String, Vec<Record>>>,
    pub(crate) size: usize,
}

impl BatchMaker {
    pub(crate) fn new(pipe: &StagePipe, keep_snapshot: bool, record_allowance: Option<usize>) -> Self {
        let empty_lanes = || -> HashMap<String, Vec<Record>> {
            pipe.stage()
                .output_lanes
                .iter()
                .map(|l| (l.clone(), Vec::new()))
                .collect()
        };
        Self {
            pipe: pipe.clone(),
            output: empty_lanes(),
            snapshot: keep_snapshot.then(empty_lanes),
            record_allowance,
            size: 0,
        }
    }

    #[must_use]
    pub fn stage_pipe(&self) -> &StagePipe {
        &self.pipe
    }

    #[must_use]
    pub fn stage_type(&self) -> StageType {
        self.pipe.stage_type()
    }

    /// Output lanes, stage naming.
    #[must_use]
    pub fn lanes(&self) -> &[String] {
        &self.pipe.stage().output_lanes
    }

    /// Maximum records this stage may emit, `None` when unbounded.
    #[must_use]
    pub fn record_allowance(&self) -> Option<usize> {
        self.record_allowance
    }

    /// Emit a record into the stage's only output lane.
    ///
    /// # Errors
    ///
    /// See [`BatchMaker::add_record`].
    pub fn add(&mut self, record: Record) -> Result<(), BatchError> {
        self.add_record(record, &[])
    }

    /// Emit a record into `lanes` (stage naming). Each lane gets its own
    /// copy. An empty `lanes` means the stage's only output lane.
    ///
    /// # Errors
    ///
    /// Fails when the allowance is exhausted, when a lane is not declared by
    /// the stage or listed twice, or when `lanes` is empty and the stage has several output
    /// lanes.
    pub fn add_record(&mut self, mut record: Record, lanes: &[&str]) -> Result<(), BatchError> {
        if let Some(allowance) = self.record_allowance {
            if self.size >= allowance {
                return Err(BatchError::RecordAllowanceExceeded {
                    stage: self.pipe.instance_name().to_string(),
                    allowance,
                });
            }
        }

        let mut targets: Vec<String> = if lanes.is_empty() {
            match self.lanes() {
                [only] => vec![only.clone()],
                [] => {
                    return Err(BatchError::UnknownStageLane {
                        stage: self.pipe.instance_name().to_string(),
                        lane: String::new(),
                    })
                }
                _ => {
                    return Err(BatchError::LaneRequired(
                        self.pipe.instance_name().to_string(),
                    ))
                }
            }
        } else {
            if let Some(unknown) = lanes.iter().find(|l| !self.output.contains_key(**l)) {
                return Err(BatchError::UnknownStageLane {
                    stage: self.pipe.instance_name().to_string(),
                    lane: (*unknown).to_string(),
                });
            }
            let mut seen = HashSet::new();
            if let Some(dup) = lanes.iter().find(|l| !seen.insert(**l)) {
                return Err(BatchError::DuplicateLane((*dup).to_string()));
            }
            lanes.iter().map(|l| (*l).to_string()).collect()
        };

        record.add_stage_to_path(self.pipe.instance_name());

        if let Some(snapshot) = self.snapshot.as_mut() {
            for lane in &targets {
                snapshot.entry(lane.clone()).or_default().push(record.clone());
            }
        }

        let last = targets.pop();
        for lane in targets {
            self.output.entry(lane).or_default().push(record.clone());
        }
        if let Some(lane) = last {
            self.output.entry(lane).or_default().push(record);
        }

        self.size += 1;
        Ok(())
    }

    /// Number of records emitted, counting a multi-lane record once.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of records emitted into `lane` (stage naming).
    #[must_use]
    pub fn size_of(&self, lane: &str) -> usize {
        self.output.get(lane).map_or(0, Vec::len)
    }

    pub(crate) fn into_parts(self) -> BatchMakerParts {
        BatchMakerParts {
            pipe: self.pipe,
            output: self.output,
            snapshot: self.snapshot,
            size: self.size,
        }
    }
}
