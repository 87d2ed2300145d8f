//! Per-batch engine.
//!
//! A [`PipeBatch`] owns the lane payload map of one batch. Lanes are keyed by
//! pipe-naming names and follow a produce-once / consume-once discipline:
//! a stage start reserves its output lanes as pending, completing the stage
//! populates them, and the next pipe consumes them. Referencing a lane that
//! is not populated is a [`BatchError`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use batchline_types::lane;
use batchline_types::record::Record;
use batchline_types::stage::StageType;

use crate::batch::{Batch, BatchMaker, BatchMakerParts};
use crate::error::{BatchError, PipelineError};
use crate::error_sink::ErrorSink;
use crate::graph::StagePipe;
use crate::offset::SourceOffsetTracker;
use crate::stage_output::StageOutput;

/// State of a lane known to the batch. A lane missing from the map was
/// never produced or has already been consumed.
#[derive(Debug)]
enum LaneSlot {
    /// Reserved by a stage start or a multiplexer, not yet written.
    Pending,
    Populated(Vec<Record>),
}

/// One batch flowing through the pipe graph.
pub struct PipeBatch<'a> {
    offset_tracker: &'a mut dyn SourceOffsetTracker,
    batch_size: usize,
    lanes: HashMap<String, LaneSlot>,
    processed_stages: HashSet<String>,
    stage_output_snapshot: Option<Vec<StageOutput>>,
    error_sink: ErrorSink,
    new_offset: Option<String>,
    input_records: usize,
    output_records: usize,
}

impl<'a> PipeBatch<'a> {
    /// Start a batch. When `snapshot_stages_output` is set every completed
    /// stage leaves a [`StageOutput`] copy of what it emitted.
    pub fn new(
        offset_tracker: &'a mut dyn SourceOffsetTracker,
        batch_size: usize,
        snapshot_stages_output: bool,
    ) -> Self {
        Self {
            offset_tracker,
            batch_size,
            lanes: HashMap::new(),
            processed_stages: HashSet::new(),
            stage_output_snapshot: snapshot_stages_output.then(Vec::new),
            error_sink: ErrorSink::new(),
            new_offset: None,
            input_records: 0,
            output_records: 0,
        }
    }

    /// Record allowance of source stages.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Last committed offset.
    ///
    /// # Errors
    ///
    /// Propagates offset tracker failures.
    pub fn get_previous_offset(&mut self) -> Result<Option<String>, PipelineError> {
        self.offset_tracker.get_offset()
    }

    /// Set the tentative offset the batch advances to. Not durable until
    /// [`PipeBatch::commit_offset`].
    pub fn set_new_offset(&mut self, offset: Option<String>) {
        self.new_offset.clone_from(&offset);
        self.offset_tracker.set_offset(offset);
    }

    /// # Errors
    ///
    /// Propagates offset tracker failures.
    pub fn commit_offset(&mut self) -> Result<(), PipelineError> {
        self.offset_tracker.commit_offset()
    }

    /// Mark `pipe` as processed, reserve its output lanes, and hand out the
    /// [`BatchMaker`] the stage writes into.
    ///
    /// # Errors
    ///
    /// [`BatchError::StageAlreadyProcessed`] when the stage already started
    /// in this batch.
    pub fn start_stage(&mut self, pipe: &StagePipe) -> Result<BatchMaker, BatchError> {
        let name = pipe.instance_name();
        if !self.processed_stages.insert(name.to_string()) {
            return Err(BatchError::StageAlreadyProcessed(name.to_string()));
        }
        for output in pipe.output_lanes() {
            self.lanes.insert(output.clone(), LaneSlot::Pending);
        }
        let allowance = match pipe.stage_type() {
            StageType::Source => Some(self.batch_size),
            StageType::Processor | StageType::Target => None,
        };
        Ok(BatchMaker::new(
            pipe,
            self.stage_output_snapshot.is_some(),
            allowance,
        ))
    }

    /// Consume the input lanes of `pipe`, concatenated in declared order.
    ///
    /// # Errors
    ///
    /// [`BatchError::MissingLane`] when an input lane holds no payload, or an
    /// offset tracker failure. Lanes consumed before the failing one are
    /// gone; the batch is unusable after an error.
    pub fn get_batch(&mut self, pipe: &StagePipe) -> Result<Batch, PipelineError> {
        let mut records = Vec::new();
        for input in pipe.input_lanes() {
            records.extend(self.take_populated(input)?);
        }
        if pipe.stage_type() == StageType::Target {
            self.output_records += records.len();
        }
        let offset = self.offset_tracker.get_offset()?;
        Ok(Batch::new(pipe.instance_name(), offset, records))
    }

    /// Move what the stage emitted into the lane payload map.
    ///
    /// # Errors
    ///
    /// [`BatchError::LaneCountMismatch`] when the stage and its pipe disagree
    /// on the number of output lanes, or a precondition failure while
    /// building the snapshot.
    pub fn complete_stage(&mut self, batch_maker: BatchMaker) -> Result<(), PipelineError> {
        let BatchMakerParts {
            pipe,
            mut output,
            snapshot,
            size,
        } = batch_maker.into_parts();
        let stage_lanes = &pipe.stage().output_lanes;
        let pipe_lanes = pipe.output_lanes();
        if stage_lanes.len() != pipe_lanes.len() {
            return Err(BatchError::LaneCountMismatch {
                stage: pipe.instance_name().to_string(),
                stage_lanes: stage_lanes.len(),
                pipe_lanes: pipe_lanes.len(),
            }
            .into());
        }

        for (stage_lane, pipe_lane) in stage_lanes.iter().zip(pipe_lanes) {
            let records = output.remove(stage_lane).unwrap_or_default();
            self.lanes
                .insert(pipe_lane.clone(), LaneSlot::Populated(records));
        }

        let stage_type = pipe.stage_type();
        if stage_type == StageType::Source {
            self.input_records += size;
        }

        if let (Some(snapshots), Some(snapshot)) = (self.stage_output_snapshot.as_mut(), snapshot) {
            let snapshot: BTreeMap<String, Vec<Record>> = snapshot.into_iter().collect();
            snapshots.push(StageOutput::from_error_sink(
                pipe.instance_name(),
                snapshot,
                &self.error_sink,
            )?);
        }

        if stage_type == StageType::Target {
            let rejected = self.error_sink.error_records(pipe.instance_name()).len();
            if rejected > self.output_records {
                tracing::warn!(
                    stage = pipe.instance_name(),
                    rejected,
                    output_records = self.output_records,
                    "Target rejected more records than it consumed"
                );
            }
            self.output_records = self.output_records.saturating_sub(rejected);
        }
        Ok(())
    }

    /// Populate the output lanes of `pipe` from a captured [`StageOutput`]
    /// instead of running the stage. Counters and the error sink are left
    /// untouched.
    ///
    /// # Errors
    ///
    /// Fails like [`PipeBatch::start_stage`], or with
    /// [`BatchError::MissingLane`] when the captured output lacks one of the
    /// stage's lanes.
    pub fn override_stage_output(
        &mut self,
        pipe: &StagePipe,
        stage_output: &StageOutput,
    ) -> Result<(), BatchError> {
        self.start_stage(pipe)?;
        for pipe_lane in pipe.output_lanes() {
            let stage_lane = lane::remove_postfix(pipe_lane);
            let records = stage_output
                .output()
                .get(stage_lane)
                .ok_or_else(|| BatchError::MissingLane(stage_lane.to_string()))?;
            self.lanes
                .insert(pipe_lane.clone(), LaneSlot::Populated(records.clone()));
        }
        if let Some(snapshots) = self.stage_output_snapshot.as_mut() {
            snapshots.push(stage_output.clone());
        }
        tracing::debug!(stage = pipe.instance_name(), "Stage output overridden");
        Ok(())
    }

    /// Populated payloads of `lanes`, left in place. Lanes without a payload
    /// are omitted.
    #[must_use]
    pub fn get_lane_output_records(&self, lanes: &[String]) -> HashMap<String, &[Record]> {
        lanes
            .iter()
            .filter_map(|name| match self.lanes.get(name) {
                Some(LaneSlot::Populated(records)) => Some((name.clone(), records.as_slice())),
                _ => None,
            })
            .collect()
    }

    /// Reserve `lanes` as pending, making them valid fan-out destinations.
    pub fn reserve_lanes(&mut self, lanes: &[String]) {
        for name in lanes {
            self.lanes.entry(name.clone()).or_insert(LaneSlot::Pending);
        }
    }

    /// Rename a populated lane.
    ///
    /// # Errors
    ///
    /// [`BatchError::MissingLane`] when `from` holds no payload.
    pub fn move_lane(&mut self, from: &str, to: &str) -> Result<(), BatchError> {
        let records = self.take_populated(from)?;
        tracing::debug!(from, to, records = records.len(), "Moving lane");
        self.lanes.insert(to.to_string(), LaneSlot::Populated(records));
        Ok(())
    }

    /// Fan a populated lane out to every lane in `to`, each getting its own
    /// deep copy of the records.
    ///
    /// # Errors
    ///
    /// [`BatchError::UnknownLane`] when a destination was never reserved, or
    /// [`BatchError::MissingLane`] when `from` holds no payload. Nothing is
    /// moved on error.
    pub fn move_lane_copying(&mut self, from: &str, to: &[String]) -> Result<(), BatchError> {
        if let Some(unknown) = to.iter().find(|l| !self.lanes.contains_key(l.as_str())) {
            return Err(BatchError::UnknownLane(unknown.clone()));
        }
        let records = self.take_populated(from)?;
        tracing::debug!(from, to = ?to, records = records.len(), "Copying lane");
        for dest in to {
            self.lanes
                .insert(dest.clone(), LaneSlot::Populated(records.clone()));
        }
        Ok(())
    }

    /// Concatenate populated `lanes`, in order, into `to`.
    ///
    /// # Errors
    ///
    /// [`BatchError::DuplicateLane`] when a lane is listed twice, or
    /// [`BatchError::MissingLanes`] naming every lane without a payload.
    /// Nothing is consumed on error.
    pub fn combine_lanes(&mut self, lanes: &[String], to: &str) -> Result<(), BatchError> {
        let mut seen = HashSet::new();
        if let Some(dup) = lanes.iter().find(|l| !seen.insert(l.as_str())) {
            return Err(BatchError::DuplicateLane(dup.clone()));
        }
        let missing: Vec<String> = lanes
            .iter()
            .filter(|l| !matches!(self.lanes.get(l.as_str()), Some(LaneSlot::Populated(_))))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(BatchError::MissingLanes(missing));
        }
        let mut combined = Vec::new();
        for name in lanes {
            combined.extend(self.take_populated(name)?);
        }
        tracing::debug!(from = ?lanes, to, records = combined.len(), "Combining lanes");
        self.lanes.insert(to.to_string(), LaneSlot::Populated(combined));
        Ok(())
    }

    /// Records emitted by source stages in this batch.
    #[must_use]
    pub fn input_records(&self) -> usize {
        self.input_records
    }

    /// Records consumed by target stages, minus the ones they rejected.
    #[must_use]
    pub fn output_records(&self) -> usize {
        self.output_records
    }

    #[must_use]
    pub fn error_records(&self) -> usize {
        self.error_sink.total_error_records()
    }

    #[must_use]
    pub fn error_messages(&self) -> usize {
        self.error_sink.total_error_messages()
    }

    /// Stage outputs in completion order, `None` unless snapshotting.
    #[must_use]
    pub fn snapshots_of_all_stages_output(&self) -> Option<&[StageOutput]> {
        self.stage_output_snapshot.as_deref()
    }

    #[must_use]
    pub fn error_sink(&self) -> &ErrorSink {
        &self.error_sink
    }

    pub fn error_sink_mut(&mut self) -> &mut ErrorSink {
        &mut self.error_sink
    }

    /// Finish the batch, keeping its errors and snapshots.
    #[must_use]
    pub fn into_results(self) -> (ErrorSink, Option<Vec<StageOutput>>) {
        (self.error_sink, self.stage_output_snapshot)
    }

    fn take_populated(&mut self, name: &str) -> Result<Vec<Record>, BatchError> {
        match self.lanes.remove(name) {
            Some(LaneSlot::Populated(records)) => Ok(records),
            Some(LaneSlot::Pending) => {
                self.lanes.insert(name.to_string(), LaneSlot::Pending);
                Err(BatchError::MissingLane(name.to_string()))
            }
            None => Err(BatchError::MissingLane(name.to_string())),
        }
    }
}

impl fmt::Display for PipeBatch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PipeBatch[newOffset='{}' batchSize='{}' keepSnapshot='{}' errorStages='{}']",
            self.new_offset.as_deref().unwrap_or("null"),
            self.batch_size,
            self.stage_output_snapshot.is_some(),
            self.error_sink.size()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offset::PreviewOffsetTracker;
    use batchline_types::error::ErrorRecord;
    use batchline_types::stage::StageInfo;
    use serde_json::json;

    fn source_pipe() -> StagePipe {
        StagePipe::new(
            StageInfo::source("origin", &["out"]),
            Vec::new(),
            vec!["out::s".into()],
        )
    }

    fn target_pipe(input: &str) -> StagePipe {
        StagePipe::new(
            StageInfo::target("store", &["out"]),
            vec![input.to_string()],
            Vec::new(),
        )
    }

    fn record(id: u64) -> Record {
        Record::new("origin", format!("s::{id}"), json!({ "id": id }))
    }

    fn populate(batch: &mut PipeBatch<'_>, lane: &str, records: Vec<Record>) {
        batch
            .lanes
            .insert(lane.to_string(), LaneSlot::Populated(records));
    }

    #[test]
    fn start_stage_twice_fails() {
        let mut tracker = PreviewOffsetTracker::default();
        let mut batch = PipeBatch::new(&mut tracker, 10, false);
        batch.start_stage(&source_pipe()).unwrap();
        assert_eq!(
            batch.start_stage(&source_pipe()).unwrap_err(),
            BatchError::StageAlreadyProcessed("origin".into())
        );
    }

    #[test]
    fn source_gets_batch_size_allowance() {
        let mut tracker = PreviewOffsetTracker::default();
        let mut batch = PipeBatch::new(&mut tracker, 7, false);
        let maker = batch.start_stage(&source_pipe()).unwrap();
        assert_eq!(maker.record_allowance(), Some(7));

        let target = batch.start_stage(&target_pipe("out::s")).unwrap();
        assert_eq!(target.record_allowance(), None);
    }

    #[test]
    fn pending_lane_cannot_be_consumed() {
        let mut tracker = PreviewOffsetTracker::default();
        let mut batch = PipeBatch::new(&mut tracker, 10, false);
        batch.start_stage(&source_pipe()).unwrap();
        let err = batch.move_lane("out::s", "out::s::o").unwrap_err();
        assert_eq!(err, BatchError::MissingLane("out::s".into()));
    }

    #[test]
    fn source_to_target_accounting() {
        let mut tracker = PreviewOffsetTracker::new(Some("o:1".into()));
        let mut batch = PipeBatch::new(&mut tracker, 10, false);

        let mut maker = batch.start_stage(&source_pipe()).unwrap();
        for id in 0..3 {
            maker.add(record(id)).unwrap();
        }
        batch.complete_stage(maker).unwrap();
        assert_eq!(batch.input_records(), 3);

        let target = target_pipe("out::s");
        let maker = batch.start_stage(&target).unwrap();
        let input = batch.get_batch(&target).unwrap();
        assert_eq!(input.len(), 3);
        assert_eq!(input.source_offset(), Some("o:1"));

        batch
            .error_sink_mut()
            .add_record("store", ErrorRecord::new(record(0), "E", "rejected"));
        batch.complete_stage(maker).unwrap();
        assert_eq!(batch.output_records(), 2);
        assert_eq!(batch.error_records(), 1);
    }

    #[test]
    fn target_rejecting_more_than_consumed_clamps_output_at_zero() {
        let mut tracker = PreviewOffsetTracker::default();
        let mut batch = PipeBatch::new(&mut tracker, 10, false);
        populate(&mut batch, "out::s", vec![record(1)]);
        let target = target_pipe("out::s");
        let maker = batch.start_stage(&target).unwrap();
        assert_eq!(batch.get_batch(&target).unwrap().len(), 1);

        for id in 0..3 {
            batch
                .error_sink_mut()
                .add_record("store", ErrorRecord::new(record(id), "E", "rejected"));
        }
        batch.complete_stage(maker).unwrap();
        assert_eq!(batch.output_records(), 0);
        assert_eq!(batch.error_records(), 3);
    }

    #[test]
    fn get_batch_on_unproduced_lane_fails() {
        let mut tracker = PreviewOffsetTracker::default();
        let mut batch = PipeBatch::new(&mut tracker, 10, false);
        let err = batch.get_batch(&target_pipe("never::s")).unwrap_err();
        assert_eq!(
            err.as_batch_error(),
            Some(&BatchError::MissingLane("never::s".into()))
        );
    }

    #[test]
    fn move_lane_copying_gives_independent_copies() {
        let mut tracker = PreviewOffsetTracker::default();
        let mut batch = PipeBatch::new(&mut tracker, 10, false);
        populate(&mut batch, "l", vec![record(1)]);
        let dests = vec!["a".to_string(), "b".to_string()];
        batch.reserve_lanes(&dests);
        batch.move_lane_copying("l", &dests).unwrap();

        if let Some(LaneSlot::Populated(records)) = batch.lanes.get_mut("a") {
            records[0].value_mut()["id"] = json!(99);
        }
        let view = batch.get_lane_output_records(&dests);
        assert_eq!(view["a"][0].value()["id"], 99);
        assert_eq!(view["b"][0].value()["id"], 1);
        assert!(batch.get_lane_output_records(&["l".to_string()]).is_empty());
    }

    #[test]
    fn move_lane_copying_rejects_unknown_destination() {
        let mut tracker = PreviewOffsetTracker::default();
        let mut batch = PipeBatch::new(&mut tracker, 10, false);
        populate(&mut batch, "l", vec![record(1)]);
        let err = batch
            .move_lane_copying("l", &["nowhere".to_string()])
            .unwrap_err();
        assert_eq!(err, BatchError::UnknownLane("nowhere".into()));
        assert_eq!(batch.get_lane_output_records(&["l".to_string()]).len(), 1);
    }

    #[test]
    fn combine_lanes_concatenates_in_order() {
        let mut tracker = PreviewOffsetTracker::default();
        let mut batch = PipeBatch::new(&mut tracker, 10, false);
        populate(&mut batch, "l1", vec![record(1)]);
        populate(&mut batch, "l2", vec![record(2), record(3)]);

        let inputs = vec!["l1".to_string(), "l2".to_string()];
        batch.combine_lanes(&inputs, "l3").unwrap();

        let view = batch.get_lane_output_records(&["l3".to_string()]);
        let ids: Vec<u64> = view["l3"]
            .iter()
            .filter_map(|r| r.value()["id"].as_u64())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(batch.get_lane_output_records(&inputs).is_empty());
    }

    #[test]
    fn combine_lanes_reports_every_missing_lane() {
        let mut tracker = PreviewOffsetTracker::default();
        let mut batch = PipeBatch::new(&mut tracker, 10, false);
        populate(&mut batch, "l1", vec![record(1)]);
        let err = batch
            .combine_lanes(&["l1".into(), "x".into(), "y".into()], "z")
            .unwrap_err();
        assert_eq!(err, BatchError::MissingLanes(vec!["x".into(), "y".into()]));
        assert_eq!(batch.get_lane_output_records(&["l1".to_string()]).len(), 1);
    }

    #[test]
    fn combine_lanes_rejects_repeated_lane_without_consuming() {
        let mut tracker = PreviewOffsetTracker::default();
        let mut batch = PipeBatch::new(&mut tracker, 10, false);
        populate(&mut batch, "l1", vec![record(1)]);
        let err = batch
            .combine_lanes(&["l1".into(), "l1".into()], "z")
            .unwrap_err();
        assert_eq!(err, BatchError::DuplicateLane("l1".into()));
        assert_eq!(batch.get_lane_output_records(&["l1".to_string()]).len(), 1);
    }

    #[test]
    fn snapshots_only_when_enabled() {
        let mut tracker = PreviewOffsetTracker::default();
        let mut batch = PipeBatch::new(&mut tracker, 10, false);
        let maker = batch.start_stage(&source_pipe()).unwrap();
        batch.complete_stage(maker).unwrap();
        assert!(batch.snapshots_of_all_stages_output().is_none());

        let mut tracker = PreviewOffsetTracker::default();
        let mut batch = PipeBatch::new(&mut tracker, 10, true);
        let mut maker = batch.start_stage(&source_pipe()).unwrap();
        maker.add(record(1)).unwrap();
        batch.complete_stage(maker).unwrap();
        let snapshots = batch.snapshots_of_all_stages_output().unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].instance_name(), "origin");
        assert_eq!(snapshots[0].output()["out"].len(), 1);
    }

    #[test]
    fn override_injects_stored_output_without_counting() {
        let mut output = BTreeMap::new();
        output.insert("out".to_string(), vec![record(1), record(2)]);
        let stored = StageOutput::new("origin", output, Vec::new(), Vec::new()).unwrap();

        let mut tracker = PreviewOffsetTracker::default();
        let mut batch = PipeBatch::new(&mut tracker, 10, true);
        batch.override_stage_output(&source_pipe(), &stored).unwrap();

        let view = batch.get_lane_output_records(&["out::s".to_string()]);
        assert_eq!(view["out::s"].len(), 2);
        assert_eq!(batch.input_records(), 0);
        assert_eq!(batch.snapshots_of_all_stages_output().unwrap().len(), 1);
        assert_eq!(
            batch.start_stage(&source_pipe()).unwrap_err(),
            BatchError::StageAlreadyProcessed("origin".into())
        );
    }

    #[test]
    fn offsets_forward_to_tracker() {
        let mut tracker = PreviewOffsetTracker::new(Some("a".into()));
        {
            let mut batch = PipeBatch::new(&mut tracker, 10, false);
            assert_eq!(batch.get_previous_offset().unwrap(), Some("a".into()));
            batch.set_new_offset(Some("b".into()));
            assert!(batch.to_string().contains("newOffset='b'"));
            batch.commit_offset().unwrap();
        }
        assert_eq!(tracker.get_offset().unwrap(), Some("b".into()));
    }
}
