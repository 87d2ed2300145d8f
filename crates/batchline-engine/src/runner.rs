//! Pipeline runner: drives batches through the pipe graph, commits offsets,
//! reloads rules, and records run history.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use batchline_state::StateBackend;
use batchline_types::stage::StageInfo;
use batchline_types::state::{PipelineId, Revision, RunStats, RunStatus};

use crate::error::PipelineError;
use crate::error_records::persist_error_records;
use crate::graph::{Pipe, PipeGraph, StagePipe};
use crate::observer::{NoopObserver, Observer};
use crate::offset::{PreviewOffsetTracker, ProductionOffsetTracker, SourceOffsetTracker};
use crate::pipe_batch::PipeBatch;
use crate::result::{BatchSummary, RunResult};
use crate::rules::RulesConfigLoader;
use crate::stage::{StageContext, StageRuntime};
use crate::stage_output::StageOutput;

/// Per-pipeline settings shared by every batch of a run.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub pipeline: PipelineId,
    pub revision: Revision,
    pub batch_size: usize,
    pub snapshot_stages_output: bool,
    /// Stop after this many batches even if the source has more data.
    pub max_batches: Option<u64>,
}

impl PipelineContext {
    #[must_use]
    pub fn new(pipeline: impl Into<PipelineId>, revision: impl Into<Revision>, batch_size: usize) -> Self {
        Self {
            pipeline: pipeline.into(),
            revision: revision.into(),
            batch_size,
            snapshot_stages_output: false,
            max_batches: None,
        }
    }
}

/// Runs one pipeline revision. Owns everything that outlives a batch: the
/// offset tracker, the stage implementations, and the rule loader.
pub struct PipelineRunner {
    context: PipelineContext,
    graph: PipeGraph,
    stages: HashMap<String, StageRuntime>,
    offset_tracker: Box<dyn SourceOffsetTracker>,
    state_backend: Arc<dyn StateBackend>,
    rules: Option<RulesConfigLoader>,
    observer: Box<dyn Observer>,
}

impl PipelineRunner {
    /// Build a runner for `stages` (topological order) backed by durable
    /// offsets in `state_backend`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Infrastructure`] when the graph is invalid or
    /// a stage has no implementation of the matching kind, and
    /// [`PipelineError::Precondition`] for a zero batch size.
    pub fn new(
        context: PipelineContext,
        stages: &[StageInfo],
        runtimes: HashMap<String, StageRuntime>,
        state_backend: Arc<dyn StateBackend>,
    ) -> Result<Self, PipelineError> {
        let tracker = ProductionOffsetTracker::new(
            context.pipeline.clone(),
            context.revision.clone(),
            Arc::clone(&state_backend),
        );
        Self::with_offset_tracker(context, stages, runtimes, state_backend, Box::new(tracker))
    }

    /// Like [`PipelineRunner::new`] with a caller-supplied offset tracker.
    ///
    /// # Errors
    ///
    /// Same as [`PipelineRunner::new`].
    pub fn with_offset_tracker(
        context: PipelineContext,
        stages: &[StageInfo],
        runtimes: HashMap<String, StageRuntime>,
        state_backend: Arc<dyn StateBackend>,
        offset_tracker: Box<dyn SourceOffsetTracker>,
    ) -> Result<Self, PipelineError> {
        if context.batch_size == 0 {
            return Err(PipelineError::Precondition(
                "batch size must be greater than zero".to_string(),
            ));
        }
        let graph = PipeGraph::build(stages)?;
        validate_runtimes(&graph, &runtimes)?;

        Ok(Self {
            context,
            graph,
            stages: runtimes,
            offset_tracker,
            state_backend,
            rules: None,
            observer: Box::new(NoopObserver),
        })
    }

    /// Attach a rule loader and the observer it notifies.
    #[must_use]
    pub fn with_rules(mut self, loader: RulesConfigLoader, observer: Box<dyn Observer>) -> Self {
        self.rules = Some(loader);
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    #[must_use]
    pub fn graph(&self) -> &PipeGraph {
        &self.graph
    }

    /// Whether the last committed offset was the end-of-data sentinel.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.offset_tracker.is_finished()
    }

    /// Committed offset of the source.
    ///
    /// # Errors
    ///
    /// Propagates offset tracker failures.
    pub fn committed_offset(&mut self) -> Result<Option<String>, PipelineError> {
        self.offset_tracker.get_offset()
    }

    /// Reset the committed offset so the next run starts from scratch.
    ///
    /// # Errors
    ///
    /// Propagates offset tracker failures.
    pub fn reset_offset(&mut self) -> Result<(), PipelineError> {
        tracing::info!(
            pipeline = self.context.pipeline.as_str(),
            revision = self.context.revision.as_str(),
            "Resetting source offset"
        );
        self.offset_tracker.reset_offset()
    }

    /// Load the rules if a loader is attached.
    ///
    /// # Errors
    ///
    /// Propagates rule store failures.
    pub fn reload_rules(&mut self) -> Result<(), PipelineError> {
        if let Some(loader) = self.rules.as_mut() {
            loader.load(self.observer.as_mut())?;
        }
        Ok(())
    }

    /// Run one batch, commit its offset, and reload the rules.
    ///
    /// # Errors
    ///
    /// A failure while executing the batch aborts it and the offset is not
    /// committed. A rule reload failure is reported after the commit.
    pub fn run_batch(&mut self) -> Result<BatchSummary, PipelineError> {
        let summary = self.execute_and_commit()?;
        self.reload_rules()?;
        Ok(summary)
    }

    fn execute_and_commit(&mut self) -> Result<BatchSummary, PipelineError> {
        execute_batch(
            &self.graph,
            &mut self.stages,
            self.observer.as_mut(),
            self.offset_tracker.as_mut(),
            self.context.batch_size,
            self.context.snapshot_stages_output,
            &HashMap::new(),
        )
    }

    /// Run batches until the source is exhausted or `max_batches` is reached,
    /// recording the run in the state backend.
    ///
    /// # Errors
    ///
    /// Returns the first batch failure after marking the run failed, or a
    /// state backend failure while recording the run.
    pub fn run(&mut self) -> Result<RunResult, PipelineError> {
        let start = Instant::now();
        let pipeline = self.context.pipeline.clone();
        tracing::info!(
            pipeline = pipeline.as_str(),
            revision = self.context.revision.as_str(),
            batch_size = self.context.batch_size,
            "Starting pipeline run"
        );

        let run_id = self
            .state_backend
            .start_run(&pipeline, &self.context.revision)?;
        let mut result = RunResult {
            run_id,
            ..RunResult::default()
        };

        let outcome = self.run_batches(run_id, &mut result);
        result.duration_secs = start.elapsed().as_secs_f64();

        let (status, error_message) = match &outcome {
            Ok(()) => (RunStatus::Completed, None),
            Err(e) => (RunStatus::Failed, Some(e.to_string())),
        };
        let stats = RunStats {
            batches: result.batches,
            input_records: result.input_records,
            output_records: result.output_records,
            error_records: result.error_records,
            error_messages: result.error_messages,
            error_message,
        };
        let completed = self.state_backend.complete_run(run_id, status, &stats);

        match (outcome, completed) {
            (Err(e), Err(complete_err)) => {
                tracing::error!(run_id, error = %complete_err, "Failed to record failed run");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), Err(complete_err)) => Err(complete_err.into()),
            (Ok(()), Ok(())) => {
                tracing::info!(
                    pipeline = pipeline.as_str(),
                    batches = result.batches,
                    input_records = result.input_records,
                    output_records = result.output_records,
                    error_records = result.error_records,
                    duration_secs = result.duration_secs,
                    "Pipeline run completed"
                );
                Ok(result)
            }
        }
    }

    fn run_batches(&mut self, run_id: i64, result: &mut RunResult) -> Result<(), PipelineError> {
        self.reload_rules()?;
        loop {
            if self
                .context
                .max_batches
                .is_some_and(|max| result.batches >= max)
            {
                tracing::info!(batches = result.batches, "Reached max batches, stopping");
                return Ok(());
            }

            let summary = self.execute_and_commit().inspect_err(|e| {
                tracing::error!(
                    pipeline = self.context.pipeline.as_str(),
                    batch = result.batches + 1,
                    fatal_to_run = e.is_fatal_to_run(),
                    error = %e,
                    "Batch failed"
                );
            })?;

            // Committed: account the batch before reloading rules.
            persist_error_records(
                self.state_backend.as_ref(),
                &self.context.pipeline,
                run_id,
                &summary.error_sink,
            );
            result.add_batch(&summary);

            self.reload_rules().inspect_err(|e| {
                tracing::error!(
                    pipeline = self.context.pipeline.as_str(),
                    batch = result.batches,
                    error = %e,
                    "Rule reload failed after commit"
                );
            })?;
            if summary.finished {
                return Ok(());
            }
        }
    }

    /// Run a single batch from the committed offset without committing
    /// anything, replacing the stages named in `overrides` by their captured
    /// output. Every stage output is snapshotted.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Precondition`] when an override names an unknown
    /// stage, otherwise as [`PipelineRunner::run_batch`].
    pub fn run_preview(
        &mut self,
        overrides: &HashMap<String, StageOutput>,
    ) -> Result<BatchSummary, PipelineError> {
        if let Some(unknown) = overrides
            .keys()
            .find(|name| self.graph.stage_pipe(name).is_none())
        {
            return Err(PipelineError::Precondition(format!(
                "stage output override for unknown stage '{unknown}'"
            )));
        }
        let mut tracker = PreviewOffsetTracker::new(self.offset_tracker.get_offset()?);
        execute_batch(
            &self.graph,
            &mut self.stages,
            self.observer.as_mut(),
            &mut tracker,
            self.context.batch_size,
            true,
            overrides,
        )
    }
}

fn validate_runtimes(
    graph: &PipeGraph,
    runtimes: &HashMap<String, StageRuntime>,
) -> Result<(), PipelineError> {
    let mut errors = Vec::new();
    for pipe in graph.stage_pipes() {
        match runtimes.get(pipe.instance_name()) {
            None => errors.push(format!(
                "No implementation for stage '{}'",
                pipe.instance_name()
            )),
            Some(runtime) if runtime.stage_type() != pipe.stage_type() => errors.push(format!(
                "Stage '{}' is a {} but its implementation is a {}",
                pipe.instance_name(),
                pipe.stage_type(),
                runtime.stage_type()
            )),
            Some(_) => {}
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("Invalid stage implementations:\n  - {}", errors.join("\n  - ")).into())
    }
}

fn execute_batch(
    graph: &PipeGraph,
    stages: &mut HashMap<String, StageRuntime>,
    observer: &mut dyn Observer,
    tracker: &mut dyn SourceOffsetTracker,
    batch_size: usize,
    snapshot_stages_output: bool,
    overrides: &HashMap<String, StageOutput>,
) -> Result<BatchSummary, PipelineError> {
    let mut batch = PipeBatch::new(tracker, batch_size, snapshot_stages_output);

    for pipe in graph.pipes() {
        match pipe {
            Pipe::Stage(stage_pipe) => {
                if let Some(stored) = overrides.get(stage_pipe.instance_name()) {
                    batch.override_stage_output(stage_pipe, stored)?;
                    continue;
                }
                let runtime = stages.get_mut(stage_pipe.instance_name()).ok_or_else(|| {
                    anyhow!("No implementation for stage '{}'", stage_pipe.instance_name())
                })?;
                run_stage(&mut batch, stage_pipe, runtime)?;
            }
            Pipe::Observer { input, output, .. } => {
                batch.move_lane(input, output)?;
                let lanes = batch.get_lane_output_records(std::slice::from_ref(output));
                observer.observe(&lanes);
            }
            Pipe::Multiplexer { input, outputs } => {
                batch.reserve_lanes(outputs);
                match outputs.as_slice() {
                    [only] => batch.move_lane(input, only)?,
                    _ => batch.move_lane_copying(input, outputs)?,
                }
            }
            Pipe::Combiner { inputs, output, .. } => batch.combine_lanes(inputs, output)?,
        }
    }

    batch.commit_offset()?;
    tracing::debug!(%batch, "Batch complete");

    let input_records = batch.input_records();
    let output_records = batch.output_records();
    let error_records = batch.error_records();
    let error_messages = batch.error_messages();
    let (error_sink, snapshots) = batch.into_results();

    Ok(BatchSummary {
        input_records,
        output_records,
        error_records,
        error_messages,
        committed_offset: tracker.get_offset()?,
        finished: tracker.is_finished(),
        error_sink,
        snapshots,
    })
}

fn stage_failure(stage: &str, source: anyhow::Error) -> PipelineError {
    PipelineError::Stage {
        stage: stage.to_string(),
        source,
    }
}

fn run_stage(
    batch: &mut PipeBatch<'_>,
    pipe: &StagePipe,
    runtime: &mut StageRuntime,
) -> Result<(), PipelineError> {
    let name = pipe.instance_name();
    let mut maker = batch.start_stage(pipe)?;

    match runtime {
        StageRuntime::Source(source) => {
            let last_offset = batch.get_previous_offset()?;
            let max_batch_size = batch.batch_size();
            let mut ctx = StageContext::new(name, batch.error_sink_mut());
            let new_offset = source
                .produce(last_offset.as_deref(), max_batch_size, &mut maker, &mut ctx)
                .map_err(|e| stage_failure(name, e))?;
            batch.set_new_offset(new_offset);
        }
        StageRuntime::Processor(processor) => {
            let input = batch.get_batch(pipe)?;
            let mut ctx = StageContext::new(name, batch.error_sink_mut());
            processor
                .process(&input, &mut maker, &mut ctx)
                .map_err(|e| stage_failure(name, e))?;
        }
        StageRuntime::Target(target) => {
            let input = batch.get_batch(pipe)?;
            let mut ctx = StageContext::new(name, batch.error_sink_mut());
            target
                .write(&input, &mut ctx)
                .map_err(|e| stage_failure(name, e))?;
        }
    }

    batch.complete_stage(maker)
}
