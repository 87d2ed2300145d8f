//! End-to-end runner tests: stages, lanes, offsets, rules, and run history
//! against an in-memory or file-backed state backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use batchline_engine::config::{parser, validator};
use batchline_engine::rules::FileRuleStore;
use batchline_engine::{
    Batch, BatchMaker, NoopObserver, Observer, PipelineContext, PipelineError, PipelineRunner,
    Processor, ProductionOffsetTracker, RuleStore, RuleStoreError, RulesConfigLoader,
    RulesConfigurationChangeRequest, Source, SourceOffsetTracker, StageContext, StageOutput,
    StageRuntime, Target,
};
use batchline_state::{SqliteStateBackend, StateBackend};
use batchline_types::record::Record;
use batchline_types::rules::RuleDefinitions;
use batchline_types::stage::StageInfo;
use batchline_types::state::{ErrorRecordRow, OffsetRecord, PipelineId, Revision, RunStats, RunStatus};
use serde_json::json;

/// Emits `n` for every position in `0..total`, resuming after the offset.
struct CountingSource {
    total: u64,
}

impl Source for CountingSource {
    fn produce(
        &mut self,
        last_offset: Option<&str>,
        max_batch_size: usize,
        batch_maker: &mut BatchMaker,
        _context: &mut StageContext<'_>,
    ) -> anyhow::Result<Option<String>> {
        let start: u64 = last_offset.map(str::parse::<u64>).transpose()?.unwrap_or(0);
        let end = (start + max_batch_size as u64).min(self.total);
        for n in start..end {
            batch_maker.add(Record::new("origin", format!("counter::{n}"), json!({ "n": n })))?;
        }
        Ok((end < self.total).then(|| end.to_string()))
    }
}

/// Routes even numbers to `even` and odd numbers to `odd`.
struct ParityRouter;

impl Processor for ParityRouter {
    fn process(
        &mut self,
        batch: &Batch,
        batch_maker: &mut BatchMaker,
        _context: &mut StageContext<'_>,
    ) -> anyhow::Result<()> {
        for record in batch.records() {
            let lane = if number(record) % 2 == 0 { "even" } else { "odd" };
            batch_maker.add_record(record.clone(), &[lane])?;
        }
        Ok(())
    }
}

/// Keeps what it writes; rejects the numbers in `reject`.
#[derive(Clone, Default)]
struct CollectingTarget {
    written: Arc<Mutex<Vec<u64>>>,
    reject: Vec<u64>,
    fail: bool,
}

impl Target for CollectingTarget {
    fn write(&mut self, batch: &Batch, context: &mut StageContext<'_>) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("destination unavailable");
        }
        for record in batch.records() {
            let n = number(record);
            if self.reject.contains(&n) {
                context.to_error(record.clone(), "REJECTED", format!("{n} is not accepted"));
            } else {
                self.written.lock().unwrap().push(n);
            }
        }
        Ok(())
    }
}

fn number(record: &Record) -> u64 {
    record.value()["n"].as_u64().unwrap()
}

fn parity_stages() -> Vec<StageInfo> {
    vec![
        StageInfo::source("origin", &["raw"]),
        StageInfo::processor("router", &["raw"], &["even", "odd"]),
        StageInfo::target("evens", &["even"]),
        StageInfo::target("odds", &["odd"]),
        StageInfo::target("audit", &["raw"]),
    ]
}

struct Targets {
    evens: CollectingTarget,
    odds: CollectingTarget,
    audit: CollectingTarget,
}

fn parity_runtimes(total: u64, targets: &Targets) -> HashMap<String, StageRuntime> {
    HashMap::from([
        (
            "origin".to_string(),
            StageRuntime::Source(Box::new(CountingSource { total })),
        ),
        ("router".to_string(), StageRuntime::Processor(Box::new(ParityRouter))),
        ("evens".to_string(), StageRuntime::Target(Box::new(targets.evens.clone()))),
        ("odds".to_string(), StageRuntime::Target(Box::new(targets.odds.clone()))),
        ("audit".to_string(), StageRuntime::Target(Box::new(targets.audit.clone()))),
    ])
}

fn targets() -> Targets {
    Targets {
        evens: CollectingTarget::default(),
        odds: CollectingTarget::default(),
        audit: CollectingTarget::default(),
    }
}

fn backend() -> Arc<dyn StateBackend> {
    Arc::new(SqliteStateBackend::in_memory().unwrap())
}

fn context(batch_size: usize) -> PipelineContext {
    PipelineContext::new("orders", "0", batch_size)
}

fn fresh_offset(backend: &Arc<dyn StateBackend>) -> Option<String> {
    ProductionOffsetTracker::new(PipelineId::new("orders"), Revision::new("0"), Arc::clone(backend))
        .get_offset()
        .unwrap()
}

#[test]
fn run_drains_source_and_accounts_records() {
    let backend = backend();
    let mut targets = targets();
    targets.evens.reject = vec![4];
    let runtimes = parity_runtimes(5, &targets);
    let mut runner =
        PipelineRunner::new(context(2), &parity_stages(), runtimes, Arc::clone(&backend)).unwrap();

    let result = runner.run().unwrap();

    assert_eq!(result.batches, 3);
    assert!(result.finished);
    assert_eq!(result.input_records, 5);
    // audit 5 + evens 3 + odds 2, minus the rejected 4
    assert_eq!(result.output_records, 9);
    assert_eq!(result.error_records, 1);

    assert_eq!(*targets.evens.written.lock().unwrap(), vec![0, 2]);
    assert_eq!(*targets.odds.written.lock().unwrap(), vec![1, 3]);
    assert_eq!(*targets.audit.written.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    assert!(runner.is_finished());
    assert_eq!(fresh_offset(&backend), None);
}

#[test]
fn run_resumes_from_committed_offset() {
    let backend = backend();
    let first = targets();
    let mut ctx = context(2);
    ctx.max_batches = Some(1);
    let mut runner =
        PipelineRunner::new(ctx, &parity_stages(), parity_runtimes(5, &first), Arc::clone(&backend))
            .unwrap();
    let result = runner.run().unwrap();
    assert_eq!(result.batches, 1);
    assert!(!result.finished);
    assert_eq!(fresh_offset(&backend), Some("2".to_string()));

    let second = targets();
    let mut runner = PipelineRunner::new(
        context(2),
        &parity_stages(),
        parity_runtimes(5, &second),
        Arc::clone(&backend),
    )
    .unwrap();
    runner.run().unwrap();
    assert_eq!(*second.audit.written.lock().unwrap(), vec![2, 3, 4]);
}

#[test]
fn stage_failure_fails_run_without_commit() {
    let backend = backend();
    let mut targets = targets();
    targets.odds.fail = true;
    let mut runner = PipelineRunner::new(
        context(2),
        &parity_stages(),
        parity_runtimes(5, &targets),
        Arc::clone(&backend),
    )
    .unwrap();

    let err = runner.run().unwrap_err();
    assert!(matches!(&err, PipelineError::Stage { stage, .. } if stage == "odds"));
    assert!(err.to_string().contains("destination unavailable"));
    assert!(!err.is_fatal_to_run());
    assert_eq!(fresh_offset(&backend), None);
    assert!(!runner.is_finished());
}

#[test]
fn multi_input_target_sees_lanes_in_declared_order() {
    let stages = vec![
        StageInfo::source("origin", &["raw"]),
        StageInfo::processor("router", &["raw"], &["even", "odd"]),
        StageInfo::target("join", &["odd", "even"]),
    ];
    let join = CollectingTarget::default();
    let runtimes = HashMap::from([
        (
            "origin".to_string(),
            StageRuntime::Source(Box::new(CountingSource { total: 4 })),
        ),
        ("router".to_string(), StageRuntime::Processor(Box::new(ParityRouter))),
        ("join".to_string(), StageRuntime::Target(Box::new(join.clone()))),
    ]);
    let mut runner = PipelineRunner::new(context(10), &stages, runtimes, backend()).unwrap();

    let summary = runner.run_batch().unwrap();
    assert_eq!(summary.output_records, 4);
    assert!(summary.finished);
    assert_eq!(*join.written.lock().unwrap(), vec![1, 3, 0, 2]);
}

#[test]
fn runtime_kind_must_match_stage_type() {
    let stages = vec![
        StageInfo::source("origin", &["raw"]),
        StageInfo::target("store", &["raw"]),
    ];
    let runtimes = HashMap::from([
        ("origin".to_string(), StageRuntime::Processor(Box::new(ParityRouter))),
    ]);
    let err = PipelineRunner::new(context(10), &stages, runtimes, backend())
        .err()
        .unwrap()
        .to_string();
    assert!(err.contains("'origin' is a source but its implementation is a processor"));
    assert!(err.contains("No implementation for stage 'store'"));
}

#[derive(Clone, Default)]
struct RecordingObserver {
    configurations: Arc<Mutex<Vec<RulesConfigurationChangeRequest>>>,
    observed: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl Observer for RecordingObserver {
    fn set_configuration(&mut self, request: RulesConfigurationChangeRequest) {
        self.configurations.lock().unwrap().push(request);
    }

    fn observe(&mut self, lanes: &HashMap<String, &[Record]>) {
        let mut observed = self.observed.lock().unwrap();
        for (lane, records) in lanes {
            *observed.entry(lane.clone()).or_default() += records.len();
        }
    }
}

#[test]
fn rules_loaded_once_and_lanes_observed_every_batch() {
    let rules_dir = tempfile::tempdir().unwrap();
    let rules_path = rules_dir.path().join("orders").join("0").join("rules.json");
    std::fs::create_dir_all(rules_path.parent().unwrap()).unwrap();
    std::fs::write(
        &rules_path,
        r#"{"data_rule_definitions":[{"id":"r1","lane":"even","enabled":true,"alert_enabled":true}]}"#,
    )
    .unwrap();

    let store = Arc::new(FileRuleStore::new(rules_dir.path()));
    let loader = RulesConfigLoader::new(PipelineId::new("orders"), Revision::new("0"), store);
    let observer = RecordingObserver::default();

    let mut runner = PipelineRunner::new(
        context(2),
        &parity_stages(),
        parity_runtimes(5, &targets()),
        backend(),
    )
    .unwrap()
    .with_rules(loader, Box::new(observer.clone()));
    runner.run().unwrap();

    let configurations = observer.configurations.lock().unwrap();
    assert_eq!(configurations.len(), 1);
    assert_eq!(configurations[0].lane_to_data_rules()["even::s::o"][0].id, "r1");

    let observed = observer.observed.lock().unwrap();
    assert_eq!(observed["raw::s::o"], 5);
    assert_eq!(observed["even::s::o"], 3);
    assert_eq!(observed["odd::s::o"], 2);
}

/// Serves an empty rule set `healthy_calls` times, then fails.
struct FailingRuleStore {
    healthy_calls: usize,
    calls: AtomicUsize,
}

impl RuleStore for FailingRuleStore {
    fn retrieve_rules(
        &self,
        _pipeline: &PipelineId,
        _revision: &Revision,
    ) -> Result<Arc<RuleDefinitions>, RuleStoreError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.healthy_calls {
            Ok(Arc::new(RuleDefinitions::default()))
        } else {
            Err(RuleStoreError::Unavailable("down".into()))
        }
    }
}

/// `SQLite` backend that remembers completed runs and inserted error rows.
struct RecordingBackend {
    inner: SqliteStateBackend,
    completed: Mutex<Vec<(RunStatus, RunStats)>>,
    error_rows: AtomicUsize,
}

impl StateBackend for RecordingBackend {
    fn get_offset(
        &self,
        pipeline: &PipelineId,
        revision: &Revision,
    ) -> batchline_state::error::Result<Option<OffsetRecord>> {
        self.inner.get_offset(pipeline, revision)
    }

    fn put_offset(
        &self,
        pipeline: &PipelineId,
        revision: &Revision,
        record: &OffsetRecord,
    ) -> batchline_state::error::Result<()> {
        self.inner.put_offset(pipeline, revision, record)
    }

    fn start_run(&self, pipeline: &PipelineId, revision: &Revision) -> batchline_state::error::Result<i64> {
        self.inner.start_run(pipeline, revision)
    }

    fn complete_run(
        &self,
        run_id: i64,
        status: RunStatus,
        stats: &RunStats,
    ) -> batchline_state::error::Result<()> {
        self.completed.lock().unwrap().push((status, stats.clone()));
        self.inner.complete_run(run_id, status, stats)
    }

    fn insert_error_records(
        &self,
        pipeline: &PipelineId,
        run_id: i64,
        records: &[ErrorRecordRow],
    ) -> batchline_state::error::Result<u64> {
        self.error_rows.fetch_add(records.len(), Ordering::SeqCst);
        self.inner.insert_error_records(pipeline, run_id, records)
    }
}

#[test]
fn rule_reload_failure_keeps_committed_batch_accounted() {
    let recording = Arc::new(RecordingBackend {
        inner: SqliteStateBackend::in_memory().unwrap(),
        completed: Mutex::new(Vec::new()),
        error_rows: AtomicUsize::new(0),
    });
    let backend: Arc<dyn StateBackend> = recording.clone();

    let stages = vec![
        StageInfo::source("origin", &["raw"]),
        StageInfo::target("store", &["raw"]),
    ];
    let store = CollectingTarget {
        reject: vec![0],
        ..CollectingTarget::default()
    };
    let runtimes = HashMap::from([
        (
            "origin".to_string(),
            StageRuntime::Source(Box::new(CountingSource { total: 3 })),
        ),
        ("store".to_string(), StageRuntime::Target(Box::new(store))),
    ]);
    let rule_store = Arc::new(FailingRuleStore {
        healthy_calls: 1,
        calls: AtomicUsize::new(0),
    });
    let loader = RulesConfigLoader::new(PipelineId::new("orders"), Revision::new("0"), rule_store);

    let mut runner = PipelineRunner::new(context(1), &stages, runtimes, Arc::clone(&backend))
        .unwrap()
        .with_rules(loader, Box::new(NoopObserver));
    let err = runner.run().unwrap_err();
    assert!(matches!(err, PipelineError::RuleStore(_)), "got: {err}");

    assert_eq!(fresh_offset(&backend), Some("1".to_string()));
    assert_eq!(recording.error_rows.load(Ordering::SeqCst), 1);

    let completed = recording.completed.lock().unwrap();
    assert_eq!(completed.len(), 1);
    let (status, stats) = &completed[0];
    assert_eq!(*status, RunStatus::Failed);
    assert_eq!(stats.batches, 1);
    assert_eq!(stats.input_records, 1);
    assert_eq!(stats.output_records, 0);
    assert_eq!(stats.error_records, 1);
}

#[test]
fn preview_applies_overrides_and_commits_nothing() {
    let backend = backend();
    let targets = targets();
    let mut runner = PipelineRunner::new(
        context(2),
        &parity_stages(),
        parity_runtimes(5, &targets),
        Arc::clone(&backend),
    )
    .unwrap();

    let router_output = StageOutput::new(
        "router",
        BTreeMap::from([
            ("even".to_string(), vec![Record::new("test", "t::100", json!({ "n": 100 }))]),
            ("odd".to_string(), Vec::new()),
        ]),
        Vec::new(),
        Vec::new(),
    )
    .unwrap();
    let overrides = HashMap::from([("router".to_string(), router_output)]);

    let summary = runner.run_preview(&overrides).unwrap();

    assert_eq!(*targets.evens.written.lock().unwrap(), vec![100]);
    assert_eq!(*targets.audit.written.lock().unwrap(), vec![0, 1]);
    let snapshots = summary.snapshots.unwrap();
    let names: Vec<&str> = snapshots.iter().map(StageOutput::instance_name).collect();
    assert_eq!(names, vec!["origin", "router", "evens", "odds", "audit"]);
    assert_eq!(fresh_offset(&backend), None);
    assert_eq!(runner.committed_offset().unwrap(), None);
}

#[test]
fn preview_rejects_unknown_override() {
    let mut runner = PipelineRunner::new(
        context(2),
        &parity_stages(),
        parity_runtimes(5, &targets()),
        backend(),
    )
    .unwrap();
    let stored = StageOutput::new("ghost", BTreeMap::new(), Vec::new(), Vec::new()).unwrap();
    let err = runner
        .run_preview(&HashMap::from([("ghost".to_string(), stored)]))
        .unwrap_err();
    assert!(matches!(err, PipelineError::Precondition(_)));
}

#[test]
fn reset_offset_restarts_source() {
    let backend = backend();
    let mut ctx = context(2);
    ctx.max_batches = Some(1);
    let mut runner = PipelineRunner::new(
        ctx,
        &parity_stages(),
        parity_runtimes(5, &targets()),
        Arc::clone(&backend),
    )
    .unwrap();
    runner.run().unwrap();
    assert_eq!(fresh_offset(&backend), Some("2".to_string()));

    runner.reset_offset().unwrap();
    assert_eq!(fresh_offset(&backend), None);
}

fn fixture(name: &str) -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

#[test]
fn fixture_config_builds_runner() {
    let state_dir = tempfile::tempdir().unwrap();
    std::env::set_var("BL_FIXTURE_STATE_DIR", state_dir.path());

    let config = parser::parse_config(&fixture("orders_runner.yaml")).unwrap();
    validator::validate_config(&config).unwrap();
    assert_eq!(config.batch_size, 2);
    assert_eq!(config.stages.len(), 4);

    let backend = batchline_engine::resolve::create_state_backend(&config).unwrap();
    let targets = targets();
    let runtimes = HashMap::from([
        (
            "origin".to_string(),
            StageRuntime::Source(Box::new(CountingSource { total: 3 })),
        ),
        ("router".to_string(), StageRuntime::Processor(Box::new(ParityRouter))),
        ("evens".to_string(), StageRuntime::Target(Box::new(targets.evens.clone()))),
        ("odds".to_string(), StageRuntime::Target(Box::new(targets.odds.clone()))),
    ]);
    let mut runner =
        PipelineRunner::new(config.pipeline_context(), &config.stages, runtimes, backend).unwrap();
    let result = runner.run().unwrap();
    assert_eq!(result.batches, 2);
    assert_eq!(result.output_records, 3);
    assert!(state_dir.path().join("state.db").exists());

    std::env::remove_var("BL_FIXTURE_STATE_DIR");
}

#[test]
fn invalid_fixture_reports_every_problem() {
    let config = parser::parse_config(&fixture("invalid_runner.yaml")).unwrap();
    let err = validator::validate_config(&config).unwrap_err().to_string();
    assert!(err.contains("Unsupported config version"));
    assert!(err.contains("Pipeline name must not be empty"));
    assert!(err.contains("batch_size must be at least 1"));
    assert!(err.contains("exactly one source"));
}
