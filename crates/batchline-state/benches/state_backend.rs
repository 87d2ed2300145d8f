//! Criterion benchmarks for the SQLite state backend.
//!
//! These measure offset persistence and run lifecycle operations that occur
//! on every batch and every pipeline run.

use chrono::Utc;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use batchline_state::prelude::*;

fn bench_run_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("state/run_lifecycle");

    group.bench_function("start_and_complete", |b| {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let pipeline = PipelineId::new("bench_pipeline");
        let revision = Revision::new("0");

        b.iter(|| {
            let run_id = backend.start_run(&pipeline, &revision).unwrap();
            backend
                .complete_run(
                    run_id,
                    RunStatus::Completed,
                    &RunStats {
                        batches: 10,
                        input_records: 1000,
                        output_records: 1000,
                        ..RunStats::default()
                    },
                )
                .unwrap();
        });
    });

    group.finish();
}

fn bench_commit_offset(c: &mut Criterion) {
    let mut group = c.benchmark_group("state/commit_offset");

    for pipeline_count in [1, 10, 50] {
        group.bench_with_input(
            BenchmarkId::new("pipelines", pipeline_count),
            &pipeline_count,
            |b, &pipeline_count| {
                let backend = SqliteStateBackend::in_memory().unwrap();
                let revision = Revision::new("0");
                let pipelines: Vec<PipelineId> = (0..pipeline_count)
                    .map(|i| PipelineId::new(format!("pipeline_{i}")))
                    .collect();
                let mut counter = 0u64;

                b.iter(|| {
                    for pipeline in &pipelines {
                        let record =
                            OffsetRecord::new(Some(counter.to_string()), Utc::now().to_rfc3339());
                        backend.put_offset(pipeline, &revision, &record).unwrap();
                        counter += 1;
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_get_offset(c: &mut Criterion) {
    let mut group = c.benchmark_group("state/get_offset");

    for pipeline_count in [1, 10, 50] {
        group.bench_with_input(
            BenchmarkId::new("pipelines", pipeline_count),
            &pipeline_count,
            |b, &pipeline_count| {
                let backend = SqliteStateBackend::in_memory().unwrap();
                let revision = Revision::new("0");
                let pipelines: Vec<PipelineId> = (0..pipeline_count)
                    .map(|i| PipelineId::new(format!("pipeline_{i}")))
                    .collect();

                for (i, pipeline) in pipelines.iter().enumerate() {
                    let record = OffsetRecord::new(Some(i.to_string()), Utc::now().to_rfc3339());
                    backend.put_offset(pipeline, &revision, &record).unwrap();
                }

                b.iter(|| {
                    for pipeline in &pipelines {
                        let _record = backend.get_offset(pipeline, &revision).unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_run_lifecycle,
    bench_commit_offset,
    bench_get_offset
);
criterion_main!(benches);
