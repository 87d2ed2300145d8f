//! Batch execution core for batchline pipelines.
//!
//! Batches flow through a [`PipeGraph`] inside a [`PipeBatch`], which owns
//! the lane payloads of one batch. A [`SourceOffsetTracker`] makes source
//! progress durable on commit, and the [`rules`] module reconciles
//! monitoring rule changes between batches. [`PipelineRunner`] ties these
//! together.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod batch;
pub mod config;
pub mod error;
pub(crate) mod error_records;
pub mod error_sink;
pub mod graph;
pub mod observer;
pub mod offset;
pub mod pipe_batch;
pub mod resolve;
pub mod result;
pub mod rules;
pub mod runner;
pub mod stage;
pub mod stage_output;

pub use batch::{Batch, BatchMaker};
pub use error::{BatchError, PipelineError};
pub use error_sink::ErrorSink;
pub use graph::{Pipe, PipeGraph, StagePipe};
pub use observer::{NoopObserver, Observer};
pub use offset::{PreviewOffsetTracker, ProductionOffsetTracker, SourceOffsetTracker};
pub use pipe_batch::PipeBatch;
pub use result::{BatchSummary, RunResult};
pub use rules::{RuleStore, RuleStoreError, RulesConfigLoader, RulesConfigurationChangeRequest};
pub use runner::{PipelineContext, PipelineRunner};
pub use stage::{Processor, Source, StageContext, StageRuntime, Target};
pub use stage_output::StageOutput;
