//! Shared batchline data model: records, stages, lane naming, monitoring
//! rules, and state backend types.
//!
//! This crate has no engine or storage dependencies so both the state
//! backend and the engine can build on it.

pub mod error;
pub mod lane;
pub mod record;
pub mod rules;
pub mod stage;
pub mod state;
