//! Pipeline state persistence for batchline.
//!
//! Provides the [`StateBackend`] trait and a [`SqliteStateBackend`]
//! implementation for source offsets, run history, and rejected record
//! storage.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod sqlite;

pub use backend::StateBackend;
pub use error::StateError;
pub use sqlite::SqliteStateBackend;

/// Common imports for state backend users.
pub mod prelude {
    pub use crate::backend::StateBackend;
    pub use crate::error::StateError;
    pub use crate::sqlite::SqliteStateBackend;
    pub use batchline_types::state::{
        ErrorRecordRow, OffsetRecord, PipelineId, Revision, RunStats, RunStatus,
    };
}
