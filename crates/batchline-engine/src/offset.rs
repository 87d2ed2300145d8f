//! Source offset tracking.
//!
//! A tracker holds the committed offset of a source and a tentative new
//! offset set during the batch. Only [`SourceOffsetTracker::commit_offset`]
//! makes the new offset durable; a `None` offset means the source is
//! exhausted.

use std::sync::Arc;

use batchline_state::{StateBackend, StateError};
use batchline_types::state::{OffsetRecord, PipelineId, Revision};

use crate::error::PipelineError;

/// Offset bookkeeping for one (pipeline, revision).
pub trait SourceOffsetTracker: Send {
    /// Whether the last commit stored the null offset.
    fn is_finished(&self) -> bool;

    /// Committed offset.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::OffsetPersistence`] if durable state cannot
    /// be read or initialised.
    fn get_offset(&mut self) -> Result<Option<String>, PipelineError>;

    /// Record the tentative new offset. Nothing is persisted.
    fn set_offset(&mut self, offset: Option<String>);

    /// Promote the tentative offset to the committed one.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::OffsetPersistence`] if the offset cannot be
    /// persisted; the committed offset is then left unchanged.
    fn commit_offset(&mut self) -> Result<(), PipelineError>;

    /// Force the committed offset back to the null sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::OffsetPersistence`] on storage failure.
    fn reset_offset(&mut self) -> Result<(), PipelineError>;
}

/// Durable tracker backed by a [`StateBackend`].
///
/// The committed offset is read from storage on first access and cached
/// afterwards. If nothing was ever stored a null record is persisted right
/// away, so "never run" and "reset" look the same.
pub struct ProductionOffsetTracker {
    pipeline: PipelineId,
    revision: Revision,
    backend: Arc<dyn StateBackend>,
    current_offset: Option<Option<String>>,
    new_offset: Option<String>,
    finished: bool,
}

impl ProductionOffsetTracker {
    #[must_use]
    pub fn new(pipeline: PipelineId, revision: Revision, backend: Arc<dyn StateBackend>) -> Self {
        Self {
            pipeline,
            revision,
            backend,
            current_offset: None,
            new_offset: None,
            finished: false,
        }
    }

    #[must_use]
    pub fn pipeline(&self) -> &PipelineId {
        &self.pipeline
    }

    #[must_use]
    pub fn revision(&self) -> &Revision {
        &self.revision
    }

    /// Tentative offset not yet committed.
    #[must_use]
    pub fn pending_offset(&self) -> Option<&str> {
        self.new_offset.as_deref()
    }

    fn persistence_error(&self, source: StateError) -> PipelineError {
        PipelineError::OffsetPersistence {
            pipeline: self.pipeline.clone(),
            revision: self.revision.clone(),
            source,
        }
    }

    fn save_offset(&self, offset: Option<&str>) -> Result<(), PipelineError> {
        tracing::debug!(
            pipeline = self.pipeline.as_str(),
            revision = self.revision.as_str(),
            offset = offset.unwrap_or("<null>"),
            "Saving source offset"
        );
        let record = OffsetRecord::new(offset.map(str::to_string), chrono::Utc::now().to_rfc3339());
        self.backend
            .put_offset(&self.pipeline, &self.revision, &record)
            .map_err(|e| {
                tracing::error!(
                    pipeline = self.pipeline.as_str(),
                    revision = self.revision.as_str(),
                    offset = offset.unwrap_or("<null>"),
                    error = %e,
                    "Failed to save source offset"
                );
                self.persistence_error(e)
            })
    }

    fn load_offset(&self) -> Result<Option<String>, PipelineError> {
        let stored = self
            .backend
            .get_offset(&self.pipeline, &self.revision)
            .map_err(|e| self.persistence_error(e))?;
        match stored {
            Some(record) => Ok(record.offset),
            None => {
                self.save_offset(None)?;
                Ok(None)
            }
        }
    }
}

impl SourceOffsetTracker for ProductionOffsetTracker {
    fn is_finished(&self) -> bool {
        self.finished
    }

    fn get_offset(&mut self) -> Result<Option<String>, PipelineError> {
        if let Some(cached) = &self.current_offset {
            return Ok(cached.clone());
        }
        let loaded = self.load_offset()?;
        self.current_offset = Some(loaded.clone());
        Ok(loaded)
    }

    fn set_offset(&mut self, offset: Option<String>) {
        self.new_offset = offset;
    }

    fn commit_offset(&mut self) -> Result<(), PipelineError> {
        self.save_offset(self.new_offset.as_deref())?;
        let committed = self.new_offset.take();
        self.finished = committed.is_none();
        self.current_offset = Some(committed);
        Ok(())
    }

    fn reset_offset(&mut self) -> Result<(), PipelineError> {
        self.save_offset(None)?;
        self.current_offset = Some(None);
        self.new_offset = None;
        Ok(())
    }
}

/// In-memory tracker for preview runs; commits never reach storage.
#[derive(Debug, Clone, Default)]
pub struct PreviewOffsetTracker {
    current_offset: Option<String>,
    new_offset: Option<String>,
    finished: bool,
}

impl PreviewOffsetTracker {
    /// Start previewing from `offset`.
    #[must_use]
    pub fn new(offset: Option<String>) -> Self {
        Self {
            current_offset: offset,
            new_offset: None,
            finished: false,
        }
    }
}

impl SourceOffsetTracker for PreviewOffsetTracker {
    fn is_finished(&self) -> bool {
        self.finished
    }

    fn get_offset(&mut self) -> Result<Option<String>, PipelineError> {
        Ok(self.current_offset.clone())
    }

    fn set_offset(&mut self, offset: Option<String>) {
        self.new_offset = offset;
    }

    fn commit_offset(&mut self) -> Result<(), PipelineError> {
        self.current_offset = self.new_offset.take();
        self.finished = self.current_offset.is_none();
        Ok(())
    }

    fn reset_offset(&mut self) -> Result<(), PipelineError> {
        self.current_offset = None;
        self.new_offset = None;
        Ok(())
    }
}
