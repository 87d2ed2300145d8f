//! Stage implementations plugged into the runner.
//!
//! A stage fails as a whole by returning an error; individual bad records
//! go to the error sink through [`StageContext::to_error`] and the batch
//! carries on.

use batchline_types::error::{ErrorMessage, ErrorRecord};
use batchline_types::record::Record;
use batchline_types::stage::StageType;

use crate::batch::{Batch, BatchMaker};
use crate::error_sink::ErrorSink;

/// Per-invocation handle a stage uses to report errors.
pub struct StageContext<'a> {
    instance_name: &'a str,
    error_sink: &'a mut ErrorSink,
}

impl<'a> StageContext<'a> {
    pub(crate) fn new(instance_name: &'a str, error_sink: &'a mut ErrorSink) -> Self {
        Self {
            instance_name,
            error_sink,
        }
    }

    #[must_use]
    pub fn instance_name(&self) -> &str {
        self.instance_name
    }

    /// Reject `record`. It is counted against the stage and stored as an
    /// error record.
    pub fn to_error(&mut self, record: Record, code: &str, message: impl Into<String>) {
        self.error_sink
            .add_record(self.instance_name, ErrorRecord::new(record, code, message));
    }

    /// Report a stage-level problem that does not concern one record.
    pub fn report_error(&mut self, code: &str, message: impl Into<String>) {
        let message = ErrorMessage::new(code, message, chrono::Utc::now().timestamp_millis());
        tracing::warn!(stage = self.instance_name, %message, "Stage reported error");
        self.error_sink.add_stage_error(self.instance_name, message);
    }
}

/// Reads records from outside the pipeline.
pub trait Source: Send {
    /// Emit up to `max_batch_size` records after `last_offset` and return
    /// the offset to resume from, or `None` once exhausted.
    ///
    /// # Errors
    ///
    /// Any error fails the batch.
    fn produce(
        &mut self,
        last_offset: Option<&str>,
        max_batch_size: usize,
        batch_maker: &mut BatchMaker,
        context: &mut StageContext<'_>,
    ) -> anyhow::Result<Option<String>>;
}

/// Transforms the records of its input lanes.
pub trait Processor: Send {
    /// # Errors
    ///
    /// Any error fails the batch.
    fn process(
        &mut self,
        batch: &Batch,
        batch_maker: &mut BatchMaker,
        context: &mut StageContext<'_>,
    ) -> anyhow::Result<()>;
}

/// Writes records outside the pipeline.
pub trait Target: Send {
    /// # Errors
    ///
    /// Any error fails the batch.
    fn write(&mut self, batch: &Batch, context: &mut StageContext<'_>) -> anyhow::Result<()>;
}

/// A stage implementation of one of the three kinds.
pub enum StageRuntime {
    Source(Box<dyn Source>),
    Processor(Box<dyn Processor>),
    Target(Box<dyn Target>),
}

impl StageRuntime {
    #[must_use]
    pub fn stage_type(&self) -> StageType {
        match self {
            Self::Source(_) => StageType::Source,
            Self::Processor(_) => StageType::Processor,
            Self::Target(_) => StageType::Target,
        }
    }
}

impl std::fmt::Debug for StageRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StageRuntime::{}", self.stage_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_routes_errors_to_stage() {
        let mut sink = ErrorSink::new();
        {
            let mut ctx = StageContext::new("parse", &mut sink);
            ctx.to_error(
                Record::new("origin", "s::1", serde_json::json!("x")),
                "PARSE",
                "not an object",
            );
            ctx.report_error("SLOW", "upstream took 5s");
        }
        assert_eq!(sink.error_records("parse").len(), 1);
        assert_eq!(sink.stage_errors("parse")[0].code, "SLOW");
    }
}
