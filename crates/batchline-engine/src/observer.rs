//! Monitoring hook fed by the runner.

use std::collections::HashMap;

use batchline_types::record::Record;

use crate::rules::RulesConfigurationChangeRequest;

/// Receives rule changes and lane traffic for sampling.
pub trait Observer: Send {
    /// Apply a new rule configuration.
    fn set_configuration(&mut self, request: RulesConfigurationChangeRequest);

    /// Sample records on observer lanes. Keyed by observer lane name.
    fn observe(&mut self, _lanes: &HashMap<String, &[Record]>) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {
    fn set_configuration(&mut self, _request: RulesConfigurationChangeRequest) {}
}
