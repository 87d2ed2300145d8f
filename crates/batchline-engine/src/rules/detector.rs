use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use batchline_types::lane;
use batchline_types::rules::{DataRuleDefinition, MetricsRuleDefinition, RuleDefinitions};
use batchline_types::state::{PipelineId, Revision};
use serde::Serialize;

use super::{RuleStore, RuleStoreError};
use crate::observer::Observer;

/// What the observer must change to move from one rule snapshot to the next.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RulesConfigurationChangeRequest {
    rule_definitions: Arc<RuleDefinitions>,
    rules_to_remove: BTreeSet<String>,
    metric_alerts_to_remove: BTreeSet<String>,
    lane_to_data_rules: BTreeMap<String, Vec<DataRuleDefinition>>,
    rules_with_sampled_record_size_changes: BTreeMap<String, u32>,
}

impl RulesConfigurationChangeRequest {
    /// The snapshot the request moves to.
    #[must_use]
    pub fn rule_definitions(&self) -> &Arc<RuleDefinitions> {
        &self.rule_definitions
    }

    /// Data rule ids whose live state must be torn down.
    #[must_use]
    pub fn rules_to_remove(&self) -> &BTreeSet<String> {
        &self.rules_to_remove
    }

    /// Metric ids whose alerts must be torn down.
    #[must_use]
    pub fn metric_alerts_to_remove(&self) -> &BTreeSet<String> {
        &self.metric_alerts_to_remove
    }

    /// Enabled data rules keyed by observer lane name.
    #[must_use]
    pub fn lane_to_data_rules(&self) -> &BTreeMap<String, Vec<DataRuleDefinition>> {
        &self.lane_to_data_rules
    }

    /// New sampled-record retention per rule id.
    #[must_use]
    pub fn rules_with_sampled_record_size_changes(&self) -> &BTreeMap<String, u32> {
        &self.rules_with_sampled_record_size_changes
    }
}

/// Diff `previous` against `next`.
///
/// With no previous snapshot only the lane index is built.
#[must_use]
pub fn detect_changes(
    previous: Option<&RuleDefinitions>,
    next: &Arc<RuleDefinitions>,
) -> RulesConfigurationChangeRequest {
    let mut rules_to_remove = BTreeSet::new();
    let mut metric_alerts_to_remove = BTreeSet::new();
    let mut resized = BTreeMap::new();

    if let Some(previous) = previous {
        detect_data_rule_changes(
            &previous.data_rule_definitions,
            &next.data_rule_definitions,
            &mut rules_to_remove,
            &mut resized,
        );
        detect_metric_rule_changes(
            &previous.metrics_rule_definitions,
            &next.metrics_rule_definitions,
            &mut metric_alerts_to_remove,
        );
    }

    let mut lane_to_data_rules: BTreeMap<String, Vec<DataRuleDefinition>> = BTreeMap::new();
    for rule in next.data_rule_definitions.iter().filter(|r| r.enabled) {
        lane_to_data_rules
            .entry(lane::observer_lane(&rule.lane))
            .or_default()
            .push(rule.clone());
    }

    RulesConfigurationChangeRequest {
        rule_definitions: Arc::clone(next),
        rules_to_remove,
        metric_alerts_to_remove,
        lane_to_data_rules,
        rules_with_sampled_record_size_changes: resized,
    }
}

fn detect_data_rule_changes(
    old_rules: &[DataRuleDefinition],
    new_rules: &[DataRuleDefinition],
    to_remove: &mut BTreeSet<String>,
    resized: &mut BTreeMap<String, u32>,
) {
    let by_id: HashMap<&str, &DataRuleDefinition> =
        new_rules.iter().map(|r| (r.id.as_str(), r)).collect();

    for old in old_rules {
        let Some(new) = by_id.get(old.id.as_str()) else {
            to_remove.insert(old.id.clone());
            continue;
        };
        if !new.enabled {
            if old.enabled {
                to_remove.insert(old.id.clone());
            }
            continue;
        }
        let removed = has_rule_changed(old, new) && (old.alert_enabled || old.meter_enabled);
        if removed {
            to_remove.insert(old.id.clone());
        } else if old.sampling_records_to_retain != new.sampling_records_to_retain {
            resized.insert(new.id.clone(), new.sampling_records_to_retain);
        }
    }
}

// Caller guarantees `new` is enabled.
fn has_rule_changed(old: &DataRuleDefinition, new: &DataRuleDefinition) -> bool {
    !old.enabled
        || old.lane != new.lane
        || old.condition != new.condition
        || old.threshold_value != new.threshold_value
        || old.threshold_type != new.threshold_type
        || old.min_volume != new.min_volume
        || old.sampling_percentage.to_bits() != new.sampling_percentage.to_bits()
}

fn detect_metric_rule_changes(
    old_rules: &[MetricsRuleDefinition],
    new_rules: &[MetricsRuleDefinition],
    alerts_to_remove: &mut BTreeSet<String>,
) {
    let by_id: HashMap<&str, &MetricsRuleDefinition> =
        new_rules.iter().map(|r| (r.id.as_str(), r)).collect();

    for old in old_rules {
        let stale = match by_id.get(old.id.as_str()) {
            None => true,
            Some(new) if !new.enabled => old.enabled,
            Some(new) => has_alert_changed(old, new),
        };
        if stale {
            alerts_to_remove.insert(old.metric_id.clone());
        }
    }
}

fn has_alert_changed(old: &MetricsRuleDefinition, new: &MetricsRuleDefinition) -> bool {
    !old.enabled
        || old.metric_id != new.metric_id
        || old.condition != new.condition
        || old.metric_type != new.metric_type
        || old.metric_element != new.metric_element
}

/// Polls the rule store for one pipeline revision and notifies the observer
/// of every new snapshot.
pub struct RulesConfigLoader {
    pipeline: PipelineId,
    revision: Revision,
    store: Arc<dyn RuleStore>,
    previous: Option<Arc<RuleDefinitions>>,
}

impl RulesConfigLoader {
    #[must_use]
    pub fn new(pipeline: PipelineId, revision: Revision, store: Arc<dyn RuleStore>) -> Self {
        Self {
            pipeline,
            revision,
            store,
            previous: None,
        }
    }

    /// Snapshot returned by the last successful [`RulesConfigLoader::load`].
    #[must_use]
    pub fn previous(&self) -> Option<&Arc<RuleDefinitions>> {
        self.previous.as_ref()
    }

    /// Fetch the current rules and push a change request to `observer` if
    /// the store returned a different snapshot instance than last time.
    ///
    /// # Errors
    ///
    /// Returns the store's [`RuleStoreError`] unchanged; the previous
    /// snapshot is kept in that case.
    pub fn load(
        &mut self,
        observer: &mut dyn Observer,
    ) -> Result<Arc<RuleDefinitions>, RuleStoreError> {
        let next = self
            .store
            .retrieve_rules(&self.pipeline, &self.revision)?;
        let unchanged = self
            .previous
            .as_ref()
            .is_some_and(|prev| Arc::ptr_eq(prev, &next));
        if !unchanged {
            let request = detect_changes(self.previous.as_deref(), &next);
            tracing::info!(
                pipeline = self.pipeline.as_str(),
                revision = self.revision.as_str(),
                data_rules = next.data_rule_definitions.len(),
                metric_rules = next.metrics_rule_definitions.len(),
                rules_to_remove = request.rules_to_remove().len(),
                alerts_to_remove = request.metric_alerts_to_remove().len(),
                "Rule definitions changed"
            );
            observer.set_configuration(request);
        }
        self.previous = Some(Arc::clone(&next));
        Ok(next)
    }
}
