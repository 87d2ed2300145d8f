//! Monitoring rule definitions.
//!
//! A [`RuleDefinitions`] snapshot holds every data rule (evaluated against
//! records flowing through a lane) and metric rule (evaluated against a
//! pipeline metric) configured for one pipeline revision. Rule ids are unique
//! within a snapshot and stable across snapshots.

use serde::{Deserialize, Serialize};

/// How a data rule's threshold value is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThresholdType {
    /// Absolute number of matching records.
    #[default]
    Count,
    /// Percentage of matching records among the sampled ones.
    Percentage,
}

/// Kind of metric a metric rule watches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricType {
    Gauge,
    #[default]
    Counter,
    Histogram,
    Meter,
    Timer,
}

/// Element of a metric a metric rule reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricElement {
    #[default]
    CounterCount,
    HistogramCount,
    HistogramMax,
    HistogramMean,
    HistogramMin,
    MeterCount,
    MeterM1Rate,
    MeterMeanRate,
    TimerCount,
    TimerMax,
    TimerMean,
    TimerMin,
    GaugeValue,
}

/// Data-quality rule evaluated against sampled records of one lane.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataRuleDefinition {
    pub id: String,
    pub label: String,
    /// Stage-naming lane the rule samples.
    pub lane: String,
    /// Percentage of lane records to sample, `0.0..=100.0`.
    pub sampling_percentage: f64,
    /// Number of sampled records kept for inspection.
    pub sampling_records_to_retain: u32,
    /// Predicate applied to each sampled record.
    pub condition: String,
    pub alert_enabled: bool,
    pub alert_text: String,
    pub threshold_type: ThresholdType,
    pub threshold_value: String,
    /// Records that must be sampled before the threshold is evaluated.
    pub min_volume: u64,
    pub meter_enabled: bool,
    pub send_email: bool,
    pub enabled: bool,
}

/// Alert rule evaluated against a pipeline metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsRuleDefinition {
    pub id: String,
    pub alert_text: String,
    /// Metric the rule watches (e.g. `"pipeline.batchInputRecords.meter"`).
    pub metric_id: String,
    pub metric_type: MetricType,
    pub metric_element: MetricElement,
    pub condition: String,
    pub send_email: bool,
    pub enabled: bool,
}

/// Every rule configured for one pipeline revision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleDefinitions {
    pub metrics_rule_definitions: Vec<MetricsRuleDefinition>,
    pub data_rule_definitions: Vec<DataRuleDefinition>,
    pub email_ids: Vec<String>,
}

impl RuleDefinitions {
    #[must_use]
    pub fn new(
        metrics_rule_definitions: Vec<MetricsRuleDefinition>,
        data_rule_definitions: Vec<DataRuleDefinition>,
    ) -> Self {
        Self {
            metrics_rule_definitions,
            data_rule_definitions,
            email_ids: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics_rule_definitions.is_empty() && self.data_rule_definitions.is_empty()
    }
}
