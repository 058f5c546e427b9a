use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::schema::GroupSchema;

/// Value of the `source`/`provider` label on every observation.
pub const SOURCE_TAG: &str = "emberplus";

/// Category of related metrics sharing one label and field schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricGroup {
    Fans,
    Temperatures,
    Currents,
    Networks,
    Timing,
    SystemState,
}

impl MetricGroup {
    /// Every group, in declaration order.
    pub const ALL: [MetricGroup; 6] = [
        MetricGroup::Fans,
        MetricGroup::Temperatures,
        MetricGroup::Currents,
        MetricGroup::Networks,
        MetricGroup::Timing,
        MetricGroup::SystemState,
    ];

    /// Get the string representation used in configuration and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricGroup::Fans => "fans",
            MetricGroup::Temperatures => "temperatures",
            MetricGroup::Currents => "currents",
            MetricGroup::Networks => "networks",
            MetricGroup::Timing => "timing",
            MetricGroup::SystemState => "system_state",
        }
    }

    /// The fixed schema for this group.
    pub fn schema(&self) -> &'static GroupSchema {
        GroupSchema::of(*self)
    }
}

impl std::fmt::Display for MetricGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single field carried by an observation.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Numeric measurement.
    Number(f64),
    /// Non-numeric measurement (sinks must accept these without failing).
    Text(String),
    /// Previously present value that is now missing.
    Missing,
}

impl FieldValue {
    /// Text view of the field, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Ordered label set following a group's fixed label schema.
///
/// Every schema label is always present; labels without a value carry an
/// empty string, so the label names never vary between devices.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabelSet(Vec<(&'static str, String)>);

impl LabelSet {
    /// Create a label set with every label of the group's schema set to "".
    pub fn for_group(group: MetricGroup) -> Self {
        Self(
            group
                .schema()
                .labels
                .iter()
                .map(|name| (*name, String::new()))
                .collect(),
        )
    }

    /// Set a label value. Returns `false` when the label is not part of the schema.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> bool {
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => {
                *v = value.into();
                true
            }
            None => false,
        }
    }

    /// Get a label value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate labels in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One published measurement: a label set plus one or more fields.
///
/// Observations are ephemeral. They are produced per initial read and per
/// change notification and consumed immediately by a [`crate::MetricSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct MetricObservation {
    /// Metric group this observation belongs to.
    pub group: MetricGroup,

    /// Stable identity of the measured object (device, group, path, name).
    ///
    /// Sinks use it to replace a series whose label values changed.
    pub series: String,

    /// Label set following the group schema.
    pub labels: LabelSet,

    /// Field name to value.
    pub fields: BTreeMap<String, FieldValue>,

    /// Unix epoch milliseconds when the observation was produced.
    pub timestamp: i64,
}

impl MetricObservation {
    /// Create an empty observation for a group with the current timestamp.
    pub fn new(group: MetricGroup, series: impl Into<String>) -> Self {
        Self {
            group,
            series: series.into(),
            labels: LabelSet::for_group(group),
            fields: BTreeMap::new(),
            timestamp: current_timestamp_millis(),
        }
    }

    /// Set a label on this observation (ignored when outside the schema).
    pub fn with_label(mut self, key: &str, value: impl Into<String>) -> Self {
        self.labels.set(key, value);
        self
    }

    /// Add a field to this observation.
    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Get a field value.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// True when at least one field carries a value.
    pub fn has_values(&self) -> bool {
        self.fields.values().any(|v| !matches!(v, FieldValue::Missing))
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch (should never happen in practice).
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
