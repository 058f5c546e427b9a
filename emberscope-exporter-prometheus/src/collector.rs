//! Pull-based registry keyed by full label tuple.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{trace, warn};

use emberscope_common::{
    FieldValue, MetricGroup, MetricObservation, MetricSink, SinkError,
};

use crate::config::PrometheusConfig;
use crate::mapping::{info_metric_name, metric_name, sanitize_label_name};

/// A unique identifier for a metric time series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    /// The full Prometheus metric name.
    pub name: String,
    /// Label key-value pairs in schema order, followed by default labels.
    pub labels: Vec<(String, String)>,
}

impl SeriesKey {
    /// Build the key of one field of an observation.
    fn new(name: String, observation: &MetricObservation, config: &PrometheusConfig) -> Self {
        let mut labels: Vec<(String, String)> = observation
            .labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        for (k, v) in &config.default_labels {
            let key = sanitize_label_name(k);
            if !labels.iter().any(|(lk, _)| lk == &key) {
                labels.push((key, v.clone()));
            }
        }

        Self { name, labels }
    }

    /// Format labels for Prometheus exposition format.
    pub fn format_labels(&self) -> String {
        format_labels(&self.labels)
    }
}

/// Current value of a series.
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesValue {
    Gauge(f64),
    /// Non-numeric value, exposed as `name{...,value="text"} 1`.
    Info(String),
}

/// A stored metric value with metadata.
#[derive(Debug, Clone)]
pub struct StoredMetric {
    pub group: MetricGroup,
    pub value: SeriesValue,
    /// When this series was last updated.
    pub last_updated: Instant,
    /// Timestamp of the observation that produced the value.
    pub timestamp_ms: i64,
}

/// Collector statistics.
#[derive(Debug, Clone, Default)]
pub struct CollectorStats {
    /// Total observations published.
    pub observations_received: u64,
    /// Series values written.
    pub series_updated: u64,
    /// Series removed because their value went missing or their labels changed.
    pub series_removed: u64,
    /// Field values rejected because max_series was reached.
    pub dropped_max_series: u64,
}

#[derive(Debug, Default)]
struct Registry {
    series: HashMap<SeriesKey, StoredMetric>,
    /// (observation series, field) -> key currently holding its value.
    owners: HashMap<(String, String), SeriesKey>,
}

impl Registry {
    fn remove_owned(&mut self, owner: &(String, String)) -> bool {
        match self.owners.remove(owner) {
            Some(key) => self.series.remove(&key).is_some(),
            None => false,
        }
    }
}

/// Thread-safe gauge registry.
///
/// Concurrent publishes for different label tuples never interfere; two
/// publishes for the same tuple follow last-write-wins.
pub struct MetricCollector {
    registry: RwLock<Registry>,
    config: PrometheusConfig,
    stats: RwLock<CollectorStats>,
}

impl MetricCollector {
    /// Create a new metric collector.
    pub fn new(config: PrometheusConfig) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            config,
            stats: RwLock::new(CollectorStats::default()),
        }
    }

    /// Record an observation, one series per field.
    pub fn record(&self, observation: &MetricObservation) -> Result<(), SinkError> {
        self.stats.write().observations_received += 1;

        let schema = observation.group.schema();
        let mut registry = self.registry.write();
        let mut updated = 0u64;
        let mut removed = 0u64;
        let mut rejected: Option<SinkError> = None;

        for (field, value) in &observation.fields {
            let owner = (observation.series.clone(), field.clone());

            let (name, series_value) = match value {
                FieldValue::Missing => {
                    if registry.remove_owned(&owner) {
                        removed += 1;
                    }
                    continue;
                }
                FieldValue::Number(v) => (
                    metric_name(&self.config.prefix, schema, field),
                    SeriesValue::Gauge(*v),
                ),
                FieldValue::Text(s) => (
                    info_metric_name(&self.config.prefix, schema, field),
                    SeriesValue::Info(s.clone()),
                ),
            };

            let key = SeriesKey::new(name, observation, &self.config);

            // Labels or value kind changed: retire the previous series of this field
            if registry.owners.get(&owner).is_some_and(|old| old != &key) && registry.remove_owned(&owner) {
                removed += 1;
            }

            if !registry.series.contains_key(&key)
                && registry.series.len() >= self.config.max_series
            {
                warn!(
                    max_series = self.config.max_series,
                    series = %observation.series,
                    "Max series limit reached, dropping new metric"
                );
                self.stats.write().dropped_max_series += 1;
                rejected = Some(SinkError::Capacity {
                    series: observation.series.clone(),
                    limit: self.config.max_series,
                });
                continue;
            }

            registry.series.insert(
                key.clone(),
                StoredMetric {
                    group: observation.group,
                    value: series_value,
                    last_updated: Instant::now(),
                    timestamp_ms: observation.timestamp,
                },
            );
            registry.owners.insert(owner, key);
            updated += 1;
        }
        drop(registry);

        trace!(
            series = %observation.series,
            updated,
            removed,
            "Observation recorded"
        );

        let mut stats = self.stats.write();
        stats.series_updated += updated;
        stats.series_removed += removed;
        drop(stats);

        match rejected {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Get the current number of stored series.
    pub fn series_count(&self) -> usize {
        self.registry.read().series.len()
    }

    /// Get collector statistics.
    pub fn stats(&self) -> CollectorStats {
        self.stats.read().clone()
    }

    /// Current value of a series, looked up by name and label subset.
    pub fn value_of(&self, name: &str, labels: &[(&str, &str)]) -> Option<SeriesValue> {
        let registry = self.registry.read();
        registry
            .series
            .iter()
            .find(|(key, _)| {
                key.name == name
                    && labels
                        .iter()
                        .all(|(lk, lv)| key.labels.iter().any(|(k, v)| k == lk && v == lv))
            })
            .map(|(_, stored)| stored.value.clone())
    }

    /// Render metrics in Prometheus exposition format.
    pub fn render(&self) -> String {
        let registry = self.registry.read();
        let mut output = Vec::with_capacity(registry.series.len() * 100);

        // Group series by name for TYPE/HELP comments
        let mut by_name: HashMap<&str, Vec<(&SeriesKey, &StoredMetric)>> = HashMap::new();
        for (key, metric) in &registry.series {
            by_name.entry(&key.name).or_default().push((key, metric));
        }

        let mut names: Vec<_> = by_name.keys().copied().collect();
        names.sort();

        for name in names {
            let mut series = by_name.remove(name).unwrap_or_default();
            if series.is_empty() {
                continue;
            }
            series.sort_by(|a, b| a.0.labels.cmp(&b.0.labels));

            let help = series[0].1.group.schema().help;
            writeln!(output, "# HELP {} {}", name, help).ok();
            writeln!(output, "# TYPE {} gauge", name).ok();

            for (key, metric) in series {
                match &metric.value {
                    SeriesValue::Gauge(value) => {
                        writeln!(
                            output,
                            "{}{} {}",
                            key.name,
                            key.format_labels(),
                            format_value(*value)
                        )
                        .ok();
                    }
                    SeriesValue::Info(text) => {
                        let mut labels = key.labels.clone();
                        labels.push(("value".to_string(), text.clone()));
                        writeln!(output, "{}{} 1", key.name, format_labels(&labels)).ok();
                    }
                }
            }
        }

        let stats = self.stats.read();
        writeln!(output).ok();
        writeln!(output, "# TYPE emberscope_exporter_series_total gauge").ok();
        writeln!(
            output,
            "emberscope_exporter_series_total {}",
            registry.series.len()
        )
        .ok();
        writeln!(
            output,
            "# TYPE emberscope_exporter_observations_received_total counter"
        )
        .ok();
        writeln!(
            output,
            "emberscope_exporter_observations_received_total {}",
            stats.observations_received
        )
        .ok();
        writeln!(
            output,
            "# TYPE emberscope_exporter_dropped_max_series_total counter"
        )
        .ok();
        writeln!(
            output,
            "emberscope_exporter_dropped_max_series_total {}",
            stats.dropped_max_series
        )
        .ok();

        String::from_utf8(output).unwrap_or_default()
    }
}

impl MetricSink for MetricCollector {
    fn publish(&self, observation: &MetricObservation) -> Result<(), SinkError> {
        self.record(observation)
    }

    fn name(&self) -> &'static str {
        "prometheus"
    }
}

/// Create a shareable collector handle.
pub type SharedCollector = Arc<MetricCollector>;

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

/// Format labels for Prometheus exposition format.
fn format_labels(labels: &[(String, String)]) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}
