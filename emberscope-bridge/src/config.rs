//! Configuration for the EmberScope bridge.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use emberscope_common::{GroupSchema, LoggingConfig, MetricGroup, RawValue, SubPaths};
use emberscope_exporter_influx::InfluxConfig;
use emberscope_exporter_prometheus::PrometheusConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmberscopeConfig {
    /// Bridge-wide behaviour
    #[serde(default)]
    pub bridge: BridgeSettings,

    /// Devices keyed by identifier
    pub devices: BTreeMap<String, DeviceConfig>,

    /// Metric sink
    #[serde(default)]
    pub sink: SinkConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Timeouts, reconnection and dual emission policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// Bound on connect plus directory handshake (default: 5000)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Bound on each initial path resolution (default: 3000)
    #[serde(default = "default_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    #[serde(default)]
    pub dual_emission: DualEmissionConfig,
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_resolve_timeout_ms() -> u64 {
    3000
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            resolve_timeout_ms: default_resolve_timeout_ms(),
            reconnect: ReconnectConfig::default(),
            dual_emission: DualEmissionConfig::default(),
        }
    }
}

impl BridgeSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }
}

/// Automatic reconnection of dropped or unreachable devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Disabled by default: a dropped device stays down.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ReconnectConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Next backoff delay, doubling up to the configured maximum.
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_delay())
    }
}

/// Per-group dual emission (raw string plus derived number) overrides.
///
/// Unset groups fall back to the schema default: on for fans and currents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DualEmissionConfig {
    #[serde(default)]
    pub fans: Option<bool>,
    #[serde(default)]
    pub temperatures: Option<bool>,
    #[serde(default)]
    pub currents: Option<bool>,
    #[serde(default)]
    pub networks: Option<bool>,
    #[serde(default)]
    pub timing: Option<bool>,
    #[serde(default)]
    pub system_state: Option<bool>,
}

impl DualEmissionConfig {
    /// Whether dual emission applies to a group.
    pub fn enabled(&self, group: MetricGroup) -> bool {
        let configured = match group {
            MetricGroup::Fans => self.fans,
            MetricGroup::Temperatures => self.temperatures,
            MetricGroup::Currents => self.currents,
            MetricGroup::Networks => self.networks,
            MetricGroup::Timing => self.timing,
            MetricGroup::SystemState => self.system_state,
        };
        configured.unwrap_or(group.schema().dual_emission_default)
    }
}

/// One remote device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Network address (IP or hostname)
    pub address: String,

    /// Provider port (default: 9000)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Display name, exported as the `studio` label (default: the device identifier)
    #[serde(default)]
    pub name: Option<String>,

    /// How to reach the device
    #[serde(default)]
    pub transport: TransportConfig,

    /// Declared metrics per group
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_port() -> u16 {
    9000
}

/// Device client transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// In-process simulated parameter tree.
    Simulated(SimulatedConfig),
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Simulated(SimulatedConfig::default())
    }
}

/// Simulated device tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedConfig {
    /// Parameter path to initial value
    #[serde(default)]
    pub values: BTreeMap<String, RawValue>,

    /// Push drifted numeric values at this interval (0 = static tree)
    #[serde(default)]
    pub update_interval_ms: u64,

    /// Maximum relative drift per update, e.g. 0.02 for 2%
    #[serde(default = "default_drift")]
    pub drift: f64,

    /// Refuse every connection attempt
    #[serde(default)]
    pub unreachable: bool,

    /// Artificial handshake latency
    #[serde(default)]
    pub connect_delay_ms: u64,

    /// Paths whose resolution is rejected by the device
    #[serde(default)]
    pub rejected_paths: Vec<String>,

    /// Paths never drifted, such as counters and identifiers
    #[serde(default)]
    pub steady_paths: Vec<String>,
}

fn default_drift() -> f64 {
    0.02
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            values: BTreeMap::new(),
            update_interval_ms: 0,
            drift: default_drift(),
            unreachable: false,
            connect_delay_ms: 0,
            rejected_paths: Vec::new(),
            steady_paths: Vec::new(),
        }
    }
}

/// Declared metric definitions, grouped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub fans: Vec<SimpleMetric>,
    #[serde(default)]
    pub currents: Vec<SimpleMetric>,
    #[serde(default)]
    pub temperatures: Vec<CompositeMetric>,
    #[serde(default)]
    pub networks: Vec<CompositeMetric>,
    #[serde(default)]
    pub timing: Vec<CompositeMetric>,
    #[serde(default)]
    pub system_state: Vec<CompositeMetric>,
}

/// A metric read from one parameter path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleMetric {
    pub path: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// Unit suffix stripped before normalization (fans default to " rpm")
    #[serde(default)]
    pub unit: Option<String>,
}

/// A metric assembled from named sub-paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeMetric {
    pub paths: BTreeMap<String, String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// A declared mapping from parameter path(s) to one metric identity.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricDefinition {
    Simple(SimpleMetric),
    Composite(CompositeMetric),
}

/// Key under which a simple definition's single path is tracked.
pub const SIMPLE_KEY: &str = "value";

impl MetricDefinition {
    /// `(sub-path key, parameter path)` pairs to resolve.
    pub fn sub_paths(&self) -> Vec<(String, String)> {
        match self {
            MetricDefinition::Simple(m) => vec![(SIMPLE_KEY.to_string(), m.path.clone())],
            MetricDefinition::Composite(m) => m
                .paths
                .iter()
                .map(|(k, p)| (k.clone(), p.clone()))
                .collect(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            MetricDefinition::Simple(m) => m.name.as_deref(),
            MetricDefinition::Composite(m) => m.name.as_deref(),
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            MetricDefinition::Simple(m) => m.description.as_deref(),
            MetricDefinition::Composite(m) => m.description.as_deref(),
        }
    }

    pub fn location(&self) -> Option<&str> {
        match self {
            MetricDefinition::Simple(m) => m.location.as_deref(),
            MetricDefinition::Composite(m) => m.location.as_deref(),
        }
    }

    pub fn unit(&self) -> Option<&str> {
        match self {
            MetricDefinition::Simple(m) => m.unit.as_deref(),
            MetricDefinition::Composite(_) => None,
        }
    }
}

impl MetricsConfig {
    /// Every definition tagged with its group, in group order.
    pub fn definitions(&self) -> Vec<(MetricGroup, MetricDefinition)> {
        let simple = |group: MetricGroup, list: &[SimpleMetric]| {
            list.iter()
                .map(move |m| (group, MetricDefinition::Simple(m.clone())))
                .collect::<Vec<_>>()
        };
        let composite = |group: MetricGroup, list: &[CompositeMetric]| {
            list.iter()
                .map(move |m| (group, MetricDefinition::Composite(m.clone())))
                .collect::<Vec<_>>()
        };

        let mut all = simple(MetricGroup::Fans, &self.fans);
        all.extend(composite(MetricGroup::Temperatures, &self.temperatures));
        all.extend(simple(MetricGroup::Currents, &self.currents));
        all.extend(composite(MetricGroup::Networks, &self.networks));
        all.extend(composite(MetricGroup::Timing, &self.timing));
        all.extend(composite(MetricGroup::SystemState, &self.system_state));
        all
    }

    pub fn len(&self) -> usize {
        self.fans.len()
            + self.currents.len()
            + self.temperatures.len()
            + self.networks.len()
            + self.timing.len()
            + self.system_state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Metric sink selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkConfig {
    /// Pull-based gauge registry served over HTTP.
    Prometheus(PrometheusConfig),
    /// Push-based line-protocol writer.
    Influx(InfluxConfig),
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig::Prometheus(PrometheusConfig::default())
    }
}

impl EmberscopeConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: EmberscopeConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::Validation(
                "At least one device must be configured".to_string(),
            ));
        }

        if self.bridge.connect_timeout_ms == 0 || self.bridge.resolve_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "connect_timeout_ms and resolve_timeout_ms must be > 0".to_string(),
            ));
        }

        let reconnect = &self.bridge.reconnect;
        if reconnect.enabled
            && (reconnect.initial_delay_ms == 0 || reconnect.max_delay_ms < reconnect.initial_delay_ms)
        {
            return Err(ConfigError::Validation(
                "reconnect delays must satisfy 0 < initial_delay_ms <= max_delay_ms".to_string(),
            ));
        }

        for (id, device) in &self.devices {
            if id.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "Device identifier cannot be empty".to_string(),
                ));
            }

            if device.address.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Device '{}': address cannot be empty",
                    id
                )));
            }

            if device.port == 0 {
                return Err(ConfigError::Validation(format!(
                    "Device '{}': port must be > 0",
                    id
                )));
            }

            for (group, definition) in device.metrics.definitions() {
                validate_definition(id, group, &definition)?;
            }
        }

        match &self.sink {
            SinkConfig::Prometheus(prometheus) => prometheus
                .validate()
                .map_err(|e| ConfigError::Validation(e.to_string()))?,
            SinkConfig::Influx(influx) => influx
                .validate()
                .map_err(|e| ConfigError::Validation(e.to_string()))?,
        }

        Ok(())
    }
}

fn validate_definition(
    device: &str,
    group: MetricGroup,
    definition: &MetricDefinition,
) -> Result<(), ConfigError> {
    let sub_paths = definition.sub_paths();

    if sub_paths.is_empty() {
        return Err(ConfigError::Validation(format!(
            "Device '{}': {} definition declares no paths",
            device, group
        )));
    }

    for (key, path) in &sub_paths {
        if path.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "Device '{}': {} definition has an empty path for '{}'",
                device, group, key
            )));
        }
    }

    let schema = GroupSchema::of(group);
    if let (MetricDefinition::Composite(_), SubPaths::Fixed(_)) = (definition, schema.sub_paths) {
        for (key, _) in &sub_paths {
            if schema.field_for_sub_path(key).is_none() {
                return Err(ConfigError::Validation(format!(
                    "Device '{}': '{}' is not a {} sub-path",
                    device, key, group
                )));
            }
        }
    }

    Ok(())
}
