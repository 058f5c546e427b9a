//! Simulated device client.
//!
//! An in-process parameter tree that behaves like a remote provider: it
//! accepts sessions, resolves dotted paths and pushes value changes to
//! subscribers. Values change when [`SimulatedDevice::set`] is called or,
//! when an update interval is configured, through random drift of the
//! numeric parameters.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};

use emberscope_common::RawValue;

use crate::client::{
    ConnectionError, ConnectionEvent, DeviceClient, DeviceConnector, DeviceDescriptor, NodeUpdates,
    ResolutionError, ResolvedNode,
};
use crate::config::{DeviceConfig, SimulatedConfig, TransportConfig};

#[derive(Default)]
struct TreeState {
    connected: bool,
    unreachable: bool,
    values: BTreeMap<String, RawValue>,
    watchers: HashMap<String, Vec<mpsc::UnboundedSender<RawValue>>>,
}

impl TreeState {
    /// Store a value and deliver it to every live watcher of the path.
    fn push(&mut self, path: &str, value: RawValue) {
        if let Some(senders) = self.watchers.get_mut(path) {
            senders.retain(|tx| tx.send(value.clone()).is_ok());
        }
        self.values.insert(path.to_string(), value);
    }
}

/// A simulated provider exposing a flat map of dotted paths.
pub struct SimulatedDevice {
    endpoint: String,
    config: SimulatedConfig,
    state: Arc<Mutex<TreeState>>,
    events: broadcast::Sender<ConnectionEvent>,
    drift_task: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedDevice {
    pub fn new(endpoint: impl Into<String>, config: SimulatedConfig) -> Self {
        let state = TreeState {
            unreachable: config.unreachable,
            values: config.values.clone(),
            ..Default::default()
        };
        let (events, _) = broadcast::channel(64);

        Self {
            endpoint: endpoint.into(),
            config,
            state: Arc::new(Mutex::new(state)),
            events,
            drift_task: Mutex::new(None),
        }
    }

    /// Create a static device from `(path, value)` pairs.
    pub fn with_values<K, V>(endpoint: impl Into<String>, values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<RawValue>,
    {
        let config = SimulatedConfig {
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            ..Default::default()
        };
        Self::new(endpoint, config)
    }

    /// Change a parameter value, notifying subscribers of that path.
    pub fn set(&self, path: &str, value: impl Into<RawValue>) {
        self.state.lock().push(path, value.into());
    }

    /// Current value of a parameter.
    pub fn get(&self, path: &str) -> Option<RawValue> {
        self.state.lock().values.get(path).cloned()
    }

    /// Remove a parameter; later resolutions fail with `NotFound`.
    pub fn remove(&self, path: &str) {
        self.state.lock().values.remove(path);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Number of live subscriptions on a path.
    pub fn watcher_count(&self, path: &str) -> usize {
        self.state
            .lock()
            .watchers
            .get(path)
            .map(|w| w.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Emit an out-of-band transport error.
    pub fn report_error(&self, message: impl Into<String>) {
        let _ = self.events.send(ConnectionEvent::Error(message.into()));
    }

    /// Drop the session: every update stream ends and `Closed` is emitted.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            state.connected = false;
            state.watchers.clear();
        }
        if let Some(task) = self.drift_task.lock().take() {
            task.abort();
        }
        let _ = self.events.send(ConnectionEvent::Closed);
    }

    fn start_drift(&self) {
        if self.config.update_interval_ms == 0 || self.config.drift <= 0.0 {
            return;
        }

        let state = self.state.clone();
        let interval = Duration::from_millis(self.config.update_interval_ms);
        let drift = self.config.drift;
        let steady = self.config.steady_paths.clone();

        let task = tokio::spawn(async move {
            let mut rng = SmallRng::from_os_rng();
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let mut tree = state.lock();
                if !tree.connected {
                    break;
                }
                let changes: Vec<(String, RawValue)> = tree
                    .values
                    .iter()
                    .filter(|(path, _)| !steady.contains(path))
                    .filter_map(|(path, value)| {
                        let factor = 1.0 + rng.random_range(-drift..=drift);
                        drift_value(value, factor).map(|v| (path.clone(), v))
                    })
                    .collect();
                for (path, value) in changes {
                    tree.push(&path, value);
                }
            }
        });

        if let Some(previous) = self.drift_task.lock().replace(task) {
            previous.abort();
        }
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        if let Some(task) = self.drift_task.lock().take() {
            task.abort();
        }
    }
}

/// Scale the numeric part of a value, keeping any unit suffix.
///
/// Text only drifts when it is a single number followed by a digit-free
/// unit, so addresses and version strings stay intact.
fn drift_value(value: &RawValue, factor: f64) -> Option<RawValue> {
    match value {
        RawValue::Integer(i) => Some(RawValue::Integer((*i as f64 * factor).round() as i64)),
        RawValue::Real(f) => Some(RawValue::Real(f * factor)),
        RawValue::Text(s) => {
            let end = s
                .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
                .unwrap_or(s.len());
            let (number, rest) = s.split_at(end);
            let unit = rest.trim_start();
            let is_unit = unit
                .chars()
                .all(|c| c.is_alphabetic() || c.is_whitespace() || c == '%' || c == '/');
            if !is_unit {
                return None;
            }
            let parsed = number.parse::<f64>().ok()?;
            let scaled = parsed * factor;
            let text = if number.contains('.') {
                format!("{:.1}{}", scaled, rest)
            } else {
                format!("{:.0}{}", scaled, rest)
            };
            Some(RawValue::Text(text))
        }
        RawValue::Null | RawValue::Boolean(_) => None,
    }
}

#[async_trait]
impl DeviceClient for SimulatedDevice {
    async fn connect(&self) -> Result<(), ConnectionError> {
        if self.config.connect_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.connect_delay_ms)).await;
        }

        let nodes = {
            let mut state = self.state.lock();
            if state.unreachable {
                return Err(ConnectionError::Connect {
                    endpoint: self.endpoint.clone(),
                    message: "connection refused".to_string(),
                });
            }
            if state.values.is_empty() {
                return Err(ConnectionError::Handshake(format!(
                    "{} exposes an empty directory",
                    self.endpoint
                )));
            }
            state.connected = true;
            state.values.len()
        };

        debug!(endpoint = %self.endpoint, nodes, "Directory handshake complete");
        self.start_drift();
        Ok(())
    }

    async fn resolve(&self, path: &str) -> Result<ResolvedNode, ResolutionError> {
        let state = self.state.lock();
        if !state.connected {
            return Err(ResolutionError::NotConnected);
        }

        if self.config.rejected_paths.iter().any(|p| p == path) {
            return Err(ResolutionError::Rejected {
                path: path.to_string(),
                message: "access denied".to_string(),
            });
        }

        state
            .values
            .get(path)
            .map(|value| ResolvedNode {
                path: path.to_string(),
                value: value.clone(),
            })
            .ok_or_else(|| ResolutionError::NotFound(path.to_string()))
    }

    async fn subscribe(&self, node: &ResolvedNode) -> Result<NodeUpdates, ResolutionError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(ResolutionError::NotConnected);
        }
        if !state.values.contains_key(&node.path) {
            return Err(ResolutionError::NotFound(node.path.clone()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.watchers.entry(node.path.clone()).or_default().push(tx);
        Ok(UnboundedReceiverStream::new(rx))
    }

    fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}

/// Connector handing out one simulated device per configured identifier.
#[derive(Default)]
pub struct SimulatedConnector {
    devices: HashMap<String, Arc<SimulatedDevice>>,
}

impl SimulatedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a device for every configured simulated transport.
    pub fn from_config(devices: &BTreeMap<String, DeviceConfig>) -> Self {
        let mut connector = Self::new();
        for (id, device) in devices {
            let TransportConfig::Simulated(sim) = &device.transport;
            let endpoint = format!("{}:{}", device.address, device.port);
            connector
                .devices
                .insert(id.clone(), Arc::new(SimulatedDevice::new(endpoint, sim.clone())));
        }
        info!(devices = connector.devices.len(), "Simulated devices ready");
        connector
    }

    /// Register a device under an identifier.
    pub fn with_device(mut self, id: impl Into<String>, device: Arc<SimulatedDevice>) -> Self {
        self.devices.insert(id.into(), device);
        self
    }

    /// Handle to a registered device.
    pub fn device(&self, id: &str) -> Option<Arc<SimulatedDevice>> {
        self.devices.get(id).cloned()
    }
}

impl DeviceConnector for SimulatedConnector {
    fn client_for(&self, device: &DeviceDescriptor) -> Result<Arc<dyn DeviceClient>, ConnectionError> {
        match self.devices.get(&device.id) {
            Some(sim) => Ok(sim.clone() as Arc<dyn DeviceClient>),
            None => Err(ConnectionError::Unsupported(device.id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    use crate::config::EmberscopeConfig;

    fn device() -> SimulatedDevice {
        SimulatedDevice::with_values(
            "10.0.0.10:9000",
            [("chassis.fan1", RawValue::from("3200 rpm")), ("psu.current", RawValue::from("6A"))],
        )
    }

    #[tokio::test]
    async fn test_resolve_requires_connect() {
        let device = device();
        assert!(matches!(
            device.resolve("chassis.fan1").await,
            Err(ResolutionError::NotConnected)
        ));

        device.connect().await.unwrap();
        let node = device.resolve("chassis.fan1").await.unwrap();
        assert_eq!(node.value, RawValue::from("3200 rpm"));
    }

    #[tokio::test]
    async fn test_resolve_unknown_and_rejected_paths() {
        let config = SimulatedConfig {
            values: [("secret.path".to_string(), RawValue::Integer(1))].into(),
            rejected_paths: vec!["secret.path".to_string()],
            ..Default::default()
        };
        let device = SimulatedDevice::new("host:9000", config);
        device.connect().await.unwrap();

        assert!(matches!(
            device.resolve("missing.path").await,
            Err(ResolutionError::NotFound(_))
        ));
        assert!(matches!(
            device.resolve("secret.path").await,
            Err(ResolutionError::Rejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_device_refuses_connect() {
        let device = device();
        device.set_unreachable(true);

        let err = device.connect().await.unwrap_err();
        assert!(err.to_string().contains("10.0.0.10:9000"));
        assert!(!device.is_connected());
    }

    #[tokio::test]
    async fn test_empty_directory_fails_handshake() {
        let device = SimulatedDevice::new("host:9000", SimulatedConfig::default());

        let err = device.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Handshake(_)));
        assert!(!device.is_connected());
    }

    #[tokio::test]
    async fn test_updates_are_delivered_in_order() {
        let device = device();
        device.connect().await.unwrap();
        let node = device.resolve("chassis.fan1").await.unwrap();
        let mut updates = device.subscribe(&node).await.unwrap();

        device.set("chassis.fan1", "3000 rpm");
        device.set("chassis.fan1", "2900 rpm");
        device.set("psu.current", "7A");

        assert_eq!(updates.next().await, Some(RawValue::from("3000 rpm")));
        assert_eq!(updates.next().await, Some(RawValue::from("2900 rpm")));
        assert_eq!(device.watcher_count("chassis.fan1"), 1);
    }

    #[tokio::test]
    async fn test_close_ends_streams_and_emits_event() {
        let device = device();
        device.connect().await.unwrap();
        let mut events = device.events();
        let node = device.resolve("psu.current").await.unwrap();
        let mut updates = device.subscribe(&node).await.unwrap();

        device.close();

        assert_eq!(updates.next().await, None);
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Closed);
    }

    #[tokio::test]
    async fn test_drift_pushes_updates() {
        let config = SimulatedConfig {
            values: [("chassis.fan1".to_string(), RawValue::from("3200 rpm"))].into(),
            update_interval_ms: 10,
            drift: 0.05,
            ..Default::default()
        };
        let device = SimulatedDevice::new("host:9000", config);
        device.connect().await.unwrap();
        let node = device.resolve("chassis.fan1").await.unwrap();
        let mut updates = device.subscribe(&node).await.unwrap();

        let value = tokio::time::timeout(Duration::from_secs(2), updates.next())
            .await
            .unwrap()
            .unwrap();
        let RawValue::Text(text) = value else {
            panic!("expected text value");
        };
        assert!(text.ends_with(" rpm"));
    }

    #[test]
    fn test_drift_value_keeps_unit() {
        assert_eq!(
            drift_value(&RawValue::from("3200 rpm"), 1.0),
            Some(RawValue::from("3200 rpm"))
        );
        assert_eq!(
            drift_value(&RawValue::from("41.5"), 2.0),
            Some(RawValue::from("83.0"))
        );
        assert_eq!(drift_value(&RawValue::Integer(10), 1.5), Some(RawValue::Integer(15)));
        assert_eq!(drift_value(&RawValue::from("up"), 2.0), None);
        assert_eq!(drift_value(&RawValue::Null, 2.0), None);
    }

    #[test]
    fn test_drift_value_leaves_identifiers_alone() {
        assert_eq!(drift_value(&RawValue::from("00:1a:2b:3c:4d:5e"), 1.5), None);
        assert_eq!(drift_value(&RawValue::from("10.0.0.10"), 1.5), None);
        assert_eq!(drift_value(&RawValue::from("4.2.1"), 1.5), None);
        assert_eq!(drift_value(&RawValue::from("2x4 ports"), 1.5), None);
        assert_eq!(drift_value(&RawValue::from("6.2A"), 2.0), Some(RawValue::from("12.4A")));
    }

    #[tokio::test]
    async fn test_steady_paths_do_not_drift() {
        let config = SimulatedConfig {
            values: [
                ("chassis.fan1".to_string(), RawValue::from("3200 rpm")),
                ("system.uptime".to_string(), RawValue::Integer(86400)),
            ]
            .into(),
            update_interval_ms: 10,
            drift: 0.05,
            steady_paths: vec!["system.uptime".to_string()],
            ..Default::default()
        };
        let device = SimulatedDevice::new("host:9000", config);
        device.connect().await.unwrap();
        let fan = device.resolve("chassis.fan1").await.unwrap();
        let mut fan_updates = device.subscribe(&fan).await.unwrap();
        let uptime = device.resolve("system.uptime").await.unwrap();
        let mut uptime_updates = device.subscribe(&uptime).await.unwrap();

        // Several drift rounds pass while the uptime stream stays quiet
        for _ in 0..3 {
            tokio::time::timeout(Duration::from_secs(2), fan_updates.next())
                .await
                .unwrap()
                .unwrap();
        }
        assert!(
            tokio::time::timeout(Duration::from_millis(50), uptime_updates.next())
                .await
                .is_err()
        );
        assert_eq!(device.get("system.uptime"), Some(RawValue::Integer(86400)));
    }

    #[test]
    fn test_connector_from_config_registers_simulated_devices() {
        let config = EmberscopeConfig::parse(
            r#"{
                devices: {
                    StudioA: {
                        address: "10.0.0.10",
                        transport: { type: "simulated", values: { "chassis.fan1": "3200 rpm" } },
                        metrics: { fans: [{ path: "chassis.fan1" }] },
                    },
                },
            }"#,
        )
        .unwrap();
        let connector = SimulatedConnector::from_config(&config.devices);

        let device = connector.device("StudioA").unwrap();
        assert_eq!(device.get("chassis.fan1"), Some(RawValue::from("3200 rpm")));
        assert!(connector.device("StudioB").is_none());
    }

    #[test]
    fn test_connector_hands_out_configured_devices() {
        let connector = SimulatedConnector::new()
            .with_device("StudioA", Arc::new(device()));

        let known = DeviceDescriptor::new("StudioA", "10.0.0.10", 9000, "Studio A");
        let unknown = DeviceDescriptor::new("StudioZ", "10.0.0.99", 9000, "Studio Z");

        assert!(connector.client_for(&known).is_ok());
        assert!(matches!(
            connector.client_for(&unknown),
            Err(ConnectionError::Unsupported(_))
        ));
    }
}
