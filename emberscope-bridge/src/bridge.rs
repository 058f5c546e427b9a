//! Bridge orchestrator.
//!
//! Runs one task per configured device. Each task connects, fans out one
//! subscriber per metric definition, then watches the session until it
//! closes or the process shuts down. Devices never affect each other.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use emberscope_common::{MetricGroup, SharedSink};

use crate::client::{ConnectionError, ConnectionEvent, DeviceConnector, DeviceDescriptor};
use crate::config::{BridgeSettings, EmberscopeConfig};
use crate::connection::DeviceConnection;
use crate::strategy::BoundMetric;
use crate::subscriber::bridge_shared;

/// Lifecycle state of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceStatus {
    Connecting,
    /// Initial capture finished; `resolved` of `definitions` are live.
    Bridged { definitions: usize, resolved: usize },
    Failed(String),
    /// The session closed after being bridged.
    Disconnected,
}

/// Status of every device, keyed by device identifier.
pub type StatusMap = BTreeMap<String, DeviceStatus>;

struct DevicePlan {
    descriptor: Arc<DeviceDescriptor>,
    metrics: Vec<BoundMetric>,
}

struct Shared {
    settings: BridgeSettings,
    connector: Arc<dyn DeviceConnector>,
    sink: SharedSink,
    status: watch::Sender<StatusMap>,
}

impl Shared {
    fn set_status(&self, device: &str, status: DeviceStatus) {
        self.status.send_modify(|map| {
            map.insert(device.to_string(), status);
        });
    }
}

/// How a device session ended.
enum SessionEnd {
    Failed(ConnectionError),
    Closed,
    Shutdown,
}

pub struct Bridge {
    shared: Arc<Shared>,
    devices: Vec<DevicePlan>,
}

impl Bridge {
    /// Bind every configured definition to its device.
    pub fn new(
        config: &EmberscopeConfig,
        connector: Arc<dyn DeviceConnector>,
        sink: SharedSink,
    ) -> Self {
        let dual = &config.bridge.dual_emission;

        let devices: Vec<DevicePlan> = config
            .devices
            .iter()
            .map(|(id, device)| {
                let descriptor = Arc::new(DeviceDescriptor::new(
                    id.as_str(),
                    device.address.as_str(),
                    device.port,
                    device.name.clone().unwrap_or_else(|| id.clone()),
                ));
                let metrics = device
                    .metrics
                    .definitions()
                    .into_iter()
                    .map(|(group, definition): (MetricGroup, _)| {
                        BoundMetric::new(descriptor.clone(), group, definition, dual.enabled(group))
                    })
                    .collect();
                DevicePlan {
                    descriptor,
                    metrics,
                }
            })
            .collect();

        let initial: StatusMap = devices
            .iter()
            .map(|d| (d.descriptor.id.clone(), DeviceStatus::Connecting))
            .collect();
        let (status, _) = watch::channel(initial);

        Self {
            shared: Arc::new(Shared {
                settings: config.bridge.clone(),
                connector,
                sink,
                status,
            }),
            devices,
        }
    }

    /// Watch device status changes.
    pub fn status(&self) -> watch::Receiver<StatusMap> {
        self.shared.status.subscribe()
    }

    /// Run every device until `shutdown` flips to `true`.
    ///
    /// Returns once all device tasks have stopped. Without reconnection a
    /// device task stops when its connection fails or closes, so this may
    /// return before shutdown.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!(devices = self.devices.len(), "Starting bridge");

        let mut tasks = JoinSet::new();
        for plan in self.devices {
            let shared = self.shared.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(run_device(shared, plan, shutdown));
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Device task failed");
            }
        }

        info!("Bridge stopped");
    }
}

async fn run_device(shared: Arc<Shared>, plan: DevicePlan, mut shutdown: watch::Receiver<bool>) {
    let id = plan.descriptor.id.clone();
    let reconnect = &shared.settings.reconnect;
    let mut delay = reconnect.initial_delay();

    loop {
        if *shutdown.borrow() {
            break;
        }

        shared.set_status(&id, DeviceStatus::Connecting);

        match run_session(&shared, &plan, &mut shutdown).await {
            SessionEnd::Shutdown => break,
            SessionEnd::Failed(e) => {
                error!(device = %id, error = %e, "Failed to connect to device");
                shared.set_status(&id, DeviceStatus::Failed(e.to_string()));
            }
            SessionEnd::Closed => {
                warn!(device = %id, "Device session closed");
                shared.set_status(&id, DeviceStatus::Disconnected);
                // The session was usable, start backing off from scratch
                delay = reconnect.initial_delay();
            }
        }

        if !reconnect.enabled {
            break;
        }

        info!(device = %id, delay_ms = delay.as_millis() as u64, "Reconnecting to device");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
        delay = reconnect.next_delay(delay);
    }

    debug!(device = %id, "Device task stopped");
}

/// Connect, bridge every definition, then wait for the session to end.
///
/// Subscriptions live as long as the connection and are cancelled when it
/// is dropped on return.
async fn run_session(
    shared: &Shared,
    plan: &DevicePlan,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let descriptor = &plan.descriptor;

    let client = match shared.connector.client_for(descriptor) {
        Ok(client) => client,
        Err(e) => return SessionEnd::Failed(e),
    };

    let opened = tokio::select! {
        opened = DeviceConnection::open(
            descriptor.clone(),
            client,
            shared.settings.connect_timeout(),
            shared.settings.resolve_timeout(),
        ) => opened,
        _ = shutdown.changed() => return SessionEnd::Shutdown,
    };
    let (connection, mut events) = match opened {
        Ok(opened) => opened,
        Err(e) => return SessionEnd::Failed(e),
    };
    let connection = Arc::new(connection);

    let mut definitions = JoinSet::new();
    for metric in plan.metrics.iter().cloned() {
        definitions.spawn(bridge_shared(connection.clone(), metric, shared.sink.clone()));
    }

    let mut resolved = 0;
    while let Some(joined) = definitions.join_next().await {
        match joined {
            Ok(Ok(outcome)) => {
                debug!(
                    device = %descriptor.id,
                    series = %outcome.series,
                    resolved = outcome.resolved,
                    declared = outcome.declared,
                    "Definition bridged"
                );
                resolved += 1;
            }
            Ok(Err(e)) => warn!(device = %descriptor.id, error = %e, "Definition failed"),
            Err(e) => error!(device = %descriptor.id, error = %e, "Definition task failed"),
        }
    }

    info!(
        device = %descriptor.id,
        definitions = plan.metrics.len(),
        resolved,
        subscriptions = connection.active_subscriptions(),
        "Device bridged"
    );
    shared.set_status(
        &descriptor.id,
        DeviceStatus::Bridged {
            definitions: plan.metrics.len(),
            resolved,
        },
    );

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ConnectionEvent::Error(message)) => {
                    error!(device = %descriptor.id, error = %message, "Device transport error");
                }
                Ok(ConnectionEvent::Closed) | Err(broadcast::error::RecvError::Closed) => {
                    return SessionEnd::Closed;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(device = %descriptor.id, skipped, "Missed device events");
                }
            },
            _ = shutdown.changed() => return SessionEnd::Shutdown,
        }
    }
}

/// Wait until `device` reaches a status matching `predicate`.
///
/// Returns the matching status, or `None` on timeout.
pub async fn wait_for_status<F>(
    status: &mut watch::Receiver<StatusMap>,
    device: &str,
    timeout: Duration,
    predicate: F,
) -> Option<DeviceStatus>
where
    F: Fn(&DeviceStatus) -> bool,
{
    let found = tokio::time::timeout(
        timeout,
        status.wait_for(|map| map.get(device).is_some_and(&predicate)),
    )
    .await
    .ok()?
    .ok()?;
    found.get(device).cloned()
}
