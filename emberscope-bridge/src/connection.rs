//! Device connection.
//!
//! Wraps a [`DeviceClient`] with the configured timeouts and owns every
//! live subscription created on it. Dropping the connection cancels its
//! subscriptions.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::client::{
    ConnectionError, ConnectionEvent, DeviceClient, DeviceDescriptor, NodeUpdates,
    ResolutionError, ResolvedNode,
};

/// Handler task republishing changes of one metric definition.
pub struct LiveSubscription {
    series: String,
    handle: JoinHandle<()>,
}

impl LiveSubscription {
    pub fn new(series: impl Into<String>, handle: JoinHandle<()>) -> Self {
        Self {
            series: series.into(),
            handle,
        }
    }

    pub fn series(&self) -> &str {
        &self.series
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// One established session to one device.
pub struct DeviceConnection {
    descriptor: Arc<DeviceDescriptor>,
    client: Arc<dyn DeviceClient>,
    resolve_timeout: Duration,
    subscriptions: Mutex<Vec<LiveSubscription>>,
}

impl DeviceConnection {
    /// Connect and complete the directory handshake within `connect_timeout`.
    ///
    /// The returned event receiver is subscribed before connecting so no
    /// session event is missed.
    pub async fn open(
        descriptor: Arc<DeviceDescriptor>,
        client: Arc<dyn DeviceClient>,
        connect_timeout: Duration,
        resolve_timeout: Duration,
    ) -> Result<(Self, broadcast::Receiver<ConnectionEvent>), ConnectionError> {
        let events = client.events();

        debug!(
            device = %descriptor.id,
            endpoint = %descriptor.endpoint(),
            "Connecting to device"
        );

        tokio::time::timeout(connect_timeout, client.connect())
            .await
            .map_err(|_| ConnectionError::Timeout(connect_timeout))??;

        info!(
            device = %descriptor.id,
            endpoint = %descriptor.endpoint(),
            "Connected to device"
        );

        let connection = Self {
            descriptor,
            client,
            resolve_timeout,
            subscriptions: Mutex::new(Vec::new()),
        };
        Ok((connection, events))
    }

    pub fn descriptor(&self) -> &Arc<DeviceDescriptor> {
        &self.descriptor
    }

    /// Resolve a path, bounded by the resolve timeout.
    pub async fn resolve(&self, path: &str) -> Result<ResolvedNode, ResolutionError> {
        tokio::time::timeout(self.resolve_timeout, self.client.resolve(path))
            .await
            .map_err(|_| ResolutionError::Timeout {
                path: path.to_string(),
                timeout: self.resolve_timeout,
            })?
    }

    /// Open the change stream of a resolved node.
    pub async fn subscribe(&self, node: &ResolvedNode) -> Result<NodeUpdates, ResolutionError> {
        self.client.subscribe(node).await
    }

    /// Take ownership of a subscription handler.
    pub fn adopt(&self, subscription: LiveSubscription) {
        self.subscriptions.lock().push(subscription);
    }

    /// Number of subscription handlers still running.
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions
            .lock()
            .iter()
            .filter(|s| !s.is_finished())
            .count()
    }
}

impl Drop for DeviceConnection {
    fn drop(&mut self) {
        let count = self.subscriptions.get_mut().len();
        if count > 0 {
            debug!(
                device = %self.descriptor.id,
                subscriptions = count,
                "Releasing device subscriptions"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulatedConfig;
    use crate::simulator::SimulatedDevice;
    use emberscope_common::RawValue;

    fn descriptor() -> Arc<DeviceDescriptor> {
        Arc::new(DeviceDescriptor::new("StudioA", "10.0.0.10", 9000, "Studio A"))
    }

    #[tokio::test]
    async fn test_open_and_resolve() {
        let device = Arc::new(SimulatedDevice::with_values(
            "10.0.0.10:9000",
            [("chassis.fan1", "3200 rpm")],
        ));

        let (connection, _events) = DeviceConnection::open(
            descriptor(),
            device,
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let node = connection.resolve("chassis.fan1").await.unwrap();
        assert_eq!(node.value, RawValue::from("3200 rpm"));
        assert!(matches!(
            connection.resolve("chassis.fan9").await,
            Err(ResolutionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let config = SimulatedConfig {
            connect_delay_ms: 500,
            ..Default::default()
        };
        let device = Arc::new(SimulatedDevice::new("10.0.0.10:9000", config));

        let result = DeviceConnection::open(
            descriptor(),
            device,
            Duration::from_millis(20),
            Duration::from_secs(1),
        )
        .await;

        assert!(matches!(result, Err(ConnectionError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_drop_aborts_subscriptions() {
        let device = Arc::new(SimulatedDevice::with_values("h:1", [("a.b", 1i64)]));
        let (connection, _events) = DeviceConnection::open(
            descriptor(),
            device,
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        });
        connection.adopt(LiveSubscription::new("StudioA/fans/a.b/fan_b", handle));
        assert_eq!(connection.active_subscriptions(), 1);

        drop(connection);

        // The aborted task drops its sender
        assert!(rx.await.is_err());
    }
}
