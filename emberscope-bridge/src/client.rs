//! Device client seam.
//!
//! A [`DeviceClient`] is the black-box protocol capability the bridge
//! consumes: session setup with the directory handshake, path resolution,
//! per-node change streams and an out-of-band event channel. Transports
//! implement it; the rest of the bridge only sees this trait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::UnboundedReceiverStream;

use emberscope_common::RawValue;

/// Identity and address of one remote device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Configuration key, used in logs and series identities.
    pub id: String,
    pub address: String,
    pub port: u16,
    /// Display name, exported as the `studio` label.
    pub name: String,
}

impl DeviceDescriptor {
    pub fn new(
        id: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            port,
            name: name.into(),
        }
    }

    /// `address:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Device-level failure: the device is skipped.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    #[error("Failed to connect to {endpoint}: {message}")]
    Connect { endpoint: String, message: String },

    #[error("Directory handshake failed: {0}")]
    Handshake(String),

    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("No client available for device: {0}")]
    Unsupported(String),
}

/// Path-level failure: only that path is skipped.
#[derive(Debug, Clone, Error)]
pub enum ResolutionError {
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Device rejected {path}: {message}")]
    Rejected { path: String, message: String },

    #[error("Resolution of {path} timed out after {timeout:?}")]
    Timeout { path: String, timeout: Duration },

    #[error("Device is not connected")]
    NotConnected,
}

/// A parameter node resolved from its path, with its current value.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedNode {
    pub path: String,
    pub value: RawValue,
}

/// Ordered stream of values pushed for one node.
///
/// The stream ends when the session closes.
pub type NodeUpdates = UnboundedReceiverStream<RawValue>;

/// Out-of-band session notification.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Transport error; the session may still be usable.
    Error(String),
    /// The session is gone; no further updates will arrive.
    Closed,
}

/// Protocol client for one device session.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Establish the session and complete the directory handshake.
    async fn connect(&self) -> Result<(), ConnectionError>;

    /// Look up a node by its dotted path.
    async fn resolve(&self, path: &str) -> Result<ResolvedNode, ResolutionError>;

    /// Register for value changes of a resolved node.
    async fn subscribe(&self, node: &ResolvedNode) -> Result<NodeUpdates, ResolutionError>;

    /// Subscribe to out-of-band session events.
    fn events(&self) -> broadcast::Receiver<ConnectionEvent>;
}

/// Builds one client per device.
pub trait DeviceConnector: Send + Sync {
    fn client_for(&self, device: &DeviceDescriptor) -> Result<Arc<dyn DeviceClient>, ConnectionError>;
}
