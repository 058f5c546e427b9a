//! Ember+ style device tree bridge for EmberScope.
//!
//! Connects to devices exposing a hierarchical parameter tree, resolves the
//! configured parameter paths, subscribes to their changes and republishes
//! every value as a labelled metric observation to a pull registry or a
//! push writer.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────────┐    ┌──────────────┐    ┌────────────┐
//! │    Bridge    │───>│ DeviceConnection │───>│  Subscriber  │───>│ MetricSink │
//! │ (per device) │    │  (DeviceClient)  │    │ (per metric) │    │            │
//! └──────────────┘    └──────────────────┘    └──────────────┘    └────────────┘
//! ```

pub mod bridge;
pub mod client;
pub mod config;
pub mod connection;
pub mod simulator;
pub mod strategy;
pub mod subscriber;

pub use bridge::{Bridge, DeviceStatus, StatusMap, wait_for_status};
pub use client::{
    ConnectionError, ConnectionEvent, DeviceClient, DeviceConnector, DeviceDescriptor,
    ResolutionError, ResolvedNode,
};
pub use config::{ConfigError, EmberscopeConfig, SinkConfig};
pub use connection::DeviceConnection;
pub use simulator::{SimulatedConnector, SimulatedDevice};
pub use strategy::BoundMetric;
pub use subscriber::{DefinitionError, DefinitionOutcome, bridge_definition};
