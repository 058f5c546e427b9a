//! Prometheus pull registry for EmberScope.
//!
//! Every metric group maps to a fixed family of gauges; publishing an
//! observation overwrites the current value for its label combination, and
//! the HTTP server serializes the whole registry on each scrape.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  Subscriptions  │────>│    Collector    │────>│   HTTP Server   │
//! │ (per device)    │     │ (label tuples)  │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```

pub mod collector;
pub mod config;
pub mod http;
pub mod mapping;

pub use collector::{MetricCollector, SharedCollector};
pub use config::{ConfigError, PrometheusConfig};
pub use http::HttpServer;
