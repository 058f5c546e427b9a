//! InfluxDB writer for EmberScope.
//!
//! Observations are encoded to line protocol as they are published and
//! buffered in memory; a background task flushes the buffer over HTTP on a
//! fixed interval or as soon as a full batch is pending. Publishing never
//! blocks on the network.

pub mod config;
pub mod line;
pub mod writer;

pub use config::{ConfigError, InfluxConfig};
pub use line::encode_observation;
pub use writer::{InfluxWriter, SharedWriter, WriterStats};
