//! EmberScope Common Library
//!
//! Shared types and utilities for the Ember+ metrics bridge and its sinks:
//!
//! - [`observation`] - Metric observation model (`MetricGroup`, `LabelSet`, `FieldValue`)
//! - [`schema`] - Fixed per-group label and field schemas
//! - [`normalize`] - Conversion of raw device values into metric values
//! - [`sink`] - The [`MetricSink`] publish contract shared by all sinks
//! - [`config`] - Logging configuration
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod normalize;
pub mod observation;
pub mod schema;
pub mod sink;

// Re-export commonly used types at the crate root
pub use config::{LogFormat, LoggingConfig};
pub use error::{Error, Result, SinkError};
pub use normalize::{Normalized, RawValue, extract_numeric, link_state, normalize, strip_unit};
pub use observation::{
    FieldValue, LabelSet, MetricGroup, MetricObservation, SOURCE_TAG, current_timestamp_millis,
};
pub use schema::{GroupSchema, LINK_STATE_FIELD, SubPaths, to_snake_case};
pub use sink::{MetricSink, SharedSink};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG` takes precedence over the configured level when set.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
