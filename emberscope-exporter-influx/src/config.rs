//! Configuration for the InfluxDB writer.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),
}

/// InfluxDB v2 write API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxConfig {
    /// Base URL of the InfluxDB server, e.g. `http://localhost:8086`.
    pub url: String,

    /// Organization name.
    #[serde(default)]
    pub org: String,

    /// Target bucket.
    pub bucket: String,

    /// API token, sent as `Authorization: Token <token>`.
    #[serde(default)]
    pub token: Option<String>,

    /// Pending lines that trigger an early flush (default: 500).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Flush interval in milliseconds (default: 1000).
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// HTTP request timeout in milliseconds (default: 5000).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Buffer cap; the oldest lines are dropped beyond it (default: 10000).
    #[serde(default = "default_max_buffered_lines")]
    pub max_buffered_lines: usize,
}

fn default_batch_size() -> usize {
    500
}

fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_max_buffered_lines() -> usize {
    10_000
}

impl InfluxConfig {
    /// Create a configuration with default batching for the given target.
    pub fn new(url: impl Into<String>, org: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            org: org.into(),
            bucket: bucket.into(),
            token: None,
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            timeout_ms: default_timeout_ms(),
            max_buffered_lines: default_max_buffered_lines(),
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Write API endpoint, without query parameters.
    pub fn write_url(&self) -> String {
        format!("{}/api/v2/write", self.url.trim_end_matches('/'))
    }

    /// Query parameters of every write, millisecond precision.
    pub fn write_query(&self) -> [(&'static str, &str); 3] {
        [
            ("org", self.org.as_str()),
            ("bucket", self.bucket.as_str()),
            ("precision", "ms"),
        ]
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Validation("url cannot be empty".to_string()));
        }

        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "url must start with http:// or https://: {}",
                self.url
            )));
        }

        if self.bucket.trim().is_empty() {
            return Err(ConfigError::Validation(
                "bucket cannot be empty".to_string(),
            ));
        }

        if self.batch_size == 0 {
            return Err(ConfigError::Validation(
                "batch_size must be > 0".to_string(),
            ));
        }

        if self.flush_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "flush_interval_ms must be > 0".to_string(),
            ));
        }

        if self.max_buffered_lines < self.batch_size {
            return Err(ConfigError::Validation(
                "max_buffered_lines must be >= batch_size".to_string(),
            ));
        }

        Ok(())
    }
}
