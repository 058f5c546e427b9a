use thiserror::Error;

/// Common error type for EmberScope components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using EmberScope's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while handing an observation to a metric sink.
///
/// Sink errors are never fatal: callers log them and drop the observation.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink refused a new series or point because it is full.
    #[error("Sink capacity reached ({limit}), dropping {series}")]
    Capacity { series: String, limit: usize },

    /// Transport failure while writing to a remote sink.
    #[error("Sink transport error: {0}")]
    Transport(String),
}
