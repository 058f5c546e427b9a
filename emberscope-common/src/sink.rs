//! The publish contract shared by every metric sink.

use std::sync::Arc;

use crate::error::SinkError;
use crate::observation::MetricObservation;

/// A destination for metric observations.
///
/// Implementations are shared by every device connection and every
/// subscription, so `publish` must be safe under concurrent calls. It is
/// synchronous: pull registries update in place and push writers only
/// buffer, flushing on their own task.
pub trait MetricSink: Send + Sync {
    /// Publish the current value of one measured object.
    fn publish(&self, observation: &MetricObservation) -> Result<(), SinkError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Shareable sink handle.
pub type SharedSink = Arc<dyn MetricSink>;
