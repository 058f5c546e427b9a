//! Path resolution and subscription for one metric definition.

use std::sync::Arc;

use thiserror::Error;
use tokio_stream::{StreamExt, StreamMap};
use tracing::{debug, trace, warn};

use emberscope_common::{MetricObservation, SharedSink, current_timestamp_millis};

use crate::client::NodeUpdates;
use crate::connection::{DeviceConnection, LiveSubscription};
use crate::strategy::{BoundMetric, SubPathValues};

/// Definition-level failure; other definitions are unaffected.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("None of the {paths} path(s) of {series} could be resolved")]
    Unresolved { series: String, paths: usize },
}

/// Result of bridging one definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionOutcome {
    pub series: String,
    /// Sub-paths declared.
    pub declared: usize,
    /// Sub-paths resolved during initial capture.
    pub resolved: usize,
    /// Sub-paths with a live change stream.
    pub subscribed: usize,
}

/// Resolve, capture, publish and subscribe one definition.
///
/// Each sub-path is resolved independently; unresolved sub-paths are left
/// out of the observation. The initial observation is published before
/// returning, and a handler task owned by `connection` republishes every
/// later change.
pub async fn bridge_definition(
    connection: &DeviceConnection,
    metric: BoundMetric,
    sink: SharedSink,
) -> Result<DefinitionOutcome, DefinitionError> {
    let series = metric.series();
    let device = connection.descriptor().id.clone();
    let sub_paths = metric.definition.sub_paths();

    let mut values = SubPathValues::new();
    let mut resolved = 0;
    let mut streams: StreamMap<String, NodeUpdates> = StreamMap::new();

    // Each node is subscribed as soon as it resolves so changes pushed while
    // later sub-paths are still resolving are queued, not lost
    for (key, path) in &sub_paths {
        let node = match connection.resolve(path).await {
            Ok(node) => node,
            Err(e) => {
                warn!(
                    device = %device,
                    path = %path,
                    group = %metric.group,
                    error = %e,
                    "Failed to resolve path"
                );
                continue;
            }
        };
        trace!(device = %device, path = %path, "Resolved path");
        resolved += 1;

        match connection.subscribe(&node).await {
            Ok(updates) => {
                streams.insert(key.clone(), updates);
            }
            Err(e) => {
                warn!(
                    device = %device,
                    path = %node.path,
                    error = %e,
                    "Failed to subscribe to path"
                );
            }
        }
        values.insert(key.clone(), node.value);
    }

    if resolved == 0 {
        return Err(DefinitionError::Unresolved {
            series,
            paths: sub_paths.len(),
        });
    }

    let mut last_timestamp = current_timestamp_millis();
    publish(&sink, &metric.observe(&values, last_timestamp));

    let outcome = DefinitionOutcome {
        series: series.clone(),
        declared: sub_paths.len(),
        resolved,
        subscribed: streams.len(),
    };

    if streams.is_empty() {
        return Ok(outcome);
    }

    let handler = tokio::spawn(async move {
        while let Some((key, value)) = streams.next().await {
            trace!(series = %metric.series(), key = %key, "Value changed");
            values.insert(key, value);

            // Timestamps never go backwards for one definition
            last_timestamp = current_timestamp_millis().max(last_timestamp);
            publish(&sink, &metric.observe(&values, last_timestamp));
        }
        debug!(series = %metric.series(), "Update streams ended");
    });
    connection.adopt(LiveSubscription::new(series, handler));

    Ok(outcome)
}

fn publish(sink: &SharedSink, observation: &MetricObservation) {
    if let Err(e) = sink.publish(observation) {
        warn!(
            sink = sink.name(),
            series = %observation.series,
            error = %e,
            "Failed to publish observation"
        );
    }
}

/// Convenience for callers holding the connection in an `Arc`.
pub async fn bridge_shared(
    connection: Arc<DeviceConnection>,
    metric: BoundMetric,
    sink: SharedSink,
) -> Result<DefinitionOutcome, DefinitionError> {
    bridge_definition(&connection, metric, sink).await
}
