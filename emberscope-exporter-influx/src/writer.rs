//! Buffered line-protocol writer.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{Notify, watch};
use tracing::{debug, info, trace, warn};

use emberscope_common::{MetricObservation, MetricSink, SinkError};

use crate::config::InfluxConfig;
use crate::line::encode_observation;

/// Writer statistics.
#[derive(Debug, Clone, Default)]
pub struct WriterStats {
    pub observations_received: u64,
    /// Observations with no field values.
    pub points_skipped: u64,
    pub lines_written: u64,
    /// Lines dropped because the buffer was full.
    pub lines_dropped: u64,
    pub flush_errors: u64,
}

/// Push sink writing observations to the InfluxDB v2 write API.
pub struct InfluxWriter {
    config: InfluxConfig,
    client: reqwest::Client,
    buffer: Mutex<VecDeque<String>>,
    flush_notify: Notify,
    stats: RwLock<WriterStats>,
}

/// Shareable writer handle.
pub type SharedWriter = Arc<InfluxWriter>;

impl InfluxWriter {
    /// Create a writer. Nothing is sent until [`InfluxWriter::run`] is spawned.
    pub fn new(config: InfluxConfig) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| SinkError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            buffer: Mutex::new(VecDeque::new()),
            flush_notify: Notify::new(),
            stats: RwLock::new(WriterStats::default()),
        })
    }

    /// Encode and buffer an observation.
    pub fn enqueue(&self, observation: &MetricObservation) {
        self.stats.write().observations_received += 1;

        let Some(line) = encode_observation(observation) else {
            trace!(series = %observation.series, "Skipping point without values");
            self.stats.write().points_skipped += 1;
            return;
        };

        let mut buffer = self.buffer.lock();
        buffer.push_back(line);

        let mut dropped = 0u64;
        while buffer.len() > self.config.max_buffered_lines {
            buffer.pop_front();
            dropped += 1;
        }
        let pending = buffer.len();
        drop(buffer);

        if dropped > 0 {
            warn!(
                dropped,
                max_buffered_lines = self.config.max_buffered_lines,
                "Write buffer full, dropping oldest lines"
            );
            self.stats.write().lines_dropped += dropped;
        }

        if pending >= self.config.batch_size {
            self.flush_notify.notify_one();
        }
    }

    /// Number of lines waiting to be flushed.
    pub fn pending(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Get writer statistics.
    pub fn stats(&self) -> WriterStats {
        self.stats.read().clone()
    }

    /// Send every buffered line. Returns the number of lines written.
    ///
    /// A failed batch is logged and dropped.
    pub async fn flush(&self) -> Result<usize, SinkError> {
        let lines: Vec<String> = self.buffer.lock().drain(..).collect();
        if lines.is_empty() {
            return Ok(0);
        }

        let count = lines.len();
        let body = lines.join("\n");

        match self.send(body).await {
            Ok(()) => {
                debug!(lines = count, "Flushed batch");
                self.stats.write().lines_written += count as u64;
                Ok(count)
            }
            Err(e) => {
                warn!(lines = count, error = %e, "Failed to flush batch, dropping it");
                self.stats.write().flush_errors += 1;
                Err(e)
            }
        }
    }

    async fn send(&self, body: String) -> Result<(), SinkError> {
        let mut request = self
            .client
            .post(self.config.write_url())
            .query(&self.config.write_query())
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body);

        if let Some(token) = &self.config.token {
            request = request.header("Authorization", format!("Token {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(SinkError::Transport(format!(
                "write rejected with {}: {}",
                status,
                text.trim()
            )));
        }

        Ok(())
    }

    /// Flush loop: on every interval tick, whenever a full batch is pending,
    /// and once more when shutdown is signalled.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.flush_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            url = %self.config.url,
            bucket = %self.config.bucket,
            interval_ms = self.config.flush_interval_ms,
            batch_size = self.config.batch_size,
            "InfluxDB writer started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.flush_notify.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            // Errors are already logged
            let _ = self.flush().await;
        }

        let _ = self.flush().await;
        info!("InfluxDB writer stopped");
    }
}

impl MetricSink for InfluxWriter {
    fn publish(&self, observation: &MetricObservation) -> Result<(), SinkError> {
        self.enqueue(observation);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "influx"
    }
}
