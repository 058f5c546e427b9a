//! EmberScope bridge.
//!
//! Bridges Ember+ style device parameter trees to a Prometheus registry or
//! an InfluxDB writer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use emberscope_bridge::{Bridge, EmberscopeConfig, SimulatedConnector, SinkConfig};
use emberscope_common::{SharedSink, init_tracing};
use emberscope_exporter_influx::{InfluxWriter, SharedWriter};
use emberscope_exporter_prometheus::{HttpServer, MetricCollector, SharedCollector};

/// Ember+ device tree to metrics bridge.
#[derive(Parser, Debug)]
#[command(name = "emberscope-bridge")]
#[command(about = "Bridge Ember+ style device parameters to Prometheus or InfluxDB")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long, default_value = "emberscope.json5")]
    config: String,

    /// Log level (trace, debug, info, warn, error); overrides config.
    #[arg(long)]
    log_level: Option<String>,

    /// Prometheus listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,
}

/// The sink in use, kept for final statistics.
enum ActiveSink {
    Prometheus(SharedCollector),
    Influx(SharedWriter),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = EmberscopeConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from '{}'", args.config))?;

    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    init_tracing(&config.logging)?;

    if let Some(listen) = args.listen {
        match &mut config.sink {
            SinkConfig::Prometheus(prometheus) => prometheus.listen = listen,
            SinkConfig::Influx(_) => warn!("--listen ignored: the influx sink has no listener"),
        }
    }

    info!(
        devices = config.devices.len(),
        config = %args.config,
        "Starting EmberScope bridge"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    // Create the sink
    let (sink, active): (SharedSink, ActiveSink) = match &config.sink {
        SinkConfig::Prometheus(prometheus) => {
            let listen_addr: SocketAddr = prometheus
                .listen
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

            let collector = Arc::new(MetricCollector::new(prometheus.clone()));
            let http_server =
                HttpServer::new(collector.clone(), listen_addr, prometheus.path.clone());

            let http_shutdown = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = http_server.run(http_shutdown).await {
                    error!(error = %e, "HTTP server error");
                }
            }));

            let sink: SharedSink = collector.clone();
            (sink, ActiveSink::Prometheus(collector))
        }
        SinkConfig::Influx(influx) => {
            let writer = Arc::new(
                InfluxWriter::new(influx.clone()).context("Failed to create influx writer")?,
            );
            info!(url = %influx.url, bucket = %influx.bucket, "Writing to InfluxDB");

            tasks.push(tokio::spawn(writer.clone().run(shutdown_rx.clone())));

            let sink: SharedSink = writer.clone();
            (sink, ActiveSink::Influx(writer))
        }
    };

    // Start the bridge
    let connector = Arc::new(SimulatedConnector::from_config(&config.devices));
    let bridge = Bridge::new(&config, connector, sink);
    tasks.push(tokio::spawn(bridge.run(shutdown_rx.clone())));

    shutdown_signal().await;

    // Signal shutdown
    shutdown_tx.send(true)?;

    // Wait for tasks to complete
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        for task in tasks {
            let _ = task.await;
        }
    })
    .await;

    // Print final stats
    match active {
        ActiveSink::Prometheus(collector) => {
            let stats = collector.stats();
            info!(
                observations_received = stats.observations_received,
                series_updated = stats.series_updated,
                series_removed = stats.series_removed,
                dropped_max_series = stats.dropped_max_series,
                series_count = collector.series_count(),
                "Final statistics"
            );
        }
        ActiveSink::Influx(writer) => {
            let stats = writer.stats();
            info!(
                observations_received = stats.observations_received,
                lines_written = stats.lines_written,
                lines_dropped = stats.lines_dropped,
                flush_errors = stats.flush_errors,
                "Final statistics"
            );
        }
    }

    info!("Bridge stopped");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let terminate = async {
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Cannot listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Cannot listen for Ctrl+C");
            }
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
