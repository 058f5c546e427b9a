//! Scrape endpoint for the bridge registry.
//!
//! Serves the rendered exposition text on the configured path, plus
//! `/health` (process up) and `/ready` (at least one device value seen).

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::collector::SharedCollector;

/// Text exposition format 0.0.4.
const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Routes for the scrape path, `/health` and `/ready`.
pub fn create_router(collector: SharedCollector, metrics_path: &str) -> Router {
    Router::new()
        .route(metrics_path, get(scrape))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .layer(CorsLayer::permissive())
        .with_state(collector)
}

async fn scrape(State(collector): State<SharedCollector>) -> Response {
    (
        [(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
        collector.render(),
    )
        .into_response()
}

async fn health() -> &'static str {
    "healthy\n"
}

async fn ready(State(collector): State<SharedCollector>) -> Response {
    if collector.stats().observations_received == 0 {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "waiting for the first device value\n",
        )
            .into_response();
    }
    format!("ready: {} series\n", collector.series_count()).into_response()
}

/// Scrape endpoint server.
pub struct HttpServer {
    collector: SharedCollector,
    listen_addr: SocketAddr,
    metrics_path: String,
}

impl HttpServer {
    pub fn new(collector: SharedCollector, listen_addr: SocketAddr, metrics_path: String) -> Self {
        Self {
            collector,
            listen_addr,
            metrics_path,
        }
    }

    /// Bind the listen address, then [`serve`](Self::serve).
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        self.serve(listener, shutdown).await
    }

    /// Serve until `shutdown` turns true or its sender is dropped.
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let addr = listener.local_addr().unwrap_or(self.listen_addr);
        info!(addr = %addr, path = %self.metrics_path, "Scrape endpoint listening");

        let router = create_router(self.collector, &self.metrics_path);
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
                info!("Scrape endpoint shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("Scrape endpoint failed: {}", e))?;

        Ok(())
    }
}
