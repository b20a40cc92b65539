//! HTTP server for health and metrics endpoints

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use eyre::eyre;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

/// Watcher statistics, written by the event logger and read by the HTTP server
#[derive(Debug, Default, Clone, Serialize)]
pub struct WatcherStats {
    pub watcher_id: String,
    pub bot_path: String,
    pub route: String,
    pub ticks: u64,
    pub failed_ticks: u64,
    pub watched_epochs: usize,
    pub claimable_epoch: u64,
    pub last_tick_timestamp: u64,
    pub dropped_epochs: u64,
    pub transactions_submitted: u64,
    pub transactions_final: u64,
    pub transactions_failed: u64,
    pub finality_degraded: bool,
}

pub type SharedStats = Arc<RwLock<WatcherStats>>;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(flatten)]
    pub stats: WatcherStats,
}

async fn health_check(State(stats): State<SharedStats>) -> Json<HealthResponse> {
    let stats = stats.read().await.clone();
    let status = if stats.finality_degraded {
        "degraded"
    } else {
        "healthy"
    };
    Json(HealthResponse {
        status: status.to_string(),
        stats,
    })
}

/// Liveness check (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

/// Readiness check: ready once a tick has completed
async fn readiness(State(stats): State<SharedStats>) -> &'static str {
    if stats.read().await.ticks > 0 {
        "OK"
    } else {
        "NOT_READY"
    }
}

async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response();
    }

    match Response::builder()
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
    {
        Ok(resp) => resp,
        Err(_) => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build metrics response",
        )
            .into_response(),
    }
}

pub fn router(stats: SharedStats) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .with_state(stats)
}

/// Start the HTTP server for health and metrics
pub async fn start_server(bind_address: &str, port: u16, stats: SharedStats) -> eyre::Result<()> {
    let addr: SocketAddr = format!("{}:{}", bind_address, port)
        .parse()
        .map_err(|e| eyre!("Invalid bind address {}:{}: {}", bind_address, port, e))?;
    info!("Health server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(stats)).await?;

    Ok(())
}
