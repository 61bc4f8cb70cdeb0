//! Admin HTTP endpoints
//!
//! - `GET /streams`: statistics of every active stream, with playback URLs
//! - `GET /health`: liveness and connection counters

use std::net::SocketAddr;

use axum::{routing::get, Extension, Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::server::RelayServer;
use crate::stats::StreamStatistics;

/// Admin API configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub address: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Health status response
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub active_connections: u64,
    pub total_connections: u64,
    pub streams: u64,
    pub uptime_seconds: u64,
}

/// One entry of `GET /streams`
#[derive(Debug, Clone, Serialize)]
pub struct StreamSummary {
    #[serde(flatten)]
    pub stats: StreamStatistics,
    /// Average bitrate since the stream was created, bits/sec
    pub bitrate: u64,
    /// Average buffer size in bytes
    pub average_packet_size: u64,
}

impl From<StreamStatistics> for StreamSummary {
    fn from(stats: StreamStatistics) -> Self {
        Self {
            bitrate: stats.bitrate(),
            average_packet_size: stats.average_packet_size(),
            stats,
        }
    }
}

/// Build the admin router
pub fn build_router(server: RelayServer) -> Router {
    Router::new()
        .route("/streams", get(streams_handler))
        .route("/health", get(health_handler))
        .layer(Extension(server))
}

async fn streams_handler(Extension(server): Extension<RelayServer>) -> Json<Vec<StreamSummary>> {
    Json(server.statistics().into_iter().map(StreamSummary::from).collect())
}

async fn health_handler(Extension(server): Extension<RelayServer>) -> Json<HealthStatus> {
    let stats = server.server_stats();

    Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_connections: stats.active_connections,
        total_connections: stats.total_connections,
        streams: stats.active_streams,
        uptime_seconds: stats.uptime_secs,
    })
}

/// Serve the admin API on `listener` until `cancel` fires
pub async fn serve(
    listener: TcpListener,
    server: RelayServer,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let addr: SocketAddr = listener.local_addr()?;
    tracing::info!(addr = %addr, "Admin API listening");

    axum::serve(listener, build_router(server))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
