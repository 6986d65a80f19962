//! Health & status API
//!
//! - GET /health  - JSON health summary
//! - GET /healthz - liveness check
//! - GET /metrics - Prometheus metrics
//! - GET /status  - scan cursor per chain

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use eyre::Result;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::db;
use crate::db::models::ScanCursorRow;
use crate::metrics;

#[derive(Clone)]
pub struct ApiState {
    pub operator: String,
    pub db: SqlitePool,
    pub started: Instant,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    operator: String,
    uptime_seconds: u64,
}

#[derive(Serialize)]
struct StatusResponse {
    cursors: Vec<ScanCursorRow>,
}

async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        operator: state.operator.clone(),
        uptime_seconds: state.started.elapsed().as_secs(),
    })
}

async fn liveness() -> &'static str {
    "OK"
}

async fn status(State(state): State<ApiState>) -> Response {
    match db::list_cursors(&state.db).await {
        Ok(cursors) => Json(StatusResponse { cursors }).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to list scan cursors");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read cursors").into_response()
        }
    }
}

async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }
    match Response::builder()
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
    {
        Ok(resp) => resp,
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build metrics response",
        )
            .into_response(),
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(liveness))
        .route("/status", get(status))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

/// Serve until `shutdown` flips to true
pub async fn start_api_server(
    addr: SocketAddr,
    state: ApiState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "API server started");
    metrics::UP.set(1.0);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;
    metrics::UP.set(0.0);
    Ok(())
}
