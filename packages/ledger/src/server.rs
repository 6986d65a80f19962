//! HTTP façade over a shared [`Ledger`]
//!
//! `POST /execute` and `POST /query` take the JSON messages from
//! [`crate::msg`]; rejected messages come back as `400` with the
//! serialized [`LedgerError`]. Health and Prometheus endpoints follow
//! the operator's conventions.
//!
//! With API tokens configured, `/execute` requires `Authorization: Bearer`
//! and the token's identity must be the message sender: unknown tokens get
//! `401`, a message acting as someone else gets `403`. Queries stay open.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::error::LedgerError;
use crate::keeper::Ledger;
use crate::msg::{ExecuteMsg, QueryMsg};

pub type SharedLedger = Arc<RwLock<Ledger>>;

/// Prometheus metrics for the daemon
pub struct Metrics {
    pub messages_total: IntCounterVec,
    pub block_height: IntGauge,
    pub cctxs: IntGauge,
    pub registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let messages_total = IntCounterVec::new(
            Opts::new(
                "ledger_messages_total",
                "Execute messages processed by kind and result",
            ),
            &["kind", "result"],
        )
        .expect("constant metric name is valid");

        let block_height = IntGauge::new("ledger_block_height", "Current ledger height")
            .expect("constant metric name is valid");

        let cctxs = IntGauge::new("ledger_cctxs", "Cross-chain transactions stored")
            .expect("constant metric name is valid");

        registry
            .register(Box::new(messages_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(block_height.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(cctxs.clone()))
            .expect("metric registration must not be called twice");

        Self {
            messages_total,
            block_height,
            cctxs,
            registry,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub ledger: SharedLedger,
    pub metrics: Arc<Metrics>,
    /// Bearer token -> identity; empty disables the check
    pub api_tokens: Arc<HashMap<String, String>>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub height: u64,
    pub observers: usize,
    pub threshold: usize,
    pub cctxs: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let ledger = state.ledger.read().await;
    Json(HealthResponse {
        status: "healthy".to_string(),
        height: ledger.height(),
        observers: ledger.config().observers.len(),
        threshold: ledger.config().threshold,
        cctxs: ledger.cctxs.len(),
    })
}

async fn liveness() -> &'static str {
    "OK"
}

fn rejected(err: LedgerError) -> Response {
    (StatusCode::BAD_REQUEST, Json(err)).into_response()
}

/// Check the bearer token against the message sender
pub fn authorize(
    tokens: &HashMap<String, String>,
    headers: &HeaderMap,
    msg: &ExecuteMsg,
) -> Result<(), (StatusCode, LedgerError)> {
    if tokens.is_empty() {
        return Ok(());
    }
    let identity = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(|token| tokens.get(token.trim()))
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                LedgerError::Unauthorized("missing or unknown bearer token".to_string()),
            )
        })?;
    if identity != msg.sender() {
        return Err((
            StatusCode::FORBIDDEN,
            LedgerError::Unauthorized(format!(
                "token for {} cannot act as {}",
                identity,
                msg.sender()
            )),
        ));
    }
    Ok(())
}

async fn execute(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(msg): Json<ExecuteMsg>,
) -> Response {
    let kind = msg.kind();
    if let Err((status, err)) = authorize(&state.api_tokens, &headers, &msg) {
        warn!(kind, sender = %msg.sender(), error = %err, "Execute rejected");
        state
            .metrics
            .messages_total
            .with_label_values(&[kind, "unauthorized"])
            .inc();
        return (status, Json(err)).into_response();
    }
    let result = state.ledger.write().await.execute(msg);
    match result {
        Ok(resp) => {
            state
                .metrics
                .messages_total
                .with_label_values(&[kind, "ok"])
                .inc();
            Json(resp).into_response()
        }
        Err(e) => {
            state
                .metrics
                .messages_total
                .with_label_values(&[kind, "rejected"])
                .inc();
            rejected(e)
        }
    }
}

async fn query(State(state): State<AppState>, Json(msg): Json<QueryMsg>) -> Response {
    match state.ledger.read().await.query(&msg) {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => rejected(e),
    }
}

async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    let ledger = state.ledger.read().await;
    state.metrics.block_height.set(ledger.height() as i64);
    state.metrics.cctxs.set(ledger.cctxs.len() as i64);
    drop(ledger);

    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
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
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build metrics response",
        )
            .into_response(),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/execute", post(execute))
        .route("/query", post(query))
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

/// Serve on an already bound listener until `shutdown` flips to true
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> eyre::Result<()> {
    let addr: SocketAddr = listener.local_addr()?;
    info!("Ledger listening on {}", addr);
    info!("  POST /execute - submit votes and admin messages");
    info!("  POST /query   - read ledger state");
    info!("  /metrics      - Prometheus metrics");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;
    Ok(())
}

/// Advance the ledger one block every `block_time`
pub async fn run_block_producer(
    ledger: SharedLedger,
    block_time: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(block_time);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let height = ledger.write().await.begin_block();
                debug!(height, "New ledger block");
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Block producer stopping");
                    return;
                }
            }
        }
    }
}
