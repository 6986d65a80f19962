//! Prometheus metrics for the bridge operator
//!
//! Exposes metrics on /metrics endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use multichain_rs::ChainId;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Gauge, GaugeVec, HistogramVec,
};

lazy_static! {
    // Ledger submissions
    pub static ref VOTES_SUBMITTED: CounterVec = register_counter_vec!(
        "operator_votes_submitted_total",
        "Votes submitted to the ledger by kind and result",
        &["chain", "kind", "result"]
    ).unwrap();

    // Inbound observation
    pub static ref INBOUND_EVENTS: CounterVec = register_counter_vec!(
        "operator_inbound_events_total",
        "Inbound events detected, by outcome (voted, donation, restricted, anomaly)",
        &["chain", "outcome"]
    ).unwrap();

    pub static ref LAST_SCANNED_HEIGHT: GaugeVec = register_gauge_vec!(
        "operator_last_scanned_height",
        "Last external block fully scanned",
        &["chain"]
    ).unwrap();

    pub static ref GAS_PRICE_POSTED: GaugeVec = register_gauge_vec!(
        "operator_gas_price_posted",
        "Last gas price sample voted",
        &["chain"]
    ).unwrap();

    // Outbound
    pub static ref OUTBOUNDS: CounterVec = register_counter_vec!(
        "operator_outbounds_total",
        "Outbound attempts by stage (signed, broadcast, fallback, failed)",
        &["chain", "stage"]
    ).unwrap();

    pub static ref TRACKER_REPORTS: CounterVec = register_counter_vec!(
        "operator_tracker_reports_total",
        "Outbound tracker reports by result",
        &["chain", "result"]
    ).unwrap();

    pub static ref OUTBOUNDS_IN_FLIGHT: GaugeVec = register_gauge_vec!(
        "operator_outbounds_in_flight",
        "Outbound attempts currently in flight",
        &["chain"]
    ).unwrap();

    // Scheduling
    pub static ref SCHEDULER_ITERATIONS: CounterVec = register_counter_vec!(
        "operator_scheduler_iterations_total",
        "Scheduler iterations by result (ok, error, fatal)",
        &["chain", "result"]
    ).unwrap();

    // RPC health
    pub static ref RPC_LATENCY: HistogramVec = register_histogram_vec!(
        "operator_rpc_latency_seconds",
        "Latency of the chain head query",
        &["chain"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0]
    ).unwrap();

    pub static ref RPC_STALE: GaugeVec = register_gauge_vec!(
        "operator_rpc_stale",
        "Whether the chain head has not moved within the staleness window",
        &["chain"]
    ).unwrap();

    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "operator_errors_total",
        "Total number of errors",
        &["chain", "type"]
    ).unwrap();

    // Health metrics
    pub static ref UP: Gauge = register_gauge!(
        "operator_up",
        "Whether the operator is up and running"
    ).unwrap();
}

/// Record a ledger vote submission
pub fn record_vote(chain: ChainId, kind: &str, accepted: bool) {
    let result = if accepted { "ok" } else { "error" };
    VOTES_SUBMITTED
        .with_label_values(&[&chain.to_string(), kind, result])
        .inc();
}

/// Record the outcome of one inbound event
pub fn record_inbound_event(chain: ChainId, outcome: &str) {
    INBOUND_EVENTS
        .with_label_values(&[&chain.to_string(), outcome])
        .inc();
}

pub fn record_scanned_height(chain: ChainId, height: u64) {
    LAST_SCANNED_HEIGHT
        .with_label_values(&[&chain.to_string()])
        .set(height as f64);
}

pub fn record_gas_price(chain: ChainId, price: u64) {
    GAS_PRICE_POSTED
        .with_label_values(&[&chain.to_string()])
        .set(price as f64);
}

/// Record an outbound stage transition
pub fn record_outbound(chain: ChainId, stage: &str) {
    OUTBOUNDS
        .with_label_values(&[&chain.to_string(), stage])
        .inc();
}

pub fn record_tracker_report(chain: ChainId, success: bool) {
    let result = if success { "success" } else { "failure" };
    TRACKER_REPORTS
        .with_label_values(&[&chain.to_string(), result])
        .inc();
}

pub fn set_in_flight(chain: ChainId, count: usize) {
    OUTBOUNDS_IN_FLIGHT
        .with_label_values(&[&chain.to_string()])
        .set(count as f64);
}

pub fn record_scheduler_iteration(chain: ChainId, result: &str) {
    SCHEDULER_ITERATIONS
        .with_label_values(&[&chain.to_string(), result])
        .inc();
}

/// Record one head query and whether the chain looks stalled
pub fn record_rpc_status(chain: ChainId, latency_secs: f64, stale: bool) {
    let label = chain.to_string();
    RPC_LATENCY.with_label_values(&[&label]).observe(latency_secs);
    RPC_STALE
        .with_label_values(&[&label])
        .set(if stale { 1.0 } else { 0.0 });
}

/// Record an error
pub fn record_error(chain: ChainId, error_type: &str) {
    ERRORS
        .with_label_values(&[&chain.to_string(), error_type])
        .inc();
}
