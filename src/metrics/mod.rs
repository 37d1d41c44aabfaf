//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Chain connection status and heights
//! - Scanner progress and fetch errors
//! - Observed xCall events
//! - Transfer status transitions, submissions and fee quotes

use crate::chain::ChainId;
use crate::error::{TrackerError, TrackerResult};
use crate::events::{EventKind, ProtocolEvent};
use crate::transfer::TransferStatus;

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "xcall_tracker_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["chain_id"]
    ).unwrap();

    pub static ref CHAIN_BLOCK_HEIGHT: GaugeVec = register_gauge_vec!(
        "xcall_tracker_chain_block_height",
        "Latest observed block height per chain",
        &["chain_id"]
    ).unwrap();

    // Scanner metrics
    pub static ref SCANNER_CURSOR: GaugeVec = register_gauge_vec!(
        "xcall_tracker_scanner_cursor",
        "Last scanned block height per chain",
        &["chain_id"]
    ).unwrap();

    pub static ref SCANNER_ACTIVE: GaugeVec = register_gauge_vec!(
        "xcall_tracker_scanner_active",
        "Scanner enabled (1) or stopped (0)",
        &["chain_id"]
    ).unwrap();

    pub static ref BLOCKS_SCANNED: CounterVec = register_counter_vec!(
        "xcall_tracker_blocks_scanned_total",
        "Blocks fetched and cached by the scanner",
        &["chain_id"]
    ).unwrap();

    pub static ref SCAN_ERRORS: CounterVec = register_counter_vec!(
        "xcall_tracker_scan_errors_total",
        "Scanner query errors by stage",
        &["chain_id", "stage"]
    ).unwrap();

    // Event metrics
    pub static ref EVENTS_OBSERVED: CounterVec = register_counter_vec!(
        "xcall_tracker_events_observed_total",
        "xCall events decoded from scanned blocks",
        &["chain_id", "event_type"]
    ).unwrap();

    // Transfer metrics
    pub static ref TRANSFER_STATUS: CounterVec = register_counter_vec!(
        "xcall_tracker_transfer_status_total",
        "Transfers entering each status",
        &["status"]
    ).unwrap();

    pub static ref TRANSFER_EVENTS: CounterVec = register_counter_vec!(
        "xcall_tracker_transfer_events_total",
        "Events correlated to a tracked transfer",
        &["event_type"]
    ).unwrap();

    pub static ref TRANSFERS_SUBMITTED: CounterVec = register_counter_vec!(
        "xcall_tracker_transfers_submitted_total",
        "Transfers submitted per source chain",
        &["chain_id"]
    ).unwrap();

    pub static ref SUBMISSION_FAILURES: CounterVec = register_counter_vec!(
        "xcall_tracker_submission_failures_total",
        "Rejected transfer submissions per source chain",
        &["chain_id"]
    ).unwrap();

    pub static ref TRANSFER_LATENCY: HistogramVec = register_histogram_vec!(
        "xcall_tracker_transfer_latency_seconds",
        "Time from tracking to destination execution",
        &["destination"],
        vec![5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]
    ).unwrap();

    pub static ref ACTIVE_TRANSFERS: Gauge = register_gauge!(
        "xcall_tracker_active_transfers",
        "Transfers still being polled"
    ).unwrap();

    // Fee metrics
    pub static ref FEE_QUOTE_FAILURES: CounterVec = register_counter_vec!(
        "xcall_tracker_fee_quote_failures_total",
        "Failed protocol fee queries",
        &["source", "destination"]
    ).unwrap();

    // Wallet metrics
    pub static ref NATIVE_BALANCE: GaugeVec = register_gauge_vec!(
        "xcall_tracker_native_balance",
        "Native balance of the checked account, in whole units",
        &["chain_id"]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "xcall_tracker_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "xcall_tracker_health_check_failure_total",
        "Total failed health checks",
        &[]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self, cancel: CancellationToken) -> TrackerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| TrackerError::Internal(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|e| TrackerError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

/// Text exposition of all registered metrics
pub fn render() -> TrackerResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TrackerError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TrackerError::Internal(e.to_string()))
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|e| {
        error!("Failed to encode metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

// Helper functions to record metrics

pub fn record_chain_health(chain_id: &ChainId, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[chain_id.as_str()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_chain_height(chain_id: &ChainId, height: u64) {
    CHAIN_BLOCK_HEIGHT
        .with_label_values(&[chain_id.as_str()])
        .set(height as f64);
}

pub fn record_scanner_cursor(chain_id: &ChainId, cursor: u64) {
    SCANNER_CURSOR
        .with_label_values(&[chain_id.as_str()])
        .set(cursor as f64);
}

pub fn record_scanner_active(chain_id: &ChainId, active: bool) {
    SCANNER_ACTIVE
        .with_label_values(&[chain_id.as_str()])
        .set(if active { 1.0 } else { 0.0 });
}

pub fn record_block_scanned(chain_id: &ChainId, events: &[ProtocolEvent]) {
    BLOCKS_SCANNED.with_label_values(&[chain_id.as_str()]).inc();
    for event in events {
        EVENTS_OBSERVED
            .with_label_values(&[chain_id.as_str(), event.name()])
            .inc();
    }
}

pub fn record_scan_error(chain_id: &ChainId, stage: &str) {
    SCAN_ERRORS
        .with_label_values(&[chain_id.as_str(), stage])
        .inc();
}

pub fn record_transfer_status(status: TransferStatus) {
    TRANSFER_STATUS.with_label_values(&[status.as_str()]).inc();
}

pub fn record_transfer_event(kind: EventKind) {
    TRANSFER_EVENTS
        .with_label_values(&[&kind.to_string()])
        .inc();
}

pub fn record_transfer_submitted(chain_id: &ChainId) {
    TRANSFERS_SUBMITTED
        .with_label_values(&[chain_id.as_str()])
        .inc();
}

pub fn record_submission_failure(chain_id: &ChainId) {
    SUBMISSION_FAILURES
        .with_label_values(&[chain_id.as_str()])
        .inc();
}

pub fn record_transfer_latency(destination: &ChainId, latency_secs: f64) {
    TRANSFER_LATENCY
        .with_label_values(&[destination.as_str()])
        .observe(latency_secs);
}

pub fn record_active_transfers(count: usize) {
    ACTIVE_TRANSFERS.set(count as f64);
}

pub fn record_fee_quote_failure(source: &ChainId, destination: &ChainId) {
    FEE_QUOTE_FAILURES
        .with_label_values(&[source.as_str(), destination.as_str()])
        .inc();
}

pub fn record_native_balance(chain_id: &ChainId, balance: f64) {
    NATIVE_BALANCE
        .with_label_values(&[chain_id.as_str()])
        .set(balance);
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}
