//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, latency, injected faults, errors)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `chaos_requests_total` (counter): requests by mode, outcome, status
//! - `chaos_request_duration_seconds` (histogram): end-to-end latency
//! - `chaos_injected_delay_ms` (histogram): injected delay per request
//! - `chaos_short_circuits_total` (counter): synthetic failures by status
//! - `chaos_upstream_errors_total` (counter): forwarding failures by kind
//! - `chaos_usage_record_failures_total` (counter): failed usage writes
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Labels are low-cardinality; keys and URLs never become labels

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record a finished request.
pub fn record_request(mode: &'static str, outcome: &'static str, status: u16, start: Instant) {
    metrics::counter!(
        "chaos_requests_total",
        "mode" => mode,
        "outcome" => outcome,
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("chaos_request_duration_seconds", "mode" => mode)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_injected_delay(delay: Duration) {
    metrics::histogram!("chaos_injected_delay_ms").record(delay.as_millis() as f64);
}

pub fn record_short_circuit(status: u16) {
    metrics::counter!("chaos_short_circuits_total", "status" => status.to_string()).increment(1);
}

pub fn record_upstream_error(kind: &'static str) {
    metrics::counter!("chaos_upstream_errors_total", "kind" => kind).increment(1);
}

pub fn record_usage_failure() {
    metrics::counter!("chaos_usage_record_failures_total").increment(1);
}
