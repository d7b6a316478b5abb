//! Metrics collection and exposition.
//!
//! # Metrics
//! - `splitstream_sessions_active` (gauge): live sessions
//! - `splitstream_sessions_created_total` (counter)
//! - `splitstream_sessions_closed_total` (counter): by reason
//! - `splitstream_chunks_total` (counter): uplink chunks by outcome
//! - `splitstream_uplink_bytes_total` / `splitstream_downlink_bytes_total` (counters)
//! - `splitstream_errors_total` (counter): by error kind
//! - `splitstream_upstream_connect_seconds` (histogram)
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - Labels are fixed strings, never client-supplied values

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Start the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_session_created() {
    counter!("splitstream_sessions_created_total").increment(1);
    gauge!("splitstream_sessions_active").increment(1.0);
}

pub fn record_session_closed(reason: &'static str) {
    counter!("splitstream_sessions_closed_total", "reason" => reason).increment(1);
    gauge!("splitstream_sessions_active").decrement(1.0);
}

pub fn record_chunk(outcome: &'static str) {
    counter!("splitstream_chunks_total", "outcome" => outcome).increment(1);
}

pub fn record_uplink_bytes(n: usize) {
    counter!("splitstream_uplink_bytes_total").increment(n as u64);
}

pub fn record_downlink_bytes(n: usize) {
    counter!("splitstream_downlink_bytes_total").increment(n as u64);
}

pub fn record_error(kind: &'static str) {
    counter!("splitstream_errors_total", "kind" => kind).increment(1);
}

pub fn record_upstream_connect(start: Instant) {
    histogram!("splitstream_upstream_connect_seconds").record(start.elapsed().as_secs_f64());
}
