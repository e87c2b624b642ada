//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by outcome
//! - `proxy_request_duration_seconds` (histogram): latency by outcome
//! - `proxy_bytes_saved_total` (counter): sum of `x-bytes-saved` on compressed responses
//! - `proxy_header_copy_failures_total` (counter): origin headers skipped on bypass

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a finished request.
pub fn record_request(outcome: &'static str, start: Instant) {
    counter!("proxy_requests_total", "outcome" => outcome).increment(1);
    histogram!("proxy_request_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

/// Record bytes saved by a compressed response. Negative savings are not counted.
pub fn record_bytes_saved(saved: i64) {
    if saved > 0 {
        counter!("proxy_bytes_saved_total").increment(saved as u64);
    }
}

/// Record origin headers that could not be copied onto a bypass response.
pub fn record_header_copy_failures(count: usize) {
    if count > 0 {
        counter!("proxy_header_copy_failures_total").increment(count as u64);
    }
}
