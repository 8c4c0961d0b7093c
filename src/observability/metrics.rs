//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_connections_accepted_total` (counter): client sockets accepted
//! - `proxy_protocol_errors_total` (counter): rejected requests, by reason
//! - `proxy_connect_failures_total` (counter): outbound connects that failed
//! - `proxy_bytes_relayed_total` (counter): bytes written, by direction
//! - `proxy_worker_failures_total` (counter): workers that died
//! - `proxy_active_workers` (gauge): live worker threads
//! - `proxy_buffers_in_use` (gauge): pooled buffers lent out
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;

use ::metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_accepted() {
    counter!("proxy_connections_accepted_total").increment(1);
}

pub fn record_protocol_error(reason: &'static str) {
    counter!("proxy_protocol_errors_total", "reason" => reason).increment(1);
}

pub fn record_connect_failure() {
    counter!("proxy_connect_failures_total").increment(1);
}

pub fn record_bytes(direction: &'static str, bytes: usize) {
    counter!("proxy_bytes_relayed_total", "direction" => direction).increment(bytes as u64);
}

pub fn record_worker_failure() {
    counter!("proxy_worker_failures_total").increment(1);
}

pub fn set_active_workers(count: usize) {
    gauge!("proxy_active_workers").set(count as f64);
}

pub fn set_buffers_in_use(count: usize) {
    gauge!("proxy_buffers_in_use").set(count as f64);
}
