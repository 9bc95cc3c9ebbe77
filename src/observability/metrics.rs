//! Metrics collection and exposition.
//!
//! # Metrics
//! - `dispatch_requests_total` (counter): requests by endpoint, method, status
//! - `dispatch_request_duration_seconds` (histogram): latency by endpoint
//! - `sync_workers_busy` (gauge): sync handlers running right now
//! - `proxy_sessions_active` (gauge): open WebSocket relay sessions
//! - `proxy_session_errors_total` (counter): relay failures by reason
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until
//!   [`init_metrics`] installs the Prometheus recorder
//! - Labels stay low-cardinality: endpoint names, never raw paths

use std::net::SocketAddr;
use std::time::Instant;

use axum::http::{Method, StatusCode};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(endpoint: &str, method: &Method, status: StatusCode, started: Instant) {
    counter!(
        "dispatch_requests_total",
        "endpoint" => endpoint.to_string(),
        "method" => method.to_string(),
        "status" => status.as_u16().to_string()
    )
    .increment(1);
    histogram!("dispatch_request_duration_seconds", "endpoint" => endpoint.to_string())
        .record(started.elapsed().as_secs_f64());
}

pub fn record_proxy_error(reason: &'static str) {
    counter!("proxy_session_errors_total", "reason" => reason).increment(1);
}

/// Counts an open relay session until dropped.
pub struct ProxySessionGuard(());

impl ProxySessionGuard {
    pub fn new() -> Self {
        gauge!("proxy_sessions_active").increment(1.0);
        Self(())
    }
}

impl Default for ProxySessionGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProxySessionGuard {
    fn drop(&mut self) {
        gauge!("proxy_sessions_active").decrement(1.0);
    }
}

/// Counts a busy sync worker until dropped.
pub struct WorkerBusyGuard(());

impl WorkerBusyGuard {
    pub fn new() -> Self {
        gauge!("sync_workers_busy").increment(1.0);
        Self(())
    }
}

impl Default for WorkerBusyGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WorkerBusyGuard {
    fn drop(&mut self) {
        gauge!("sync_workers_busy").decrement(1.0);
    }
}
