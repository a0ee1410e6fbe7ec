//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, route
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency
//! - `gateway_backend_attempts_total` (counter): backend attempts by host:port
//! - `gateway_circuit_breaker_transitions_total` (counter): by breaker, target state
//! - `gateway_pool_connections_created_total` (counter): new backend connections
//! - `gateway_instance_health` (gauge): 1=healthy, 0=unhealthy
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; the Prometheus exporter is
//!   optional and installed at startup
//! - Labels for route, backend, status code

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

use crate::resilience::CircuitState;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, route: &str, start: Instant) {
    metrics::counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "route" => route.to_string()
    )
    .increment(1);
    metrics::histogram!(
        "gateway_request_duration_seconds",
        "method" => method.to_string(),
        "route" => route.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_backend_attempt(backend: &str) {
    metrics::counter!("gateway_backend_attempts_total", "backend" => backend.to_string()).increment(1);
}

pub fn record_breaker_transition(name: &str, state: CircuitState) {
    metrics::counter!(
        "gateway_circuit_breaker_transitions_total",
        "breaker" => name.to_string(),
        "state" => state.to_string()
    )
    .increment(1);
}

pub fn record_pool_connection_created(backend: &str) {
    metrics::counter!("gateway_pool_connections_created_total", "backend" => backend.to_string())
        .increment(1);
}

pub fn record_instance_health(instance: &str, healthy: bool) {
    metrics::gauge!("gateway_instance_health", "instance" => instance.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}
