//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, route
//! - `proxy_request_duration_seconds` (histogram): time to response head
//! - `proxy_request_failures_total` (counter): failed requests by error kind
//! - `proxy_upstream_connect_failures_total` (counter): by target
//! - `proxy_target_health` (gauge): 1=healthy, 0=degraded
//! - `proxy_reloads_total` (counter): reload attempts by trigger, outcome
//! - `proxy_route_table_generation` (gauge): generation currently installed
//! - `proxy_tls_handshake_failures_total` (counter)
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exporter only when enabled in config

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::ReloadTrigger;
use crate::upstream::TargetAddr;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, route: &str, started: Instant) {
    counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "route" => route.to_string()
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds").record(started.elapsed().as_secs_f64());
}

pub fn record_failure(kind: &'static str) {
    counter!("proxy_request_failures_total", "kind" => kind).increment(1);
}

pub fn record_upstream_connect_failure(addr: &TargetAddr) {
    counter!("proxy_upstream_connect_failures_total", "target" => addr.to_string()).increment(1);
}

pub fn record_target_health(addr: &TargetAddr, healthy: bool) {
    gauge!("proxy_target_health", "target" => addr.to_string()).set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_reload(trigger: ReloadTrigger, ok: bool) {
    counter!(
        "proxy_reloads_total",
        "trigger" => trigger.to_string(),
        "outcome" => if ok { "success" } else { "rejected" }
    )
    .increment(1);
}

pub fn set_generation(generation: u64) {
    gauge!("proxy_route_table_generation").set(generation as f64);
}

pub fn record_tls_handshake_failure() {
    counter!("proxy_tls_handshake_failures_total").increment(1);
    record_failure("tls_handshake");
}
