//! Metrics collection and exposition.
//!
//! # Metrics
//! - `client_requests_total` (counter): outbound attempts by method, status
//! - `client_request_duration_seconds` (histogram): attempt latency
//! - `client_cache_lookups_total` (counter): hits and misses
//! - `client_cache_evictions_total` (counter): removals by reason
//! - `client_coalesced_total` (counter): callers that joined an in-flight GET
//! - `client_retries_total` (counter): retries by error kind
//! - `client_token_refresh_total` (counter): refresh outcomes
//!
//! Recording is a no-op until a recorder is installed.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tokio::time::Instant;

use crate::error::ErrorKind;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics recorder"),
    }
}

/// Record one network attempt. Status 0 means no response was received.
pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "client_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("client_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("client_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_eviction(reason: &'static str, count: usize) {
    counter!("client_cache_evictions_total", "reason" => reason).increment(count as u64);
}

pub fn record_coalesced() {
    counter!("client_coalesced_total").increment(1);
}

pub fn record_retry(kind: ErrorKind) {
    counter!("client_retries_total", "kind" => kind.as_str()).increment(1);
}

pub fn record_token_refresh(outcome: &'static str) {
    counter!("client_token_refresh_total", "outcome" => outcome).increment(1);
}
