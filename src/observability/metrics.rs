//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_upstream_requests_total` (counter): upstream calls by registry, outcome
//! - `gateway_upstream_request_duration_seconds` (histogram): upstream latency
//! - `gateway_retries_total` (counter): retry attempts by registry, reason
//! - `gateway_cache_lookups_total` (counter): cache lookups by cache, result
//! - `gateway_cache_evictions_total` / `gateway_cache_expirations_total` (counter)
//! - `gateway_cache_entries` (gauge): live entries after a sweep
//! - `gateway_circuit_state` (gauge): 0=closed, 1=half_open, 2=open
//! - `gateway_circuit_transitions_total` (counter): by circuit, from, to
//! - `gateway_dedup_shared_total` (counter): calls served by another caller's flight
//!
//! # Design Decisions
//! - Thin free functions so call sites stay one line
//! - Labels for registry/cache/circuit name and outcome

use std::net::SocketAddr;
use std::time::Instant;

use ::metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder and its scrape listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record one upstream HTTP exchange.
pub fn record_upstream_request(registry: &str, outcome: &str, start_time: Instant) {
    let labels = [
        ("registry", registry.to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!("gateway_upstream_requests_total", &labels).increment(1);
    histogram!("gateway_upstream_request_duration_seconds", &labels)
        .record(start_time.elapsed().as_secs_f64());
}

pub fn record_retry(registry: &str, reason: &str) {
    let labels = [
        ("registry", registry.to_string()),
        ("reason", reason.to_string()),
    ];
    counter!("gateway_retries_total", &labels).increment(1);
}

pub fn record_cache_lookup(cache: &str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    let labels = [("cache", cache.to_string()), ("result", result.to_string())];
    counter!("gateway_cache_lookups_total", &labels).increment(1);
}

pub fn record_cache_evictions(cache: &str, count: usize) {
    if count > 0 {
        counter!("gateway_cache_evictions_total", "cache" => cache.to_string())
            .increment(count as u64);
    }
}

pub fn record_cache_expirations(cache: &str, count: usize) {
    if count > 0 {
        counter!("gateway_cache_expirations_total", "cache" => cache.to_string())
            .increment(count as u64);
    }
}

pub fn record_cache_size(cache: &str, entries: usize) {
    gauge!("gateway_cache_entries", "cache" => cache.to_string()).set(entries as f64);
}

pub fn record_circuit_state(circuit: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("gateway_circuit_state", "circuit" => circuit.to_string()).set(value);
}

pub fn record_circuit_transition(circuit: &str, from: CircuitState, to: CircuitState) {
    let labels = [
        ("circuit", circuit.to_string()),
        ("from", from.as_str().to_string()),
        ("to", to.as_str().to_string()),
    ];
    counter!("gateway_circuit_transitions_total", &labels).increment(1);
    record_circuit_state(circuit, to);
}

pub fn record_dedup_shared(name: &str) {
    counter!("gateway_dedup_shared_total", "name" => name.to_string()).increment(1);
}
