//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (sessions, pool churn, bridge outcomes)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `gateway_active_sessions` (gauge): sessions whose driver is running
//! - `gateway_pool_idle_sessions` (gauge): pooled sessions by address
//! - `gateway_pool_events_total` (counter): recycle / reuse / evict / stale
//! - `gateway_bridge_outcomes_total` (counter): bridged / failed / replayed
//! - `gateway_connect_failures_total` (counter): by scheme
//! - `gateway_bridge_open_seconds` (histogram): connect-side establishment
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Labels stay low-cardinality (scheme, outcome, event)

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Pool lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    Recycled,
    Reused,
    Evicted,
    /// Found closed while pooled and skipped by `take`.
    Stale,
}

impl PoolEvent {
    fn as_str(self) -> &'static str {
        match self {
            PoolEvent::Recycled => "recycle",
            PoolEvent::Reused => "reuse",
            PoolEvent::Evicted => "evict",
            PoolEvent::Stale => "stale",
        }
    }
}

/// How a bridge attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOutcome {
    Bridged,
    Failed,
    Replayed,
}

impl BridgeOutcome {
    fn as_str(self) -> &'static str {
        match self {
            BridgeOutcome::Bridged => "bridged",
            BridgeOutcome::Failed => "failed",
            BridgeOutcome::Replayed => "replayed",
        }
    }
}

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_active_sessions(count: u64) {
    gauge!("gateway_active_sessions").set(count as f64);
}

pub fn record_pool_event(event: PoolEvent, scheme: &str) {
    counter!(
        "gateway_pool_events_total",
        "event" => event.as_str(),
        "scheme" => scheme.to_string()
    )
    .increment(1);
}

pub fn record_pool_idle(count: usize) {
    gauge!("gateway_pool_idle_sessions").set(count as f64);
}

pub fn record_bridge_outcome(outcome: BridgeOutcome, scheme: &str) {
    counter!(
        "gateway_bridge_outcomes_total",
        "outcome" => outcome.as_str(),
        "scheme" => scheme.to_string()
    )
    .increment(1);
}

pub fn record_connect_failure(scheme: &str) {
    counter!("gateway_connect_failures_total", "scheme" => scheme.to_string()).increment(1);
}

/// Record how long opening a connect side took.
pub fn record_bridge_open(scheme: &str, started: Instant) {
    histogram!("gateway_bridge_open_seconds", "scheme" => scheme.to_string())
        .record(started.elapsed().as_secs_f64());
}
