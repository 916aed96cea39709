//! Metrics collection and exposition.
//!
//! # Metrics
//! - `breaker_calls_total` (counter): calls by breaker and outcome
//! - `breaker_transitions_total` (counter): state changes by breaker and target state
//! - `breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `notifier_events_total` (counter): change events by update type and result

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::BreakerStatus;

/// Install the Prometheus exporter with an HTTP scrape listener.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

fn state_value(status: BreakerStatus) -> f64 {
    match status {
        BreakerStatus::Closed => 0.0,
        BreakerStatus::HalfOpen => 1.0,
        BreakerStatus::Open => 2.0,
    }
}

pub fn record_breaker_call(breaker: &str, outcome: &'static str) {
    counter!("breaker_calls_total", "breaker" => breaker.to_string(), "outcome" => outcome)
        .increment(1);
}

pub fn record_breaker_state(breaker: &str, status: BreakerStatus) {
    gauge!("breaker_state", "breaker" => breaker.to_string()).set(state_value(status));
}

pub fn record_breaker_transition(breaker: &str, to: BreakerStatus) {
    counter!("breaker_transitions_total", "breaker" => breaker.to_string(), "to" => to.as_str())
        .increment(1);
    record_breaker_state(breaker, to);
}

pub fn record_notifier_event(update_type: &'static str, result: &'static str) {
    counter!("notifier_events_total", "update_type" => update_type, "result" => result)
        .increment(1);
}
