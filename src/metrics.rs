//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Dial/listen outcomes per outbound
//! - Switch and all-failed events
//! - Recovery probe results and latency
//! - Interrupted-connection counts
//! - Group lifecycle state
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `failover_` and follow Prometheus
//! conventions: counters end in `_total`, gauges represent current state,
//! histograms track distributions.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record the outcome of a dial or listen-packet delegation.
pub fn record_dial(outbound: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("failover_dials_total", "outbound" => outbound.to_string(), "status" => status)
        .increment(1);
}

/// Record a switch to a different candidate.
pub fn record_switch(from: &str, to: &str) {
    counter!("failover_switches_total", "from" => from.to_string(), "to" => to.to_string())
        .increment(1);
}

/// Record an all-candidates-failed reset.
pub fn record_all_failed() {
    counter!("failover_all_failed_total").increment(1);
}

/// Record a primary recovery (selection returned to index 0).
pub fn record_recovery(outbound: &str) {
    counter!("failover_recoveries_total", "outbound" => outbound.to_string()).increment(1);
}

/// Record a recovery probe outcome.
pub fn record_probe(outbound: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("failover_probes_total", "outbound" => outbound.to_string(), "status" => status)
        .increment(1);
}

/// Record recovery probe round-trip latency.
pub fn record_probe_latency(outbound: &str, latency: Duration) {
    histogram!("failover_probe_duration_seconds", "outbound" => outbound.to_string())
        .record(latency.as_secs_f64());
}

/// Record connections evicted by an interrupt.
pub fn record_interrupted(count: usize) {
    if count > 0 {
        counter!("failover_interrupted_connections_total").increment(count as u64);
    }
}

/// Record the group lifecycle state.
pub fn set_group_state(state: &str) {
    gauge!("failover_group_state", "state" => state.to_string()).set(1.0);
}
