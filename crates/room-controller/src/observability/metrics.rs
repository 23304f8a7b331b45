//! Metrics definitions for the Room Controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rc_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Store latency buckets, internal service call
        .set_buckets_for_metric(
            Matcher::Prefix("rc_store".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set store latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Gauges
// ============================================================================

/// Set the number of live room actors.
///
/// Metric: `rc_rooms_active`
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_rooms_active").set(count as f64);
}

/// Adjust the number of registered connections.
///
/// Metric: `rc_connections_active`
pub fn connections_opened(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_connections_active").increment(count as f64);
}

/// Metric: `rc_connections_active`
pub fn connections_closed(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_connections_active").decrement(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `rc_actor_mailbox_depth`
/// Labels: `actor_type` (controller, room)
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

// ============================================================================
// Counters
// ============================================================================

/// Record a join outcome.
///
/// Metric: `rc_join_outcomes_total`
/// Labels: `outcome` (admitted, already_member, queued, room_full, unauthorized, not_found)
pub fn record_join_outcome(outcome: &str) {
    counter!("rc_join_outcomes_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record an inbound frame routed by the signal relay.
///
/// Metric: `rc_signals_relayed_total`
/// Labels: `kind` (ping, speaking_status, offer, answer, ice_candidate, passthrough, malformed)
pub fn record_signal_relayed(kind: &str) {
    counter!("rc_signals_relayed_total", "kind" => kind.to_string()).increment(1);
}

/// Record connections evicted after a failed delivery.
///
/// Metric: `rc_deliveries_evicted_total`
pub fn record_deliveries_evicted(count: usize) {
    counter!("rc_deliveries_evicted_total").increment(count as u64);
}

/// Record rooms removed by the expiry sweep.
///
/// Metric: `rc_rooms_expired_total`
pub fn record_rooms_expired(count: usize) {
    counter!("rc_rooms_expired_total").increment(count as u64);
}

/// Record an actor panic.
///
/// Metric: `rc_actor_panics_total`
/// Labels: `actor_type`
///
/// Any non-zero value indicates a bug.
pub fn record_actor_panic(actor_type: &str) {
    counter!("rc_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

// ============================================================================
// Store
// ============================================================================

/// Record a store operation.
///
/// Metrics: `rc_store_operation_duration_seconds`, `rc_store_errors_total`
/// Labels: `operation`
pub fn record_store_operation(operation: &str, duration: Duration, success: bool) {
    histogram!("rc_store_operation_duration_seconds", "operation" => operation.to_string())
        .record(duration.as_secs_f64());
    if !success {
        counter!("rc_store_errors_total", "operation" => operation.to_string()).increment(1);
    }
}
