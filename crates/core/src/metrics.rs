//! Metric names and label keys.
//!
//! Every metric the pipeline emits is named here and recorded through the
//! `metrics` crate macros. The library installs no recorder; a binary that
//! wants the numbers installs one (Prometheus exporter or similar).
//!
//! # Naming
//!
//! - prefix `relaylog_`
//! - component: `dispatcher_`, `rotation_`, `breaker_`, `sampling_`, `health_`
//! - suffix `_total` for counters, none for gauges
//!
//! ```ignore
//! metrics::counter!(relaylog_core::metrics::DISPATCHER_SYNC_FALLBACK_TOTAL).increment(1);
//! ```

// ─── Labels ─────────────────────────────────────────────────────────

/// Sink name label
pub const LABEL_SINK: &str = "sink";

/// Breaker target state label (closed, open, half-open)
pub const LABEL_STATE: &str = "state";

/// Health check name label
pub const LABEL_CHECK: &str = "check";

/// Health status label (healthy, degraded, unhealthy)
pub const LABEL_STATUS: &str = "status";

// ─── Async dispatcher ───────────────────────────────────────────────

/// Events accepted into the dispatcher queue (counter)
pub const DISPATCHER_ENQUEUED_TOTAL: &str = "relaylog_dispatcher_enqueued_total";

/// Events delivered synchronously because the queue was full (counter)
pub const DISPATCHER_SYNC_FALLBACK_TOTAL: &str = "relaylog_dispatcher_sync_fallback_total";

/// Queued events the inner sink rejected (counter)
pub const DISPATCHER_DELIVERY_FAILURES_TOTAL: &str =
    "relaylog_dispatcher_delivery_failures_total";

/// Events currently waiting in the queue (gauge)
pub const DISPATCHER_QUEUE_DEPTH: &str = "relaylog_dispatcher_queue_depth";

// ─── Rotating sink ──────────────────────────────────────────────────

/// Completed file rotations (counter)
pub const ROTATION_TOTAL: &str = "relaylog_rotation_total";

/// Failed file rotations (counter)
pub const ROTATION_FAILURES_TOTAL: &str = "relaylog_rotation_failures_total";

// ─── Circuit breaker ────────────────────────────────────────────────

/// Breaker state transitions (counter, label: state)
pub const BREAKER_TRANSITIONS_TOTAL: &str = "relaylog_breaker_transitions_total";

/// Calls rejected while the breaker was open (counter)
pub const BREAKER_REJECTIONS_TOTAL: &str = "relaylog_breaker_rejections_total";

// ─── Sampling ───────────────────────────────────────────────────────

/// Events suppressed by sampling (counter)
pub const SAMPLING_SUPPRESSED_TOTAL: &str = "relaylog_sampling_suppressed_total";

// ─── Health monitor ─────────────────────────────────────────────────

/// Health probe executions (counter, labels: check, status)
pub const HEALTH_CHECKS_TOTAL: &str = "relaylog_health_checks_total";

/// Health probes that exceeded their timeout (counter, label: check)
pub const HEALTH_CHECK_TIMEOUTS_TOTAL: &str = "relaylog_health_check_timeouts_total";

// ─── Descriptions ───────────────────────────────────────────────────

/// Registers a description for every metric above.
///
/// Call once, after a recorder is installed.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    // Async dispatcher
    describe_counter!(
        DISPATCHER_ENQUEUED_TOTAL,
        "Events accepted into the dispatcher queue"
    );
    describe_counter!(
        DISPATCHER_SYNC_FALLBACK_TOTAL,
        "Events delivered on the caller thread because the queue was full or closed"
    );
    describe_counter!(
        DISPATCHER_DELIVERY_FAILURES_TOTAL,
        "Queued events the inner sink rejected"
    );
    describe_gauge!(
        DISPATCHER_QUEUE_DEPTH,
        "Events currently waiting in the dispatcher queue"
    );

    // Rotating sink
    describe_counter!(ROTATION_TOTAL, "Completed log file rotations");
    describe_counter!(ROTATION_FAILURES_TOTAL, "Failed log file rotations");

    // Circuit breaker
    describe_counter!(
        BREAKER_TRANSITIONS_TOTAL,
        "Circuit breaker state transitions, by target state"
    );
    describe_counter!(
        BREAKER_REJECTIONS_TOTAL,
        "Deliveries rejected while the circuit was open"
    );

    // Sampling
    describe_counter!(SAMPLING_SUPPRESSED_TOTAL, "Events dropped by sampling");

    // Health monitor
    describe_counter!(
        HEALTH_CHECKS_TOTAL,
        "Health probe executions, by check and status"
    );
    describe_counter!(
        HEALTH_CHECK_TIMEOUTS_TOTAL,
        "Health probes that exceeded their timeout"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_share_prefix() {
        let names = [
            DISPATCHER_ENQUEUED_TOTAL,
            DISPATCHER_SYNC_FALLBACK_TOTAL,
            DISPATCHER_DELIVERY_FAILURES_TOTAL,
            DISPATCHER_QUEUE_DEPTH,
            ROTATION_TOTAL,
            ROTATION_FAILURES_TOTAL,
            BREAKER_TRANSITIONS_TOTAL,
            BREAKER_REJECTIONS_TOTAL,
            SAMPLING_SUPPRESSED_TOTAL,
            HEALTH_CHECKS_TOTAL,
            HEALTH_CHECK_TIMEOUTS_TOTAL,
        ];
        for name in names {
            assert!(name.starts_with("relaylog_"), "{name}");
        }
    }

    #[test]
    fn describe_without_recorder_is_noop() {
        describe_all();
    }
}
