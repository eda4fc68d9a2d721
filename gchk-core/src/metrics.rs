//! Prometheus metrics for GCHK

use once_cell::sync::Lazy;
use prometheus::{
    opts, register_histogram, register_int_counter_vec, register_int_gauge, Histogram,
    IntCounterVec, IntGauge,
};

/// Probe verdicts by result (healthy, unhealthy)
static PROBES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("gchk_probes_total", "Total number of GPU probes"),
        &["result"]
    )
    .expect("Failed to create probes metric")
});

/// Probe duration histogram
static PROBE_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "gchk_probe_duration_seconds",
        "Duration of GPU probes",
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("Failed to create probe_duration metric")
});

/// Drain attempts by result (accepted, rejected, dry_run)
static DRAINS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("gchk_drains_total", "Total number of drain attempts"),
        &["result"]
    )
    .expect("Failed to create drains metric")
});

/// Notification deliveries by result (sent, failed)
static NOTIFICATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("gchk_notifications_total", "Total number of notification attempts"),
        &["result"]
    )
    .expect("Failed to create notifications metric")
});

/// Nodes matched by the last discovery query
static NODES_DISCOVERED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(opts!(
        "gchk_nodes_discovered",
        "Number of nodes matched by the last discovery query"
    ))
    .expect("Failed to create nodes_discovered metric")
});

/// Per-node checks aborted by an unexpected failure
static NODE_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("gchk_node_failures_total", "Node checks aborted by an unexpected failure"),
        &["node"]
    )
    .expect("Failed to create node_failures metric")
});

/// Metrics registry wrapper
pub struct MetricsRegistry;

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        // Force initialization of lazy statics
        let _ = &*PROBES;
        let _ = &*PROBE_DURATION;
        let _ = &*DRAINS;
        let _ = &*NOTIFICATIONS;
        let _ = &*NODES_DISCOVERED;
        let _ = &*NODE_FAILURES;
        Self
    }

    pub fn set_nodes_discovered(&self, count: i64) {
        NODES_DISCOVERED.set(count);
    }

    /// Record a probe verdict and its duration
    pub fn observe_probe(&self, healthy: bool, duration_secs: f64) {
        let result = if healthy { "healthy" } else { "unhealthy" };
        PROBES.with_label_values(&[result]).inc();
        PROBE_DURATION.observe(duration_secs);
    }

    pub fn inc_drain(&self, result: &str) {
        DRAINS.with_label_values(&[result]).inc();
    }

    pub fn inc_notification(&self, sent: bool) {
        let result = if sent { "sent" } else { "failed" };
        NOTIFICATIONS.with_label_values(&[result]).inc();
    }

    pub fn inc_node_failure(&self, node: &str) {
        NODE_FAILURES.with_label_values(&[node]).inc();
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
