//! Prometheus metrics for spotd

use once_cell::sync::Lazy;
use prometheus::{
    opts, register_histogram, register_int_counter_vec, register_int_gauge, Histogram,
    IntCounterVec, IntGauge,
};

use crate::executor::AttemptState;

/// Termination notice polls by result (error, not_ready, imminent)
static NOTICE_POLLS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("spotd_notice_polls_total", "Total number of termination notice polls"),
        &["result"]
    )
    .expect("Failed to create notice_polls metric")
});

/// Terminal eviction outcomes
static EVICTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("spotd_evictions_total", "Total number of pods by eviction outcome"),
        &["outcome"]
    )
    .expect("Failed to create evictions metric")
});

/// Eviction retries by rejection reason
static EVICTION_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("spotd_eviction_retries_total", "Total number of retried eviction requests"),
        &["reason"]
    )
    .expect("Failed to create eviction_retries metric")
});

/// Audit event submissions
static AUDIT_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("spotd_audit_events_total", "Total number of audit event submissions"),
        &["result"]
    )
    .expect("Failed to create audit_events metric")
});

/// Whether this handler has cordoned its node
static NODE_CORDONED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(opts!(
        "spotd_node_cordoned",
        "1 once the node has been cordoned by the handler"
    ))
    .expect("Failed to create node_cordoned metric")
});

/// Wall-clock time of the eviction phase
static DRAIN_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "spotd_drain_duration_seconds",
        "Duration of the eviction phase of a drain",
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    )
    .expect("Failed to create drain_duration metric")
});

/// Metrics registry wrapper
pub struct MetricsRegistry;

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        // Force initialization of lazy statics
        let _ = &*NOTICE_POLLS;
        let _ = &*EVICTIONS;
        let _ = &*EVICTION_RETRIES;
        let _ = &*AUDIT_EVENTS;
        let _ = &*NODE_CORDONED;
        let _ = &*DRAIN_DURATION;
        Self
    }

    pub fn inc_notice_poll(&self, result: &str) {
        NOTICE_POLLS.with_label_values(&[result]).inc();
    }

    /// Count a terminal attempt state
    pub fn inc_eviction(&self, state: AttemptState) {
        let outcome = match state {
            AttemptState::Succeeded => "succeeded",
            AttemptState::Failed => "failed",
            AttemptState::Skipped => "skipped",
            AttemptState::Pending | AttemptState::Evicting => return,
        };
        EVICTIONS.with_label_values(&[outcome]).inc();
    }

    pub fn inc_eviction_retry(&self, reason: &str) {
        EVICTION_RETRIES.with_label_values(&[reason]).inc();
    }

    pub fn inc_audit_event(&self, result: &str) {
        AUDIT_EVENTS.with_label_values(&[result]).inc();
    }

    pub fn set_node_cordoned(&self, cordoned: bool) {
        NODE_CORDONED.set(i64::from(cordoned));
    }

    pub fn observe_drain_duration(&self, duration_secs: f64) {
        DRAIN_DURATION.observe(duration_secs);
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
