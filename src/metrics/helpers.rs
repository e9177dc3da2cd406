//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    CONNECTIONS_OPENED_TOTAL, CONNECTION_SETUP_FAILURES_TOTAL, POOL_ACTIVE, POOL_CHECKED_IN,
    POOL_OVERFLOW, POOL_SIZE, POOL_UTILIZATION, POOL_UTILIZATION_WARNINGS_TOTAL, SESSIONS_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording pool samples
pub struct PoolGauges;

impl PoolGauges {
    /// Record one pool sample
    pub fn record(size: u32, checked_in: u32, overflow: i64, active: i64, utilization: f64) {
        POOL_SIZE.set(size as i64);
        POOL_CHECKED_IN.set(checked_in as i64);
        POOL_OVERFLOW.set(overflow);
        POOL_ACTIVE.set(active);
        POOL_UTILIZATION.set(utilization);
    }

    /// Record a sample above the warning threshold
    pub fn record_warning() {
        POOL_UTILIZATION_WARNINGS_TOTAL.inc();
    }
}

/// Helper struct for recording unit-of-work outcomes
pub struct SessionMetrics;

impl SessionMetrics {
    pub fn record_committed() {
        SESSIONS_TOTAL.with_label_values(&["committed"]).inc();
    }

    pub fn record_rolled_back() {
        SESSIONS_TOTAL.with_label_values(&["rolled_back"]).inc();
    }
}

/// Helper struct for recording physical connection events
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened() {
        CONNECTIONS_OPENED_TOTAL.inc();
    }

    pub fn record_setup_failure() {
        CONNECTION_SETUP_FAILURES_TOTAL.inc();
    }
}
