//! Prometheus metrics for the database layer.
//!
//! - Pool gauges (size, checked in, overflow, active, utilization)
//! - Utilization warnings
//! - Session outcomes
//! - Physical connections opened and connection setup failures

mod helpers;

pub use helpers::{encode_metrics, ConnectionMetrics, PoolGauges, SessionMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_int_counter, register_int_counter_vec, register_int_gauge, Gauge,
    IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "netra_db";

lazy_static! {
    // ============================================================================
    // Pool Metrics
    // ============================================================================

    /// Configured pool size
    pub static ref POOL_SIZE: IntGauge = register_int_gauge!(
        format!("{}_pool_size", METRIC_PREFIX),
        "Configured number of kept connections"
    ).unwrap();

    /// Idle connections in the pool
    pub static ref POOL_CHECKED_IN: IntGauge = register_int_gauge!(
        format!("{}_pool_checked_in", METRIC_PREFIX),
        "Connections idle in the pool"
    ).unwrap();

    /// Open connections beyond the pool size (negative while filling)
    pub static ref POOL_OVERFLOW: IntGauge = register_int_gauge!(
        format!("{}_pool_overflow", METRIC_PREFIX),
        "Open connections beyond the configured pool size"
    ).unwrap();

    /// Checked-out connections
    pub static ref POOL_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_pool_active", METRIC_PREFIX),
        "Connections currently checked out"
    ).unwrap();

    /// Active connections over pool capacity
    pub static ref POOL_UTILIZATION: Gauge = register_gauge!(
        format!("{}_pool_utilization", METRIC_PREFIX),
        "Checked-out connections as a fraction of pool_size + max_overflow"
    ).unwrap();

    /// Samples that crossed the utilization warning threshold
    pub static ref POOL_UTILIZATION_WARNINGS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_pool_utilization_warnings_total", METRIC_PREFIX),
        "Pool samples above the utilization warning threshold"
    ).unwrap();

    // ============================================================================
    // Session Metrics
    // ============================================================================

    /// Finished units of work by outcome
    pub static ref SESSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_sessions_total", METRIC_PREFIX),
        "Finished units of work",
        &["outcome"]
    ).unwrap();

    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Physical connections opened
    pub static ref CONNECTIONS_OPENED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Physical database connections opened"
    ).unwrap();

    /// Connections whose timeout setup failed
    pub static ref CONNECTION_SETUP_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connection_setup_failures_total", METRIC_PREFIX),
        "Connections rejected because session timeouts could not be set"
    ).unwrap();
}
