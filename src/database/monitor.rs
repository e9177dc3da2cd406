//! Pool utilization monitoring and status snapshots.
//!
//! Purely observational: the monitor logs and exports gauges, it never
//! resizes or drains the pool.

use serde::Serialize;

use crate::config::DatabaseConfig;
use crate::metrics::PoolGauges;

use super::url::PoolClass;

/// Counters a pool may expose. Each accessor is optional because not every
/// pool implementation tracks it.
pub trait PoolMetrics {
    fn pool_class(&self) -> PoolClass;

    /// Configured number of kept connections
    fn size(&self) -> Option<u32>;

    /// Connections currently idle in the pool
    fn checked_in(&self) -> Option<u32>;

    /// Open connections beyond `size`; negative while the pool is filling up
    fn overflow(&self) -> Option<i64>;
}

/// Counters read from an engine's sqlx pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnginePoolMetrics {
    pool_class: PoolClass,
    size: Option<u32>,
    checked_in: Option<u32>,
    overflow: Option<i64>,
}

impl EnginePoolMetrics {
    /// `open` is every live connection, `idle` the ones not checked out.
    pub fn queue(pool_size: u32, open: u32, idle: u32) -> Self {
        Self {
            pool_class: PoolClass::Queue,
            size: Some(pool_size),
            checked_in: Some(idle),
            overflow: Some(open as i64 - pool_size as i64),
        }
    }

    pub fn null() -> Self {
        Self {
            pool_class: PoolClass::Null,
            size: None,
            checked_in: None,
            overflow: None,
        }
    }
}

impl PoolMetrics for EnginePoolMetrics {
    fn pool_class(&self) -> PoolClass {
        self.pool_class
    }

    fn size(&self) -> Option<u32> {
        self.size
    }

    fn checked_in(&self) -> Option<u32> {
        self.checked_in
    }

    fn overflow(&self) -> Option<i64> {
        self.overflow
    }
}

/// Snapshot served by the pool health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub configured: bool,
    pub pool_class: Option<PoolClass>,
    pub size: Option<u32>,
    pub checked_in: Option<u32>,
    pub overflow: Option<i64>,
    pub total: Option<i64>,
}

impl PoolStatus {
    pub fn snapshot(metrics: &dyn PoolMetrics) -> Self {
        let size = metrics.size();
        let overflow = metrics.overflow();
        let total = match (size, overflow) {
            (Some(size), Some(overflow)) => Some(size as i64 + overflow),
            _ => None,
        };

        Self {
            configured: true,
            pool_class: Some(metrics.pool_class()),
            size,
            checked_in: metrics.checked_in(),
            overflow,
            total,
        }
    }

    /// Status reported when no engine exists.
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            pool_class: None,
            size: None,
            checked_in: None,
            overflow: None,
            total: None,
        }
    }
}

/// One utilization reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UtilizationSample {
    pub active: i64,
    pub capacity: u32,
    pub utilization: f64,
    pub over_threshold: bool,
}

/// Warns when checked-out connections pass a share of pool capacity.
#[derive(Debug, Clone)]
pub struct PoolMonitor {
    capacity: u32,
    threshold: f64,
}

impl PoolMonitor {
    pub fn new(capacity: u32, threshold: f64) -> Self {
        Self {
            capacity,
            threshold,
        }
    }

    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self::new(config.max_connections(), config.utilization_warning_threshold)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Sample the pool. `None` when the pool lacks the needed counters.
    pub fn check(&self, metrics: &dyn PoolMetrics) -> Option<UtilizationSample> {
        let size = metrics.size()?;
        let checked_in = metrics.checked_in()?;
        let overflow = metrics.overflow()?;

        let active = size as i64 - checked_in as i64 + overflow;
        let utilization = if self.capacity == 0 {
            0.0
        } else {
            active as f64 / self.capacity as f64
        };
        let over_threshold = active as f64 > self.threshold * self.capacity as f64;

        PoolGauges::record(size, checked_in, overflow, active, utilization);

        if over_threshold {
            PoolGauges::record_warning();
            tracing::warn!(
                active,
                capacity = self.capacity,
                utilization_pct = %format!("{:.1}", utilization * 100.0),
                "Database pool utilization high"
            );
        }

        Some(UtilizationSample {
            active,
            capacity: self.capacity,
            utilization,
            over_threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pool that only exposes some counters.
    struct PartialPool {
        size: Option<u32>,
        checked_in: Option<u32>,
        overflow: Option<i64>,
    }

    impl PoolMetrics for PartialPool {
        fn pool_class(&self) -> PoolClass {
            PoolClass::Queue
        }

        fn size(&self) -> Option<u32> {
            self.size
        }

        fn checked_in(&self) -> Option<u32> {
            self.checked_in
        }

        fn overflow(&self) -> Option<i64> {
            self.overflow
        }
    }

    #[test]
    fn test_snapshot_populated() {
        // 25 open, 5 idle
        let metrics = EnginePoolMetrics::queue(20, 25, 5);
        let status = PoolStatus::snapshot(&metrics);
        assert!(status.configured);
        assert_eq!(status.pool_class, Some(PoolClass::Queue));
        assert_eq!(status.size, Some(20));
        assert_eq!(status.checked_in, Some(5));
        assert_eq!(status.overflow, Some(5));
        assert_eq!(status.total, Some(25));
    }

    #[test]
    fn test_snapshot_missing_accessors() {
        let status = PoolStatus::snapshot(&EnginePoolMetrics::null());
        assert_eq!(status.pool_class, Some(PoolClass::Null));
        assert_eq!(status.size, None);
        assert_eq!(status.checked_in, None);
        assert_eq!(status.overflow, None);
        assert_eq!(status.total, None);

        let partial = PartialPool {
            size: Some(20),
            checked_in: None,
            overflow: Some(-18),
        };
        let status = PoolStatus::snapshot(&partial);
        assert_eq!(status.size, Some(20));
        assert_eq!(status.checked_in, None);
        assert_eq!(status.total, Some(2));
    }

    #[test]
    fn test_snapshot_serializes_missing_fields_as_null() {
        let json = serde_json::to_value(PoolStatus::snapshot(&EnginePoolMetrics::null())).unwrap();
        assert_eq!(json["pool_class"], "null");
        assert!(json["size"].is_null());
        assert!(json["total"].is_null());
    }

    #[test]
    fn test_check_below_threshold() {
        let monitor = PoolMonitor::new(50, 0.8);
        // 40 open, 0 idle -> 40 active, exactly 80%
        let sample = monitor.check(&EnginePoolMetrics::queue(20, 40, 0)).unwrap();
        assert_eq!(sample.active, 40);
        assert!(!sample.over_threshold);
        assert!((sample.utilization - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_check_above_threshold() {
        let monitor = PoolMonitor::new(50, 0.8);
        let sample = monitor.check(&EnginePoolMetrics::queue(20, 45, 4)).unwrap();
        assert_eq!(sample.active, 41);
        assert!(sample.over_threshold);
    }

    #[test]
    fn test_check_filling_pool() {
        let monitor = PoolMonitor::new(50, 0.8);
        // overflow negative while below pool_size
        let sample = monitor.check(&EnginePoolMetrics::queue(20, 3, 1)).unwrap();
        assert_eq!(sample.active, 2);
        assert!(!sample.over_threshold);
    }

    #[test]
    fn test_check_without_counters() {
        let monitor = PoolMonitor::new(50, 0.8);
        assert!(monitor.check(&EnginePoolMetrics::null()).is_none());
    }

    #[test]
    fn test_from_config() {
        let monitor = PoolMonitor::from_config(&DatabaseConfig::default());
        assert_eq!(monitor.capacity(), 50);
        assert!((monitor.threshold() - 0.8).abs() < f64::EPSILON);
    }
}
