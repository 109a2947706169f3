//! Query logging and pool monitoring

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::adapter::{DatabaseAdapter, PoolStatus};

#[derive(Debug, Default)]
struct LoggerInner {
    count: u64,
    slow_count: u64,
    error_count: u64,
    total_duration: Duration,
}

/// Aggregate numbers since the logger was created
#[derive(Debug, Clone, Default)]
pub struct QueryStats {
    pub count: u64,
    pub slow_count: u64,
    pub error_count: u64,
    pub avg_duration_ms: f64,
}

/// Records every statement that goes through a [`crate::database::Database`].
///
/// Emits per-statement tracing events and keeps running totals. A statement
/// slower than `slow_threshold` is logged at warn level.
pub struct QueryLogger {
    slow_threshold: Duration,
    inner: Mutex<LoggerInner>,
}

impl QueryLogger {
    pub fn new(slow_threshold: Duration) -> Self {
        Self {
            slow_threshold,
            inner: Mutex::new(LoggerInner::default()),
        }
    }

    pub fn record(&self, table: &str, signature: &str, duration: Duration, rows: u64) {
        let slow = duration >= self.slow_threshold;
        {
            let mut inner = self.inner.lock();
            inner.count += 1;
            inner.total_duration += duration;
            if slow {
                inner.slow_count += 1;
            }
        }
        if slow {
            tracing::warn!(
                table = %table,
                statement = %signature,
                duration_ms = duration.as_millis() as u64,
                rows,
                "slow query"
            );
        } else {
            tracing::debug!(
                table = %table,
                duration_ms = duration.as_millis() as u64,
                rows,
                "query"
            );
        }
    }

    pub fn record_error(&self, table: &str, signature: &str, duration: Duration, error: &str) {
        {
            let mut inner = self.inner.lock();
            inner.count += 1;
            inner.error_count += 1;
            inner.total_duration += duration;
        }
        tracing::error!(
            table = %table,
            statement = %signature,
            duration_ms = duration.as_millis() as u64,
            error = %error,
            "query failed"
        );
    }

    pub fn stats(&self) -> QueryStats {
        let inner = self.inner.lock();
        let avg_duration_ms = if inner.count == 0 {
            0.0
        } else {
            inner.total_duration.as_secs_f64() * 1000.0 / inner.count as f64
        };
        QueryStats {
            count: inner.count,
            slow_count: inner.slow_count,
            error_count: inner.error_count,
            avg_duration_ms,
        }
    }
}

impl Default for QueryLogger {
    fn default() -> Self {
        Self::new(Duration::from_millis(200))
    }
}

/// Point-in-time view of an adapter's connection pool
pub struct PoolMonitor {
    adapter: Arc<dyn DatabaseAdapter>,
}

impl PoolMonitor {
    pub fn new(adapter: Arc<dyn DatabaseAdapter>) -> Self {
        Self { adapter }
    }

    pub fn snapshot(&self) -> PoolStatus {
        self.adapter.pool_status()
    }

    /// Fraction of pool connections currently checked out.
    pub fn utilization(&self) -> f64 {
        let status = self.snapshot();
        if status.total == 0 {
            0.0
        } else {
            status.active as f64 / status.total as f64
        }
    }

    /// Logs the snapshot; warns when callers are queued for a connection.
    pub fn report(&self) -> PoolStatus {
        let status = self.snapshot();
        if status.waiting > 0 {
            tracing::warn!(
                total = status.total,
                active = status.active,
                waiting = status.waiting,
                "connection pool saturated"
            );
        } else {
            tracing::debug!(
                total = status.total,
                active = status.active,
                idle = status.idle,
                "connection pool"
            );
        }
        status
    }
}
