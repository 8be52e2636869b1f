// Engine metrics
//
// Tracks operation latencies, brand-rule cache hit rates and settlement outcomes
// so slow paths and unusual rejection rates show up in the logs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Performance threshold for slow operations (100ms)
const SLOW_OPERATION_THRESHOLD_MS: u64 = 100;

/// Timed engine operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Settlement,
    Credit,
    Debit,
    Redemption,
    Attendance,
}

impl Operation {
    const ALL: [Operation; 5] = [
        Operation::Settlement,
        Operation::Credit,
        Operation::Debit,
        Operation::Redemption,
        Operation::Attendance,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Settlement => "settlement",
            Operation::Credit => "credit",
            Operation::Debit => "debit",
            Operation::Redemption => "redemption",
            Operation::Attendance => "attendance",
        }
    }
}

#[derive(Debug, Default)]
struct OperationCounters {
    count: AtomicU64,
    total_time_us: AtomicU64,
    slow: AtomicU64,
}

#[derive(Debug, Default)]
struct MetricsInner {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,

    receipts_approved: AtomicU64,
    receipts_flagged: AtomicU64,
    receipts_rejected: AtomicU64,
    redemptions_failed: AtomicU64,

    operations: [OperationCounters; 5],
}

/// Shared, cheaply clonable metrics handle
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    inner: Arc<MetricsInner>,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Get cache hit rate (0.0 to 1.0)
    pub fn cache_hit_rate(&self) -> f64 {
        let hits = self.inner.cache_hits.load(Ordering::Relaxed);
        let misses = self.inner.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;

        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn record_receipt_approved(&self) {
        self.inner.receipts_approved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_receipt_flagged(&self) {
        self.inner.receipts_flagged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_receipt_rejected(&self) {
        self.inner.receipts_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_redemption_failed(&self) {
        self.inner.redemptions_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Start timing an operation; the duration is recorded when the timer drops
    pub fn start(&self, operation: Operation) -> OperationTimer {
        OperationTimer {
            start: Instant::now(),
            operation,
            metrics: self.clone(),
        }
    }

    fn record(&self, operation: Operation, duration: Duration) {
        let counters = &self.inner.operations[operation.index()];
        counters.count.fetch_add(1, Ordering::Relaxed);
        counters
            .total_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);

        if duration.as_millis() as u64 > SLOW_OPERATION_THRESHOLD_MS {
            counters.slow.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                operation = operation.as_str(),
                "Slow {} operation: {}ms",
                operation.as_str(),
                duration.as_millis()
            );
        }
    }

    /// Number of completed operations of the given kind
    pub fn count(&self, operation: Operation) -> u64 {
        self.inner.operations[operation.index()]
            .count
            .load(Ordering::Relaxed)
    }

    /// Average duration in milliseconds of the given operation
    pub fn avg_time_ms(&self, operation: Operation) -> f64 {
        let counters = &self.inner.operations[operation.index()];
        let count = counters.count.load(Ordering::Relaxed);
        let total_us = counters.total_time_us.load(Ordering::Relaxed);

        if count == 0 {
            0.0
        } else {
            (total_us as f64 / count as f64) / 1000.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            cache_hit_rate: self.cache_hit_rate(),
            cache_hits: self.inner.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.inner.cache_misses.load(Ordering::Relaxed),
            receipts_approved: self.inner.receipts_approved.load(Ordering::Relaxed),
            receipts_flagged: self.inner.receipts_flagged.load(Ordering::Relaxed),
            receipts_rejected: self.inner.receipts_rejected.load(Ordering::Relaxed),
            redemptions_failed: self.inner.redemptions_failed.load(Ordering::Relaxed),
            operations: Operation::ALL
                .iter()
                .map(|op| OperationSummary {
                    operation: *op,
                    count: self.count(*op),
                    avg_time_ms: self.avg_time_ms(*op),
                    slow: self.inner.operations[op.index()].slow.load(Ordering::Relaxed),
                })
                .collect(),
        }
    }

    pub fn log_summary(&self) {
        let summary = self.summary();
        tracing::info!(
            "Loyalty engine metrics: brand rule cache {:.1}% hit rate ({} hits, {} misses); \
             receipts {} approved, {} flagged, {} rejected; {} failed redemptions",
            summary.cache_hit_rate * 100.0,
            summary.cache_hits,
            summary.cache_misses,
            summary.receipts_approved,
            summary.receipts_flagged,
            summary.receipts_rejected,
            summary.redemptions_failed,
        );
        for op in &summary.operations {
            tracing::info!(
                "{}: {} operations, avg {:.2}ms, {} slow",
                op.operation.as_str(),
                op.count,
                op.avg_time_ms,
                op.slow
            );
        }
    }
}

/// Timer for tracking operation duration
pub struct OperationTimer {
    start: Instant,
    operation: Operation,
    metrics: EngineMetrics,
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        self.metrics.record(self.operation, self.start.elapsed());
    }
}

#[derive(Debug, Clone)]
pub struct OperationSummary {
    pub operation: Operation,
    pub count: u64,
    pub avg_time_ms: f64,
    pub slow: u64,
}

/// Summary of engine metrics
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub cache_hit_rate: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub receipts_approved: u64,
    pub receipts_flagged: u64,
    pub receipts_rejected: u64,
    pub redemptions_failed: u64,
    pub operations: Vec<OperationSummary>,
}
