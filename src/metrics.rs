use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Lock-free runtime counters for an [`Engine`](crate::Engine).
#[derive(Debug, Default)]
pub struct MetricsCollector {
    build_count: AtomicU64,
    autotune_count: AtomicU64,
    free_count: AtomicU64,
    query_count: AtomicU64,
    total_checks: AtomicU64,
    total_query_time_ns: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_build(&self, autotuned: bool) {
        self.build_count.fetch_add(1, Ordering::Relaxed);
        if autotuned {
            self.autotune_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_free(&self) {
        self.free_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a batch of `queries` that examined `checks` points in total.
    pub fn record_queries(&self, queries: u64, checks: u64, duration_ns: u64) {
        self.query_count.fetch_add(queries, Ordering::Relaxed);
        self.total_checks.fetch_add(checks, Ordering::Relaxed);
        self.total_query_time_ns
            .fetch_add(duration_ns, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let query_count = self.query_count.load(Ordering::Relaxed);
        let total_query_time_ns = self.total_query_time_ns.load(Ordering::Relaxed);
        let total_checks = self.total_checks.load(Ordering::Relaxed);

        MetricsSnapshot {
            build_count: self.build_count.load(Ordering::Relaxed),
            autotune_count: self.autotune_count.load(Ordering::Relaxed),
            free_count: self.free_count.load(Ordering::Relaxed),
            query_count,
            avg_query_time_us: if query_count > 0 {
                total_query_time_ns as f64 / query_count as f64 / 1000.0
            } else {
                0.0
            },
            avg_checks_per_query: if query_count > 0 {
                total_checks as f64 / query_count as f64
            } else {
                0.0
            },
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.build_count.store(0, Ordering::Relaxed);
        self.autotune_count.store(0, Ordering::Relaxed);
        self.free_count.store(0, Ordering::Relaxed);
        self.query_count.store(0, Ordering::Relaxed);
        self.total_checks.store(0, Ordering::Relaxed);
        self.total_query_time_ns.store(0, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of engine metrics.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub build_count: u64,
    /// Builds whose parameters came from the autotuner.
    pub autotune_count: u64,
    pub free_count: u64,
    /// Individual query points searched.
    pub query_count: u64,
    /// Wall time per query point; batches are timed as a whole and averaged.
    pub avg_query_time_us: f64,
    pub avg_checks_per_query: f64,
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Builds: {} ({} autotuned), Frees: {}, Queries: {}, \
             Avg query: {:.2}us, Avg checks: {:.1}",
            self.build_count,
            self.autotune_count,
            self.free_count,
            self.query_count,
            self.avg_query_time_us,
            self.avg_checks_per_query,
        )
    }
}

/// Measures the wall time of one engine operation.
pub(crate) struct QueryTimer {
    start: Instant,
}

impl QueryTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ns(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}
