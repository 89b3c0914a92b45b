//! `MetricsSink`: scalar counters incremented without backpressure. Metrics
//! emission must never hold an arena lock, and its failures are swallowed
//! rather than surfaced to the caller.

use std::sync::atomic::{AtomicU64, Ordering};

/// External collaborator recording allocation-rate and arena-growth
/// counters. Implementations must not block or fail observably.
pub trait MetricsSink: Send + Sync {
    fn record_allocation(&self, class_log2: u32);
    fn record_deallocation(&self, class_log2: u32);
    fn record_arena_materialized(&self, arena_index: usize);
}

/// A `MetricsSink` that discards everything. The default for callers who
/// don't need observability.
#[derive(Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record_allocation(&self, _class_log2: u32) {}
    fn record_deallocation(&self, _class_log2: u32) {}
    fn record_arena_materialized(&self, _arena_index: usize) {}
}

/// A `MetricsSink` that keeps in-process atomic counters per size class,
/// plus a running arena-materialization count. Grounded on the
/// atomic-counter `ArenaStats`/`ContextStats` pattern used throughout the
/// retrieval pack's arena allocators.
pub struct CountingMetricsSink {
    allocations: Vec<AtomicU64>,
    deallocations: Vec<AtomicU64>,
    arenas_materialized: AtomicU64,
    min_log2: u32,
}

impl CountingMetricsSink {
    /// `classes` must match the allocator's `ValidatedConfig::classes()`.
    pub fn new(min_log2: u32, classes: usize) -> Self {
        Self {
            allocations: (0..classes).map(|_| AtomicU64::new(0)).collect(),
            deallocations: (0..classes).map(|_| AtomicU64::new(0)).collect(),
            arenas_materialized: AtomicU64::new(0),
            min_log2,
        }
    }

    pub fn allocations_for_class(&self, class_log2: u32) -> u64 {
        self.allocations[(class_log2 - self.min_log2) as usize].load(Ordering::Relaxed)
    }

    pub fn deallocations_for_class(&self, class_log2: u32) -> u64 {
        self.deallocations[(class_log2 - self.min_log2) as usize].load(Ordering::Relaxed)
    }

    pub fn arenas_materialized(&self) -> u64 {
        self.arenas_materialized.load(Ordering::Relaxed)
    }
}

impl MetricsSink for CountingMetricsSink {
    fn record_allocation(&self, class_log2: u32) {
        self.allocations[(class_log2 - self.min_log2) as usize].fetch_add(1, Ordering::Relaxed);
    }

    fn record_deallocation(&self, class_log2: u32) {
        self.deallocations[(class_log2 - self.min_log2) as usize].fetch_add(1, Ordering::Relaxed);
    }

    fn record_arena_materialized(&self, arena_index: usize) {
        self.arenas_materialized.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(arena_index, "arena materialized");
    }
}
