//! `MemoryManager`: the external eviction-driven budget collaborator. The
//! allocator treats eviction policy, victim selection, and the actual global
//! budget ledger as owned elsewhere; this module only defines the contract
//! and a standalone default implementation so the crate is usable and
//! testable without a real cache wired in.

use std::sync::atomic::{AtomicUsize, Ordering};

/// External collaborator that reserves/releases bytes against a global
/// budget, and may trigger eviction elsewhere in the host cache.
pub trait MemoryManager: Send + Sync {
    /// Reserve `n` bytes against the budget. If `wait` is `true`, the
    /// manager may block while evicting to make room; if `false`, it must
    /// return immediately. Returns `false` if the budget refuses.
    fn reserve_memory(&self, n: usize, wait: bool) -> bool;

    /// Release `n` bytes previously reserved, for accounting.
    fn release_memory(&self, n: usize);

    /// Adjust the budget ceiling.
    fn update_max_size(&self, n: usize);

    /// A diagnostic dump included in `OutOfMemory` error messages.
    fn debug_dump_for_oom(&self) -> String;
}

/// A standalone `MemoryManager` that tracks a simple atomic reservation
/// counter against a ceiling. It never evicts and never blocks: `wait` is
/// accepted for interface compatibility but has no effect, since there is no
/// evictor wired in by default.
pub struct BudgetMemoryManager {
    reserved: AtomicUsize,
    max_bytes: AtomicUsize,
}

impl BudgetMemoryManager {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            reserved: AtomicUsize::new(0),
            max_bytes: AtomicUsize::new(max_bytes),
        }
    }

    pub fn reserved_bytes(&self) -> usize {
        self.reserved.load(Ordering::Relaxed)
    }
}

impl MemoryManager for BudgetMemoryManager {
    fn reserve_memory(&self, n: usize, _wait: bool) -> bool {
        let max = self.max_bytes.load(Ordering::Relaxed);
        loop {
            let current = self.reserved.load(Ordering::Relaxed);
            let next = match current.checked_add(n) {
                Some(next) if next <= max => next,
                _ => return false,
            };
            if self
                .reserved
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn release_memory(&self, n: usize) {
        // `n` bytes released may exceed what was ever reserved for them,
        // since blocks served straight from existing free lists are never
        // reserved for in the first place. Saturate rather than wrap the
        // counter.
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |current| Some(current.saturating_sub(n)))
            .unwrap();
    }

    fn update_max_size(&self, n: usize) {
        self.max_bytes.store(n, Ordering::Relaxed);
    }

    fn debug_dump_for_oom(&self) -> String {
        format!(
            "BudgetMemoryManager: reserved={} max={}",
            self.reserved.load(Ordering::Relaxed),
            self.max_bytes.load(Ordering::Relaxed)
        )
    }
}
