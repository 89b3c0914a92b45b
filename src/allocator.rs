//! `Allocator`: coordinates a bounded set of arenas, routes requests, grows
//! arena count lazily, and interacts with the external memory manager.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::arena::Arena;
use crate::buffer_factory::{BufferFactory, DefaultBufferFactory};
use crate::config::{Config, ValidatedConfig};
use crate::error::AllocError;
use crate::handle::BufferHandle;
use crate::memory_manager::{BudgetMemoryManager, MemoryManager};
use crate::metrics::{MetricsSink, NoopMetricsSink};

/// A bounded pool of arenas serving power-of-two allocations up to
/// `Config::max_alloc_bytes`, bounded in aggregate by `Config::max_total_bytes`.
pub struct Allocator {
    cfg: ValidatedConfig,
    arenas: Box<[OnceLock<Arena>]>,
    materialized: AtomicUsize,
    grow_lock: Mutex<()>,
    memory_manager: Arc<dyn MemoryManager>,
    metrics: Arc<dyn MetricsSink>,
    buffer_factory: Arc<dyn BufferFactory>,
}

thread_local! {
    static ARENA_HINT: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

/// Safety valve against a misbehaving `MemoryManager`/growth race looping
/// forever; real workloads converge in one or two iterations.
const MAX_GROWTH_ATTEMPTS: usize = 64;

impl Allocator {
    pub fn new(
        config: Config,
        memory_manager: Arc<dyn MemoryManager>,
        metrics: Arc<dyn MetricsSink>,
        buffer_factory: Arc<dyn BufferFactory>,
    ) -> Result<Self, AllocError> {
        let cfg = config.validate()?;
        let arenas = (0..cfg.max_arenas)
            .map(|_| OnceLock::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            cfg,
            arenas,
            materialized: AtomicUsize::new(0),
            grow_lock: Mutex::new(()),
            memory_manager,
            metrics,
            buffer_factory,
        })
    }

    /// Build an allocator with the standalone default collaborators: a
    /// [`BudgetMemoryManager`] ceilinged at `config.max_total_bytes`, a
    /// [`NoopMetricsSink`], and a [`DefaultBufferFactory`].
    pub fn with_defaults(config: Config) -> Result<Self, AllocError> {
        let max_total = config.max_total_bytes;
        Self::new(
            config,
            Arc::new(BudgetMemoryManager::new(max_total)),
            Arc::new(NoopMetricsSink),
            Arc::new(DefaultBufferFactory),
        )
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.cfg.config
    }

    /// Convenience wrapper: allocate `count` fresh handles of `size_bytes`
    /// via this allocator's `BufferFactory`.
    pub fn allocate_new(&self, count: usize, size_bytes: usize) -> Result<Vec<BufferHandle>, AllocError> {
        let mut handles: Vec<BufferHandle> = (0..count).map(|_| self.buffer_factory.blank()).collect();
        self.allocate_multiple(&mut handles, size_bytes)?;
        Ok(handles)
    }

    fn class_index_for(&self, size_bytes: usize) -> Result<usize, AllocError> {
        if size_bytes == 0 {
            return Err(AllocError::InvalidSize("requested size must be > 0".into()));
        }
        let mut log2 = self.cfg.min_log2;
        while (1usize << log2) < size_bytes {
            log2 += 1;
            if log2 > self.cfg.max_log2 {
                return Err(AllocError::InvalidSize(format!(
                    "{size_bytes} bytes exceeds MaxAllocBytes ({} bytes)",
                    1usize << self.cfg.max_log2
                )));
            }
        }
        Ok(self.cfg.class_index(log2))
    }

    /// Fills every handle with a live allocation of the rounded size, or
    /// rolls back and fails atomically.
    pub fn allocate_multiple(&self, handles: &mut [BufferHandle], size_bytes: usize) -> Result<(), AllocError> {
        if handles.is_empty() {
            return Ok(());
        }
        let class_idx = self.class_index_for(size_bytes)?;
        let k = self.cfg.min_log2 + class_idx as u32;
        let class_bytes = 1usize << k;
        let need = handles.len();

        let mut served = self.fill_from_arenas(handles, 0, class_idx);

        let mut attempts = 0usize;
        while served < need {
            attempts += 1;
            if attempts > MAX_GROWTH_ATTEMPTS {
                self.rollback(handles);
                return Err(AllocError::InternalConsistency(
                    "allocate_multiple did not converge after repeated growth attempts".into(),
                ));
            }

            let remain_blocks = need - served;
            let remain_bytes = remain_blocks * class_bytes;

            // Phase B: reservation.
            if !self.memory_manager.reserve_memory(remain_bytes, true) {
                self.rollback(handles);
                return Err(AllocError::OutOfMemory(format!(
                    "budget refused {remain_bytes} bytes ({remain_blocks} x {class_bytes}); {}",
                    self.memory_manager.debug_dump_for_oom()
                )));
            }

            // Phase C: growth.
            if let Err(e) = self.grow_to_cover(remain_bytes) {
                self.memory_manager.release_memory(remain_bytes);
                self.rollback(handles);
                return Err(e);
            }

            // Phase D: retry.
            let newly_served = self.fill_from_arenas(handles, served, class_idx);
            let bytes_used = newly_served * class_bytes;
            if bytes_used < remain_bytes {
                self.memory_manager.release_memory(remain_bytes - bytes_used);
            }
            served += newly_served;
        }

        Ok(())
    }

    /// Phase A/D: walk the materialized arena prefix starting at a rotating
    /// per-thread hint, serving as many blocks as each arena has.
    fn fill_from_arenas(&self, handles: &mut [BufferHandle], start: usize, class_idx: usize) -> usize {
        let materialized = self.materialized.load(Ordering::Acquire);
        if materialized == 0 {
            return 0;
        }
        let need = handles.len() - start;
        let hint = ARENA_HINT.with(|h| {
            let v = h.get();
            h.set(v.wrapping_add(1));
            v
        });

        let k = self.cfg.min_log2 + class_idx as u32;
        let len = 1u32 << k;
        let mut served = 0usize;

        for step in 0..materialized {
            if served == need {
                break;
            }
            let arena_idx = (hint + step) % materialized;
            let Some(arena) = self.arenas[arena_idx].get() else {
                continue;
            };
            let remaining = need - served;
            let offsets = arena.allocate_local(class_idx, remaining);
            let n = offsets.len();
            for (i, offset) in offsets.into_iter().enumerate() {
                let ptr = unsafe { arena.byte_ptr(offset) };
                handles[start + served + i].populate(ptr, arena_idx as u32, class_idx as u32, offset, len);
            }
            for _ in 0..n {
                self.metrics.record_allocation(k);
            }
            served += n;
        }

        served
    }

    /// Phase C: advance the materialized arena count by however many more
    /// arenas are needed to cover `remain_bytes`, up to `MaxArenas`.
    fn grow_to_cover(&self, remain_bytes: usize) -> Result<(), AllocError> {
        let arena_bytes = self.cfg.config.arena_size_bytes;
        let needed_arenas = remain_bytes.div_ceil(arena_bytes);

        let _guard = self.grow_lock.lock().unwrap();
        let current = self.materialized.load(Ordering::Acquire);

        if current >= self.cfg.max_arenas {
            return Err(AllocError::OutOfMemory(format!(
                "arena pool exhausted: {current}/{} arenas materialized; {}",
                self.cfg.max_arenas,
                self.memory_manager.debug_dump_for_oom()
            )));
        }

        let target = (current + needed_arenas).min(self.cfg.max_arenas);
        for idx in current..target {
            let arena = Arena::new(&self.cfg)?;
            self.arenas[idx]
                .set(arena)
                .unwrap_or_else(|_| panic!("arena slot {idx} materialized twice under grow_lock"));
            self.metrics.record_arena_materialized(idx);
        }
        // Publication: every slot in [current, target) is fully initialized
        // above before this store makes it visible to readers.
        self.materialized.store(target, Ordering::Release);

        if target < current + needed_arenas {
            return Err(AllocError::OutOfMemory(format!(
                "MaxArenas insufficient: needed {needed_arenas} more arenas, only grew to {target}/{}; {}",
                self.cfg.max_arenas,
                self.memory_manager.debug_dump_for_oom()
            )));
        }
        Ok(())
    }

    fn rollback(&self, handles: &mut [BufferHandle]) {
        for handle in handles.iter_mut() {
            self.deallocate(handle);
        }
    }

    /// Returns the buffer to its owning arena and releases the matching
    /// reservation. A no-op on an already-blank handle; double-freeing a
    /// live handle is undefined behavior.
    pub fn deallocate(&self, handle: &mut BufferHandle) {
        let Some((arena_index, class_idx, offset)) = handle.take_for_rollback() else {
            return;
        };
        let arena = self.arenas[arena_index as usize]
            .get()
            .expect("handle references a materialized arena");
        arena.deallocate_local(class_idx as usize, offset);

        let k = self.cfg.min_log2 + class_idx;
        self.metrics.record_deallocation(k);
        self.memory_manager.release_memory(1usize << k);
    }

    /// A human-readable per-arena free-list census.
    pub fn debug_dump(&self) -> String {
        let materialized = self.materialized.load(Ordering::Acquire);
        let mut out = format!(
            "Allocator: {materialized}/{} arenas materialized\n",
            self.cfg.max_arenas
        );
        for i in 0..materialized {
            if let Some(arena) = self.arenas[i].get() {
                out.push_str(&format!("  arena {i}:\n"));
                out.push_str(&arena.debug_dump());
            }
        }
        out
    }

    /// Number of arenas materialized so far.
    pub fn materialized_arena_count(&self) -> usize {
        self.materialized.load(Ordering::Acquire)
    }

    /// `true` if every materialized arena is back to its initial state: one
    /// free max-class block per `MaxAllocBytes` chunk and nothing else free.
    pub fn is_fully_reclaimed(&self) -> bool {
        let materialized = self.materialized.load(Ordering::Acquire);
        (0..materialized).all(|i| {
            self.arenas[i]
                .get()
                .map(|arena| arena.is_initial_state())
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(min: usize, max: usize, arena: usize, total: usize) -> Config {
        Config {
            min_alloc_bytes: min,
            max_alloc_bytes: max,
            arena_size_bytes: arena,
            max_total_bytes: total,
        }
    }

    #[test]
    fn rejects_zero_size() {
        let alloc = Allocator::with_defaults(cfg(8, 256, 256, 256)).unwrap();
        let mut handles = vec![BufferHandle::blank()];
        let err = alloc.allocate_multiple(&mut handles, 0).unwrap_err();
        assert!(matches!(err, AllocError::InvalidSize(_)));
    }

    #[test]
    fn rejects_oversized_request() {
        let alloc = Allocator::with_defaults(cfg(8, 256, 256, 256)).unwrap();
        let mut handles = vec![BufferHandle::blank()];
        let err = alloc.allocate_multiple(&mut handles, 512).unwrap_err();
        assert!(matches!(err, AllocError::InvalidSize(_)));
    }

    #[test]
    fn single_arena_round_trip() {
        let alloc = Allocator::with_defaults(cfg(8, 256, 256, 256)).unwrap();
        let mut handles = alloc.allocate_new(4, 64).unwrap();
        assert_eq!(handles.len(), 4);
        for h in &mut handles {
            assert_eq!(h.len(), 64);
            h.as_mut_slice().fill(0xAB);
            assert!(h.as_slice().iter().all(|&b| b == 0xAB));
        }
        for h in &mut handles {
            alloc.deallocate(h);
        }
        assert_eq!(alloc.materialized_arena_count(), 1);
    }

    #[test]
    fn grows_across_multiple_arenas() {
        // 5 arenas of 256 bytes = 1280 total budget; 10 x 128-byte buffers
        // need 2 arenas worth of blocks.
        let alloc = Allocator::with_defaults(cfg(8, 256, 256, 1280)).unwrap();
        let handles = alloc.allocate_new(10, 128).unwrap();
        assert_eq!(handles.len(), 10);
        assert!(alloc.materialized_arena_count() <= 5);
        assert!(alloc.materialized_arena_count() >= 2);
    }

    #[test]
    fn failed_allocation_rolls_back_atomically() {
        let alloc = Allocator::with_defaults(cfg(8, 256, 256, 256)).unwrap();
        // Only one arena (256 bytes) = 2 blocks of 128 bytes max; ask for 3.
        let mut handles: Vec<BufferHandle> = (0..3).map(|_| BufferHandle::blank()).collect();
        let err = alloc.allocate_multiple(&mut handles, 128).unwrap_err();
        assert!(matches!(err, AllocError::OutOfMemory(_)));
        for h in &handles {
            assert!(h.is_blank(), "partial allocation must be rolled back");
        }
    }
}
