//! A single fixed-size arena: owns one contiguous OS-backed byte region and
//! performs local buddy allocate/split/coalesce under its own mutex.
//!
//! The free-list back-link is an intrusive doubly linked list: each free
//! block's first 8 bytes hold a `FreeNode { prev, next }` pair of `u32`
//! offsets, written directly into the (currently unused) free bytes. This is
//! what makes buddy removal during coalesce O(1) without scanning, using a
//! doubly-linked list so removal doesn't need to walk from the head.

use std::fmt::Write as _;
use std::ptr;
use std::sync::Mutex;

use crate::bitmap::ClassBitmap;
use crate::config::ValidatedConfig;
use crate::error::AllocError;
use crate::platform::sys;

const NIL: u32 = u32::MAX;

#[repr(C)]
#[derive(Clone, Copy)]
struct FreeNode {
    prev: u32,
    next: u32,
}

struct ArenaInner {
    /// Head offset of each size class's free list, `NIL` if empty.
    free_head: Vec<u32>,
    /// Per-class free-bit bitmap; `bitmaps[i]` covers class `min_log2 + i`.
    bitmaps: Vec<ClassBitmap>,
}

/// A fixed-size contiguous memory region with its own free-list/bitmap
/// bookkeeping.
pub struct Arena {
    base: *mut u8,
    size: usize,
    min_log2: u32,
    max_log2: u32,
    inner: Mutex<ArenaInner>,
}

// SAFETY: `base`/`size`/`min_log2`/`max_log2` never change after
// construction; all mutable bookkeeping lives behind `inner`'s mutex. The
// byte region itself is partitioned between allocated handles (owned
// exclusively by their callers) and free blocks (only touched while holding
// `inner`'s lock), so concurrent access from multiple threads is sound.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Materialize a new arena: acquire its backing OS memory and populate
    /// its free lists with one max-class block per `MaxAllocBytes` chunk.
    pub(crate) fn new(cfg: &ValidatedConfig) -> Result<Self, AllocError> {
        let size = cfg.config.arena_size_bytes;
        let base = sys::alloc(size)
            .map_err(|e| AllocError::OutOfMemory(format!("failed to materialize arena: {e}")))?;

        let classes = cfg.classes();
        let free_head = vec![NIL; classes];
        let bitmaps = (0..classes)
            .map(|i| ClassBitmap::new(size >> (cfg.min_log2 + i as u32)))
            .collect();

        let arena = Arena {
            base,
            size,
            min_log2: cfg.min_log2,
            max_log2: cfg.max_log2,
            inner: Mutex::new(ArenaInner { free_head, bitmaps }),
        };

        let max_chunk = 1usize << cfg.max_log2;
        let chunks = size / max_chunk;
        let top_class = classes - 1;
        {
            let mut inner = arena.inner.lock().unwrap();
            for i in 0..chunks {
                let offset = (i * max_chunk) as u32;
                arena.push_free(&mut inner, top_class, offset);
            }
        }

        tracing::debug!(size, chunks, "materialized arena");
        Ok(arena)
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Raw pointer to the byte at `offset` within this arena's region.
    ///
    /// # Safety
    /// `offset` must be within `[0, size())` and the caller must not alias
    /// an overlapping live allocation.
    #[inline]
    pub unsafe fn byte_ptr(&self, offset: u32) -> *mut u8 {
        self.base.add(offset as usize)
    }

    #[inline]
    unsafe fn node_ptr(&self, offset: u32) -> *mut FreeNode {
        self.base.add(offset as usize) as *mut FreeNode
    }

    fn push_free(&self, inner: &mut ArenaInner, class_idx: usize, offset: u32) {
        let head = inner.free_head[class_idx];
        unsafe {
            ptr::write(self.node_ptr(offset), FreeNode { prev: NIL, next: head });
            if head != NIL {
                (*self.node_ptr(head)).prev = offset;
            }
        }
        inner.free_head[class_idx] = offset;
        let k = self.min_log2 + class_idx as u32;
        inner.bitmaps[class_idx].set((offset >> k) as usize);
    }

    fn pop_free(&self, inner: &mut ArenaInner, class_idx: usize) -> Option<u32> {
        let head = inner.free_head[class_idx];
        if head == NIL {
            return None;
        }
        let node = unsafe { ptr::read(self.node_ptr(head)) };
        inner.free_head[class_idx] = node.next;
        if node.next != NIL {
            unsafe { (*self.node_ptr(node.next)).prev = NIL };
        }
        let k = self.min_log2 + class_idx as u32;
        inner.bitmaps[class_idx].clear((head >> k) as usize);
        Some(head)
    }

    /// Remove a known-free block from its class's free list in O(1), using
    /// the intrusive prev/next pair stored in its first 8 bytes.
    fn remove_free(&self, inner: &mut ArenaInner, class_idx: usize, offset: u32) {
        let node = unsafe { ptr::read(self.node_ptr(offset)) };
        if node.prev != NIL {
            unsafe { (*self.node_ptr(node.prev)).next = node.next };
        } else {
            inner.free_head[class_idx] = node.next;
        }
        if node.next != NIL {
            unsafe { (*self.node_ptr(node.next)).prev = node.prev };
        }
        let k = self.min_log2 + class_idx as u32;
        inner.bitmaps[class_idx].clear((offset >> k) as usize);
    }

    #[inline]
    fn is_free(&self, inner: &ArenaInner, class_idx: usize, offset: u32) -> bool {
        let k = self.min_log2 + class_idx as u32;
        inner.bitmaps[class_idx].is_set((offset >> k) as usize)
    }

    /// Pop a free block of `class_idx`, splitting a larger block if needed.
    fn take_or_split(&self, inner: &mut ArenaInner, class_idx: usize) -> Option<u32> {
        let classes = inner.free_head.len();
        let mut j = class_idx;
        while j < classes && inner.free_head[j] == NIL {
            j += 1;
        }
        if j >= classes {
            return None;
        }
        let mut block = self.pop_free(inner, j).expect("checked non-empty above");
        while j > class_idx {
            let split_k = self.min_log2 + j as u32 - 1;
            let buddy = block + (1u32 << split_k);
            self.push_free(inner, j - 1, buddy);
            j -= 1;
        }
        Some(block)
    }

    /// Serve up to `max_count` blocks of `class_idx` from this arena.
    /// Returns the offsets actually served; a short return means the arena
    /// is exhausted for this class, never an error.
    pub(crate) fn allocate_local(&self, class_idx: usize, max_count: usize) -> Vec<u32> {
        let mut inner = self.inner.lock().unwrap();
        let mut out = Vec::with_capacity(max_count);
        for _ in 0..max_count {
            match self.take_or_split(&mut inner, class_idx) {
                Some(offset) => out.push(offset),
                None => break,
            }
        }
        out
    }

    /// Return a block to this arena, coalescing with its buddy chain as far
    /// as it will go.
    pub(crate) fn deallocate_local(&self, class_idx: usize, mut offset: u32) {
        let mut inner = self.inner.lock().unwrap();
        let classes = inner.free_head.len();
        let mut idx = class_idx;
        loop {
            if idx + 1 >= classes {
                self.push_free(&mut inner, idx, offset);
                tracing::trace!(offset, class = idx, "freed at top class, no coalesce");
                break;
            }
            let k = self.min_log2 + idx as u32;
            let buddy = offset ^ (1u32 << k);
            if self.is_free(&inner, idx, buddy) {
                self.remove_free(&mut inner, idx, buddy);
                offset = offset.min(buddy);
                idx += 1;
                tracing::trace!(offset, new_class = idx, "coalesced buddy pair");
            } else {
                self.push_free(&mut inner, idx, offset);
                break;
            }
        }
    }

    /// Total set free-bits across all classes; used by tests to assert full
    /// reclamation.
    pub fn free_bit_total(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.bitmaps.iter().map(|b| b.count_ones()).sum()
    }

    /// `true` if this arena holds exactly one free max-class block per
    /// `MaxAllocBytes` chunk and nothing else is free anywhere (its initial
    /// state).
    pub fn is_initial_state(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        let top = inner.bitmaps.len() - 1;
        let expected = self.size >> self.max_log2;
        for (i, bitmap) in inner.bitmaps.iter().enumerate() {
            let ones = bitmap.count_ones();
            if i == top {
                if ones != expected {
                    return false;
                }
            } else if ones != 0 {
                return false;
            }
        }
        true
    }

    /// Human-readable per-class free-list census.
    pub fn debug_dump(&self) -> String {
        let inner = self.inner.lock().unwrap();
        let mut out = String::new();
        for (i, bitmap) in inner.bitmaps.iter().enumerate() {
            let k = self.min_log2 + i as u32;
            let _ = writeln!(out, "    class {k} ({} bytes): {} free", 1u32 << k, bitmap.count_ones());
        }
        out
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        unsafe { sys::dealloc(self.base, self.size) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn validated(min: usize, max: usize, arena: usize, total: usize) -> ValidatedConfig {
        Config {
            min_alloc_bytes: min,
            max_alloc_bytes: max,
            arena_size_bytes: arena,
            max_total_bytes: total,
        }
        .validate()
        .unwrap()
    }

    #[test]
    fn initial_state_is_one_max_block_per_chunk() {
        let cfg = validated(8, 256, 512, 512);
        let arena = Arena::new(&cfg).unwrap();
        assert!(arena.is_initial_state());
        assert_eq!(arena.free_bit_total(), 2);
    }

    #[test]
    fn allocate_splits_down_to_requested_class() {
        let cfg = validated(8, 256, 256, 256);
        let arena = Arena::new(&cfg).unwrap();
        let class_idx = cfg.class_index(3); // 8 bytes
        let offsets = arena.allocate_local(class_idx, 1);
        assert_eq!(offsets.len(), 1);
        assert_eq!(offsets[0] % 8, 0);
        assert!(!arena.is_initial_state());
    }

    #[test]
    fn full_allocate_then_deallocate_reclaims() {
        let cfg = validated(8, 256, 256, 256);
        let arena = Arena::new(&cfg).unwrap();
        let class_idx = cfg.class_index(3);
        let offsets = arena.allocate_local(class_idx, 32);
        assert_eq!(offsets.len(), 32);

        for off in offsets {
            arena.deallocate_local(class_idx, off);
        }
        assert!(arena.is_initial_state());
    }

    #[test]
    fn exhausted_class_returns_short() {
        let cfg = validated(8, 256, 256, 256);
        let arena = Arena::new(&cfg).unwrap();
        let class_idx = cfg.class_index(8); // 256 bytes, whole arena
        let offsets = arena.allocate_local(class_idx, 5);
        assert_eq!(offsets.len(), 1);
        let more = arena.allocate_local(class_idx, 1);
        assert!(more.is_empty());
    }

    #[test]
    fn buddies_coalesce_regardless_of_free_order() {
        let cfg = validated(8, 256, 256, 256);
        let arena = Arena::new(&cfg).unwrap();
        let class_idx = cfg.class_index(3);
        let offsets = arena.allocate_local(class_idx, 2);
        assert_eq!(offsets.len(), 2);
        // free in reverse order too
        arena.deallocate_local(class_idx, offsets[1]);
        arena.deallocate_local(class_idx, offsets[0]);
        assert!(arena.is_initial_state());
    }
}
