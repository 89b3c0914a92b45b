//! buddy-cache: a concurrent power-of-two buddy allocator over bitmap-indexed
//! arenas, built as the memory backend for an in-process data cache.
//!
//! # Features
//!
//! - **Arena-based allocation**: fixed-size OS-backed regions, materialized
//!   lazily as demand grows.
//! - **Buddy splitting/coalescing**: O(log n) split on allocate, O(1) buddy
//!   lookup and coalesce on free via an intrusive doubly-linked free list.
//! - **Low-lock concurrency**: one mutex per arena, no global lock on the
//!   allocate/deallocate hot path.
//! - **Pluggable collaborators**: the budget ledger, metrics sink, and
//!   handle factory are all plain traits a host cache can replace.
//!
//! # Usage
//!
//! ```rust
//! use buddy_cache::{Allocator, Config};
//!
//! let config = Config {
//!     min_alloc_bytes: 64,
//!     max_alloc_bytes: 1 << 20,
//!     arena_size_bytes: 1 << 22,
//!     max_total_bytes: 1 << 26,
//! };
//! let allocator = Allocator::with_defaults(config).unwrap();
//!
//! let mut handles = allocator.allocate_new(4, 4096).unwrap();
//! handles[0].as_mut_slice().fill(0xAB);
//! for handle in &mut handles {
//!     allocator.deallocate(handle);
//! }
//! ```

pub mod allocator;
pub mod arena;
pub mod bitmap;
pub mod buffer_factory;
pub mod config;
pub mod error;
pub mod handle;
pub mod memory_manager;
pub mod metrics;
pub mod platform;

pub use allocator::Allocator;
pub use buffer_factory::{BufferFactory, DefaultBufferFactory};
pub use config::{Config, ValidatedConfig};
pub use error::AllocError;
pub use handle::BufferHandle;
pub use memory_manager::{BudgetMemoryManager, MemoryManager};
pub use metrics::{CountingMetricsSink, MetricsSink, NoopMetricsSink};
