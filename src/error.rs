//! Error kinds surfaced by the allocator.
//!
//! Allocation errors are always surfaced to the caller; they are never
//! swallowed. Memory-manager refusals are logged at `debug` level, not
//! `error`, since budget pressure is an expected condition.

use thiserror::Error;

/// Errors the allocator can report.
#[derive(Debug, Error)]
pub enum AllocError {
    /// The four configuration integers failed validation at construction.
    #[error("invalid allocator configuration: {0}")]
    InvalidConfig(String),

    /// The requested size was zero or exceeded `MaxAllocBytes` after
    /// rounding up to the next power of two.
    #[error("invalid allocation size: {0}")]
    InvalidSize(String),

    /// The budget plus the arena pool could not satisfy the request after
    /// exhausting phases A-D. Carries the memory manager's diagnostic dump.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// A detected invariant violation (e.g. a buddy already free on
    /// coalesce). Indicates a bug in the allocator itself, not caller misuse.
    #[error("internal consistency violation: {0}")]
    InternalConsistency(String),
}

pub type Result<T> = std::result::Result<T, AllocError>;
