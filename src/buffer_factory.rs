//! `BufferFactory`: produces blank `BufferHandle`s for the allocator to
//! populate.

use crate::handle::BufferHandle;

/// External collaborator that creates blank handles of the allocator's
/// expected layout.
pub trait BufferFactory: Send + Sync {
    fn blank(&self) -> BufferHandle;
}

/// The ordinary `BufferFactory`: just `BufferHandle::blank()`.
#[derive(Default)]
pub struct DefaultBufferFactory;

impl BufferFactory for DefaultBufferFactory {
    fn blank(&self) -> BufferHandle {
        BufferHandle::blank()
    }
}
