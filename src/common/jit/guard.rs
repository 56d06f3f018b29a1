use std::sync::Arc;

use parking_lot::RwLock;

use super::arena::ExecutableMemoryArena;
use super::handle::{InvocationHandle, ReturnValue, Signature};
use crate::common::buffer::CodeBuffer;
use crate::common::error::JitResult;

/// An arena shared between threads that call into it and threads that patch it.
///
/// Calls through a [`GuardedHandle`] hold a read lock for their whole
/// duration; commits, overwrites and release take the write lock. A write
/// therefore waits for in-flight calls to drain, and no call can start while
/// the region is mid-flip. Calls into the same arena still run in parallel.
#[derive(Clone)]
pub struct GuardedArena {
    inner: Arc<RwLock<ExecutableMemoryArena>>,
}

impl GuardedArena {
    pub fn new(arena: ExecutableMemoryArena) -> Self {
        Self {
            inner: Arc::new(RwLock::new(arena)),
        }
    }

    pub fn commit(&self, buffer: &CodeBuffer) -> JitResult<()> {
        self.inner.write().commit(buffer)
    }

    pub fn commit_at(&self, offset: usize, buffer: &CodeBuffer) -> JitResult<()> {
        self.inner.write().commit_at(offset, buffer)
    }

    /// Overwrite bytes once no guarded call is running.
    pub fn overwrite(&self, offset: usize, bytes: &[u8]) -> JitResult<()> {
        self.inner.write().overwrite(offset, bytes)
    }

    pub fn read_back(&self, offset: usize, len: usize) -> JitResult<Vec<u8>> {
        self.inner.read().read_back(offset, len)
    }

    pub fn generation(&self) -> u64 {
        self.inner.read().generation()
    }

    pub fn release(&self) {
        self.inner.write().release();
    }

    /// Run `f` with shared access to the underlying arena.
    pub fn with_arena<T>(&self, f: impl FnOnce(&ExecutableMemoryArena) -> T) -> T {
        f(&*self.inner.read())
    }

    /// Bind a handle whose calls are serialized against writers.
    ///
    /// # Safety
    ///
    /// Same contract as [`InvocationHandle::bind`].
    pub unsafe fn bind(&self, offset: usize, signature: Signature) -> JitResult<GuardedHandle> {
        let handle = InvocationHandle::bind(&*self.inner.read(), offset, signature)?;
        Ok(GuardedHandle {
            arena: Arc::clone(&self.inner),
            handle,
        })
    }
}

/// An [`InvocationHandle`] that holds the arena's read lock while calling.
#[derive(Clone)]
pub struct GuardedHandle {
    arena: Arc<RwLock<ExecutableMemoryArena>>,
    handle: InvocationHandle,
}

impl GuardedHandle {
    pub fn call(&self, args: &[u64]) -> JitResult<ReturnValue> {
        let _guard = self.arena.read();
        self.handle.call(args)
    }

    pub fn signature(&self) -> Signature {
        self.handle.signature()
    }

    pub fn handle(&self) -> &InvocationHandle {
        &self.handle
    }
}
