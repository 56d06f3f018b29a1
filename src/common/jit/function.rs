use std::ops::Deref;

use super::arena::{ArenaConfig, ExecutableMemoryArena};
use super::handle::{FnSignature, TypedHandle};
use crate::common::buffer::CodeBuffer;
use crate::common::error::{JitError, JitResult};

/// A callable routine that owns the arena its code lives in.
///
/// Returned by [`InstructionBuilder::function`](crate::common::InstructionBuilder::function).
/// Dropping it unmaps the code. It dereferences to [`TypedHandle`], so the
/// natural `func.call(..)` syntax works directly:
///
/// ```rust,no_run
/// use jit_hotpatch::common::InstructionBuilder;
/// use jit_hotpatch::x86_64::{reg, X86_64InstructionBuilder};
///
/// let mut builder = X86_64InstructionBuilder::new();
/// builder.mov32(reg::EAX, reg::EDI).add32(reg::EAX, reg::ESI).ret();
///
/// let add = unsafe { builder.function::<fn(u32, u32) -> u32>() }?;
/// assert_eq!(add.call(40, 2)?, 42);
/// # Ok::<(), jit_hotpatch::JitError>(())
/// ```
pub struct JitFunction<F> {
    handle: TypedHandle<F>,
    arena: ExecutableMemoryArena,
}

impl<F: FnSignature> JitFunction<F> {
    /// Commit `buffer` into a fresh strict W^X arena and bind at offset 0.
    ///
    /// # Safety
    ///
    /// The resolved code in `buffer` must be a System V AMD64 function
    /// matching `F`.
    pub unsafe fn from_buffer(buffer: &CodeBuffer) -> JitResult<Self> {
        Self::with_config(buffer, ArenaConfig::default())
    }

    /// Same as [`from_buffer`](Self::from_buffer) with an explicit arena configuration.
    ///
    /// # Safety
    ///
    /// See [`from_buffer`](Self::from_buffer).
    pub unsafe fn with_config(buffer: &CodeBuffer, config: ArenaConfig) -> JitResult<Self> {
        if !buffer.is_resolved() {
            return Err(JitError::UnresolvedPatches {
                pending: buffer.pending_patches().len(),
            });
        }

        let mut arena = ExecutableMemoryArena::with_config(buffer.len().max(1), config)?;
        arena.commit(buffer)?;
        let handle = TypedHandle::bind(&arena, 0)?;

        Ok(Self { handle, arena })
    }
}

impl<F> JitFunction<F> {
    /// The arena backing this function
    pub fn arena(&self) -> &ExecutableMemoryArena {
        &self.arena
    }

    /// Mutable access to the backing arena, for in-place patching
    pub fn arena_mut(&mut self) -> &mut ExecutableMemoryArena {
        &mut self.arena
    }

    pub fn code_size(&self) -> usize {
        self.arena.capacity()
    }
}

impl<F> Deref for JitFunction<F> {
    type Target = TypedHandle<F>;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}
