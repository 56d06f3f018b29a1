//! # Self-Modifying x86-64 JIT Engine
//!
//! A small runtime code generator: emit x86-64 bytes with labels, resolve
//! branch displacements, place the code in executable memory and call it
//! through a typed handle. Committed code can be patched in place between
//! calls, which is the basis for self-modifying routines.
//!
//! ## Features
//!
//! - **Two-phase assembly**: forward and backward branches to named labels,
//!   resolved all-or-nothing before any memory is touched
//! - **W^X by default**: committed regions are never writable and executable
//!   at once; permissive RWX mode has to be requested by name
//! - **In-place patching**: `overwrite` rewrites committed code, each write
//!   bumps a generation counter
//! - **Release detection**: handles outlived by their arena report
//!   [`JitError::UseAfterRelease`] instead of faulting
//! - **Typed calls**: `TypedHandle<fn(i32) -> i32>` and friends, up to six
//!   integer arguments
//!
//! ## Target
//!
//! x86-64 with the System V AMD64 calling convention (`extern "sysv64"`).
//! Encoding, relocation and memory management work on any host; invoking
//! code returns [`JitError::UnsupportedHost`] elsewhere.
//!
//! ## Concurrency
//!
//! [`ExecutableMemoryArena`] does no locking. Overwriting code while another
//! thread executes it is undefined behavior; wrap the arena in a
//! [`GuardedArena`] when callers and writers can overlap.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use jit_hotpatch::x86_64::routines;
//! use jit_hotpatch::{ExecutableMemoryArena, TypedHandle};
//!
//! let (code, slot) = routines::constant_return(100);
//!
//! let mut arena = ExecutableMemoryArena::allocate(4096)?;
//! arena.commit(&code)?;
//! let get = unsafe { TypedHandle::<fn() -> u32>::bind(&arena, 0)? };
//! assert_eq!(get.call()?, 100);
//!
//! slot.patch(&mut arena, 200)?;
//! assert_eq!(get.call()?, 200);
//!
//! arena.release();
//! assert!(get.call().is_err());
//! # Ok::<(), jit_hotpatch::JitError>(())
//! ```

// Common types and traits shared by the engine and the encoder
pub mod common;

// Architecture-specific module
pub mod x86_64;

pub use common::buffer::CodeBuffer;
pub use common::error::{JitError, JitResult};
pub use common::jit::{
    ArenaConfig, ExecutableMemoryArena, GuardedArena, GuardedHandle, InvocationHandle,
    JitFunction, ProtectionMode, ReturnType, ReturnValue, Signature, TypedHandle,
};
pub use common::reloc::{DisplacementWidth, RelocationResolver};
