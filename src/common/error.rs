//! Error taxonomy shared by every stage of the engine.
//!
//! The variants fall into three groups:
//!
//! - **Authoring** (`DuplicateLabel`, `UnresolvedLabel`, `DisplacementOutOfRange`,
//!   `UnresolvedPatches`): raised while building or resolving a [`CodeBuffer`]; the
//!   caller can rebuild the buffer. None of them ever touches process memory.
//! - **Resource** (`AllocationFailed`, `PermissionChangeFailed`, `CacheFlushFailed`):
//!   the OS refused a mapping or protection change; retry or fall back.
//! - **Programmer** (`InvalidSignature`, `OffsetOutOfBounds`, `CapacityExceeded`,
//!   `ArgumentCountMismatch`, `NotExecutable`, `UseAfterRelease`, `UnsupportedHost`).
//!
//! [`CodeBuffer`]: crate::common::buffer::CodeBuffer

use thiserror::Error;

use crate::common::reloc::DisplacementWidth;

/// Errors that can occur while assembling, committing or invoking generated code
#[derive(Debug, Error)]
pub enum JitError {
    /// A label was marked twice in the same buffer
    #[error("label `{0}` is already marked")]
    DuplicateLabel(String),

    /// A patch site references a label that was never marked
    #[error("label `{0}` is referenced but never marked")]
    UnresolvedLabel(String),

    /// A computed branch displacement does not fit its encoding
    #[error("displacement {displacement} to label `{label}` does not fit in a {width} field")]
    DisplacementOutOfRange {
        label: String,
        displacement: i64,
        width: DisplacementWidth,
    },

    /// `commit` was called on a buffer that still has pending patch sites
    #[error("buffer still has {pending} unresolved patch site(s)")]
    UnresolvedPatches { pending: usize },

    /// The OS denied the anonymous mapping
    #[error("failed to allocate executable memory: {0}")]
    AllocationFailed(#[source] region::Error),

    /// The OS denied a read/write/execute transition
    #[error("failed to change memory protection: {0}")]
    PermissionChangeFailed(#[source] region::Error),

    /// Instruction cache maintenance failed after a write
    #[error("failed to synchronize the instruction cache: {0}")]
    CacheFlushFailed(#[source] std::io::Error),

    /// Signature asks for more register-passed arguments than the ABI provides
    #[error("signature takes {params} arguments, at most {max} are supported")]
    InvalidSignature { params: u8, max: u8 },

    /// Entry offset lies outside the region
    #[error("offset {offset:#x} is outside the region of {size} bytes")]
    OffsetOutOfBounds { offset: usize, size: usize },

    /// Bytes do not fit in the region at the requested offset
    #[error("{len} bytes at offset {offset:#x} exceed region capacity of {capacity} bytes")]
    CapacityExceeded {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    /// `call` received a different number of arguments than the signature declares
    #[error("expected {expected} arguments, got {got}")]
    ArgumentCountMismatch { expected: u8, got: usize },

    /// The region has not been committed, so it is not executable yet
    #[error("region is not executable; commit code before calling it")]
    NotExecutable,

    /// The region backing a handle (or the arena itself) has been released
    #[error("region has been released")]
    UseAfterRelease,

    /// Generated code targets x86-64 and cannot run on this host
    #[error("generated x86-64 code cannot be executed on this host")]
    UnsupportedHost,
}

/// Common result type for the engine
pub type JitResult<T> = Result<T, JitError>;
