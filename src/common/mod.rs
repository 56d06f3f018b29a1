//! Common types and traits shared by the engine and its instruction encoders.

use core::fmt;

pub mod buffer;
pub mod error;
pub mod reloc;

/// Executable memory, invocation handles and the optional access guard
pub mod jit;

use buffer::CodeBuffer;
use error::JitResult;
use jit::{FnSignature, JitFunction};

/// A machine instruction that can be encoded to bytes
pub trait Instruction: Copy + Clone + fmt::Debug + fmt::Display {
    /// Get the first (up to) eight encoded bytes as a little-endian value
    fn value(&self) -> u64;

    /// Get the encoded instruction bytes
    fn bytes(&self) -> Vec<u8>;

    /// Get the size of this instruction in bytes
    fn size(&self) -> usize;
}

/// ABI classification for registers based on preservation requirements.
///
/// Generated routines may clobber caller-saved registers freely; callee-saved
/// registers must be restored before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbiClass {
    /// Caller-saved registers that don't need to be preserved across calls.
    CallerSaved,

    /// Callee-saved registers that must be preserved across calls.
    CalleeSaved,

    /// Special-purpose registers (stack pointer, frame pointer).
    Special,
}

impl fmt::Display for AbiClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiClass::CallerSaved => write!(f, "caller-saved"),
            AbiClass::CalleeSaved => write!(f, "callee-saved"),
            AbiClass::Special => write!(f, "special"),
        }
    }
}

/// A register identifier for a target architecture
pub trait Register: Copy + Clone + fmt::Debug + core::hash::Hash + Eq {
    /// Get the register number/identifier
    fn id(&self) -> u32;

    /// Get the ABI classification for this register.
    fn abi_class(&self) -> AbiClass;

    /// Convenience method equivalent to `self.abi_class() == AbiClass::CallerSaved`.
    fn is_caller_saved(&self) -> bool {
        self.abi_class() == AbiClass::CallerSaved
    }

    /// Convenience method equivalent to `self.abi_class() == AbiClass::CalleeSaved`.
    fn is_callee_saved(&self) -> bool {
        self.abi_class() == AbiClass::CalleeSaved
    }

    /// Convenience method equivalent to `self.abi_class() == AbiClass::Special`.
    fn is_special(&self) -> bool {
        self.abi_class() == AbiClass::Special
    }
}

/// An instruction builder for a specific architecture.
///
/// Builders append encoded instructions and branch placeholders to a
/// [`CodeBuffer`]; the buffer is what gets resolved and committed.
pub trait InstructionBuilder<I: Instruction> {
    /// The register type used by this architecture
    type Register: Register;

    /// Create a new instruction builder
    fn new() -> Self;

    /// Append an encoded instruction
    fn push(&mut self, instr: I);

    /// Clear all emitted code, labels and pending branches
    fn clear(&mut self);

    /// The code emitted so far
    fn buffer(&self) -> &CodeBuffer;

    fn buffer_mut(&mut self) -> &mut CodeBuffer;

    /// Consume the builder and return its code buffer (not yet resolved)
    fn into_buffer(self) -> CodeBuffer;

    /// Resolve the emitted code and turn it into a callable function.
    ///
    /// All branch displacements are resolved *before* any memory is mapped, so
    /// a routine with a bad label never touches page protections. The code is
    /// committed into a fresh, exactly-sized arena using the default strict W^X
    /// configuration, and a typed handle is bound at offset 0.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    /// - The signature `F` matches what the emitted code actually does
    /// - The code follows the System V AMD64 calling convention
    /// - The code terminates and leaves callee-saved registers intact
    unsafe fn function<F: FnSignature>(&mut self) -> JitResult<JitFunction<F>>
    where
        Self: Sized,
    {
        self.buffer_mut().resolve()?;
        JitFunction::from_buffer(self.buffer())
    }
}
