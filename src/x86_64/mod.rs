//! x86-64 instruction set support for the JIT engine.
//!
//! This module provides x86-64 instruction encoding and a builder-based
//! interface for generating System V AMD64 routines at runtime.
//!
//! ## Features
//!
//! - **Variable-length encoding**: REX prefixes are emitted only when needed
//! - **Register support**: 16 general-purpose registers, 32- and 64-bit forms
//! - **Arithmetic**: MOV, ADD, SUB, XOR, CMP, IMUL, INC, DEC
//! - **Branches**: short and near `Jcc`/`JMP` to named labels
//! - **Patchable immediates**: `mov32_patchable` for in-place updates
//!
//! ## Register Conventions (System V AMD64)
//!
//! - **RDI, RSI, RDX, RCX, R8, R9**: Integer arguments (caller-saved)
//! - **RAX**: Return value (caller-saved)
//! - **R10, R11**: Caller-saved temporaries
//! - **RBX, R12-R15**: Callee-saved
//! - **RSP, RBP**: Stack and frame pointer
//!
//! ## Examples
//!
//! ```rust,no_run
//! use jit_hotpatch::x86_64::{reg, X86_64InstructionBuilder};
//! use jit_hotpatch::common::InstructionBuilder;
//!
//! let mut builder = X86_64InstructionBuilder::new();
//! builder
//!     .mov64(reg::RAX, reg::RDI)  // RAX = first argument
//!     .add64(reg::RAX, reg::RSI)  // RAX += second argument
//!     .ret();
//!
//! let func = unsafe { builder.function::<fn(u64, u64) -> u64>() }?;
//! assert_eq!(func.call(10, 20)?, 30);
//! # Ok::<(), jit_hotpatch::JitError>(())
//! ```

pub mod instruction;
pub mod builder;
pub mod macros;
pub mod routines;

#[cfg(test)]
mod tests;

// Re-export commonly used items
pub use instruction::{Register, Instruction, Condition, OperandSize, reg};
pub use builder::{ImmediateSlot, X86_64InstructionBuilder};
