//! Ready-made routines built with [`X86_64InstructionBuilder`].
//!
//! Each returns a resolved [`CodeBuffer`] following the System V AMD64
//! convention, ready for [`ExecutableMemoryArena::commit`](crate::common::jit::ExecutableMemoryArena::commit).

use super::builder::{ImmediateSlot, X86_64InstructionBuilder};
use super::instruction::reg;
use crate::common::buffer::CodeBuffer;
use crate::common::error::{JitError, JitResult};
use crate::common::jit::MAX_REGISTER_ARGS;

/// Iterative Fibonacci, `fn(i32) -> i32`.
///
/// Returns `n` itself for `n <= 1`. Overflows silently past `fib(46)`.
pub fn fibonacci() -> JitResult<CodeBuffer> {
    let mut b = X86_64InstructionBuilder::new();
    b.cmp32_imm8(reg::EDI, 1)
        .jle("return_n")
        .xor32(reg::EAX, reg::EAX) // a = 0
        .mov32_imm(reg::EDX, 1) // b = 1
        .mov32_imm(reg::ECX, 2); // i = 2
    b.label("loop")?
        .mov32(reg::ESI, reg::EDX)
        .add32(reg::ESI, reg::EAX) // t = a + b
        .mov32(reg::EAX, reg::EDX)
        .mov32(reg::EDX, reg::ESI)
        .inc32(reg::ECX)
        .cmp32(reg::ECX, reg::EDI)
        .jle("loop")
        .mov32(reg::EAX, reg::EDX)
        .ret();
    b.label("return_n")?.mov32(reg::EAX, reg::EDI).ret();

    let mut buffer = b.into_buffer();
    buffer.resolve()?;
    Ok(buffer)
}

/// `fn() -> u32` returning `value`, with the immediate exposed for patching.
pub fn constant_return(value: u32) -> (CodeBuffer, ImmediateSlot) {
    let mut b = X86_64InstructionBuilder::new();
    let slot = b.mov32_patchable(reg::EAX, value);
    b.ret();
    (b.into_buffer(), slot)
}

/// `fn() -> i32` computing `a + b * c` from baked-in constants.
pub fn add_mul(a: i32, b: i32, c: i32) -> CodeBuffer {
    let mut builder = X86_64InstructionBuilder::new();
    builder
        .mov32_imm(reg::EAX, a as u32)
        .mov32_imm(reg::ECX, b as u32)
        .mov32_imm(reg::EDX, c as u32)
        .imul32(reg::ECX, reg::EDX)
        .add32(reg::EAX, reg::ECX)
        .ret();
    builder.into_buffer()
}

/// `fn(i32) -> i32` clamping its argument into `lo..=hi` (signed).
pub fn clamp(lo: i32, hi: i32) -> JitResult<CodeBuffer> {
    let mut b = X86_64InstructionBuilder::new();
    b.mov32(reg::EAX, reg::EDI)
        .mov32_imm(reg::ECX, lo as u32)
        .cmp32(reg::EAX, reg::ECX)
        .jge("check_hi")
        .mov32(reg::EAX, reg::ECX)
        .jmp("done");
    b.label("check_hi")?
        .mov32_imm(reg::ECX, hi as u32)
        .cmp32(reg::EAX, reg::ECX)
        .jle("done")
        .mov32(reg::EAX, reg::ECX);
    b.label("done")?.ret();

    let mut buffer = b.into_buffer();
    buffer.resolve()?;
    Ok(buffer)
}

/// 64-bit sum of the first `params` integer arguments.
pub fn sum_args(params: u8) -> JitResult<CodeBuffer> {
    if params > MAX_REGISTER_ARGS {
        return Err(JitError::InvalidSignature {
            params,
            max: MAX_REGISTER_ARGS,
        });
    }

    let mut b = X86_64InstructionBuilder::new();
    b.xor32(reg::EAX, reg::EAX);
    for &arg in &reg::ARGS[..params as usize] {
        b.add64(reg::RAX, arg);
    }
    b.ret();
    Ok(b.into_buffer())
}
