/// JIT assembler macro interface
///
/// This module provides a macro-based interface for writing x86-64 routines
/// as a list of builder calls.
use super::builder::{ImmediateSlot, X86_64InstructionBuilder};
use crate::common::error::JitResult;

/// Anything a builder method can return inside [`x86_64_asm!`](crate::x86_64_asm).
#[doc(hidden)]
pub trait AsmStep {
    fn into_step(self) -> JitResult<()>;
}

impl AsmStep for &mut X86_64InstructionBuilder {
    fn into_step(self) -> JitResult<()> {
        Ok(())
    }
}

impl AsmStep for JitResult<&mut X86_64InstructionBuilder> {
    fn into_step(self) -> JitResult<()> {
        self.map(|_| ())
    }
}

impl AsmStep for ImmediateSlot {
    fn into_step(self) -> JitResult<()> {
        Ok(())
    }
}

/// x86-64 JIT assembler macro
///
/// Runs each listed method on a fresh [`X86_64InstructionBuilder`], resolves
/// the branches and evaluates to `JitResult<CodeBuffer>`. A failing `label`
/// or an unresolvable branch surfaces as the error.
///
/// Usage:
/// ```rust
/// use jit_hotpatch::x86_64::reg;
///
/// let code = jit_hotpatch::x86_64_asm! {
///     xor32(reg::EAX, reg::EAX);
///     label("loop");
///     add32(reg::EAX, reg::EDI);
///     dec32(reg::ESI);
///     jne("loop");
///     ret();
/// }?;
/// assert_eq!(code.bytes(), &[0x31, 0xc0, 0x01, 0xf8, 0xff, 0xce, 0x75, 0xfa, 0xc3]);
/// # Ok::<(), jit_hotpatch::JitError>(())
/// ```
#[macro_export]
macro_rules! x86_64_asm {
    ($($method:ident($($args:expr),*);)*) => {{
        (|| -> $crate::JitResult<$crate::common::buffer::CodeBuffer> {
            let mut builder = $crate::x86_64::X86_64InstructionBuilder::new();
            $(
                $crate::x86_64::macros::AsmStep::into_step(builder.$method($($args),*))?;
            )*
            let mut buffer = builder.into_buffer();
            buffer.resolve()?;
            Ok(buffer)
        })()
    }};
}
