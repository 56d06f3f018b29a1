/// Instruction builder interface for x86-64 code generation
use super::instruction::*;
use crate::common::buffer::CodeBuffer;
use crate::common::error::JitResult;
use crate::common::jit::ExecutableMemoryArena;
use crate::common::reloc::DisplacementWidth;
use crate::common::InstructionBuilder;

/// Location of a 32-bit immediate inside emitted code.
///
/// Returned by [`X86_64InstructionBuilder::mov32_patchable`]; the offset is
/// relative to the start of the buffer, which is also the arena offset when
/// the buffer is committed at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImmediateSlot {
    offset: usize,
}

impl ImmediateSlot {
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Little-endian bytes of a replacement immediate
    pub fn encode(value: u32) -> [u8; 4] {
        value.to_le_bytes()
    }

    /// Overwrite the immediate in committed code.
    pub fn patch(&self, arena: &mut ExecutableMemoryArena, value: u32) -> JitResult<()> {
        arena.overwrite(self.offset, &Self::encode(value))
    }
}

/// Instruction builder for generating x86-64 code
///
/// ```rust
/// use jit_hotpatch::x86_64::{reg, Condition, X86_64InstructionBuilder};
///
/// let mut builder = X86_64InstructionBuilder::new();
/// builder
///     .mov32(reg::EAX, reg::EDI)
///     .cmp32_imm8(reg::EAX, 0)
///     .jcc(Condition::GE, "done")
///     .xor32(reg::EAX, reg::EAX);
/// builder.label("done")?;
/// builder.ret();
///
/// let mut buffer = builder.into_buffer();
/// buffer.resolve()?;
/// assert_eq!(buffer.bytes(), &[0x89, 0xf8, 0x83, 0xf8, 0x00, 0x7d, 0x02, 0x31, 0xc0, 0xc3]);
/// # Ok::<(), jit_hotpatch::JitError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct X86_64InstructionBuilder {
    buffer: CodeBuffer,
}

impl X86_64InstructionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, instr: Instruction) -> &mut Self {
        self.buffer.emit_bytes(instr.as_bytes());
        self
    }

    /// Append raw bytes
    pub fn emit(&mut self, bytes: &[u8]) -> &mut Self {
        self.buffer.emit_bytes(bytes);
        self
    }

    pub fn clear(&mut self) -> &mut Self {
        self.buffer.clear();
        self
    }

    /// Current end of the code, in bytes
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    /// Mark `name` at the current position.
    pub fn label(&mut self, name: &str) -> JitResult<&mut Self> {
        self.buffer.mark_label(name)?;
        Ok(self)
    }

    // Register to register

    pub fn mov32(&mut self, dst: Register, src: Register) -> &mut Self {
        self.push(encode_alu_rr(opcode::MOV, OperandSize::Dword, dst, src))
    }

    pub fn mov64(&mut self, dst: Register, src: Register) -> &mut Self {
        self.push(encode_alu_rr(opcode::MOV, OperandSize::Qword, dst, src))
    }

    pub fn add32(&mut self, dst: Register, src: Register) -> &mut Self {
        self.push(encode_alu_rr(opcode::ADD, OperandSize::Dword, dst, src))
    }

    pub fn add64(&mut self, dst: Register, src: Register) -> &mut Self {
        self.push(encode_alu_rr(opcode::ADD, OperandSize::Qword, dst, src))
    }

    pub fn sub32(&mut self, dst: Register, src: Register) -> &mut Self {
        self.push(encode_alu_rr(opcode::SUB, OperandSize::Dword, dst, src))
    }

    pub fn sub64(&mut self, dst: Register, src: Register) -> &mut Self {
        self.push(encode_alu_rr(opcode::SUB, OperandSize::Qword, dst, src))
    }

    pub fn xor32(&mut self, dst: Register, src: Register) -> &mut Self {
        self.push(encode_alu_rr(opcode::XOR, OperandSize::Dword, dst, src))
    }

    pub fn xor64(&mut self, dst: Register, src: Register) -> &mut Self {
        self.push(encode_alu_rr(opcode::XOR, OperandSize::Qword, dst, src))
    }

    /// Compare `lhs` with `rhs` (flags from `lhs - rhs`)
    pub fn cmp32(&mut self, lhs: Register, rhs: Register) -> &mut Self {
        self.push(encode_alu_rr(opcode::CMP, OperandSize::Dword, lhs, rhs))
    }

    pub fn cmp64(&mut self, lhs: Register, rhs: Register) -> &mut Self {
        self.push(encode_alu_rr(opcode::CMP, OperandSize::Qword, lhs, rhs))
    }

    pub fn imul32(&mut self, dst: Register, src: Register) -> &mut Self {
        self.push(encode_imul_rr(OperandSize::Dword, dst, src))
    }

    pub fn imul64(&mut self, dst: Register, src: Register) -> &mut Self {
        self.push(encode_imul_rr(OperandSize::Qword, dst, src))
    }

    // Register and sign-extended 8-bit immediate

    pub fn add32_imm8(&mut self, dst: Register, imm: i8) -> &mut Self {
        self.push(encode_group1_ri8(opcode::EXT_ADD, OperandSize::Dword, dst, imm))
    }

    pub fn add64_imm8(&mut self, dst: Register, imm: i8) -> &mut Self {
        self.push(encode_group1_ri8(opcode::EXT_ADD, OperandSize::Qword, dst, imm))
    }

    pub fn sub32_imm8(&mut self, dst: Register, imm: i8) -> &mut Self {
        self.push(encode_group1_ri8(opcode::EXT_SUB, OperandSize::Dword, dst, imm))
    }

    pub fn sub64_imm8(&mut self, dst: Register, imm: i8) -> &mut Self {
        self.push(encode_group1_ri8(opcode::EXT_SUB, OperandSize::Qword, dst, imm))
    }

    pub fn cmp32_imm8(&mut self, lhs: Register, imm: i8) -> &mut Self {
        self.push(encode_group1_ri8(opcode::EXT_CMP, OperandSize::Dword, lhs, imm))
    }

    pub fn cmp64_imm8(&mut self, lhs: Register, imm: i8) -> &mut Self {
        self.push(encode_group1_ri8(opcode::EXT_CMP, OperandSize::Qword, lhs, imm))
    }

    pub fn inc32(&mut self, dst: Register) -> &mut Self {
        self.push(encode_group5(opcode::EXT_INC, OperandSize::Dword, dst))
    }

    pub fn inc64(&mut self, dst: Register) -> &mut Self {
        self.push(encode_group5(opcode::EXT_INC, OperandSize::Qword, dst))
    }

    pub fn dec32(&mut self, dst: Register) -> &mut Self {
        self.push(encode_group5(opcode::EXT_DEC, OperandSize::Dword, dst))
    }

    pub fn dec64(&mut self, dst: Register) -> &mut Self {
        self.push(encode_group5(opcode::EXT_DEC, OperandSize::Qword, dst))
    }

    // Immediate loads

    pub fn mov32_imm(&mut self, dst: Register, imm: u32) -> &mut Self {
        self.push(encode_mov_ri32(dst, imm))
    }

    pub fn mov64_imm(&mut self, dst: Register, imm: u64) -> &mut Self {
        self.push(encode_mov_ri64(dst, imm))
    }

    /// Emit `mov r32, imm32` and return where the immediate lives.
    pub fn mov32_patchable(&mut self, dst: Register, imm: u32) -> ImmediateSlot {
        let instr = encode_mov_ri32(dst, imm);
        let offset = self.offset() + instr.as_bytes().len() - 4;
        self.push(instr);
        ImmediateSlot { offset }
    }

    pub fn ret(&mut self) -> &mut Self {
        self.push(encode_ret())
    }

    pub fn nop(&mut self) -> &mut Self {
        self.push(encode_nop())
    }

    // Branches. Targets are labels, patched by `CodeBuffer::resolve`.

    /// Short conditional jump (`7x rel8`)
    pub fn jcc(&mut self, cond: Condition, target: &str) -> &mut Self {
        self.buffer
            .emit_branch(&[cond.short_opcode()], DisplacementWidth::Rel8, target);
        self
    }

    /// Near conditional jump (`0F 8x rel32`)
    pub fn jcc_near(&mut self, cond: Condition, target: &str) -> &mut Self {
        self.buffer
            .emit_branch(&cond.near_opcode(), DisplacementWidth::Rel32, target);
        self
    }

    /// Short unconditional jump (`EB rel8`)
    pub fn jmp(&mut self, target: &str) -> &mut Self {
        self.buffer
            .emit_branch(&[JMP_SHORT], DisplacementWidth::Rel8, target);
        self
    }

    /// Near unconditional jump (`E9 rel32`)
    pub fn jmp_near(&mut self, target: &str) -> &mut Self {
        self.buffer
            .emit_branch(&[JMP_NEAR], DisplacementWidth::Rel32, target);
        self
    }

    pub fn je(&mut self, target: &str) -> &mut Self {
        self.jcc(Condition::E, target)
    }

    pub fn jne(&mut self, target: &str) -> &mut Self {
        self.jcc(Condition::NE, target)
    }

    pub fn jl(&mut self, target: &str) -> &mut Self {
        self.jcc(Condition::L, target)
    }

    pub fn jle(&mut self, target: &str) -> &mut Self {
        self.jcc(Condition::LE, target)
    }

    pub fn jg(&mut self, target: &str) -> &mut Self {
        self.jcc(Condition::G, target)
    }

    pub fn jge(&mut self, target: &str) -> &mut Self {
        self.jcc(Condition::GE, target)
    }

    pub fn into_buffer(self) -> CodeBuffer {
        self.buffer
    }
}

impl InstructionBuilder<Instruction> for X86_64InstructionBuilder {
    type Register = Register;

    fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, instr: Instruction) {
        self.buffer.emit_bytes(instr.as_bytes());
    }

    fn clear(&mut self) {
        self.buffer.clear();
    }

    fn buffer(&self) -> &CodeBuffer {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut CodeBuffer {
        &mut self.buffer
    }

    fn into_buffer(self) -> CodeBuffer {
        self.buffer
    }
}
