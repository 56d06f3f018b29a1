/// x86-64 instruction formats and encoding
use core::fmt;
use crate::common::{
    AbiClass,
    Instruction as InstructionTrait,
    Register as RegisterTrait,
};

/// Longest legal x86-64 instruction
pub const MAX_INSTRUCTION_LEN: usize = 15;

/// x86-64 general-purpose register (0-15, REX-extended above 7).
///
/// The same value names the 64-bit and the 32-bit view of a register; the
/// operand size is chosen by the instruction, not the register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register(pub u8);

impl Register {
    pub const fn new(reg: u8) -> Self {
        Self(reg)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// The three bits that go into ModRM or the opcode
    pub fn low_bits(self) -> u8 {
        self.0 & 0b111
    }

    /// Whether the register needs a REX prefix bit (R8-R15)
    pub fn is_extended(self) -> bool {
        self.0 >= 8
    }
}

impl RegisterTrait for Register {
    fn id(&self) -> u32 {
        self.0 as u32
    }

    fn abi_class(&self) -> AbiClass {
        match self.0 {
            // RSP, RBP
            4 | 5 => AbiClass::Special,
            // RBX, R12-R15
            3 | 12..=15 => AbiClass::CalleeSaved,
            // RAX, RCX, RDX, RSI, RDI, R8-R11
            _ => AbiClass::CallerSaved,
        }
    }
}

/// Register constants (System V AMD64 names)
pub mod reg {
    use super::Register;

    pub const RAX: Register = Register(0);
    pub const RCX: Register = Register(1);
    pub const RDX: Register = Register(2);
    pub const RBX: Register = Register(3);
    pub const RSP: Register = Register(4);
    pub const RBP: Register = Register(5);
    pub const RSI: Register = Register(6);
    pub const RDI: Register = Register(7);
    pub const R8: Register = Register(8);
    pub const R9: Register = Register(9);
    pub const R10: Register = Register(10);
    pub const R11: Register = Register(11);
    pub const R12: Register = Register(12);
    pub const R13: Register = Register(13);
    pub const R14: Register = Register(14);
    pub const R15: Register = Register(15);

    // 32-bit views
    pub const EAX: Register = RAX;
    pub const ECX: Register = RCX;
    pub const EDX: Register = RDX;
    pub const EBX: Register = RBX;
    pub const ESP: Register = RSP;
    pub const EBP: Register = RBP;
    pub const ESI: Register = RSI;
    pub const EDI: Register = RDI;
    pub const R8D: Register = R8;
    pub const R9D: Register = R9;
    pub const R10D: Register = R10;
    pub const R11D: Register = R11;
    pub const R12D: Register = R12;
    pub const R13D: Register = R13;
    pub const R14D: Register = R14;
    pub const R15D: Register = R15;

    /// Integer argument registers in calling-convention order
    pub const ARGS: [Register; 6] = [RDI, RSI, RDX, RCX, R8, R9];

    /// Integer return register
    pub const RETURN: Register = RAX;
}

/// Operand size selected by REX.W
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandSize {
    /// 32-bit; writes zero-extend into the full 64-bit register
    Dword,
    Qword,
}

impl OperandSize {
    fn rex_w(self) -> bool {
        matches!(self, OperandSize::Qword)
    }
}

/// Condition codes (the low nibble of `Jcc`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Condition {
    O = 0x0,
    NO = 0x1,
    /// Below (unsigned <)
    B = 0x2,
    /// Above or equal (unsigned >=)
    AE = 0x3,
    E = 0x4,
    NE = 0x5,
    /// Below or equal (unsigned <=)
    BE = 0x6,
    /// Above (unsigned >)
    A = 0x7,
    S = 0x8,
    NS = 0x9,
    P = 0xa,
    NP = 0xb,
    /// Less (signed <)
    L = 0xc,
    /// Greater or equal (signed >=)
    GE = 0xd,
    /// Less or equal (signed <=)
    LE = 0xe,
    /// Greater (signed >)
    G = 0xf,
}

impl Condition {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Opcode of the two-byte short form (`7x rel8`)
    pub fn short_opcode(self) -> u8 {
        0x70 | self.code()
    }

    /// Opcode bytes of the near form (`0F 8x rel32`)
    pub fn near_opcode(self) -> [u8; 2] {
        [0x0f, 0x80 | self.code()]
    }
}

pub const JMP_SHORT: u8 = 0xeb;
pub const JMP_NEAR: u8 = 0xe9;

/// One encoded x86-64 instruction (1-15 bytes)
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    bytes: [u8; MAX_INSTRUCTION_LEN],
    len: u8,
}

impl Instruction {
    /// Wrap already-encoded bytes. `bytes` must not exceed 15 bytes.
    pub(crate) fn from_slice(bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() <= MAX_INSTRUCTION_LEN);
        let len = bytes.len().min(MAX_INSTRUCTION_LEN);
        let mut buf = [0u8; MAX_INSTRUCTION_LEN];
        buf[..len].copy_from_slice(&bytes[..len]);
        Self {
            bytes: buf,
            len: len as u8,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

impl InstructionTrait for Instruction {
    fn value(&self) -> u64 {
        let mut le = [0u8; 8];
        let n = self.as_bytes().len().min(8);
        le[..n].copy_from_slice(&self.as_bytes()[..n]);
        u64::from_le_bytes(le)
    }

    fn bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn size(&self) -> usize {
        self.len as usize
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instruction({self})")
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.as_bytes().iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// REX prefix, or `None` when every bit would be clear
fn rex(w: bool, reg: Register, rm: Register) -> Option<u8> {
    let byte = 0x40
        | ((w as u8) << 3)
        | ((reg.is_extended() as u8) << 2)
        | (rm.is_extended() as u8);
    (byte != 0x40).then_some(byte)
}

/// ModRM byte in register-direct mode (mod = 11)
fn modrm_direct(reg: u8, rm: Register) -> u8 {
    0xc0 | ((reg & 0b111) << 3) | rm.low_bits()
}

/// Two-operand ALU form `op r/m, r` (MR encoding): `dst` goes in ModRM.rm,
/// `src` in ModRM.reg.
///
/// Used for ADD (01), SUB (29), XOR (31), CMP (39) and MOV (89).
pub fn encode_alu_rr(opcode: u8, size: OperandSize, dst: Register, src: Register) -> Instruction {
    let mut out = [0u8; 3];
    let mut n = 0;
    if let Some(prefix) = rex(size.rex_w(), src, dst) {
        out[n] = prefix;
        n += 1;
    }
    out[n] = opcode;
    out[n + 1] = modrm_direct(src.value(), dst);
    Instruction::from_slice(&out[..n + 2])
}

/// `imul dst, src` (0F AF /r, RM encoding)
pub fn encode_imul_rr(size: OperandSize, dst: Register, src: Register) -> Instruction {
    let mut out = [0u8; 4];
    let mut n = 0;
    if let Some(prefix) = rex(size.rex_w(), dst, src) {
        out[n] = prefix;
        n += 1;
    }
    out[n] = 0x0f;
    out[n + 1] = 0xaf;
    out[n + 2] = modrm_direct(dst.value(), src);
    Instruction::from_slice(&out[..n + 3])
}

/// Group 1 with a sign-extended 8-bit immediate (`83 /ext ib`).
///
/// `ext` is 0 for ADD, 5 for SUB, 7 for CMP.
pub fn encode_group1_ri8(ext: u8, size: OperandSize, dst: Register, imm: i8) -> Instruction {
    let mut out = [0u8; 4];
    let mut n = 0;
    if let Some(prefix) = rex(size.rex_w(), Register(0), dst) {
        out[n] = prefix;
        n += 1;
    }
    out[n] = 0x83;
    out[n + 1] = modrm_direct(ext, dst);
    out[n + 2] = imm as u8;
    Instruction::from_slice(&out[..n + 3])
}

/// Group 5 (`FF /ext`): 0 = INC, 1 = DEC
pub fn encode_group5(ext: u8, size: OperandSize, dst: Register) -> Instruction {
    let mut out = [0u8; 3];
    let mut n = 0;
    if let Some(prefix) = rex(size.rex_w(), Register(0), dst) {
        out[n] = prefix;
        n += 1;
    }
    out[n] = 0xff;
    out[n + 1] = modrm_direct(ext, dst);
    Instruction::from_slice(&out[..n + 2])
}

/// `mov r32, imm32` (`[REX.B] B8+r id`); zero-extends into the 64-bit register
pub fn encode_mov_ri32(dst: Register, imm: u32) -> Instruction {
    let mut out = [0u8; 6];
    let mut n = 0;
    if dst.is_extended() {
        out[n] = 0x41;
        n += 1;
    }
    out[n] = 0xb8 + dst.low_bits();
    out[n + 1..n + 5].copy_from_slice(&imm.to_le_bytes());
    Instruction::from_slice(&out[..n + 5])
}

/// `movabs r64, imm64` (`REX.W B8+r io`)
pub fn encode_mov_ri64(dst: Register, imm: u64) -> Instruction {
    let mut out = [0u8; 10];
    out[0] = 0x48 | (dst.is_extended() as u8);
    out[1] = 0xb8 + dst.low_bits();
    out[2..].copy_from_slice(&imm.to_le_bytes());
    Instruction::from_slice(&out)
}

pub fn encode_ret() -> Instruction {
    Instruction::from_slice(&[0xc3])
}

pub fn encode_nop() -> Instruction {
    Instruction::from_slice(&[0x90])
}

pub mod opcode {
    pub const ADD: u8 = 0x01;
    pub const SUB: u8 = 0x29;
    pub const XOR: u8 = 0x31;
    pub const CMP: u8 = 0x39;
    pub const MOV: u8 = 0x89;

    /// Group 1 extensions
    pub const EXT_ADD: u8 = 0;
    pub const EXT_SUB: u8 = 5;
    pub const EXT_CMP: u8 = 7;

    /// Group 5 extensions
    pub const EXT_INC: u8 = 0;
    pub const EXT_DEC: u8 = 1;
}
