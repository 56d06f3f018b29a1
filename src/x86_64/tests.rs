use crate::common::error::JitError;
use crate::common::{AbiClass, Instruction as InstructionTrait, InstructionBuilder, Register as _};
use crate::x86_64::instruction::*;
use crate::x86_64::routines;
use crate::x86_64::{reg, X86_64InstructionBuilder};

use std::fs;
use std::process::Command;

/// Assemble Intel-syntax x86-64 with the GNU toolchain and return `.text`.
///
/// Returns an empty vector when `as` or `objcopy` is unavailable, in which
/// case the caller skips the comparison.
fn assemble_x86_64(assembly: &str) -> Vec<u8> {
    use std::io::Write;

    let asm_content = format!(".intel_syntax noprefix\n.text\n{}\n", assembly);
    let mut asm_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
    asm_file
        .write_all(asm_content.as_bytes())
        .expect("Failed to write assembly");
    asm_file.flush().expect("Failed to flush temp file");

    let obj_file = tempfile::NamedTempFile::new().expect("Failed to create temp obj file");
    let output = Command::new("as")
        .arg("--64")
        .arg("-o")
        .arg(obj_file.path())
        .arg(asm_file.path())
        .output();

    match output {
        Ok(result) if result.status.success() => {}
        Ok(result) => {
            println!(
                "Warning: GNU assembler failed, skipping comparison test: {}",
                String::from_utf8_lossy(&result.stderr)
            );
            return vec![];
        }
        Err(e) => {
            println!("Warning: GNU assembler not available, skipping comparison test: {}", e);
            return vec![];
        }
    }

    if fs::metadata(obj_file.path()).map(|m| m.len() == 0).unwrap_or(true) {
        println!("Warning: GNU assembler produced empty object file, skipping comparison test");
        return vec![];
    }

    let bin_file = tempfile::NamedTempFile::new().expect("Failed to create temp bin file");
    let objcopy = Command::new("objcopy")
        .arg("-O")
        .arg("binary")
        .arg("--only-section=.text")
        .arg(obj_file.path())
        .arg(bin_file.path())
        .output();

    match objcopy {
        Ok(result) if result.status.success() => {}
        _ => {
            println!("Warning: objcopy failed or is missing, skipping comparison test");
            return vec![];
        }
    }

    fs::read(bin_file.path()).unwrap_or_default()
}

/// Compare the encoder output with GNU `as` for one instruction
fn compare_instruction(jit_instr: Instruction, gnu_assembly: &str) {
    let gnu_bytes = assemble_x86_64(gnu_assembly);
    if gnu_bytes.is_empty() {
        return;
    }

    let jit_bytes = jit_instr.bytes();
    assert_eq!(
        jit_bytes.as_slice(),
        &gnu_bytes[..jit_bytes.len().min(gnu_bytes.len())],
        "JIT output does not match GNU assembler output\nJIT: {:02x?}\nGNU: {:02x?}\nAssembly: {}",
        jit_bytes,
        gnu_bytes,
        gnu_assembly
    );
    assert_eq!(jit_bytes.len(), gnu_bytes.len(), "length mismatch for {}", gnu_assembly);
}

fn fib_reference(n: i32) -> i32 {
    if n <= 1 {
        return n;
    }
    let (mut a, mut b) = (0i32, 1i32);
    for _ in 2..=n {
        let t = a.wrapping_add(b);
        a = b;
        b = t;
    }
    b
}

#[test]
fn test_register_values() {
    assert_eq!(reg::RAX.value(), 0);
    assert_eq!(reg::RDI.value(), 7);
    assert_eq!(reg::R8.value(), 8);
    assert_eq!(reg::R15.value(), 15);
    assert_eq!(reg::EAX, reg::RAX);
    assert_eq!(reg::R9D, reg::R9);

    assert!(!reg::RDI.is_extended());
    assert!(reg::R8.is_extended());
    assert_eq!(reg::R12.low_bits(), 4);

    assert_eq!(reg::ARGS, [reg::RDI, reg::RSI, reg::RDX, reg::RCX, reg::R8, reg::R9]);
    assert_eq!(reg::RETURN, reg::RAX);
}

#[test]
fn test_abi_classification() {
    assert_eq!(reg::RAX.abi_class(), AbiClass::CallerSaved);
    assert_eq!(reg::R11.abi_class(), AbiClass::CallerSaved);
    assert!(reg::ARGS.iter().all(|r| r.is_caller_saved()));

    for r in [reg::RBX, reg::R12, reg::R13, reg::R14, reg::R15] {
        assert!(r.is_callee_saved(), "{:?}", r);
    }
    assert!(reg::RSP.is_special());
    assert!(reg::RBP.is_special());
}

#[test]
fn test_rr_encodings() {
    assert_eq!(encode_alu_rr(opcode::MOV, OperandSize::Dword, reg::EAX, reg::EDI).bytes(), vec![0x89, 0xf8]);
    assert_eq!(encode_alu_rr(opcode::MOV, OperandSize::Qword, reg::RAX, reg::RDI).bytes(), vec![0x48, 0x89, 0xf8]);
    assert_eq!(encode_alu_rr(opcode::ADD, OperandSize::Dword, reg::ESI, reg::EAX).bytes(), vec![0x01, 0xc6]);
    assert_eq!(encode_alu_rr(opcode::ADD, OperandSize::Qword, reg::R8, reg::R9).bytes(), vec![0x4d, 0x01, 0xc8]);
    assert_eq!(encode_alu_rr(opcode::XOR, OperandSize::Dword, reg::EAX, reg::EAX).bytes(), vec![0x31, 0xc0]);
    assert_eq!(encode_alu_rr(opcode::CMP, OperandSize::Dword, reg::ECX, reg::EDI).bytes(), vec![0x39, 0xf9]);
    assert_eq!(encode_alu_rr(opcode::SUB, OperandSize::Qword, reg::RAX, reg::R10).bytes(), vec![0x4c, 0x29, 0xd0]);
    assert_eq!(encode_imul_rr(OperandSize::Dword, reg::ECX, reg::EDX).bytes(), vec![0x0f, 0xaf, 0xca]);
    assert_eq!(encode_imul_rr(OperandSize::Qword, reg::R12, reg::RAX).bytes(), vec![0x4c, 0x0f, 0xaf, 0xe0]);
}

#[test]
fn test_immediate_encodings() {
    assert_eq!(encode_group1_ri8(opcode::EXT_CMP, OperandSize::Dword, reg::EDI, 1).bytes(), vec![0x83, 0xff, 0x01]);
    assert_eq!(encode_group1_ri8(opcode::EXT_SUB, OperandSize::Qword, reg::RAX, -1).bytes(), vec![0x48, 0x83, 0xe8, 0xff]);
    assert_eq!(encode_group5(opcode::EXT_INC, OperandSize::Dword, reg::ECX).bytes(), vec![0xff, 0xc1]);
    assert_eq!(encode_group5(opcode::EXT_DEC, OperandSize::Qword, reg::R11).bytes(), vec![0x49, 0xff, 0xcb]);
    assert_eq!(encode_mov_ri32(reg::EDX, 1).bytes(), vec![0xba, 0x01, 0x00, 0x00, 0x00]);
    assert_eq!(encode_mov_ri32(reg::R8D, 5).bytes(), vec![0x41, 0xb8, 0x05, 0x00, 0x00, 0x00]);
    assert_eq!(
        encode_mov_ri64(reg::RAX, 0x1122_3344_5566_7788).bytes(),
        vec![0x48, 0xb8, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]
    );
    assert_eq!(encode_ret().bytes(), vec![0xc3]);
    assert_eq!(encode_nop().bytes(), vec![0x90]);
}

#[test]
fn test_instruction_trait() {
    let instr = encode_mov_ri32(reg::EAX, 0xdead_beef);
    assert_eq!(instr.size(), 5);
    assert_eq!(instr.value(), 0xdead_beef_b8);
    assert_eq!(format!("{}", instr), "b8 ef be ad de");
}

#[test]
fn test_condition_opcodes() {
    assert_eq!(Condition::LE.short_opcode(), 0x7e);
    assert_eq!(Condition::GE.short_opcode(), 0x7d);
    assert_eq!(Condition::NE.short_opcode(), 0x75);
    assert_eq!(Condition::E.near_opcode(), [0x0f, 0x84]);
}

#[test]
fn test_gnu_as_comparison() {
    compare_instruction(encode_alu_rr(opcode::MOV, OperandSize::Dword, reg::EAX, reg::EDI), "mov eax, edi");
    compare_instruction(encode_alu_rr(opcode::ADD, OperandSize::Qword, reg::RAX, reg::RDI), "add rax, rdi");
    compare_instruction(encode_alu_rr(opcode::ADD, OperandSize::Qword, reg::R8, reg::R9), "add r8, r9");
    compare_instruction(encode_alu_rr(opcode::SUB, OperandSize::Dword, reg::R13D, reg::EBX), "sub r13d, ebx");
    compare_instruction(encode_alu_rr(opcode::XOR, OperandSize::Dword, reg::EAX, reg::EAX), "xor eax, eax");
    compare_instruction(encode_alu_rr(opcode::CMP, OperandSize::Dword, reg::ECX, reg::EDI), "cmp ecx, edi");
    compare_instruction(encode_imul_rr(OperandSize::Dword, reg::ECX, reg::EDX), "imul ecx, edx");
    compare_instruction(encode_imul_rr(OperandSize::Qword, reg::R12, reg::RAX), "imul r12, rax");
    compare_instruction(encode_group1_ri8(opcode::EXT_ADD, OperandSize::Dword, reg::EAX, 1), "add eax, 1");
    compare_instruction(encode_group1_ri8(opcode::EXT_CMP, OperandSize::Qword, reg::R15, -8), "cmp r15, -8");
    compare_instruction(encode_group5(opcode::EXT_INC, OperandSize::Dword, reg::ECX), "inc ecx");
    compare_instruction(encode_group5(opcode::EXT_DEC, OperandSize::Qword, reg::R11), "dec r11");
    compare_instruction(encode_mov_ri32(reg::R8D, 5), "mov r8d, 5");
    compare_instruction(encode_mov_ri64(reg::R10, 0x1122_3344_5566_7788), "movabs r10, 0x1122334455667788");
    compare_instruction(encode_ret(), "ret");
}

#[test]
fn test_fibonacci_encoding() {
    let buf = routines::fibonacci().unwrap();
    assert_eq!(
        buf.bytes(),
        &[
            0x83, 0xff, 0x01, // cmp edi, 1
            0x7e, 0x1d, // jle return_n
            0x31, 0xc0, // xor eax, eax
            0xba, 0x01, 0x00, 0x00, 0x00, // mov edx, 1
            0xb9, 0x02, 0x00, 0x00, 0x00, // mov ecx, 2
            0x89, 0xd6, // loop: mov esi, edx
            0x01, 0xc6, // add esi, eax
            0x89, 0xd0, // mov eax, edx
            0x89, 0xf2, // mov edx, esi
            0xff, 0xc1, // inc ecx
            0x39, 0xf9, // cmp ecx, edi
            0x7e, 0xf2, // jle loop
            0x89, 0xd0, // mov eax, edx
            0xc3, // ret
            0x89, 0xf8, // return_n: mov eax, edi
            0xc3, // ret
        ]
    );
    assert_eq!(buf.label_offset("loop"), Some(17));
    assert_eq!(buf.label_offset("return_n"), Some(34));
}

#[test]
fn test_constant_return_slot() {
    let (buf, slot) = routines::constant_return(0xdead_beef);
    assert_eq!(buf.bytes(), &[0xb8, 0xef, 0xbe, 0xad, 0xde, 0xc3]);
    assert_eq!(slot.offset(), 1);

    let mut builder = X86_64InstructionBuilder::new();
    builder.nop();
    let slot = builder.mov32_patchable(reg::R9D, 7);
    // nop, REX.B, opcode
    assert_eq!(slot.offset(), 3);
}

#[test]
fn test_add_mul_encoding() {
    let buf = routines::add_mul(2, 3, 4);
    assert_eq!(&buf.bytes()[15..], &[0x0f, 0xaf, 0xca, 0x01, 0xc8, 0xc3]);
}

#[test]
fn test_clamp_shares_done_label() {
    let buf = routines::clamp(-5, 5).unwrap();
    let done = buf.label_offset("done").unwrap();
    assert_eq!(done, buf.len() - 1);

    // jmp done after `mov eax, ecx`; jle done before the last `mov eax, ecx`
    let jmp_at = buf.bytes().iter().position(|&b| b == JMP_SHORT).unwrap();
    assert_eq!(jmp_at + 2 + buf.bytes()[jmp_at + 1] as usize, done);
    let jle_at = buf.len() - 5;
    assert_eq!(buf.bytes()[jle_at], Condition::LE.short_opcode());
    assert_eq!(jle_at + 2 + buf.bytes()[jle_at + 1] as usize, done);
}

#[test]
fn test_sum_args_rejects_seven() {
    assert!(matches!(
        routines::sum_args(7),
        Err(JitError::InvalidSignature { params: 7, max: 6 })
    ));
    assert_eq!(routines::sum_args(0).unwrap().bytes(), &[0x31, 0xc0, 0xc3]);
}

#[test]
fn test_near_branch_encoding() {
    let mut builder = X86_64InstructionBuilder::new();
    builder.jcc_near(Condition::E, "out").jmp_near("out").nop();
    builder.label("out").unwrap();
    let mut buf = builder.into_buffer();
    buf.resolve().unwrap();
    assert_eq!(
        buf.bytes(),
        &[0x0f, 0x84, 0x06, 0x00, 0x00, 0x00, 0xe9, 0x01, 0x00, 0x00, 0x00, 0x90]
    );
}

#[test]
fn test_asm_macro_reports_label_errors() {
    let duplicate = crate::x86_64_asm! {
        label("x");
        label("x");
        ret();
    };
    assert!(matches!(duplicate, Err(JitError::DuplicateLabel(ref l)) if l == "x"));

    let unresolved = crate::x86_64_asm! {
        jmp("missing");
    };
    assert!(matches!(unresolved, Err(JitError::UnresolvedLabel(_))));
}

#[test]
fn test_builder_trait_clear() {
    let mut builder = <X86_64InstructionBuilder as InstructionBuilder<Instruction>>::new();
    <X86_64InstructionBuilder as InstructionBuilder<Instruction>>::push(&mut builder, encode_ret());
    assert_eq!(builder.buffer().bytes(), &[0xc3]);
    <X86_64InstructionBuilder as InstructionBuilder<Instruction>>::clear(&mut builder);
    assert!(builder.buffer().is_empty());
}

#[cfg(target_arch = "x86_64")]
mod execution {
    use super::*;
    use crate::common::buffer::CodeBuffer;
    use crate::common::jit::{
        ArenaConfig, ExecutableMemoryArena, GuardedArena, InvocationHandle, JitFunction,
        ReturnType, ReturnValue, Signature, TypedHandle,
    };
    use crate::x86_64::ImmediateSlot;

    fn committed(buf: &CodeBuffer) -> ExecutableMemoryArena {
        let mut arena = ExecutableMemoryArena::allocate(4096).unwrap();
        arena.commit(buf).unwrap();
        arena
    }

    #[test]
    fn test_fibonacci_matches_reference() {
        let arena = committed(&routines::fibonacci().unwrap());
        let fib = unsafe { TypedHandle::<fn(i32) -> i32>::bind(&arena, 0) }.unwrap();

        let first: Vec<i32> = (0..=10).map(|n| fib.call(n).unwrap()).collect();
        assert_eq!(first, vec![0, 1, 1, 2, 3, 5, 8, 13, 21, 34, 55]);
        for n in 0..=20 {
            assert_eq!(fib.call(n).unwrap(), fib_reference(n), "fib({})", n);
        }
        assert_eq!(fib.call(-3).unwrap(), -3);
    }

    #[test]
    fn test_deadbeef_round_trip() {
        let (buf, _) = routines::constant_return(0xdead_beef);
        let arena = committed(&buf);
        assert_eq!(arena.read_back(0, buf.len()).unwrap(), buf.bytes());

        let handle =
            unsafe { InvocationHandle::bind(&arena, 0, Signature::new(0, ReturnType::U32)) }.unwrap();
        assert_eq!(handle.call(&[]).unwrap(), ReturnValue::U32(0xdead_beef));
    }

    fn patch_loop(config: ArenaConfig) {
        let (buf, slot) = routines::constant_return(0);
        let mut arena = ExecutableMemoryArena::with_config(4096, config).unwrap();
        arena.commit(&buf).unwrap();
        let get = unsafe { TypedHandle::<fn() -> u32>::bind(&arena, 0) }.unwrap();
        assert_eq!(get.call().unwrap(), 0);

        let mut observed = Vec::new();
        for v in (100..=1000).step_by(100) {
            slot.patch(&mut arena, v).unwrap();
            observed.push(get.call().unwrap());
        }
        assert_eq!(observed, (100..=1000).step_by(100).collect::<Vec<u32>>());
        assert_eq!(observed.len(), 10);
        assert!(get.handle().is_stale());
        // one commit plus ten patches
        assert_eq!(arena.generation(), 11);
    }

    #[test]
    fn test_patch_loop_strict() {
        patch_loop(ArenaConfig::strict());
    }

    #[test]
    fn test_patch_loop_permissive() {
        patch_loop(ArenaConfig::permissive_rwx_self_modification());
    }

    #[test]
    fn test_call_after_release() {
        let mut arena = committed(&routines::constant_return(1).0);
        let get = unsafe { TypedHandle::<fn() -> u32>::bind(&arena, 0) }.unwrap();
        assert_eq!(get.call().unwrap(), 1);

        arena.release();
        assert!(matches!(get.call(), Err(JitError::UseAfterRelease)));
    }

    #[test]
    fn test_sum_args_all_arities() {
        let args = [1u64, 20, 300, 4_000, 50_000, 600_000];
        for n in 0..=6u8 {
            let arena = committed(&routines::sum_args(n).unwrap());
            let handle =
                unsafe { InvocationHandle::bind(&arena, 0, Signature::new(n, ReturnType::U64)) }
                    .unwrap();
            let expected: u64 = args[..n as usize].iter().sum();
            assert_eq!(handle.call(&args[..n as usize]).unwrap().as_u64(), expected);
        }
    }

    #[test]
    fn test_six_argument_typed_call() {
        let arena = committed(&routines::sum_args(6).unwrap());
        let sum = unsafe { TypedHandle::<fn(u64, u64, u64, u64, u64, u64) -> u64>::bind(&arena, 0) }
            .unwrap();
        assert_eq!(sum.call(1, 2, 3, 4, 5, u64::MAX - 15).unwrap(), u64::MAX);
    }

    #[test]
    fn test_clamp() {
        let arena = committed(&routines::clamp(-5, 5).unwrap());
        let clamp = unsafe { TypedHandle::<fn(i32) -> i32>::bind(&arena, 0) }.unwrap();
        assert_eq!(clamp.call(-100).unwrap(), -5);
        assert_eq!(clamp.call(-5).unwrap(), -5);
        assert_eq!(clamp.call(3).unwrap(), 3);
        assert_eq!(clamp.call(5).unwrap(), 5);
        assert_eq!(clamp.call(i32::MAX).unwrap(), 5);
    }

    #[test]
    fn test_add_mul() {
        let arena = committed(&routines::add_mul(7, -6, 9));
        let f = unsafe { TypedHandle::<fn() -> i32>::bind(&arena, 0) }.unwrap();
        assert_eq!(f.call().unwrap(), 7 + -6 * 9);
    }

    #[test]
    fn test_routines_share_one_arena() {
        let fib = routines::fibonacci().unwrap();
        let (konst, slot) = routines::constant_return(11);
        let mut arena = ExecutableMemoryArena::allocate(256).unwrap();
        arena.commit_at(0, &fib).unwrap();
        arena.commit_at(64, &konst).unwrap();

        let fib_h = unsafe { TypedHandle::<fn(i32) -> i32>::bind(&arena, 0) }.unwrap();
        let konst_h = unsafe { TypedHandle::<fn() -> u32>::bind(&arena, 64) }.unwrap();
        assert_eq!(fib_h.call(12).unwrap(), 144);
        assert_eq!(konst_h.call().unwrap(), 11);

        arena.overwrite(64 + slot.offset(), &ImmediateSlot::encode(12)).unwrap();
        assert_eq!(konst_h.call().unwrap(), 12);
        assert_eq!(fib_h.call(12).unwrap(), 144);
    }

    #[test]
    fn test_builder_function() {
        let mut builder = X86_64InstructionBuilder::new();
        builder
            .mov64(reg::RAX, reg::RDI)
            .imul64(reg::RAX, reg::RSI)
            .sub64_imm8(reg::RAX, 1)
            .ret();
        let f: JitFunction<fn(i64, i64) -> i64> = unsafe { builder.function() }.unwrap();
        assert_eq!(f.call(-6, 7).unwrap(), -43);
    }

    #[test]
    fn test_function_resolves_labels() {
        let mut builder = X86_64InstructionBuilder::new();
        builder.mov32(reg::EAX, reg::EDI).cmp32_imm8(reg::EAX, 0).jge("done");
        builder.xor32(reg::EAX, reg::EAX).sub32(reg::EAX, reg::EDI);
        builder.label("done").unwrap().ret();
        let abs = unsafe { builder.function::<fn(i32) -> i32>() }.unwrap();
        assert_eq!(abs.call(-9).unwrap(), 9);
        assert_eq!(abs.call(4).unwrap(), 4);
    }

    #[test]
    fn test_near_branches_execute() {
        let code = crate::x86_64_asm! {
            mov32_imm(reg::EAX, 1);
            cmp32_imm8(reg::EDI, 0);
            jcc_near(Condition::NE, "nonzero");
            mov32_imm(reg::EAX, 2);
            jmp_near("out");
            label("nonzero");
            mov32_imm(reg::EAX, 3);
            label("out");
            ret();
        }
        .unwrap();
        let arena = committed(&code);
        let f = unsafe { TypedHandle::<fn(u32) -> u32>::bind(&arena, 0) }.unwrap();
        assert_eq!(f.call(0).unwrap(), 2);
        assert_eq!(f.call(1).unwrap(), 3);
    }

    #[test]
    fn test_guarded_patching() {
        let (buf, slot) = routines::constant_return(0);
        let guarded = GuardedArena::new(ExecutableMemoryArena::allocate(64).unwrap());
        guarded.commit(&buf).unwrap();
        let handle = unsafe { guarded.bind(0, Signature::new(0, ReturnType::U32)) }.unwrap();

        for v in [5u32, 50, 500] {
            guarded.overwrite(slot.offset(), &ImmediateSlot::encode(v)).unwrap();
            assert_eq!(handle.call(&[]).unwrap(), ReturnValue::U32(v));
        }
    }
}
