//! Self-Modification Example
//!
//! Commits `mov eax, imm32; ret`, then rewrites the immediate between calls.
//! Runs once with the default strict W^X arena and once with the permissive
//! RWX arena (which logs a warning), then once more through a guarded arena
//! shared with a calling thread.

use jit_hotpatch::x86_64::routines;
use jit_hotpatch::{
    ArenaConfig, ExecutableMemoryArena, GuardedArena, ReturnType, Signature, TypedHandle,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

fn patch_between_calls(config: ArenaConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (code, slot) = routines::constant_return(0);

    let mut arena = ExecutableMemoryArena::with_config(4096, config)?;
    arena.commit(&code)?;
    let get = unsafe { TypedHandle::<fn() -> u32>::bind(&arena, 0)? };
    let initial = get.call()?;
    assert_eq!(initial, 0);
    println!("[{:?}] initial: {}", arena.mode(), initial);

    for value in (100..=1000).step_by(100) {
        slot.patch(&mut arena, value)?;
        let observed = get.call()?;
        assert_eq!(observed, value);
        println!(
            "[{:?}] generation {:>2}: {}",
            arena.mode(),
            arena.generation(),
            observed
        );
    }
    assert_eq!(arena.generation(), 11);
    Ok(())
}

fn patch_while_calling() -> Result<(), Box<dyn std::error::Error>> {
    let (code, slot) = routines::constant_return(0);

    let guarded = GuardedArena::new(ExecutableMemoryArena::allocate(4096)?);
    guarded.commit(&code)?;
    let handle = unsafe { guarded.bind(0, Signature::new(0, ReturnType::U32))? };

    let done = Arc::new(AtomicBool::new(false));
    let caller = {
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut calls = 0u64;
            let mut last = 0;
            while !done.load(Ordering::Relaxed) {
                let v = handle.call(&[]).map(|v| v.as_u64()).unwrap_or(u64::MAX);
                assert!(v >= last, "value went backwards: {} < {}", v, last);
                last = v;
                calls += 1;
            }
            (calls, last)
        })
    };

    for value in 1..=500u32 {
        guarded.overwrite(slot.offset(), &value.to_le_bytes())?;
    }
    done.store(true, Ordering::Relaxed);

    let (calls, last) = caller.join().map_err(|_| "caller thread panicked")?;
    println!("[guarded] {} calls, last value observed {}", calls, last);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    patch_between_calls(ArenaConfig::strict())?;
    patch_between_calls(ArenaConfig::permissive_rwx_self_modification())?;
    patch_while_calling()?;
    Ok(())
}
