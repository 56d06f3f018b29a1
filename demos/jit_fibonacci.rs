//! JIT Fibonacci Example
//!
//! Assembles an iterative Fibonacci routine with forward and backward
//! branches, commits it into a W^X arena and checks it against a Rust
//! implementation, then times fib(30) through the JIT against the native
//! version.
//!
//! Set `RUST_LOG=debug` (or `trace`) to watch allocation, commit and
//! relocation.

use jit_hotpatch::x86_64::routines;
use jit_hotpatch::{ExecutableMemoryArena, TypedHandle};

use std::hint::black_box;
use std::time::Instant;

const BENCH_N: i32 = 30;
const BENCH_ITERATIONS: u32 = 100_000;

fn fib(n: i32) -> i32 {
    let (mut a, mut b) = (0i32, 1i32);
    for _ in 0..n {
        let t = a.wrapping_add(b);
        a = b;
        b = t;
    }
    a
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let code = routines::fibonacci()?;
    println!("fibonacci: {} bytes", code.len());
    for (label, offset) in ["loop", "return_n"]
        .iter()
        .filter_map(|l| code.label_offset(l).map(|o| (l, o)))
    {
        println!("  {:<8} @ {:#04x}", label, offset);
    }
    println!("  {:02x?}", code.bytes());

    let mut arena = ExecutableMemoryArena::allocate(4096)?;
    arena.commit(&code)?;
    assert_eq!(arena.read_back(0, code.len())?, code.bytes());

    let jit_fib = unsafe { TypedHandle::<fn(i32) -> i32>::bind(&arena, 0)? };
    for n in 0..=20 {
        let value = jit_fib.call(n)?;
        assert_eq!(value, fib(n), "fib({})", n);
        println!("fib({:>2}) = {}", n, value);
    }

    let start = Instant::now();
    let mut jit_sum = 0i64;
    for _ in 0..BENCH_ITERATIONS {
        jit_sum += i64::from(jit_fib.call(black_box(BENCH_N))?);
    }
    let jit_time = start.elapsed();

    let start = Instant::now();
    let mut native_sum = 0i64;
    for _ in 0..BENCH_ITERATIONS {
        native_sum += i64::from(fib(black_box(BENCH_N)));
    }
    let native_time = start.elapsed();

    assert_eq!(jit_sum, native_sum);
    println!(
        "fib({}) x {}: jit {:?} ({:.1} ns/call), native {:?} ({:.1} ns/call)",
        BENCH_N,
        BENCH_ITERATIONS,
        jit_time,
        jit_time.as_nanos() as f64 / f64::from(BENCH_ITERATIONS),
        native_time,
        native_time.as_nanos() as f64 / f64::from(BENCH_ITERATIONS),
    );

    arena.release();
    match jit_fib.call(10) {
        Err(e) => println!("after release: {}", e),
        Ok(v) => println!("unexpected result after release: {}", v),
    }

    Ok(())
}
