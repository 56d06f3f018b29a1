use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use super::arena::{ExecutableMemoryArena, Region};
use crate::common::error::{JitError, JitResult};

/// Integer arguments passed in registers by the System V AMD64 convention
/// (RDI, RSI, RDX, RCX, R8, R9).
pub const MAX_REGISTER_ARGS: u8 = 6;

/// Width and signedness of the value returned in RAX/EAX
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnType {
    I32,
    U32,
    I64,
    U64,
}

impl ReturnType {
    /// Reinterpret the raw contents of RAX.
    pub fn reinterpret(self, raw: u64) -> ReturnValue {
        match self {
            ReturnType::I32 => ReturnValue::I32(raw as u32 as i32),
            ReturnType::U32 => ReturnValue::U32(raw as u32),
            ReturnType::I64 => ReturnValue::I64(raw as i64),
            ReturnType::U64 => ReturnValue::U64(raw),
        }
    }
}

/// A value returned by generated code, tagged with its declared type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnValue {
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
}

impl ReturnValue {
    /// Widen to `i64` (sign- or zero-extending per the declared type)
    pub fn as_i64(self) -> i64 {
        match self {
            ReturnValue::I32(v) => v as i64,
            ReturnValue::U32(v) => v as i64,
            ReturnValue::I64(v) => v,
            ReturnValue::U64(v) => v as i64,
        }
    }

    /// Widen to `u64` (sign- or zero-extending per the declared type)
    pub fn as_u64(self) -> u64 {
        match self {
            ReturnValue::I32(v) => v as i64 as u64,
            ReturnValue::U32(v) => v as u64,
            ReturnValue::I64(v) => v as u64,
            ReturnValue::U64(v) => v,
        }
    }

    pub fn return_type(self) -> ReturnType {
        match self {
            ReturnValue::I32(_) => ReturnType::I32,
            ReturnValue::U32(_) => ReturnType::U32,
            ReturnValue::I64(_) => ReturnType::I64,
            ReturnValue::U64(_) => ReturnType::U64,
        }
    }
}

/// Argument count and return type of a generated routine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature {
    pub params: u8,
    pub ret: ReturnType,
}

impl Signature {
    pub const fn new(params: u8, ret: ReturnType) -> Self {
        Self { params, ret }
    }

    fn validate(&self) -> JitResult<()> {
        if self.params > MAX_REGISTER_ARGS {
            return Err(JitError::InvalidSignature {
                params: self.params,
                max: MAX_REGISTER_ARGS,
            });
        }
        Ok(())
    }
}

/// A typed entry point inside an [`ExecutableMemoryArena`].
///
/// The handle does not keep the region alive. Once the arena is released,
/// [`call`](Self::call) returns [`JitError::UseAfterRelease`]. In-place
/// overwrites keep the handle valid: the next call runs the new bytes.
///
/// State machine: `Bound → (call)* → Invalid` (on release); there is no way back.
#[derive(Debug, Clone)]
pub struct InvocationHandle {
    region: Weak<Region>,
    entry: usize,
    signature: Signature,
    bound_generation: u64,
}

impl InvocationHandle {
    /// Bind a handle to `offset` inside `arena`.
    ///
    /// # Safety
    ///
    /// This is the only way to turn bytes into something callable. The caller
    /// must ensure that the code at `offset` (as it stands whenever the handle
    /// is called) is a complete System V AMD64 function matching `signature`.
    pub unsafe fn bind(
        arena: &ExecutableMemoryArena,
        offset: usize,
        signature: Signature,
    ) -> JitResult<Self> {
        signature.validate()?;
        let region = arena.region()?;
        if offset >= arena.capacity() {
            return Err(JitError::OffsetOutOfBounds {
                offset,
                size: arena.capacity(),
            });
        }

        Ok(Self {
            region: Arc::downgrade(region),
            entry: offset,
            signature,
            bound_generation: region.generation(),
        })
    }

    /// Call the routine with `args` in declaration order.
    ///
    /// Blocks until the routine returns; there is no timeout.
    pub fn call(&self, args: &[u64]) -> JitResult<ReturnValue> {
        if args.len() != self.signature.params as usize {
            return Err(JitError::ArgumentCountMismatch {
                expected: self.signature.params,
                got: args.len(),
            });
        }
        self.call_raw(args).map(|raw| self.signature.ret.reinterpret(raw))
    }

    pub fn signature(&self) -> Signature {
        self.signature
    }

    pub fn offset(&self) -> usize {
        self.entry
    }

    /// Region generation observed when the handle was bound
    pub fn bound_generation(&self) -> u64 {
        self.bound_generation
    }

    /// Whether the region has been written since the handle was bound.
    ///
    /// A stale handle is still callable; this only reports that the code it
    /// points at may differ from what was there at bind time.
    pub fn is_stale(&self) -> bool {
        self.region
            .upgrade()
            .map_or(true, |r| r.generation() != self.bound_generation)
    }

    /// Whether the owning region has been released
    pub fn is_released(&self) -> bool {
        self.region.strong_count() == 0
    }

    pub(crate) fn call_raw(&self, args: &[u64]) -> JitResult<u64> {
        // Holding the strong reference keeps the mapping alive for the call.
        let region = self.region.upgrade().ok_or(JitError::UseAfterRelease)?;
        if !region.is_executable() {
            return Err(JitError::NotExecutable);
        }
        let entry = unsafe { region.base().add(self.entry) };
        unsafe { invoke(entry, args) }
    }
}

#[cfg(target_arch = "x86_64")]
unsafe fn invoke(entry: *const u8, args: &[u64]) -> JitResult<u64> {
    use std::mem::transmute;

    type F0 = extern "sysv64" fn() -> u64;
    type F1 = extern "sysv64" fn(u64) -> u64;
    type F2 = extern "sysv64" fn(u64, u64) -> u64;
    type F3 = extern "sysv64" fn(u64, u64, u64) -> u64;
    type F4 = extern "sysv64" fn(u64, u64, u64, u64) -> u64;
    type F5 = extern "sysv64" fn(u64, u64, u64, u64, u64) -> u64;
    type F6 = extern "sysv64" fn(u64, u64, u64, u64, u64, u64) -> u64;

    let raw = match *args {
        [] => transmute::<*const u8, F0>(entry)(),
        [a] => transmute::<*const u8, F1>(entry)(a),
        [a, b] => transmute::<*const u8, F2>(entry)(a, b),
        [a, b, c] => transmute::<*const u8, F3>(entry)(a, b, c),
        [a, b, c, d] => transmute::<*const u8, F4>(entry)(a, b, c, d),
        [a, b, c, d, e] => transmute::<*const u8, F5>(entry)(a, b, c, d, e),
        [a, b, c, d, e, f] => transmute::<*const u8, F6>(entry)(a, b, c, d, e, f),
        _ => {
            return Err(JitError::InvalidSignature {
                params: args.len().min(u8::MAX as usize) as u8,
                max: MAX_REGISTER_ARGS,
            })
        }
    };
    Ok(raw)
}

#[cfg(not(target_arch = "x86_64"))]
unsafe fn invoke(_entry: *const u8, _args: &[u64]) -> JitResult<u64> {
    Err(JitError::UnsupportedHost)
}

/// Integer types that can be passed in an argument register
pub trait IntArg: Copy {
    fn into_register(self) -> u64;
}

/// Integer types that can be returned in RAX/EAX
pub trait IntRet: Copy {
    const RETURN_TYPE: ReturnType;

    fn from_register(raw: u64) -> Self;
}

impl IntArg for i32 {
    fn into_register(self) -> u64 {
        self as i64 as u64
    }
}

impl IntArg for u32 {
    fn into_register(self) -> u64 {
        self as u64
    }
}

impl IntArg for i64 {
    fn into_register(self) -> u64 {
        self as u64
    }
}

impl IntArg for u64 {
    fn into_register(self) -> u64 {
        self
    }
}

impl IntRet for i32 {
    const RETURN_TYPE: ReturnType = ReturnType::I32;

    fn from_register(raw: u64) -> Self {
        raw as u32 as i32
    }
}

impl IntRet for u32 {
    const RETURN_TYPE: ReturnType = ReturnType::U32;

    fn from_register(raw: u64) -> Self {
        raw as u32
    }
}

impl IntRet for i64 {
    const RETURN_TYPE: ReturnType = ReturnType::I64;

    fn from_register(raw: u64) -> Self {
        raw as i64
    }
}

impl IntRet for u64 {
    const RETURN_TYPE: ReturnType = ReturnType::U64;

    fn from_register(raw: u64) -> Self {
        raw
    }
}

/// Rust function pointer types that describe a supported [`Signature`].
///
/// Implemented for `fn(A1, .., An) -> R` with `n <= 6` and integer `A*`/`R`.
pub trait FnSignature {
    const SIGNATURE: Signature;
}

macro_rules! impl_fn_signature {
    ($params:expr; $($arg:ident),*) => {
        impl<$($arg: IntArg,)* R: IntRet> FnSignature for fn($($arg),*) -> R {
            const SIGNATURE: Signature = Signature::new($params, R::RETURN_TYPE);
        }
    };
}

impl_fn_signature!(0;);
impl_fn_signature!(1; A1);
impl_fn_signature!(2; A1, A2);
impl_fn_signature!(3; A1, A2, A3);
impl_fn_signature!(4; A1, A2, A3, A4);
impl_fn_signature!(5; A1, A2, A3, A4, A5);
impl_fn_signature!(6; A1, A2, A3, A4, A5, A6);

/// An [`InvocationHandle`] whose signature is fixed by a Rust function type.
///
/// ```rust,no_run
/// # use jit_hotpatch::common::jit::*;
/// # fn demo(arena: &ExecutableMemoryArena) -> jit_hotpatch::JitResult<()> {
/// let fib = unsafe { TypedHandle::<fn(i32) -> i32>::bind(arena, 0)? };
/// let value = fib.call(10)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TypedHandle<F> {
    handle: InvocationHandle,
    _phantom: PhantomData<F>,
}

impl<F: FnSignature> TypedHandle<F> {
    /// Bind a typed handle at `offset`.
    ///
    /// # Safety
    ///
    /// Same contract as [`InvocationHandle::bind`] with `F::SIGNATURE`.
    pub unsafe fn bind(arena: &ExecutableMemoryArena, offset: usize) -> JitResult<Self> {
        let handle = InvocationHandle::bind(arena, offset, F::SIGNATURE)?;
        Ok(Self {
            handle,
            _phantom: PhantomData,
        })
    }
}

impl<F> TypedHandle<F> {
    /// The untyped handle underneath
    pub fn handle(&self) -> &InvocationHandle {
        &self.handle
    }
}

impl<R: IntRet> TypedHandle<fn() -> R> {
    /// Call with no arguments - natural syntax: func.call()
    pub fn call(&self) -> JitResult<R> {
        self.handle.call_raw(&[]).map(R::from_register)
    }
}

impl<A1: IntArg, R: IntRet> TypedHandle<fn(A1) -> R> {
    /// Call with one argument - natural syntax: func.call(arg)
    pub fn call(&self, arg1: A1) -> JitResult<R> {
        self.handle
            .call_raw(&[arg1.into_register()])
            .map(R::from_register)
    }
}

impl<A1: IntArg, A2: IntArg, R: IntRet> TypedHandle<fn(A1, A2) -> R> {
    pub fn call(&self, arg1: A1, arg2: A2) -> JitResult<R> {
        self.handle
            .call_raw(&[arg1.into_register(), arg2.into_register()])
            .map(R::from_register)
    }
}

impl<A1: IntArg, A2: IntArg, A3: IntArg, R: IntRet> TypedHandle<fn(A1, A2, A3) -> R> {
    pub fn call(&self, arg1: A1, arg2: A2, arg3: A3) -> JitResult<R> {
        self.handle
            .call_raw(&[
                arg1.into_register(),
                arg2.into_register(),
                arg3.into_register(),
            ])
            .map(R::from_register)
    }
}

impl<A1: IntArg, A2: IntArg, A3: IntArg, A4: IntArg, R: IntRet>
    TypedHandle<fn(A1, A2, A3, A4) -> R>
{
    pub fn call(&self, arg1: A1, arg2: A2, arg3: A3, arg4: A4) -> JitResult<R> {
        self.handle
            .call_raw(&[
                arg1.into_register(),
                arg2.into_register(),
                arg3.into_register(),
                arg4.into_register(),
            ])
            .map(R::from_register)
    }
}

impl<A1: IntArg, A2: IntArg, A3: IntArg, A4: IntArg, A5: IntArg, R: IntRet>
    TypedHandle<fn(A1, A2, A3, A4, A5) -> R>
{
    pub fn call(&self, arg1: A1, arg2: A2, arg3: A3, arg4: A4, arg5: A5) -> JitResult<R> {
        self.handle
            .call_raw(&[
                arg1.into_register(),
                arg2.into_register(),
                arg3.into_register(),
                arg4.into_register(),
                arg5.into_register(),
            ])
            .map(R::from_register)
    }
}

impl<A1: IntArg, A2: IntArg, A3: IntArg, A4: IntArg, A5: IntArg, A6: IntArg, R: IntRet>
    TypedHandle<fn(A1, A2, A3, A4, A5, A6) -> R>
{
    /// Call with six arguments, the most the register convention carries
    pub fn call(
        &self,
        arg1: A1,
        arg2: A2,
        arg3: A3,
        arg4: A4,
        arg5: A5,
        arg6: A6,
    ) -> JitResult<R> {
        self.handle
            .call_raw(&[
                arg1.into_register(),
                arg2.into_register(),
                arg3.into_register(),
                arg4.into_register(),
                arg5.into_register(),
                arg6.into_register(),
            ])
            .map(R::from_register)
    }
}
