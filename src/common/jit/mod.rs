mod arena;
mod function;
mod guard;
mod handle;

pub use arena::{ArenaConfig, ExecutableMemoryArena, ProtectionMode};
pub use function::JitFunction;
pub use guard::{GuardedArena, GuardedHandle};
pub use handle::{
    FnSignature, IntArg, IntRet, InvocationHandle, ReturnType, ReturnValue, Signature,
    TypedHandle, MAX_REGISTER_ARGS,
};
