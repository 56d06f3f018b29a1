use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use region::Protection;

use crate::common::buffer::CodeBuffer;
use crate::common::error::{JitError, JitResult};

/// How a committed region trades safety for convenience when it is patched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtectionMode {
    /// Write-xor-execute: the region is never writable and executable at the
    /// same time. Every write into a committed region flips it to read/write,
    /// copies the bytes and flips it back to read/execute.
    #[default]
    StrictWx,
    /// The region stays readable, writable and executable once committed.
    /// Writes go straight into live code.
    PermissiveRwx,
}

/// Arena configuration.
///
/// The default is strict W^X with instruction cache maintenance enabled.
/// Permissive mode can only be obtained through
/// [`ArenaConfig::permissive_rwx_self_modification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaConfig {
    mode: ProtectionMode,
    flush_icache: bool,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            mode: ProtectionMode::StrictWx,
            flush_icache: true,
        }
    }
}

impl ArenaConfig {
    /// Strict W^X configuration (same as `Default`)
    pub fn strict() -> Self {
        Self::default()
    }

    /// Opt in to simultaneously writable and executable memory.
    ///
    /// This is the mode the classic "patch the immediate between calls"
    /// technique was written against. It leaves RWX pages in the process for
    /// the lifetime of the arena; prefer [`ArenaConfig::strict`], which supports
    /// the same overwrite pattern with a protection flip per write.
    pub fn permissive_rwx_self_modification() -> Self {
        Self {
            mode: ProtectionMode::PermissiveRwx,
            ..Self::default()
        }
    }

    /// Skip instruction cache maintenance after writes.
    ///
    /// Only sound on architectures with coherent instruction caches (x86-64).
    pub fn without_icache_flush(mut self) -> Self {
        self.flush_icache = false;
        self
    }

    pub fn mode(&self) -> ProtectionMode {
        self.mode
    }

    pub fn flush_icache(&self) -> bool {
        self.flush_icache
    }

    fn executable_protection(&self) -> Protection {
        match self.mode {
            ProtectionMode::StrictWx => Protection::READ_EXECUTE,
            ProtectionMode::PermissiveRwx => Protection::READ_WRITE_EXECUTE,
        }
    }
}

/// One anonymous mapping. Shared (weakly) with every handle derived from it.
///
/// `executable` is true only while the pages are executable; whenever it is
/// false the pages are writable.
pub(crate) struct Region {
    allocation: region::Allocation,
    base: *mut u8,
    executable: AtomicBool,
    generation: AtomicU64,
    #[cfg(test)]
    fail_protect: parking_lot::Mutex<Option<Protection>>,
}

// The mapping is plain memory owned by this struct; all access goes through
// raw pointers under the concurrency contract documented on the arena.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    pub(crate) fn base(&self) -> *const u8 {
        self.base
    }

    pub(crate) fn is_executable(&self) -> bool {
        self.executable.load(Ordering::Acquire)
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn mapped_len(&self) -> usize {
        self.allocation.len()
    }

    fn protect(&self, protection: Protection) -> JitResult<()> {
        #[cfg(test)]
        {
            let mut fail = self.fail_protect.lock();
            if *fail == Some(protection) {
                *fail = None;
                return Err(JitError::PermissionChangeFailed(region::Error::InvalidParameter(
                    "injected protection failure",
                )));
            }
        }
        unsafe { region::protect(self.base as *const u8, self.mapped_len(), protection) }
            .map_err(JitError::PermissionChangeFailed)
    }

    /// Make the next transition to `protection` fail once.
    #[cfg(test)]
    pub(crate) fn fail_next_protect(&self, protection: Protection) {
        *self.fail_protect.lock() = Some(protection);
    }
}

/// An executable memory region that exclusively owns one OS mapping.
///
/// Lifecycle: [`allocate`](Self::allocate) → [`commit`](Self::commit) (one or
/// more times) / [`overwrite`](Self::overwrite) → [`release`](Self::release)
/// (or drop). Each write bumps a generation counter.
///
/// # Concurrency
///
/// The arena performs no locking. Handles may be called from several threads,
/// but an `overwrite` or `commit` that touches bytes an in-flight call is
/// executing, or that flips page permissions under it, is a data race with
/// undefined behavior. Use [`GuardedArena`](super::GuardedArena) when callers
/// and writers can overlap. A call already running when a write happens may
/// observe either version of the code; only calls that start after the write
/// returns are guaranteed to see the new bytes.
///
/// # Example
///
/// ```rust
/// use jit_hotpatch::common::buffer::CodeBuffer;
/// use jit_hotpatch::common::jit::ExecutableMemoryArena;
///
/// let mut buf = CodeBuffer::new();
/// buf.emit_bytes(&[0xb8, 0xef, 0xbe, 0xad, 0xde, 0xc3]); // mov eax, 0xdeadbeef; ret
///
/// let mut arena = ExecutableMemoryArena::allocate(4096)?;
/// arena.commit(&buf)?;
/// assert_eq!(arena.read_back(0, buf.len())?, buf.bytes());
/// arena.release();
/// # Ok::<(), jit_hotpatch::JitError>(())
/// ```
pub struct ExecutableMemoryArena {
    region: Option<Arc<Region>>,
    capacity: usize,
    config: ArenaConfig,
    generation: u64,
    /// Set by the first commit; writes after it leave the region executable
    committed: bool,
}

impl ExecutableMemoryArena {
    /// Map at least `capacity` bytes of private, read/write, non-executable memory.
    pub fn allocate(capacity: usize) -> JitResult<Self> {
        Self::with_config(capacity, ArenaConfig::default())
    }

    pub fn with_config(capacity: usize, config: ArenaConfig) -> JitResult<Self> {
        let mut allocation =
            region::alloc(capacity, Protection::READ_WRITE).map_err(JitError::AllocationFailed)?;
        let base = allocation.as_mut_ptr::<u8>();

        if config.mode == ProtectionMode::PermissiveRwx {
            log::warn!(
                "arena at {:p} will be writable and executable at the same time",
                base
            );
        }
        log::debug!(
            "allocated {} bytes ({} mapped) at {:p}, mode {:?}",
            capacity,
            allocation.len(),
            base,
            config.mode
        );

        Ok(Self {
            region: Some(Arc::new(Region {
                allocation,
                base,
                executable: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                #[cfg(test)]
                fail_protect: parking_lot::Mutex::new(None),
            })),
            capacity,
            config,
            generation: 0,
            committed: false,
        })
    }

    /// Copy a resolved buffer to offset 0 and make the region executable.
    pub fn commit(&mut self, buffer: &CodeBuffer) -> JitResult<()> {
        self.commit_at(0, buffer)
    }

    /// Copy a resolved buffer to `offset` and make the region executable.
    ///
    /// Lets several routines share one region.
    pub fn commit_at(&mut self, offset: usize, buffer: &CodeBuffer) -> JitResult<()> {
        let region = Arc::clone(self.live()?);
        if !buffer.is_resolved() {
            return Err(JitError::UnresolvedPatches {
                pending: buffer.pending_patches().len(),
            });
        }
        self.check_span(offset, buffer.len())?;

        log::debug!(
            "committing {} bytes at {:p}+{:#x}",
            buffer.len(),
            region.base(),
            offset
        );
        self.write_span(&region, offset, buffer.bytes(), true)
    }

    /// Overwrite bytes of the region in place.
    ///
    /// On a committed region this is the self-modification primitive: calls
    /// that start after it returns execute the new bytes. In strict mode the
    /// region is briefly read/write and not executable while the copy happens.
    pub fn overwrite(&mut self, offset: usize, bytes: &[u8]) -> JitResult<()> {
        let region = Arc::clone(self.live()?);
        self.check_span(offset, bytes.len())?;

        log::trace!(
            "overwriting {} bytes at {:p}+{:#x}",
            bytes.len(),
            region.base(),
            offset
        );
        self.write_span(&region, offset, bytes, false)
    }

    /// Copy `len` bytes out of the region.
    pub fn read_back(&self, offset: usize, len: usize) -> JitResult<Vec<u8>> {
        let region = self.live()?;
        self.check_span(offset, len)?;

        let mut out = vec![0u8; len];
        unsafe {
            ptr::copy_nonoverlapping(region.base().add(offset), out.as_mut_ptr(), len);
        }
        Ok(out)
    }

    /// Unmap the region.
    ///
    /// Every handle derived from this arena becomes invalid; calling one
    /// afterwards reports [`JitError::UseAfterRelease`]. A call that is
    /// already running keeps the mapping alive until it returns. Calling
    /// `release` again is a no-op.
    pub fn release(&mut self) {
        if let Some(region) = self.region.take() {
            log::debug!(
                "releasing {} bytes at {:p} after {} write(s)",
                region.mapped_len(),
                region.base(),
                self.generation
            );
        }
    }

    /// Requested capacity in bytes; the bound for commits and entry offsets
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of commits and overwrites performed so far
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn config(&self) -> ArenaConfig {
        self.config
    }

    pub fn mode(&self) -> ProtectionMode {
        self.config.mode
    }

    pub fn is_executable(&self) -> bool {
        self.region.as_ref().is_some_and(|r| r.is_executable())
    }

    pub fn is_released(&self) -> bool {
        self.region.is_none()
    }

    /// Base address of the mapping, for diagnostics
    pub fn base(&self) -> Option<*const u8> {
        self.region.as_ref().map(|r| r.base())
    }

    pub(crate) fn region(&self) -> JitResult<&Arc<Region>> {
        self.live()
    }

    fn live(&self) -> JitResult<&Arc<Region>> {
        self.region.as_ref().ok_or(JitError::UseAfterRelease)
    }

    fn check_span(&self, offset: usize, len: usize) -> JitResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.capacity => Ok(()),
            _ => Err(JitError::CapacityExceeded {
                offset,
                len,
                capacity: self.capacity,
            }),
        }
    }

    /// Copy `bytes` in and leave the region executable if it has been committed.
    ///
    /// A failed permission change leaves the region either executable and
    /// untouched, or writable and not executable (with the new bytes and a
    /// bumped generation). Both states are safe to retry from.
    fn write_span(
        &mut self,
        region: &Region,
        offset: usize,
        bytes: &[u8],
        make_executable: bool,
    ) -> JitResult<()> {
        let executable_now = region.is_executable();
        let strict = self.config.mode == ProtectionMode::StrictWx;

        if strict && executable_now {
            region.protect(Protection::READ_WRITE)?;
            region.executable.store(false, Ordering::Release);
        }

        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), region.base.add(offset), bytes.len());
        }
        self.generation += 1;
        region.generation.store(self.generation, Ordering::Release);

        if make_executable {
            self.committed = true;
        }
        if !self.committed {
            return Ok(());
        }

        if self.config.flush_icache {
            flush_icache(unsafe { region.base().add(offset) }, bytes.len())?;
        }
        // permissive regions stay RWX once their first transition succeeded
        if strict || !executable_now {
            region.protect(self.config.executable_protection())?;
        }
        region.executable.store(true, Ordering::Release);
        Ok(())
    }
}

impl Drop for ExecutableMemoryArena {
    fn drop(&mut self) {
        self.release();
    }
}

fn flush_icache(ptr: *const u8, len: usize) -> JitResult<()> {
    if len == 0 {
        return Ok(());
    }
    unsafe { wasmtime_jit_icache_coherence::clear_cache(ptr as *const c_void, len) }
        .map_err(JitError::CacheFlushFailed)?;
    wasmtime_jit_icache_coherence::pipeline_flush_mt().map_err(JitError::CacheFlushFailed)
}
