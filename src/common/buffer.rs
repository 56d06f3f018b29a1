//! Code buffer: the byte image of a single routine plus its labels and
//! pending branch fixups.

use std::collections::HashMap;

use crate::common::error::{JitError, JitResult};
use crate::common::reloc::{DisplacementWidth, PatchSite, RelocationResolver};

/// An append-only machine code buffer with named branch targets.
///
/// Branches may reference labels that are marked later (forward references);
/// [`CodeBuffer::resolve`] fills in every displacement once all labels exist.
/// Until it is committed the buffer is a plain value with no ties to process
/// memory.
///
/// # Example
///
/// ```rust
/// use jit_hotpatch::common::buffer::CodeBuffer;
/// use jit_hotpatch::common::reloc::DisplacementWidth;
///
/// let mut buf = CodeBuffer::new();
/// buf.emit_branch(&[0xeb], DisplacementWidth::Rel8, "skip"); // jmp skip
/// buf.emit_bytes(&[0x90]);                                  // nop
/// buf.mark_label("skip")?;
/// buf.emit_bytes(&[0xc3]);                                  // ret
/// buf.resolve()?;
/// assert_eq!(buf.bytes(), &[0xeb, 0x01, 0x90, 0xc3]);
/// # Ok::<(), jit_hotpatch::JitError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeBuffer {
    bytes: Vec<u8>,
    labels: HashMap<String, usize>,
    patches: Vec<PatchSite>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append literal bytes.
    pub fn emit_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    /// Append a branch opcode followed by a zeroed displacement field and
    /// record a patch site pointing at `target`.
    pub fn emit_branch(
        &mut self,
        opcode_prefix: &[u8],
        width: DisplacementWidth,
        target: &str,
    ) -> &mut Self {
        self.bytes.extend_from_slice(opcode_prefix);
        let field_offset = self.bytes.len();
        self.bytes.resize(field_offset + width.bytes(), 0);
        self.patches.push(PatchSite {
            field_offset,
            width,
            instruction_end: self.bytes.len(),
            label: target.to_string(),
        });
        self
    }

    /// Bind `name` to the current end of the buffer.
    pub fn mark_label(&mut self, name: &str) -> JitResult<&mut Self> {
        if self.labels.contains_key(name) {
            return Err(JitError::DuplicateLabel(name.to_string()));
        }
        self.labels.insert(name.to_string(), self.bytes.len());
        Ok(self)
    }

    /// Patch every pending branch.
    ///
    /// Either every site is written and the pending list is cleared, or an
    /// error is returned and the buffer is left exactly as it was. Calling it
    /// again after success is a no-op.
    pub fn resolve(&mut self) -> JitResult<()> {
        if self.patches.is_empty() {
            return Ok(());
        }
        RelocationResolver::new(&self.labels).apply_all(&mut self.bytes, &self.patches)?;
        log::trace!(
            "resolved {} patch site(s) over {} bytes",
            self.patches.len(),
            self.bytes.len()
        );
        self.patches.clear();
        Ok(())
    }

    /// Offset a label was marked at, if any
    pub fn label_offset(&self, name: &str) -> Option<usize> {
        self.labels.get(name).copied()
    }

    /// Patch sites still waiting for [`CodeBuffer::resolve`]
    pub fn pending_patches(&self) -> &[PatchSite] {
        &self.patches
    }

    pub fn is_resolved(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Drop all bytes, labels and patch sites
    pub fn clear(&mut self) {
        self.bytes.clear();
        self.labels.clear();
        self.patches.clear();
    }
}
