//! Branch relocation: turning label references into signed displacements.
//!
//! A branch is emitted with a zero-filled displacement field and a [`PatchSite`]
//! describing where that field lives. Once every label is marked the
//! [`RelocationResolver`] computes
//!
//! ```text
//! displacement = label_offset - instruction_end
//! ```
//!
//! and writes it little-endian, two's complement, into the field.

use core::fmt;
use std::collections::HashMap;

use crate::common::error::{JitError, JitResult};

/// Width of a displacement field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplacementWidth {
    /// 1-byte signed field (short `jcc` / `jmp`), range -128..=127
    Rel8,
    /// 4-byte signed field (near `jcc` / `jmp` / `call`)
    Rel32,
}

impl DisplacementWidth {
    /// Size of the field in bytes
    pub fn bytes(self) -> usize {
        match self {
            DisplacementWidth::Rel8 => 1,
            DisplacementWidth::Rel32 => 4,
        }
    }

    /// Smallest representable displacement
    pub fn min(self) -> i64 {
        match self {
            DisplacementWidth::Rel8 => i8::MIN as i64,
            DisplacementWidth::Rel32 => i32::MIN as i64,
        }
    }

    /// Largest representable displacement
    pub fn max(self) -> i64 {
        match self {
            DisplacementWidth::Rel8 => i8::MAX as i64,
            DisplacementWidth::Rel32 => i32::MAX as i64,
        }
    }

    /// Check whether `displacement` fits in this field
    pub fn fits(self, displacement: i64) -> bool {
        (self.min()..=self.max()).contains(&displacement)
    }

    /// Write `displacement` into `field`. The caller has already range-checked it.
    fn write(self, field: &mut [u8], displacement: i64) {
        match self {
            DisplacementWidth::Rel8 => field.copy_from_slice(&(displacement as i8).to_le_bytes()),
            DisplacementWidth::Rel32 => field.copy_from_slice(&(displacement as i32).to_le_bytes()),
        }
    }
}

impl fmt::Display for DisplacementWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplacementWidth::Rel8 => write!(f, "rel8"),
            DisplacementWidth::Rel32 => write!(f, "rel32"),
        }
    }
}

/// A pending displacement field waiting for its label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSite {
    /// Byte offset of the displacement field
    pub field_offset: usize,
    /// Width of the displacement field
    pub width: DisplacementWidth,
    /// Byte offset immediately after the whole branch instruction
    pub instruction_end: usize,
    /// Referenced label
    pub label: String,
}

/// Computes and applies displacements against a fixed label table
pub struct RelocationResolver<'a> {
    labels: &'a HashMap<String, usize>,
}

impl<'a> RelocationResolver<'a> {
    pub fn new(labels: &'a HashMap<String, usize>) -> Self {
        Self { labels }
    }

    /// Compute the displacement for `site` without writing anything.
    pub fn displacement(&self, site: &PatchSite) -> JitResult<i64> {
        let target = self
            .labels
            .get(&site.label)
            .copied()
            .ok_or_else(|| JitError::UnresolvedLabel(site.label.clone()))?;

        let displacement = target as i64 - site.instruction_end as i64;
        if !site.width.fits(displacement) {
            return Err(JitError::DisplacementOutOfRange {
                label: site.label.clone(),
                displacement,
                width: site.width,
            });
        }
        Ok(displacement)
    }

    /// Resolve every site, then write all of them.
    ///
    /// Nothing is written unless every site resolves.
    pub fn apply_all(&self, bytes: &mut [u8], sites: &[PatchSite]) -> JitResult<()> {
        let displacements = sites
            .iter()
            .map(|site| self.displacement(site))
            .collect::<JitResult<Vec<_>>>()?;

        for (site, displacement) in sites.iter().zip(displacements) {
            log::trace!(
                "patch {} at {:#x} -> `{}` ({:+})",
                site.width,
                site.field_offset,
                site.label,
                displacement
            );
            let end = site.field_offset + site.width.bytes();
            site.width.write(&mut bytes[site.field_offset..end], displacement);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(field_offset: usize, width: DisplacementWidth, label: &str) -> PatchSite {
        PatchSite {
            field_offset,
            width,
            instruction_end: field_offset + width.bytes(),
            label: label.to_string(),
        }
    }

    #[test]
    fn test_rel8_bounds() {
        assert!(DisplacementWidth::Rel8.fits(127));
        assert!(DisplacementWidth::Rel8.fits(-128));
        assert!(!DisplacementWidth::Rel8.fits(128));
        assert!(!DisplacementWidth::Rel8.fits(-129));
    }

    #[test]
    fn test_forward_and_backward_displacements() {
        let mut labels = HashMap::new();
        labels.insert("top".to_string(), 0);
        labels.insert("exit".to_string(), 20);
        let resolver = RelocationResolver::new(&labels);

        // jle exit: opcode at 3, field at 4, ends at 5
        assert_eq!(resolver.displacement(&site(4, DisplacementWidth::Rel8, "exit")).unwrap(), 15);
        // jle top: field at 11, ends at 12
        assert_eq!(resolver.displacement(&site(11, DisplacementWidth::Rel8, "top")).unwrap(), -12);
    }

    #[test]
    fn test_negative_rel8_is_twos_complement() {
        let mut labels = HashMap::new();
        labels.insert("top".to_string(), 0);
        let resolver = RelocationResolver::new(&labels);

        let mut bytes = vec![0x90, 0x90, 0x7e, 0x00];
        resolver
            .apply_all(&mut bytes, &[site(3, DisplacementWidth::Rel8, "top")])
            .unwrap();
        assert_eq!(bytes[3], 0xfc); // -4
    }

    #[test]
    fn test_rel32_write() {
        let mut labels = HashMap::new();
        labels.insert("far".to_string(), 1000);
        let resolver = RelocationResolver::new(&labels);

        let mut bytes = vec![0xe9, 0, 0, 0, 0];
        resolver
            .apply_all(&mut bytes, &[site(1, DisplacementWidth::Rel32, "far")])
            .unwrap();
        assert_eq!(&bytes[1..], &995i32.to_le_bytes());
    }

    #[test]
    fn test_failed_apply_writes_nothing() {
        let mut labels = HashMap::new();
        labels.insert("near".to_string(), 4);
        let resolver = RelocationResolver::new(&labels);

        let mut bytes = vec![0xeb, 0x00, 0xeb, 0x00];
        let sites = [
            site(1, DisplacementWidth::Rel8, "near"),
            site(3, DisplacementWidth::Rel8, "missing"),
        ];
        let err = resolver.apply_all(&mut bytes, &sites).unwrap_err();
        assert!(matches!(err, JitError::UnresolvedLabel(ref l) if l == "missing"));
        assert_eq!(bytes, vec![0xeb, 0x00, 0xeb, 0x00]);
    }
}
