//! Pattern words: provenance encoded into content.
//!
//! Element `k` of allocation `j` in compartment `i` holds
//! `(i << 24) | (j << 20) | k`, computed on `u32` with high bits dropped.
//! Corruption from another compartment or another allocation shows up as a
//! word whose provenance bits are wrong, without any external bookkeeping.

use core::fmt;
use serde::Serialize;

/// Bytes per pattern element.
pub const WORD_SIZE: usize = core::mem::size_of::<u32>();

/// Number of whole pattern elements in an allocation of `size` bytes.
pub const fn word_count(size: usize) -> usize {
    size / WORD_SIZE
}

/// The pattern word for element `element` of allocation `pointer` in
/// compartment `compartment`.
#[inline(always)]
pub const fn pattern_word(compartment: usize, pointer: usize, element: usize) -> u32 {
    ((compartment as u32) << 24) | ((pointer as u32) << 20) | (element as u32)
}

/// Where an allocation sits in the workload matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AllocationSite {
    /// Compartment index `i` (position in the workload, not the id).
    pub compartment: usize,
    /// Pointer index `j` within the compartment.
    pub pointer: usize,
}

impl AllocationSite {
    pub const fn new(compartment: usize, pointer: usize) -> Self {
        Self { compartment, pointer }
    }

    /// Expected content of element `element`.
    #[inline(always)]
    pub const fn word(self, element: usize) -> u32 {
        pattern_word(self.compartment, self.pointer, element)
    }

    pub const fn element(self, element: usize) -> Provenance {
        Provenance { compartment: self.compartment, pointer: self.pointer, element }
    }
}

impl fmt::Display for AllocationSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{} P{}", self.compartment, self.pointer)
    }
}

/// The `(i, j, k)` triple of a single element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Provenance {
    pub compartment: usize,
    pub pointer: usize,
    pub element: usize,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{} P{} E{}", self.compartment, self.pointer, self.element)
    }
}

/// A readback that differs from the pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub provenance: Provenance,
    pub expected: u32,
    pub actual: u32,
    /// Address of the offending element, when known.
    pub address: Option<usize>,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "content mismatch at {}: expected {:#010x}, found {:#010x}",
            self.provenance, self.expected, self.actual
        )?;
        if let Some(address) = self.address {
            write!(f, " (address {address:#x})")?;
        }
        Ok(())
    }
}

/// Checks `words` against the pattern for `site`, stopping at the first
/// mismatch.
///
/// # Errors
/// Returns the first `Mismatch`; `address` is left unset.
pub fn verify_words(site: AllocationSite, words: &[u32]) -> Result<(), Mismatch> {
    match words.iter().enumerate().find(|(k, w)| **w != site.word(*k)) {
        None => Ok(()),
        Some((k, &actual)) => Err(Mismatch {
            provenance: site.element(k),
            expected: site.word(k),
            actual,
            address: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_layout_matches_shifts() {
        assert_eq!(pattern_word(0, 0, 0), 0);
        assert_eq!(pattern_word(1, 0, 0), 0x0100_0000);
        assert_eq!(pattern_word(0, 1, 0), 0x0010_0000);
        assert_eq!(pattern_word(3, 2, 5), 0x0320_0005);
        assert_eq!(pattern_word(15, 15, (1 << 18) - 1), 0x0F_F3_FF_FF);
    }

    #[test]
    fn high_compartment_bits_are_truncated() {
        assert_eq!(pattern_word(0x1FF, 0, 0), 0xFF00_0000);
    }

    #[test]
    fn word_count_ignores_tail_bytes() {
        assert_eq!(word_count(1 << 20), 1 << 18);
        assert_eq!(word_count(7), 1);
        assert_eq!(word_count(3), 0);
    }

    #[test]
    fn verify_reports_first_mismatch() {
        let site = AllocationSite::new(2, 3);
        let mut words: Vec<u32> = (0..16).map(|k| site.word(k)).collect();
        assert_eq!(verify_words(site, &words), Ok(()));

        words[9] ^= 1;
        words[12] = 0;
        let mismatch = verify_words(site, &words).unwrap_err();
        assert_eq!(mismatch.provenance, Provenance { compartment: 2, pointer: 3, element: 9 });
        assert_eq!(mismatch.expected, pattern_word(2, 3, 9));
        assert_eq!(mismatch.actual, pattern_word(2, 3, 9) ^ 1);
    }

    #[test]
    fn content_from_another_site_is_detected() {
        let other = AllocationSite::new(1, 0);
        let words: Vec<u32> = (0..4).map(|k| other.word(k)).collect();
        assert!(verify_words(AllocationSite::new(0, 0), &words).is_err());
    }

    #[test]
    fn mismatch_display_includes_address() {
        let m = Mismatch {
            provenance: Provenance { compartment: 1, pointer: 2, element: 3 },
            expected: 0x0120_0003,
            actual: 0,
            address: Some(0x1000),
        };
        assert_eq!(
            m.to_string(),
            "content mismatch at C1 P2 E3: expected 0x01200003, found 0x00000000 (address 0x1000)"
        );
    }
}
