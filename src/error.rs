//! Failure taxonomy of a harness run.
//!
//! Every failure is fatal to the run. The library never aborts the process;
//! it returns a `HarnessError` to the top level, which maps the
//! [`FailureKind`] to an exit status.

use crate::backend::AllocError;
use crate::workload::pattern::{AllocationSite, Mismatch};
use core::fmt;
use serde::Serialize;

/// Broad class of a failure; decides the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// Content mismatch or overlapping live allocations.
    Corruption,
    /// The allocator could not satisfy a request.
    AllocationFailure,
    /// The isolation resource backing compartments ran out.
    ResourceExhaustion,
    /// The harness API was misused.
    ContractViolation,
}

impl FailureKind {
    /// Process exit status for this class of failure.
    pub const fn exit_code(self) -> u8 {
        match self {
            Self::Corruption => 3,
            Self::AllocationFailure => 4,
            Self::ResourceExhaustion => 5,
            Self::ContractViolation => 6,
        }
    }
}

/// Misuse of a compartment heap that would be undefined behaviour against a
/// raw allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "violation")]
pub enum Violation {
    /// The id does not belong to this heap's registry.
    UnknownCompartment { id: u64 },
    /// Allocate/free issued before any compartment was activated.
    NoActiveCompartment,
    /// The handle was already freed (double free or use after free).
    StaleHandle { index: usize, generation: u32 },
    /// The allocation belongs to a compartment that is not current.
    ForeignAccess { owner: u64, current: Option<u64> },
    /// Readback of an allocation that was never filled.
    Uninitialized { index: usize },
    /// The id or handle was issued by another heap sharing the same token.
    ForeignHeap { stamp: u64 },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCompartment { id } => write!(f, "compartment {id} was never created"),
            Self::NoActiveCompartment => f.write_str("no compartment is active"),
            Self::StaleHandle { index, generation } => {
                write!(f, "allocation handle {index}@{generation} is no longer live")
            }
            Self::ForeignAccess { owner, current: Some(current) } => write!(
                f,
                "allocation owned by compartment {owner} accessed while compartment {current} is active"
            ),
            Self::ForeignAccess { owner, current: None } => write!(
                f,
                "allocation owned by compartment {owner} accessed with no active compartment"
            ),
            Self::Uninitialized { index } => write!(f, "allocation {index} was read before it was filled"),
            Self::ForeignHeap { stamp } => write!(f, "handle was issued by another heap (stamp {stamp})"),
        }
    }
}

/// Address range of a live allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Extent {
    pub compartment: u64,
    pub base: usize,
    pub len: usize,
}

impl Extent {
    pub const fn end(&self) -> usize {
        self.base + self.len
    }

    pub const fn overlaps(&self, other: &Extent) -> bool {
        self.base < other.end() && other.base < self.end()
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x}) in compartment {}", self.base, self.end(), self.compartment)
    }
}

/// A fatal harness failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarnessError {
    /// Creating another compartment failed.
    CompartmentsExhausted { created: usize, source: AllocError },
    /// An allocation request returned failure.
    AllocationFailed {
        compartment: u64,
        site: Option<AllocationSite>,
        size: usize,
        source: AllocError,
    },
    /// A readback differed from what was written.
    Corruption(Mismatch),
    /// Two live allocations share addresses.
    Overlap { first: Extent, second: Extent },
    /// The heap API was misused.
    ContractViolation(Violation),
}

impl HarnessError {
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::CompartmentsExhausted { .. } => FailureKind::ResourceExhaustion,
            Self::AllocationFailed { .. } => FailureKind::AllocationFailure,
            Self::Corruption(_) | Self::Overlap { .. } => FailureKind::Corruption,
            Self::ContractViolation(_) => FailureKind::ContractViolation,
        }
    }

    pub const fn exit_code(&self) -> u8 {
        self.kind().exit_code()
    }

    /// Attaches the workload position to an allocation failure.
    #[must_use]
    pub fn at_site(self, at: AllocationSite) -> Self {
        match self {
            Self::AllocationFailed { compartment, size, source, .. } => Self::AllocationFailed {
                compartment,
                site: Some(at),
                size,
                source,
            },
            other => other,
        }
    }
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CompartmentsExhausted { created, source } => {
                write!(f, "cannot create compartment after {created}: {source}")
            }
            Self::AllocationFailed { compartment, site: Some(site), size, source } => write!(
                f,
                "allocation of {size} bytes at {site} (compartment {compartment}) failed: {source}"
            ),
            Self::AllocationFailed { compartment, site: None, size, source } => {
                write!(f, "allocation of {size} bytes in compartment {compartment} failed: {source}")
            }
            Self::Corruption(mismatch) => fmt::Display::fmt(mismatch, f),
            Self::Overlap { first, second } => {
                write!(f, "live allocations overlap: {first} and {second}")
            }
            Self::ContractViolation(violation) => write!(f, "contract violation: {violation}"),
        }
    }
}

impl std::error::Error for HarnessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CompartmentsExhausted { source, .. } | Self::AllocationFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<Violation> for HarnessError {
    fn from(violation: Violation) -> Self {
        Self::ContractViolation(violation)
    }
}

impl From<Mismatch> for HarnessError {
    fn from(mismatch: Mismatch) -> Self {
        Self::Corruption(mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::pattern::Provenance;

    #[test]
    fn exit_codes_are_distinct_and_nonzero() {
        let codes = [
            FailureKind::Corruption.exit_code(),
            FailureKind::AllocationFailure.exit_code(),
            FailureKind::ResourceExhaustion.exit_code(),
            FailureKind::ContractViolation.exit_code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            assert_ne!(*a, 0);
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn overlap_and_mismatch_are_corruption() {
        let extent = Extent { compartment: 1, base: 0x1000, len: 16 };
        let overlap = HarnessError::Overlap { first: extent, second: extent };
        assert_eq!(overlap.kind(), FailureKind::Corruption);

        let mismatch = HarnessError::from(Mismatch {
            provenance: Provenance { compartment: 0, pointer: 0, element: 0 },
            expected: 1,
            actual: 2,
            address: None,
        });
        assert_eq!(mismatch.exit_code(), 3);
    }

    #[test]
    fn at_site_only_touches_allocation_failures() {
        let err = HarnessError::AllocationFailed {
            compartment: 4,
            site: None,
            size: 64,
            source: AllocError::OutOfMemory { size: 64 },
        }
        .at_site(AllocationSite::new(1, 2));
        assert_eq!(
            err.to_string(),
            "allocation of 64 bytes at C1 P2 (compartment 4) failed: memory allocation of 64 bytes failed"
        );

        let violation = HarnessError::from(Violation::NoActiveCompartment).at_site(AllocationSite::new(0, 0));
        assert_eq!(violation, HarnessError::ContractViolation(Violation::NoActiveCompartment));
    }

    #[test]
    fn extents_overlap_only_when_sharing_bytes() {
        let a = Extent { compartment: 1, base: 0, len: 16 };
        let b = Extent { compartment: 2, base: 16, len: 16 };
        let c = Extent { compartment: 2, base: 15, len: 2 };
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&b));
    }
}
