//! Compartments: registry, current-compartment context, allocation arena,
//! and the heap that ties them to a backend.

pub mod arena;
pub mod context;
pub mod heap;
pub mod registry;

pub use arena::{AllocationArena, AllocationHandle, AllocationRecord};
pub use context::CompartmentContext;
pub use heap::CompartmentHeap;
pub use registry::CompartmentRegistry;

use crate::backend::DomainId;
use crate::token::InvariantLifetime;
use core::fmt;

/// Identifier of a compartment created by a branded registry.
///
/// The raw value is unique for the lifetime of the registry and never reused.
/// The heap stamp tells apart ids of two heaps that share one token.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompartmentId<'brand> {
    heap: u64,
    raw: u64,
    domain: DomainId,
    _brand: InvariantLifetime<'brand>,
}

impl<'brand> CompartmentId<'brand> {
    pub(crate) const fn new(heap: u64, raw: u64, domain: DomainId) -> Self {
        Self { heap, raw, domain, _brand: InvariantLifetime::new() }
    }

    /// Stamp of the heap whose registry issued this id.
    pub const fn heap(self) -> u64 {
        self.heap
    }

    /// The opaque 64-bit handle.
    pub const fn raw(self) -> u64 {
        self.raw
    }

    /// The backend domain that backs this compartment.
    pub const fn domain(self) -> DomainId {
        self.domain
    }
}

impl fmt::Debug for CompartmentId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompartmentId")
            .field("heap", &self.heap)
            .field("raw", &self.raw)
            .field("domain", &self.domain)
            .finish()
    }
}

impl fmt::Display for CompartmentId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}
