//! Allocator and isolation collaborators.
//!
//! The harness treats the allocator under test as an opaque allocate/free
//! service and the isolation mechanism as an opaque "activate domain" call.
//! Both sit behind [`CompartmentBackend`]. Every call names its domain
//! explicitly; `activate` is a notification for backends that enforce
//! isolation (page protection), not the routing mechanism.

pub mod domains;
pub mod heap;
pub mod region;
pub mod stats;
pub mod syscall;

pub use domains::{DomainTable, MemoryBudget};
pub use heap::HeapBackend;
pub use region::RegionBackend;
pub use stats::BackendStats;

use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;
use serde::{Deserialize, Serialize};

/// Backend-side identifier of an allocation domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DomainId(u64);

impl DomainId {
    /// Wraps a raw domain number.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw domain number.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}", self.0)
    }
}

/// Toggles a backend understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOption {
    /// Per-call trace logging of allocate/free/activate.
    Verbose,
    /// Make pages of inactive domains read-only (region backend only).
    ProtectInactive,
}

/// The error type for backend failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The underlying allocator returned null.
    OutOfMemory {
        /// Requested size in bytes.
        size: usize,
    },
    /// The request does not fit in the configured memory limit.
    BudgetExceeded {
        /// Requested size in bytes.
        requested: usize,
        /// Bytes still available under the limit.
        remaining: usize,
    },
    /// The size cannot form a valid `Layout`.
    InvalidLayout {
        /// Requested size in bytes.
        size: usize,
    },
    /// No further domains can be created.
    DomainsExhausted {
        /// The domain limit that was hit.
        limit: usize,
    },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { size } => write!(f, "memory allocation of {size} bytes failed"),
            Self::BudgetExceeded { requested, remaining } => write!(
                f,
                "allocation of {requested} bytes exceeds memory limit ({remaining} bytes remaining)"
            ),
            Self::InvalidLayout { size } => write!(f, "invalid layout for {size} bytes"),
            Self::DomainsExhausted { limit } => {
                write!(f, "isolation domains exhausted (limit {limit})")
            }
        }
    }
}

impl std::error::Error for AllocError {}

/// An allocator under test, split into isolated domains.
///
/// Implementations must return memory disjoint from every other live
/// allocation, in any domain.
pub trait CompartmentBackend {
    /// Short name used in logs and reports.
    fn name(&self) -> &'static str;

    /// Creates a new isolation domain.
    ///
    /// # Errors
    /// Returns `AllocError::DomainsExhausted` when the backing resource is used up.
    fn create_domain(&mut self) -> Result<DomainId, AllocError>;

    /// Notifies the backend that `domain` is now the current domain.
    fn activate(&mut self, domain: DomainId);

    /// Allocates memory in `domain`.
    ///
    /// # Errors
    /// Returns `AllocError` if the allocator cannot satisfy the request.
    fn allocate(&mut self, domain: DomainId, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// Releases memory previously returned by `allocate`.
    ///
    /// # Safety
    /// `ptr` must denote a live block allocated by this backend in `domain`
    /// with exactly `layout`, and must not be used afterwards.
    unsafe fn deallocate(&mut self, domain: DomainId, ptr: NonNull<u8>, layout: Layout);

    /// Enables or disables a backend option. Unsupported options are ignored.
    fn set_option(&mut self, option: BackendOption, enabled: bool);

    /// Disables a backend option.
    fn disable_option(&mut self, option: BackendOption) {
        self.set_option(option, false);
    }

    /// Returns accounting counters.
    fn stats(&self) -> BackendStats;
}

impl<B: CompartmentBackend + ?Sized> CompartmentBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn create_domain(&mut self) -> Result<DomainId, AllocError> {
        (**self).create_domain()
    }

    fn activate(&mut self, domain: DomainId) {
        (**self).activate(domain);
    }

    fn allocate(&mut self, domain: DomainId, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        (**self).allocate(domain, layout)
    }

    unsafe fn deallocate(&mut self, domain: DomainId, ptr: NonNull<u8>, layout: Layout) {
        (**self).deallocate(domain, ptr, layout);
    }

    fn set_option(&mut self, option: BackendOption, enabled: bool) {
        (**self).set_option(option, enabled);
    }

    fn stats(&self) -> BackendStats {
        (**self).stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_error_messages() {
        assert_eq!(
            AllocError::OutOfMemory { size: 8 }.to_string(),
            "memory allocation of 8 bytes failed"
        );
        assert_eq!(
            AllocError::DomainsExhausted { limit: 15 }.to_string(),
            "isolation domains exhausted (limit 15)"
        );
    }

    #[test]
    fn boxed_backend_forwards() {
        let mut backend: Box<dyn CompartmentBackend> = Box::new(HeapBackend::system());
        let domain = backend.create_domain().unwrap();
        let layout = Layout::from_size_align(32, 16).unwrap();
        let ptr = backend.allocate(domain, layout).unwrap();
        assert_eq!(backend.stats().live_bytes, 32);
        unsafe { backend.deallocate(domain, ptr, layout) };
        assert_eq!(backend.stats().live_bytes, 0);
        assert_eq!(backend.name(), "system");
    }
}
