//! `HeapBackend` - any `GlobalAlloc` as the allocator under test.
//!
//! Domains here are accounting only: every domain draws from the same
//! underlying heap, which is exactly the shared service the harness exercises.
//! The optional allocator crates (`mimalloc`, `snmalloc`, `jemalloc`) plug in
//! through their `GlobalAlloc` implementations.

use super::{AllocError, BackendOption, BackendStats, CompartmentBackend, DomainId, DomainTable, MemoryBudget};
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;
use std::alloc::System;

/// Per-domain live accounting.
#[derive(Debug, Default, Clone, Copy)]
struct DomainAccount {
    live_blocks: usize,
    live_bytes: usize,
}

/// A backend that forwards allocations to a global allocator.
pub struct HeapBackend<A> {
    inner: A,
    name: &'static str,
    domains: DomainTable<DomainAccount>,
    budget: MemoryBudget,
    stats: BackendStats,
    verbose: bool,
}

impl<A: GlobalAlloc> HeapBackend<A> {
    /// Wraps `inner` under the given report name.
    pub fn new(name: &'static str, inner: A) -> Self {
        Self {
            inner,
            name,
            domains: DomainTable::new(),
            budget: MemoryBudget::unlimited(),
            stats: BackendStats::default(),
            verbose: false,
        }
    }

    /// Caps the total live bytes across all domains.
    #[must_use]
    pub fn with_memory_limit(mut self, limit: usize) -> Self {
        self.budget = MemoryBudget::limited(limit);
        self
    }

    /// Caps the number of domains that can be created.
    #[must_use]
    pub fn with_max_domains(mut self, limit: usize) -> Self {
        self.domains.set_limit(Some(limit));
        self
    }

    /// Live bytes currently attributed to `domain`.
    pub fn domain_live_bytes(&self, domain: DomainId) -> Option<usize> {
        self.domains.get(domain).map(|d| d.live_bytes)
    }

    /// Live block count currently attributed to `domain`.
    pub fn domain_live_blocks(&self, domain: DomainId) -> Option<usize> {
        self.domains.get(domain).map(|d| d.live_blocks)
    }
}

impl HeapBackend<System> {
    /// The platform allocator.
    pub fn system() -> Self {
        Self::new("system", System)
    }
}

#[cfg(feature = "mimalloc")]
impl HeapBackend<mimalloc::MiMalloc> {
    /// The mimalloc allocator.
    pub fn mimalloc() -> Self {
        Self::new("mimalloc", mimalloc::MiMalloc)
    }
}

#[cfg(feature = "snmalloc")]
impl HeapBackend<snmalloc_rs::SnMalloc> {
    /// The snmalloc allocator.
    pub fn snmalloc() -> Self {
        Self::new("snmalloc", snmalloc_rs::SnMalloc)
    }
}

#[cfg(feature = "jemalloc")]
impl HeapBackend<jemallocator::Jemalloc> {
    /// The jemalloc allocator.
    pub fn jemalloc() -> Self {
        Self::new("jemalloc", jemallocator::Jemalloc)
    }
}

impl<A: GlobalAlloc> CompartmentBackend for HeapBackend<A> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn create_domain(&mut self) -> Result<DomainId, AllocError> {
        let id = self.domains.create()?;
        self.stats.domains = self.domains.len();
        if self.verbose {
            tracing::trace!(backend = self.name, domain = %id, "created domain");
        }
        Ok(id)
    }

    fn activate(&mut self, domain: DomainId) {
        self.stats.activations += 1;
        if self.verbose {
            tracing::trace!(backend = self.name, domain = %domain, "activated domain");
        }
    }

    fn allocate(&mut self, domain: DomainId, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let size = layout.size();
        if size == 0 {
            return Err(AllocError::InvalidLayout { size });
        }
        self.budget.reserve(size)?;

        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { self.inner.alloc(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            self.budget.release(size);
            return Err(AllocError::OutOfMemory { size });
        };

        if let Some(account) = self.domains.get_mut(domain) {
            account.live_blocks += 1;
            account.live_bytes += size;
        }
        self.stats.on_alloc(size);
        if self.verbose {
            tracing::trace!(backend = self.name, domain = %domain, size, ptr = ?ptr, "allocate");
        }
        Ok(ptr)
    }

    unsafe fn deallocate(&mut self, domain: DomainId, ptr: NonNull<u8>, layout: Layout) {
        let size = layout.size();
        self.inner.dealloc(ptr.as_ptr(), layout);

        if let Some(account) = self.domains.get_mut(domain) {
            account.live_blocks = account.live_blocks.saturating_sub(1);
            account.live_bytes = account.live_bytes.saturating_sub(size);
        }
        self.budget.release(size);
        self.stats.on_dealloc(size);
        if self.verbose {
            tracing::trace!(backend = self.name, domain = %domain, size, ptr = ?ptr, "free");
        }
    }

    fn set_option(&mut self, option: BackendOption, enabled: bool) {
        match option {
            BackendOption::Verbose => self.verbose = enabled,
            // Every domain shares one heap; there are no pages to protect.
            BackendOption::ProtectInactive => {}
        }
    }

    fn stats(&self) -> BackendStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(size: usize) -> Layout {
        Layout::from_size_align(size, 16).unwrap()
    }

    #[test]
    fn accounts_per_domain() {
        let mut backend = HeapBackend::system();
        let a = backend.create_domain().unwrap();
        let b = backend.create_domain().unwrap();

        let p1 = backend.allocate(a, layout(128)).unwrap();
        let p2 = backend.allocate(b, layout(64)).unwrap();
        assert_eq!(backend.domain_live_bytes(a), Some(128));
        assert_eq!(backend.domain_live_bytes(b), Some(64));

        unsafe { backend.deallocate(a, p1, layout(128)) };
        assert_eq!(backend.domain_live_blocks(a), Some(0));
        assert_eq!(backend.stats().live_bytes, 64);

        unsafe { backend.deallocate(b, p2, layout(64)) };
        assert_eq!(backend.stats().peak_live_bytes, 192);
        assert_eq!(backend.stats().domains, 2);
    }

    #[test]
    fn memory_limit_is_enforced() {
        let mut backend = HeapBackend::system().with_memory_limit(1024);
        let d = backend.create_domain().unwrap();
        let p = backend.allocate(d, layout(1000)).unwrap();
        assert_eq!(
            backend.allocate(d, layout(100)),
            Err(AllocError::BudgetExceeded { requested: 100, remaining: 24 })
        );
        unsafe { backend.deallocate(d, p, layout(1000)) };
        let p = backend.allocate(d, layout(1024)).unwrap();
        unsafe { backend.deallocate(d, p, layout(1024)) };
    }

    #[test]
    fn domain_limit_is_enforced() {
        let mut backend = HeapBackend::system().with_max_domains(1);
        backend.create_domain().unwrap();
        assert_eq!(backend.create_domain(), Err(AllocError::DomainsExhausted { limit: 1 }));
    }

    #[test]
    fn zero_size_is_rejected() {
        let mut backend = HeapBackend::system();
        let d = backend.create_domain().unwrap();
        let zero = Layout::from_size_align(0, 1).unwrap();
        assert_eq!(backend.allocate(d, zero), Err(AllocError::InvalidLayout { size: 0 }));
    }
}
