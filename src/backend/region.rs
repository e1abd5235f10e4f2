//! `RegionBackend` - one anonymous mapping per allocation, grouped by domain.
//!
//! Because every block owns whole pages, a domain's memory can be protected
//! independently of every other domain. With `ProtectInactive` enabled, the
//! pages of every domain except the active one are read-only, so a write
//! issued on behalf of the wrong compartment faults instead of silently
//! corrupting it.

use super::syscall::{align_up, allocate_region, free_region, page_size, protect_region};
use super::{AllocError, BackendOption, BackendStats, CompartmentBackend, DomainId, DomainTable, MemoryBudget};
use core::alloc::Layout;
use core::ptr::NonNull;
use std::collections::BTreeMap;

/// Mapped regions of one domain: base address -> mapped length.
#[derive(Debug, Default)]
struct DomainRegions {
    regions: BTreeMap<usize, usize>,
    readonly: bool,
}

impl DomainRegions {
    fn set_readonly(&mut self, readonly: bool) {
        if self.readonly == readonly {
            return;
        }
        for (&base, &len) in &self.regions {
            // SAFETY: every entry is a live mapping created by `allocate_region`.
            if let Err(err) = unsafe { protect_region(base as *mut u8, len, readonly) } {
                tracing::warn!(base = format_args!("{base:#x}"), len, readonly, error = %err, "page protection change failed");
            }
        }
        self.readonly = readonly;
    }
}

/// A backend that maps each allocation as its own page-granular region.
pub struct RegionBackend {
    page_size: usize,
    domains: DomainTable<DomainRegions>,
    active: Option<DomainId>,
    budget: MemoryBudget,
    stats: BackendStats,
    protect_inactive: bool,
    verbose: bool,
}

impl RegionBackend {
    pub fn new() -> Self {
        Self {
            page_size: page_size(),
            domains: DomainTable::new(),
            active: None,
            budget: MemoryBudget::unlimited(),
            stats: BackendStats::default(),
            protect_inactive: false,
            verbose: false,
        }
    }

    /// Caps the total requested bytes across all domains.
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

    /// Enables read-only protection of inactive domains.
    #[must_use]
    pub fn with_protection(mut self) -> Self {
        self.set_option(BackendOption::ProtectInactive, true);
        self
    }

    /// Number of regions currently mapped for `domain`.
    pub fn domain_regions(&self, domain: DomainId) -> Option<usize> {
        self.domains.get(domain).map(|d| d.regions.len())
    }

    /// Whether `domain`'s pages are currently read-only.
    pub fn is_protected(&self, domain: DomainId) -> Option<bool> {
        self.domains.get(domain).map(|d| d.readonly)
    }

    fn apply_protection(&mut self) {
        if self.domains.is_empty() {
            return;
        }
        let active = self.active.map(DomainId::get);
        let protect = self.protect_inactive;
        for (index, domain) in self.domains.iter_mut().enumerate() {
            let is_active = active == Some(index as u64);
            domain.set_readonly(protect && !is_active);
        }
    }
}

impl Default for RegionBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CompartmentBackend for RegionBackend {
    fn name(&self) -> &'static str {
        "region"
    }

    fn create_domain(&mut self) -> Result<DomainId, AllocError> {
        let id = self.domains.create()?;
        self.stats.domains = self.domains.len();
        if self.protect_inactive {
            if let Some(regions) = self.domains.get_mut(id) {
                regions.readonly = true;
            }
        }
        if self.verbose {
            tracing::trace!(backend = "region", domain = %id, "created domain");
        }
        Ok(id)
    }

    fn activate(&mut self, domain: DomainId) {
        self.stats.activations += 1;
        if self.protect_inactive {
            if let Some(previous) = self.active.filter(|p| *p != domain) {
                if let Some(regions) = self.domains.get_mut(previous) {
                    regions.set_readonly(true);
                }
            }
            if let Some(regions) = self.domains.get_mut(domain) {
                regions.set_readonly(false);
            }
        }
        self.active = Some(domain);
        if self.verbose {
            tracing::trace!(backend = "region", domain = %domain, "activated domain");
        }
    }

    fn allocate(&mut self, domain: DomainId, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let size = layout.size();
        if size == 0 || layout.align() > self.page_size {
            return Err(AllocError::InvalidLayout { size });
        }
        let mapped = size
            .checked_add(self.page_size - 1)
            .map(|_| align_up(size, self.page_size))
            .ok_or(AllocError::InvalidLayout { size })?;
        self.budget.reserve(size)?;

        // SAFETY: mapping fresh anonymous memory has no preconditions.
        let Some(ptr) = (unsafe { allocate_region(mapped) }) else {
            self.budget.release(size);
            return Err(AllocError::OutOfMemory { size });
        };

        if let Some(regions) = self.domains.get_mut(domain) {
            regions.regions.insert(ptr.as_ptr() as usize, mapped);
            if regions.readonly {
                // SAFETY: the region was just mapped with `mapped` bytes.
                if let Err(err) = unsafe { protect_region(ptr.as_ptr(), mapped, true) } {
                    tracing::warn!(ptr = ?ptr, mapped, error = %err, "cannot protect new region of inactive domain");
                }
            }
        }
        self.stats.on_alloc(size);
        if self.verbose {
            tracing::trace!(backend = "region", domain = %domain, size, mapped, ptr = ?ptr, "allocate");
        }
        Ok(ptr)
    }

    unsafe fn deallocate(&mut self, domain: DomainId, ptr: NonNull<u8>, layout: Layout) {
        let size = layout.size();
        let addr = ptr.as_ptr() as usize;
        let mapped = self
            .domains
            .get_mut(domain)
            .and_then(|d| d.regions.remove(&addr))
            .unwrap_or_else(|| align_up(size, self.page_size));
        free_region(ptr.as_ptr(), mapped);

        self.budget.release(size);
        self.stats.on_dealloc(size);
        if self.verbose {
            tracing::trace!(backend = "region", domain = %domain, size, ptr = ?ptr, "free");
        }
    }

    fn set_option(&mut self, option: BackendOption, enabled: bool) {
        match option {
            BackendOption::Verbose => self.verbose = enabled,
            BackendOption::ProtectInactive => {
                self.protect_inactive = enabled;
                self.apply_protection();
            }
        }
    }

    fn stats(&self) -> BackendStats {
        self.stats
    }
}

impl Drop for RegionBackend {
    fn drop(&mut self) {
        for domain in self.domains.iter_mut() {
            for (&base, &len) in &domain.regions {
                // SAFETY: leftover regions are live mappings owned by this backend.
                unsafe { free_region(base as *mut u8, len) };
            }
            domain.regions.clear();
        }
    }
}
