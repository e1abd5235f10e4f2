//! `CompartmentHeap` - the compartment-aware allocation protocol.
//!
//! Composes a backend with the registry, the current-compartment context and
//! the allocation arena. All access to allocation contents goes through the
//! heap, which checks that the caller acts for the owning compartment.
//!
//! Once aliasing or corruption has been observed the heap is poisoned: the
//! backend can no longer be trusted with its own blocks, so records still
//! live at drop are leaked rather than released.

use super::{AllocationArena, AllocationHandle, AllocationRecord, CompartmentContext, CompartmentId, CompartmentRegistry};
use crate::backend::{BackendOption, BackendStats, CompartmentBackend};
use crate::error::{Extent, HarnessError, Violation};
use crate::token::{GhostBorrow, GhostBorrowMut, GhostToken};
use crate::workload::pattern::word_count;
use core::alloc::Layout;
use core::cell::Cell;

/// Alignment of every allocation handed out by a heap.
pub const ALLOCATION_ALIGN: usize = 16;

/// A branded, compartment-aware view over an allocator backend.
pub struct CompartmentHeap<'brand, B: CompartmentBackend> {
    backend: B,
    registry: CompartmentRegistry<'brand>,
    context: CompartmentContext<'brand>,
    arena: AllocationArena<'brand>,
    poisoned: Cell<bool>,
}

impl<'brand, B: CompartmentBackend> CompartmentHeap<'brand, B> {
    /// Creates a heap branded by `token`.
    pub fn new(_token: &GhostToken<'brand>, backend: B) -> Self {
        Self {
            backend,
            registry: CompartmentRegistry::new(),
            context: CompartmentContext::new(),
            arena: AllocationArena::new(),
            poisoned: Cell::new(false),
        }
    }

    /// Stamp shared by every id and handle this heap issues.
    pub fn stamp(&self) -> u64 {
        self.registry.stamp()
    }

    /// Whether aliasing or corruption has been observed.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.get()
    }

    /// Marks the backend's blocks as untrustworthy for the rest of the heap's life.
    pub fn poison(&self) {
        if !self.poisoned.replace(true) {
            tracing::warn!(live = self.arena.len(), "heap poisoned; live blocks will not be released");
        }
    }

    /// Creates a new compartment.
    ///
    /// # Errors
    /// `HarnessError::CompartmentsExhausted` when the backend has no domains left.
    pub fn create_compartment(&mut self) -> Result<CompartmentId<'brand>, HarnessError> {
        self.registry.create(&mut self.backend)
    }

    /// Makes `id` the current compartment. Returns whether it changed.
    ///
    /// The backend is only notified on an actual change, so repeating a switch
    /// has no observable effect.
    ///
    /// # Errors
    /// `Violation::UnknownCompartment` if `id` was not created by this heap.
    pub fn switch_compartment(
        &mut self,
        _token: &mut impl GhostBorrowMut<'brand>,
        id: CompartmentId<'brand>,
    ) -> Result<bool, HarnessError> {
        self.ensure_known(id)?;
        let changed = self.context.switch(id);
        if changed {
            self.backend.activate(id.domain());
            tracing::trace!(compartment = %id, "switched compartment");
        }
        Ok(changed)
    }

    pub fn current(&self) -> Option<CompartmentId<'brand>> {
        self.context.current()
    }

    /// Allocates `size` bytes in the current compartment.
    ///
    /// # Errors
    /// `Violation::NoActiveCompartment` before the first switch, or
    /// `HarnessError::AllocationFailed` if the backend refuses.
    pub fn allocate(
        &mut self,
        token: &impl GhostBorrow<'brand>,
        size: usize,
    ) -> Result<AllocationHandle<'brand>, HarnessError> {
        let current = self.context.current().ok_or(Violation::NoActiveCompartment)?;
        self.allocate_in(token, current, size)
    }

    /// Allocates `size` bytes attributed to `id`, leaving the current
    /// compartment unchanged.
    ///
    /// # Errors
    /// As [`allocate`](Self::allocate), plus `Violation::UnknownCompartment`.
    pub fn allocate_in(
        &mut self,
        _token: &impl GhostBorrow<'brand>,
        id: CompartmentId<'brand>,
        size: usize,
    ) -> Result<AllocationHandle<'brand>, HarnessError> {
        self.ensure_known(id)?;
        let failed = |source| HarnessError::AllocationFailed { compartment: id.raw(), site: None, size, source };

        let layout = Layout::from_size_align(size.max(1), ALLOCATION_ALIGN)
            .map_err(|_| failed(crate::backend::AllocError::InvalidLayout { size }))?;
        let ptr = self.backend.allocate(id.domain(), layout).map_err(failed)?;

        let handle = self.arena.insert(AllocationRecord::new(id, ptr, layout, size));
        tracing::trace!(compartment = %id, size, ptr = ?ptr, slot = handle.index(), "allocated");
        Ok(handle)
    }

    /// Writes `word(k)` into every whole 4-byte element `k` of the allocation.
    /// Returns the number of elements written.
    ///
    /// # Errors
    /// `Violation::StaleHandle` or `Violation::ForeignAccess`.
    pub fn fill_with<F>(
        &mut self,
        _token: &impl GhostBorrow<'brand>,
        handle: AllocationHandle<'brand>,
        mut word: F,
    ) -> Result<usize, HarnessError>
    where
        F: FnMut(usize) -> u32,
    {
        self.check_stamp(handle)?;
        let current = self.context.current();
        let record = Self::owned_mut(&mut self.arena, current, handle)?;
        let count = word_count(record.size());
        let base = record.ptr().as_ptr().cast::<u32>();
        for k in 0..count {
            // SAFETY: the block holds `size` bytes aligned to ALLOCATION_ALIGN,
            // and `k * 4 + 4 <= size`.
            unsafe { base.add(k).write(word(k)) };
        }
        record.mark_filled();
        Ok(count)
    }

    /// Reads back the filled elements of an allocation.
    ///
    /// # Errors
    /// `Violation::StaleHandle`, `Violation::ForeignAccess` or
    /// `Violation::Uninitialized`.
    pub fn words(
        &self,
        _token: &impl GhostBorrow<'brand>,
        handle: AllocationHandle<'brand>,
    ) -> Result<&[u32], HarnessError> {
        self.check_stamp(handle)?;
        let record = self.arena.get(handle).ok_or(Self::stale(handle))?;
        self.check_owner(record)?;
        if !record.is_filled() {
            return Err(Violation::Uninitialized { index: handle.index() }.into());
        }
        // SAFETY: the elements were initialised by `fill_with`, and the block
        // stays live while the arena holds the record.
        Ok(unsafe { core::slice::from_raw_parts(record.ptr().as_ptr().cast::<u32>(), word_count(record.size())) })
    }

    /// Mutable access to the filled elements of an allocation.
    ///
    /// # Errors
    /// As [`words`](Self::words).
    pub fn words_mut(
        &mut self,
        _token: &impl GhostBorrow<'brand>,
        handle: AllocationHandle<'brand>,
    ) -> Result<&mut [u32], HarnessError> {
        self.check_stamp(handle)?;
        let current = self.context.current();
        let record = Self::owned_mut(&mut self.arena, current, handle)?;
        if !record.is_filled() {
            return Err(Violation::Uninitialized { index: handle.index() }.into());
        }
        let len = word_count(record.size());
        // SAFETY: as in `words`; `&mut self` makes the borrow exclusive.
        Ok(unsafe { core::slice::from_raw_parts_mut(record.ptr().as_ptr().cast::<u32>(), len) })
    }

    /// Frees an allocation of the current compartment.
    ///
    /// # Errors
    /// `Violation::StaleHandle` on double free, `Violation::ForeignAccess`
    /// when the owner is not current.
    pub fn free(&mut self, token: &impl GhostBorrow<'brand>, handle: AllocationHandle<'brand>) -> Result<(), HarnessError> {
        let current = self.context.current().ok_or(Violation::NoActiveCompartment)?;
        self.free_in(token, current, handle)
    }

    /// Frees an allocation on behalf of `id`, which must own it.
    ///
    /// # Errors
    /// As [`free`](Self::free).
    pub fn free_in(
        &mut self,
        _token: &impl GhostBorrow<'brand>,
        id: CompartmentId<'brand>,
        handle: AllocationHandle<'brand>,
    ) -> Result<(), HarnessError> {
        self.ensure_known(id)?;
        self.check_stamp(handle)?;
        let record = self.arena.get(handle).ok_or(Self::stale(handle))?;
        if record.compartment() != id {
            return Err(Violation::ForeignAccess { owner: record.compartment().raw(), current: Some(id.raw()) }.into());
        }
        let record = self.arena.remove(handle).ok_or(Self::stale(handle))?;
        // SAFETY: the record was live, so the block came from this backend
        // with this layout and has not been released yet.
        unsafe { self.backend.deallocate(id.domain(), record.ptr(), record.layout()) };
        tracing::trace!(compartment = %id, ptr = ?record.ptr(), slot = handle.index(), "freed");
        Ok(())
    }

    /// Checks that no two live allocations share an address. Poisons the
    /// heap when they do.
    ///
    /// # Errors
    /// `HarnessError::Overlap` naming both ranges.
    pub fn check_isolation(&self) -> Result<(), HarnessError> {
        match self.arena.find_overlap() {
            None => Ok(()),
            Some((first, second)) => {
                self.poison();
                Err(HarnessError::Overlap { first, second })
            }
        }
    }

    /// The record behind a live handle of this heap.
    pub fn record(&self, handle: AllocationHandle<'brand>) -> Option<&AllocationRecord<'brand>> {
        self.check_stamp(handle).ok()?;
        self.arena.get(handle)
    }

    pub fn live_allocations(&self) -> usize {
        self.arena.len()
    }

    pub fn live_in(&self, id: CompartmentId<'brand>) -> usize {
        self.arena.live_in(id)
    }

    pub fn registry(&self) -> &CompartmentRegistry<'brand> {
        &self.registry
    }

    pub fn context(&self) -> &CompartmentContext<'brand> {
        &self.context
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_stats(&self) -> BackendStats {
        self.backend.stats()
    }

    /// Forwards an option toggle to the backend.
    pub fn set_backend_option(&mut self, option: BackendOption, enabled: bool) {
        self.backend.set_option(option, enabled);
    }

    fn ensure_known(&self, id: CompartmentId<'brand>) -> Result<(), HarnessError> {
        if id.heap() != self.registry.stamp() {
            Err(Violation::ForeignHeap { stamp: id.heap() }.into())
        } else if self.registry.contains(id) {
            Ok(())
        } else {
            Err(Violation::UnknownCompartment { id: id.raw() }.into())
        }
    }

    fn check_stamp(&self, handle: AllocationHandle<'brand>) -> Result<(), HarnessError> {
        let stamp = handle.compartment().heap();
        if stamp == self.registry.stamp() {
            Ok(())
        } else {
            Err(Violation::ForeignHeap { stamp }.into())
        }
    }

    fn check_owner(&self, record: &AllocationRecord<'brand>) -> Result<(), HarnessError> {
        let current = self.context.current();
        if current == Some(record.compartment()) {
            Ok(())
        } else {
            Err(Violation::ForeignAccess { owner: record.compartment().raw(), current: current.map(CompartmentId::raw) }.into())
        }
    }

    fn owned_mut<'a>(
        arena: &'a mut AllocationArena<'brand>,
        current: Option<CompartmentId<'brand>>,
        handle: AllocationHandle<'brand>,
    ) -> Result<&'a mut AllocationRecord<'brand>, HarnessError> {
        let record = arena.get_mut(handle).ok_or(Self::stale(handle))?;
        if current != Some(record.compartment()) {
            return Err(Violation::ForeignAccess { owner: record.compartment().raw(), current: current.map(CompartmentId::raw) }.into());
        }
        Ok(record)
    }

    fn stale(handle: AllocationHandle<'brand>) -> HarnessError {
        Violation::StaleHandle { index: handle.index(), generation: handle.generation() }.into()
    }
}

impl<B: CompartmentBackend> Drop for CompartmentHeap<'_, B> {
    fn drop(&mut self) {
        if self.arena.is_empty() {
            return;
        }
        if self.poisoned.get() {
            tracing::warn!(count = self.arena.len(), "leaking allocations of a poisoned heap");
            return;
        }

        let mut live: Vec<_> = self.arena.iter().map(|(handle, record)| (handle, record.extent())).collect();
        live.sort_unstable_by_key(|(_, extent)| extent.base);
        tracing::debug!(count = live.len(), "releasing allocations left live at heap drop");

        // A block is released at most once even if two records alias it.
        let mut released: Option<Extent> = None;
        for (handle, extent) in live {
            if released.is_some_and(|prev| prev.overlaps(&extent) || prev.base == extent.base) {
                tracing::warn!(base = format_args!("{:#x}", extent.base), "skipping aliased block at heap drop");
                continue;
            }
            if let Some(record) = self.arena.remove(handle) {
                // SAFETY: the record was live and no released block overlaps it.
                unsafe {
                    self.backend
                        .deallocate(record.compartment().domain(), record.ptr(), record.layout());
                }
                released = Some(extent);
            }
        }
    }
}
