//! `AllocationArena` - live allocations as generational slots.
//!
//! Callers hold an `AllocationHandle` (slot index + generation + owner)
//! instead of a bare address. Freeing bumps the slot's generation, so a
//! second free or a late readback through the old handle is detected instead
//! of reaching the allocator.

use super::CompartmentId;
use crate::error::Extent;
use core::alloc::Layout;
use core::ptr::NonNull;

/// A handle to one allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocationHandle<'brand> {
    index: usize,
    generation: u32,
    compartment: CompartmentId<'brand>,
}

impl<'brand> AllocationHandle<'brand> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// The compartment that owns the allocation.
    pub fn compartment(&self) -> CompartmentId<'brand> {
        self.compartment
    }
}

/// What the arena knows about a live allocation.
#[derive(Debug)]
pub struct AllocationRecord<'brand> {
    compartment: CompartmentId<'brand>,
    ptr: NonNull<u8>,
    layout: Layout,
    size: usize,
    filled: bool,
}

impl<'brand> AllocationRecord<'brand> {
    pub(crate) fn new(compartment: CompartmentId<'brand>, ptr: NonNull<u8>, layout: Layout, size: usize) -> Self {
        Self { compartment, ptr, layout, size, filled: false }
    }

    pub fn compartment(&self) -> CompartmentId<'brand> {
        self.compartment
    }

    pub fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub fn base(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Bytes requested by the caller.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Layout passed to the backend (size rounded up to at least one byte).
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Whether the contents have been written since allocation.
    pub fn is_filled(&self) -> bool {
        self.filled
    }

    pub(crate) fn mark_filled(&mut self) {
        self.filled = true;
    }

    pub fn extent(&self) -> Extent {
        Extent { compartment: self.compartment.raw(), base: self.base(), len: self.size }
    }
}

struct Slot<'brand> {
    generation: u32,
    record: Option<AllocationRecord<'brand>>,
    next_free: Option<usize>,
}

/// Generational storage of live allocation records.
pub struct AllocationArena<'brand> {
    slots: Vec<Slot<'brand>>,
    free_head: Option<usize>,
    len: usize,
}

impl<'brand> AllocationArena<'brand> {
    pub const fn new() -> Self {
        Self { slots: Vec::new(), free_head: None, len: 0 }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { slots: Vec::with_capacity(capacity), free_head: None, len: 0 }
    }

    pub fn insert(&mut self, record: AllocationRecord<'brand>) -> AllocationHandle<'brand> {
        let compartment = record.compartment;
        self.len += 1;

        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index];
            self.free_head = slot.next_free.take();
            slot.record = Some(record);
            return AllocationHandle { index, generation: slot.generation, compartment };
        }

        let index = self.slots.len();
        self.slots.push(Slot { generation: 0, record: Some(record), next_free: None });
        AllocationHandle { index, generation: 0, compartment }
    }

    pub fn get(&self, handle: AllocationHandle<'brand>) -> Option<&AllocationRecord<'brand>> {
        self.slots
            .get(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.record.as_ref())
    }

    pub fn get_mut(&mut self, handle: AllocationHandle<'brand>) -> Option<&mut AllocationRecord<'brand>> {
        self.slots
            .get_mut(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.record.as_mut())
    }

    /// Removes the record and retires the handle's generation.
    pub fn remove(&mut self, handle: AllocationHandle<'brand>) -> Option<AllocationRecord<'brand>> {
        let slot = self.slots.get_mut(handle.index)?;
        if slot.generation != handle.generation {
            return None;
        }
        let record = slot.record.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        slot.next_free = self.free_head;
        self.free_head = Some(handle.index);
        self.len -= 1;
        Some(record)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Live allocations with their handles, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (AllocationHandle<'brand>, &AllocationRecord<'brand>)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.record.as_ref().map(|record| {
                (AllocationHandle { index, generation: slot.generation, compartment: record.compartment }, record)
            })
        })
    }

    /// Live allocations owned by `compartment`.
    pub fn live_in(&self, compartment: CompartmentId<'brand>) -> usize {
        self.iter().filter(|(_, r)| r.compartment == compartment).count()
    }

    /// Returns two live allocations whose address ranges intersect, if any.
    pub fn find_overlap(&self) -> Option<(Extent, Extent)> {
        let mut extents: Vec<Extent> = self.iter().map(|(_, r)| r.extent()).collect();
        extents.sort_unstable_by_key(|e| e.base);

        // Compare each range with the furthest-reaching range seen so far.
        let mut reach: Option<Extent> = None;
        for extent in extents {
            if let Some(prev) = reach {
                if prev.overlaps(&extent) {
                    return Some((prev, extent));
                }
                if extent.end() > prev.end() {
                    reach = Some(extent);
                }
            } else {
                reach = Some(extent);
            }
        }
        None
    }
}

impl Default for AllocationArena<'_> {
    fn default() -> Self {
        Self::new()
    }
}
