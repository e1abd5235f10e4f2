//! `CompartmentContext` - the current compartment as an explicit value.
//!
//! Allocation calls are attributed to whatever compartment this context
//! names. It is owned by a `CompartmentHeap` rather than living in process
//! globals, so two heaps never share a current compartment.

use super::CompartmentId;

#[derive(Debug, Default)]
pub struct CompartmentContext<'brand> {
    current: Option<CompartmentId<'brand>>,
    requests: u64,
    changes: u64,
}

impl<'brand> CompartmentContext<'brand> {
    pub const fn new() -> Self {
        Self { current: None, requests: 0, changes: 0 }
    }

    /// Makes `id` current. Returns `true` if the current compartment changed.
    ///
    /// Repeating the current id is a no-op apart from the request counter.
    pub fn switch(&mut self, id: CompartmentId<'brand>) -> bool {
        self.requests += 1;
        if self.current == Some(id) {
            return false;
        }
        self.current = Some(id);
        self.changes += 1;
        true
    }

    pub fn current(&self) -> Option<CompartmentId<'brand>> {
        self.current
    }

    pub fn is_current(&self, id: CompartmentId<'brand>) -> bool {
        self.current == Some(id)
    }

    /// Number of switch calls, including repeats.
    pub fn requests(&self) -> u64 {
        self.requests
    }

    /// Number of switch calls that changed the current compartment.
    pub fn changes(&self) -> u64 {
        self.changes
    }
}
