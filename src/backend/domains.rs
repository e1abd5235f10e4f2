//! Domain bookkeeping and memory limits shared by the backends.

use super::{AllocError, DomainId};

/// A growable table of per-domain state with an optional upper bound.
///
/// The bound models a finite isolation resource (for example, hardware
/// protection keys). Domain ids are table indices and are never reused.
#[derive(Debug)]
pub struct DomainTable<T> {
    entries: Vec<T>,
    limit: Option<usize>,
}

impl<T: Default> DomainTable<T> {
    pub const fn new() -> Self {
        Self { entries: Vec::new(), limit: None }
    }

    pub fn set_limit(&mut self, limit: Option<usize>) {
        self.limit = limit;
    }

    /// Appends a fresh entry and returns its id.
    ///
    /// # Errors
    /// Returns `AllocError::DomainsExhausted` once `limit` entries exist.
    pub fn create(&mut self) -> Result<DomainId, AllocError> {
        if let Some(limit) = self.limit {
            if self.entries.len() >= limit {
                return Err(AllocError::DomainsExhausted { limit });
            }
        }
        let id = DomainId::new(self.entries.len() as u64);
        self.entries.push(T::default());
        Ok(id)
    }
}

impl<T> DomainTable<T> {
    pub fn get(&self, id: DomainId) -> Option<&T> {
        usize::try_from(id.get()).ok().and_then(|i| self.entries.get(i))
    }

    pub fn get_mut(&mut self, id: DomainId) -> Option<&mut T> {
        usize::try_from(id.get()).ok().and_then(move |i| self.entries.get_mut(i))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.entries.iter_mut()
    }
}

impl<T: Default> Default for DomainTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A byte budget shared by all domains of one backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryBudget {
    limit: Option<usize>,
    reserved: usize,
}

impl MemoryBudget {
    pub const fn unlimited() -> Self {
        Self { limit: None, reserved: 0 }
    }

    pub const fn limited(limit: usize) -> Self {
        Self { limit: Some(limit), reserved: 0 }
    }

    /// Reserves `size` bytes.
    ///
    /// # Errors
    /// Returns `AllocError::BudgetExceeded` if the reservation would pass the limit.
    pub fn reserve(&mut self, size: usize) -> Result<(), AllocError> {
        if let Some(limit) = self.limit {
            let remaining = limit.saturating_sub(self.reserved);
            if size > remaining {
                return Err(AllocError::BudgetExceeded { requested: size, remaining });
            }
        }
        self.reserved += size;
        Ok(())
    }

    pub fn release(&mut self, size: usize) {
        self.reserved = self.reserved.saturating_sub(size);
    }

    pub fn reserved(&self) -> usize {
        self.reserved
    }
}
