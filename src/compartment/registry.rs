//! `CompartmentRegistry` - issues compartment ids and remembers them.

use super::CompartmentId;
use crate::backend::CompartmentBackend;
use crate::error::HarnessError;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_STAMP: AtomicU64 = AtomicU64::new(1);

/// Tracks every compartment created for one brand.
///
/// Ids start at 1 and increase by one per creation. Compartments are never
/// destroyed before the registry, so membership only grows. Every registry
/// draws a process-unique stamp that all of its ids carry.
#[derive(Debug)]
pub struct CompartmentRegistry<'brand> {
    stamp: u64,
    ids: Vec<CompartmentId<'brand>>,
}

impl<'brand> CompartmentRegistry<'brand> {
    pub fn new() -> Self {
        Self { stamp: NEXT_STAMP.fetch_add(1, Ordering::Relaxed), ids: Vec::new() }
    }

    /// The stamp carried by every id this registry issues.
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    /// Creates a compartment backed by a fresh backend domain.
    ///
    /// # Errors
    /// `HarnessError::CompartmentsExhausted` if the backend cannot create
    /// another domain.
    pub fn create<B>(&mut self, backend: &mut B) -> Result<CompartmentId<'brand>, HarnessError>
    where
        B: CompartmentBackend + ?Sized,
    {
        let domain = backend
            .create_domain()
            .map_err(|source| HarnessError::CompartmentsExhausted { created: self.ids.len(), source })?;
        let id = CompartmentId::new(self.stamp, self.ids.len() as u64 + 1, domain);
        self.ids.push(id);
        tracing::debug!(compartment = %id, domain = %domain, "created compartment");
        Ok(id)
    }

    /// Whether `id` was issued by this registry.
    pub fn contains(&self, id: CompartmentId<'brand>) -> bool {
        // Ids are dense, so the raw value indexes the table.
        usize::try_from(id.raw())
            .ok()
            .and_then(|raw| raw.checked_sub(1))
            .and_then(|i| self.ids.get(i))
            .is_some_and(|known| *known == id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids in creation order.
    pub fn ids(&self) -> &[CompartmentId<'brand>] {
        &self.ids
    }
}

impl Default for CompartmentRegistry<'_> {
    fn default() -> Self {
        Self::new()
    }
}
