//! GhostToken - the capability that brands a compartment heap
//!
//! A `GhostToken<'brand>` is a zero-sized type created by `GhostToken::new`.
//! Every `CompartmentHeap` built inside that closure carries the same `'brand`,
//! and so does every `CompartmentId` and `AllocationHandle` it hands out. A
//! handle cannot cross from a heap under one token to a heap under another:
//! the mismatch is a type error. Heaps sharing one token are told apart by
//! the heap stamp inside every id, checked at run time.
//!
//! ## Core invariant (linearity)
//!
//! `GhostToken<'brand>` is intentionally **not** `Copy`/`Clone`.
//! Switching the current compartment requires `&mut GhostToken<'brand>`, so
//! there is exactly one writer of the current-compartment context at a time.
//! Allocation and free only need a shared borrow.

/// Invariant lifetime definitions for branding.
pub mod invariant;
/// Traits defining token capabilities (GhostBorrow/GhostBorrowMut).
pub mod traits;

pub use invariant::InvariantLifetime;
pub use traits::{GhostBorrow, GhostBorrowMut};

/// A zero-sized token that brands a compartment heap and its handles.
#[derive(Debug)]
pub struct GhostToken<'brand> {
    _brand: InvariantLifetime<'brand>,
}

impl<'brand> GhostToken<'brand> {
    /// Creates a new token and executes a closure with it.
    ///
    /// The closure is generic over the brand, so nothing created inside it
    /// can be unified with the brand of any other `GhostToken::new` call.
    ///
    /// # Example
    ///
    /// ```rust
    /// use compart::backend::HeapBackend;
    /// use compart::{CompartmentHeap, GhostToken};
    ///
    /// GhostToken::new(|mut token| {
    ///     let mut heap = CompartmentHeap::new(&token, HeapBackend::system());
    ///     let c = heap.create_compartment().unwrap();
    ///     heap.switch_compartment(&mut token, c).unwrap();
    ///     let h = heap.allocate(&token, 64).unwrap();
    ///     heap.free(&token, h).unwrap();
    /// });
    /// ```
    pub fn new<F, R>(f: F) -> R
    where
        F: for<'new_brand> FnOnce(GhostToken<'new_brand>) -> R,
    {
        f(GhostToken { _brand: InvariantLifetime::new() })
    }
}

// NOTE:
// `GhostToken` is intentionally NOT `Copy`/`Clone`. Duplicating it would let
// two callers hold `&mut GhostToken<'brand>` at once and race on the
// current-compartment context.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_zero_sized() {
        assert_eq!(core::mem::size_of::<GhostToken<'static>>(), 0);
    }

    #[test]
    fn new_returns_closure_result() {
        let value = GhostToken::new(|_token| 7);
        assert_eq!(value, 7);
    }
}
