//! Traits for abstracting over the access a token grants.

use crate::token::GhostToken;

/// A token that authorizes shared operations on a branded heap:
/// allocation, free, fill and readback.
pub trait GhostBorrow<'brand> {}

/// A token that authorizes exclusive operations on a branded heap:
/// changing the current compartment.
pub trait GhostBorrowMut<'brand>: GhostBorrow<'brand> {}

impl<'brand> GhostBorrow<'brand> for GhostToken<'brand> {}
impl<'brand> GhostBorrowMut<'brand> for GhostToken<'brand> {}
