//! # `compart` - Compartment Allocation Stress Harness
//!
//! Drives a general-purpose allocator across many isolated **compartments**
//! and checks that switching the active compartment between allocation calls
//! never corrupts, aliases or loses memory owned by another compartment.
//!
//! ## Protocol
//!
//! 1. **Registry** (`CompartmentRegistry`): creates compartments and issues
//!    process-unique ids.
//! 2. **Switch** (`CompartmentContext`): the current compartment, held as an
//!    explicit value inside the heap. Every allocate/free is attributed to it.
//! 3. **Driver** (`WorkloadDriver`): for each compartment `i` and pointer `j`,
//!    allocates `S` bytes and writes the pattern word
//!    `(i << 24) | (j << 20) | k` at every 4-byte element `k`.
//! 4. **Verifier** (`verify`): recomputes the pattern before release and
//!    reports the first mismatch with its `(i, j, k)` provenance.
//!
//! ## Safety Model
//!
//! - **Branded handles**: a `CompartmentHeap<'brand, _>` is created inside
//!   `GhostToken::new`, and every `CompartmentId<'brand>` and
//!   `AllocationHandle<'brand>` carries that brand. Handles from a heap under
//!   another token do not type-check; handles from a second heap under the
//!   same token carry a different heap stamp and are rejected at run time.
//! - **Generational allocations**: allocations are arena slots, not bare
//!   addresses. Double free, use after free and access from a compartment
//!   that is not the owner are reported as contract violations.
//! - **Single writer**: switching takes `&mut GhostToken<'brand>`; allocation
//!   and free take a shared borrow.
//!
//! ## Example
//!
//! ```rust
//! use compart::backend::HeapBackend;
//! use compart::{run_workload, WorkloadConfig, WorkloadMode};
//!
//! let config = WorkloadConfig {
//!     compartments: 4,
//!     initial_compartments: None,
//!     pointers_per_compartment: 4,
//!     allocation_size: 4096,
//!     mode: WorkloadMode::Interleaved,
//!     ..WorkloadConfig::default()
//! };
//! let report = run_workload(&config, HeapBackend::system()).unwrap();
//! assert_eq!(report.allocations, 16);
//! assert_eq!(report.words_verified, 16 * 1024);
//! ```

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod backend;
pub mod compartment;
pub mod config;
pub mod error;
pub mod logging;
pub mod token;
pub mod verify;
pub mod workload;

pub use backend::{AllocError, BackendOption, CompartmentBackend, HeapBackend, RegionBackend};
pub use compartment::{AllocationHandle, CompartmentHeap, CompartmentId};
pub use config::{HarnessConfig, WorkloadConfig, WorkloadMode};
pub use error::{FailureKind, HarnessError, Violation};
pub use token::GhostToken;
pub use verify::{report_failure, verify_allocation};
pub use workload::{run_workload, RunReport, WorkloadDriver};

// Compile-time layout claims.
const _: () = {
    use core::mem;

    // Tokens are ZSTs.
    assert!(mem::size_of::<GhostToken<'static>>() == 0);

    // The brand adds nothing to an id beyond its heap stamp, raw value and domain.
    assert!(mem::size_of::<CompartmentId<'static>>() == 3 * mem::size_of::<u64>());

    // Pattern elements must fit the allocation alignment.
    assert!(compartment::heap::ALLOCATION_ALIGN % mem::align_of::<u32>() == 0);
};
