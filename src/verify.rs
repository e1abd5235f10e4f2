//! Verifier and failure reporter.
//!
//! Verification recomputes the pattern for an allocation and compares it
//! against memory. The first differing element ends verification; nothing is
//! retried or tolerated.

use crate::backend::CompartmentBackend;
use crate::compartment::{AllocationHandle, CompartmentHeap};
use crate::error::HarnessError;
use crate::token::GhostBorrow;
use crate::workload::pattern::{verify_words, AllocationSite, WORD_SIZE};

/// Verifies one allocation against the pattern for `site`.
/// Returns the number of elements checked. A mismatch poisons the heap.
///
/// # Errors
/// `HarnessError::Corruption` with the element's provenance and address, or
/// a contract violation if the handle cannot be read.
pub fn verify_allocation<'brand, B: CompartmentBackend>(
    heap: &CompartmentHeap<'brand, B>,
    token: &impl GhostBorrow<'brand>,
    handle: AllocationHandle<'brand>,
    site: AllocationSite,
) -> Result<usize, HarnessError> {
    let words = heap.words(token, handle)?;
    if let Err(mut mismatch) = verify_words(site, words) {
        mismatch.address = heap
            .record(handle)
            .map(|record| record.base() + mismatch.provenance.element * WORD_SIZE);
        heap.poison();
        return Err(mismatch.into());
    }
    Ok(words.len())
}

/// Logs a fatal failure with its structured details.
pub fn report_failure(error: &HarnessError) {
    let kind = error.kind();
    match error {
        HarnessError::Corruption(mismatch) => tracing::error!(
            ?kind,
            compartment = mismatch.provenance.compartment,
            pointer = mismatch.provenance.pointer,
            element = mismatch.provenance.element,
            expected = format_args!("{:#010x}", mismatch.expected),
            actual = format_args!("{:#010x}", mismatch.actual),
            address = ?mismatch.address,
            "content corruption detected"
        ),
        HarnessError::AllocationFailed { compartment, site, size, source } => tracing::error!(
            ?kind,
            compartment,
            site = ?site,
            size,
            cause = %source,
            "allocation failed"
        ),
        HarnessError::CompartmentsExhausted { created, source } => {
            tracing::error!(?kind, created, cause = %source, "compartment creation failed");
        }
        HarnessError::Overlap { first, second } => {
            tracing::error!(?kind, first = %first, second = %second, "live allocations overlap");
        }
        HarnessError::ContractViolation(violation) => {
            tracing::error!(?kind, violation = %violation, "contract violation");
        }
    }
}
