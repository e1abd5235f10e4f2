//! `WorkloadDriver` - the allocation matrix.
//!
//! For every compartment `i` and pointer `j` the driver switches to the
//! compartment, allocates `S` bytes, fills them with the pattern for
//! `(i, j)` and keeps the handle. Each allocation is verified while its
//! compartment is current and then freed exactly once.
//!
//! Per compartment the states are
//! `CREATED -> ACTIVE(allocating) -> ACTIVE(verifying) -> ACTIVE(freeing) -> IDLE`,
//! looping back to `ACTIVE(allocating)` on every further round.

use crate::backend::CompartmentBackend;
use crate::compartment::{AllocationHandle, CompartmentHeap, CompartmentId};
use crate::config::{WorkloadConfig, WorkloadMode};
use crate::error::{FailureKind, HarnessError};
use crate::token::GhostToken;
use crate::verify::{report_failure, verify_allocation};
use crate::workload::pattern::AllocationSite;
use serde::Serialize;
use std::time::Instant;

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub backend: String,
    pub mode: WorkloadMode,
    pub rounds: usize,
    pub compartments_created: usize,
    pub allocations: usize,
    pub frees: usize,
    pub bytes_allocated: u64,
    pub words_written: u64,
    pub words_verified: u64,
    /// Switch calls issued, including repeats of the current compartment.
    pub switch_requests: u64,
    /// Switch calls that changed the current compartment.
    pub switches: u64,
    pub peak_live_bytes: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Default)]
struct Tally {
    allocations: usize,
    frees: usize,
    bytes_allocated: u64,
    words_written: u64,
    words_verified: u64,
}

/// Runs a [`WorkloadConfig`] against a compartment heap.
#[derive(Debug, Clone)]
pub struct WorkloadDriver {
    config: WorkloadConfig,
}

impl WorkloadDriver {
    pub fn new(config: WorkloadConfig) -> Self {
        Self { config }
    }

    /// Runs every round. Stops at the first failure, which is logged before
    /// the heap can be torn down.
    ///
    /// # Errors
    /// The first `HarnessError` raised by creation, allocation, verification,
    /// the isolation check or release.
    pub fn run<'brand, B: CompartmentBackend>(
        &self,
        token: &mut GhostToken<'brand>,
        heap: &mut CompartmentHeap<'brand, B>,
    ) -> Result<RunReport, HarnessError> {
        let result = self.run_rounds(token, heap);
        if let Err(err) = &result {
            if err.kind() == FailureKind::Corruption {
                heap.poison();
            }
            report_failure(err);
        }
        result
    }

    fn run_rounds<'brand, B: CompartmentBackend>(
        &self,
        token: &mut GhostToken<'brand>,
        heap: &mut CompartmentHeap<'brand, B>,
    ) -> Result<RunReport, HarnessError> {
        let started = Instant::now();
        let config = &self.config;
        let mut tally = Tally::default();

        let mut compartments = Vec::with_capacity(config.compartments);
        self.create_up_to(heap, &mut compartments, config.initial())?;
        tracing::info!(
            created = compartments.len(),
            total = config.compartments,
            "created initial compartments"
        );

        for round in 0..config.rounds {
            if round > 0 {
                self.create_up_to(heap, &mut compartments, config.compartments)?;
            }
            let _span = tracing::info_span!("round", round).entered();
            tracing::info!(compartments = compartments.len(), mode = ?config.mode, "starting round");

            match config.mode {
                WorkloadMode::Minimal => self.minimal_round(token, heap, &compartments, &mut tally)?,
                WorkloadMode::Interleaved => self.interleaved_round(token, heap, &compartments, &mut tally)?,
            }
            tracing::info!(live = heap.live_allocations(), "round complete");
        }

        // Deferred compartments that no round reached still get created.
        self.create_up_to(heap, &mut compartments, config.compartments)?;

        let stats = heap.backend_stats();
        let context = heap.context();
        Ok(RunReport {
            backend: heap.backend().name().to_owned(),
            mode: config.mode,
            rounds: config.rounds,
            compartments_created: heap.registry().len(),
            allocations: tally.allocations,
            frees: tally.frees,
            bytes_allocated: tally.bytes_allocated,
            words_written: tally.words_written,
            words_verified: tally.words_verified,
            switch_requests: context.requests(),
            switches: context.changes(),
            peak_live_bytes: stats.peak_live_bytes,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    fn create_up_to<'brand, B: CompartmentBackend>(
        &self,
        heap: &mut CompartmentHeap<'brand, B>,
        compartments: &mut Vec<CompartmentId<'brand>>,
        target: usize,
    ) -> Result<(), HarnessError> {
        while compartments.len() < target {
            compartments.push(heap.create_compartment()?);
        }
        Ok(())
    }

    /// Compartment by compartment: allocate and fill, verify, free.
    fn minimal_round<'brand, B: CompartmentBackend>(
        &self,
        token: &mut GhostToken<'brand>,
        heap: &mut CompartmentHeap<'brand, B>,
        compartments: &[CompartmentId<'brand>],
        tally: &mut Tally,
    ) -> Result<(), HarnessError> {
        let pointers = self.config.pointers_per_compartment;
        for (i, &id) in compartments.iter().enumerate() {
            let mut handles = Vec::with_capacity(pointers);
            for j in 0..pointers {
                heap.switch_compartment(&mut *token, id)?;
                handles.push(self.allocate_filled(token, heap, id, AllocationSite::new(i, j), tally)?);
            }
            if self.config.check_isolation {
                heap.check_isolation()?;
            }
            self.verify_and_free(token, heap, i, &handles, tally)?;
        }
        Ok(())
    }

    /// Pointer-major allocation so the current compartment changes between
    /// every call, then a second pass that re-activates each compartment to
    /// verify and free.
    fn interleaved_round<'brand, B: CompartmentBackend>(
        &self,
        token: &mut GhostToken<'brand>,
        heap: &mut CompartmentHeap<'brand, B>,
        compartments: &[CompartmentId<'brand>],
        tally: &mut Tally,
    ) -> Result<(), HarnessError> {
        let pointers = self.config.pointers_per_compartment;
        let mut handles: Vec<Vec<AllocationHandle<'brand>>> =
            compartments.iter().map(|_| Vec::with_capacity(pointers)).collect();

        for j in 0..pointers {
            for (i, &id) in compartments.iter().enumerate() {
                heap.switch_compartment(&mut *token, id)?;
                handles[i].push(self.allocate_filled(token, heap, id, AllocationSite::new(i, j), tally)?);
            }
        }
        if self.config.check_isolation {
            heap.check_isolation()?;
        }

        for (i, &id) in compartments.iter().enumerate() {
            heap.switch_compartment(&mut *token, id)?;
            self.verify_and_free(token, heap, i, &handles[i], tally)?;
        }
        Ok(())
    }

    fn allocate_filled<'brand, B: CompartmentBackend>(
        &self,
        token: &GhostToken<'brand>,
        heap: &mut CompartmentHeap<'brand, B>,
        id: CompartmentId<'brand>,
        site: AllocationSite,
        tally: &mut Tally,
    ) -> Result<AllocationHandle<'brand>, HarnessError> {
        let size = self.config.allocation_size;
        let handle = heap.allocate(token, size).map_err(|err| err.at_site(site))?;
        let written = heap.fill_with(token, handle, |k| site.word(k))?;

        tally.allocations += 1;
        tally.bytes_allocated += size as u64;
        tally.words_written += written as u64;
        if let Some(record) = heap.record(handle) {
            tracing::debug!(
                compartment = site.compartment,
                pointer = site.pointer,
                id = %id,
                base = format_args!("{:#x}", record.base()),
                "allocated"
            );
        }
        Ok(handle)
    }

    /// Verifies every handle of compartment `i`, then frees them all. The
    /// compartment must already be current.
    fn verify_and_free<'brand, B: CompartmentBackend>(
        &self,
        token: &GhostToken<'brand>,
        heap: &mut CompartmentHeap<'brand, B>,
        i: usize,
        handles: &[AllocationHandle<'brand>],
        tally: &mut Tally,
    ) -> Result<(), HarnessError> {
        for (j, &handle) in handles.iter().enumerate() {
            let verified = verify_allocation(heap, token, handle, AllocationSite::new(i, j))?;
            tally.words_verified += verified as u64;
        }
        for &handle in handles {
            heap.free(token, handle)?;
            tally.frees += 1;
        }
        Ok(())
    }
}

/// Runs `config` on a fresh heap over `backend`.
///
/// # Errors
/// The first `HarnessError` of the run.
pub fn run_workload<B: CompartmentBackend>(config: &WorkloadConfig, backend: B) -> Result<RunReport, HarnessError> {
    let driver = WorkloadDriver::new(config.clone());
    GhostToken::new(|mut token| {
        let mut heap = CompartmentHeap::new(&token, backend);
        driver.run(&mut token, &mut heap)
    })
}
