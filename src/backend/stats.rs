use serde::Serialize;

/// Accounting counters kept by every backend.
///
/// Counts are byte sizes as requested by the caller, not the rounded sizes a
/// backend may reserve internally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackendStats {
    pub domains: usize,
    pub allocated_count: usize,
    pub allocated_bytes: usize,
    pub deallocated_count: usize,
    pub deallocated_bytes: usize,
    pub live_bytes: usize,
    pub peak_live_bytes: usize,
    pub activations: usize,
}

impl BackendStats {
    #[inline(always)]
    pub fn on_alloc(&mut self, size: usize) {
        self.allocated_count += 1;
        self.allocated_bytes += size;
        self.live_bytes += size;
        self.peak_live_bytes = self.peak_live_bytes.max(self.live_bytes);
    }

    #[inline(always)]
    pub fn on_dealloc(&mut self, size: usize) {
        self.deallocated_count += 1;
        self.deallocated_bytes += size;
        self.live_bytes = self.live_bytes.saturating_sub(size);
    }
}
