//! The allocation workload: pattern words and the driver that runs the
//! compartment × pointer matrix.

pub mod driver;
pub mod pattern;

pub use crate::config::{WorkloadConfig, WorkloadMode};
pub use driver::{run_workload, RunReport, WorkloadDriver};
pub use pattern::{pattern_word, AllocationSite, Mismatch, Provenance};
