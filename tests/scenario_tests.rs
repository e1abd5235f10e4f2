use compart::backend::{AllocError, BackendOption, HeapBackend, RegionBackend};
use compart::workload::AllocationSite;
use compart::{
    run_workload, verify_allocation, CompartmentHeap, FailureKind, GhostToken, HarnessError, WorkloadConfig,
    WorkloadMode,
};
use std::process::Command;

fn stress_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_compart-stress"))
}

// Eight compartments, sixteen 1 MiB allocations each, all verified.
#[test]
fn test_reference_workload_passes() {
    let config = WorkloadConfig {
        compartments: 8,
        initial_compartments: None,
        pointers_per_compartment: 16,
        allocation_size: 1 << 20,
        ..WorkloadConfig::default()
    };
    let report = run_workload(&config, HeapBackend::system()).unwrap();
    assert_eq!(report.compartments_created, 8);
    assert_eq!(report.allocations, 8 * 16);
    assert_eq!(report.frees, 8 * 16);
    assert_eq!(report.words_verified, 8 * 16 * (1 << 18));
}

#[test]
fn test_default_workload_creates_deferred_compartments() {
    let config = WorkloadConfig { allocation_size: 4096, ..WorkloadConfig::default() };
    let report = run_workload(&config, HeapBackend::system()).unwrap();
    assert_eq!(report.compartments_created, 16);
    assert_eq!(report.allocations, 8 * 16);
}

#[test]
fn test_oversized_request_fails_without_crashing() {
    GhostToken::new(|mut token| {
        let mut heap = CompartmentHeap::new(&token, HeapBackend::system());
        let a = heap.create_compartment().unwrap();
        heap.switch_compartment(&mut token, a).unwrap();

        let err = heap.allocate(&token, usize::MAX / 2).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::AllocationFailed { source: AllocError::InvalidLayout { .. }, .. }
        ));
        assert_eq!(err.kind(), FailureKind::AllocationFailure);
        assert_ne!(err.exit_code(), 0);

        // The heap stays usable afterwards.
        let h = heap.allocate(&token, 64).unwrap();
        heap.free(&token, h).unwrap();
    });
}

// Larger than any user address space, so the allocator itself says no.
#[cfg(target_pointer_width = "64")]
#[test]
fn test_allocator_refusal_is_out_of_memory() {
    const HUGE: usize = 1 << 48;
    GhostToken::new(|mut token| {
        let mut heap = CompartmentHeap::new(&token, HeapBackend::system());
        let a = heap.create_compartment().unwrap();
        heap.switch_compartment(&mut token, a).unwrap();
        let err = heap.allocate(&token, HUGE).unwrap_err();
        assert_eq!(
            err,
            HarnessError::AllocationFailed {
                compartment: a.raw(),
                site: None,
                size: HUGE,
                source: AllocError::OutOfMemory { size: HUGE },
            }
        );
        assert_eq!(heap.backend_stats().live_bytes, 0);
    });

    GhostToken::new(|mut token| {
        let mut heap = CompartmentHeap::new(&token, RegionBackend::new());
        let a = heap.create_compartment().unwrap();
        heap.switch_compartment(&mut token, a).unwrap();
        let err = heap.allocate(&token, HUGE).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::AllocationFailed { source: AllocError::OutOfMemory { size: HUGE }, .. }
        ));
        assert_eq!(heap.backend().domain_regions(a.domain()), Some(0));

        let h = heap.allocate(&token, 4096).unwrap();
        heap.free(&token, h).unwrap();
    });
}

#[test]
fn test_memory_limit_fails_first_allocation() {
    let config = WorkloadConfig {
        compartments: 2,
        initial_compartments: None,
        pointers_per_compartment: 2,
        allocation_size: 1 << 20,
        ..WorkloadConfig::default()
    };
    let err = run_workload(&config, HeapBackend::system().with_memory_limit(1 << 19)).unwrap_err();
    match err {
        HarnessError::AllocationFailed { site, size, source: AllocError::BudgetExceeded { .. }, .. } => {
            assert_eq!(site, Some(AllocationSite::new(0, 0)));
            assert_eq!(size, 1 << 20);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_switch_away_and_back_preserves_content() {
    GhostToken::new(|mut token| {
        let mut heap = CompartmentHeap::new(&token, HeapBackend::system());
        let a = heap.create_compartment().unwrap();
        let b = heap.create_compartment().unwrap();
        let site = AllocationSite::new(0, 0);

        heap.switch_compartment(&mut token, a).unwrap();
        let ha = heap.allocate(&token, 1 << 16).unwrap();
        heap.fill_with(&token, ha, |k| site.word(k)).unwrap();

        heap.switch_compartment(&mut token, b).unwrap();
        let hb = heap.allocate(&token, 1 << 16).unwrap();
        heap.fill_with(&token, hb, |_| 0xFFFF_FFFF).unwrap();

        heap.switch_compartment(&mut token, a).unwrap();
        assert_eq!(verify_allocation(&heap, &token, ha, site).unwrap(), 1 << 14);
        heap.free(&token, ha).unwrap();

        heap.switch_compartment(&mut token, b).unwrap();
        heap.free(&token, hb).unwrap();
    });
}

#[test]
fn test_region_backend_runs_interleaved_with_protection() {
    let config = WorkloadConfig {
        compartments: 4,
        initial_compartments: Some(2),
        pointers_per_compartment: 4,
        allocation_size: 5000,
        rounds: 2,
        mode: WorkloadMode::Interleaved,
        check_isolation: true,
    };
    let report = run_workload(&config, RegionBackend::new().with_protection()).unwrap();
    assert_eq!(report.backend, "region");
    assert_eq!(report.allocations, (2 + 4) * 4);
    assert_eq!(report.frees, report.allocations);
}

#[test]
fn test_inactive_compartments_are_read_only() {
    GhostToken::new(|mut token| {
        let mut heap = CompartmentHeap::new(&token, RegionBackend::new().with_protection());
        let a = heap.create_compartment().unwrap();
        let b = heap.create_compartment().unwrap();

        heap.switch_compartment(&mut token, a).unwrap();
        let h = heap.allocate(&token, 256).unwrap();
        heap.fill_with(&token, h, |k| k as u32).unwrap();
        assert_eq!(heap.backend().is_protected(a.domain()), Some(false));

        heap.switch_compartment(&mut token, b).unwrap();
        assert_eq!(heap.backend().is_protected(a.domain()), Some(true));
        assert_eq!(heap.backend().is_protected(b.domain()), Some(false));

        heap.switch_compartment(&mut token, a).unwrap();
        assert_eq!(heap.words(&token, h).unwrap()[63], 63);
        heap.free(&token, h).unwrap();
    });
}

#[test]
fn test_binary_exit_codes() {
    let ok = stress_bin()
        .args(["--compartments", "2", "--pointers", "2", "--size", "4K", "--all-up-front"])
        .env("RUST_LOG", "off")
        .status()
        .unwrap();
    assert_eq!(ok.code(), Some(0));

    let oom = stress_bin()
        .args(["--compartments", "2", "--pointers", "2", "--size", "1M", "--memory-limit", "512K"])
        .env("RUST_LOG", "off")
        .status()
        .unwrap();
    assert_eq!(oom.code(), Some(i32::from(FailureKind::AllocationFailure.exit_code())));

    let exhausted = stress_bin()
        .args(["--compartments", "4", "--all-up-front", "--max-compartments", "2", "--size", "4K"])
        .env("RUST_LOG", "off")
        .status()
        .unwrap();
    assert_eq!(exhausted.code(), Some(i32::from(FailureKind::ResourceExhaustion.exit_code())));

    let invalid = stress_bin()
        .args(["--compartments", "0"])
        .env("RUST_LOG", "off")
        .status()
        .unwrap();
    assert_eq!(invalid.code(), Some(2));
}

#[test]
fn test_binary_writes_report() {
    let path = std::env::temp_dir().join(format!("compart-report-{}.json", std::process::id()));
    let status = stress_bin()
        .args(["--compartments", "3", "--pointers", "2", "--size", "1K", "--mode", "interleaved", "--all-up-front"])
        .arg("--report")
        .arg(&path)
        .env("RUST_LOG", "off")
        .status()
        .unwrap();
    assert!(status.success());

    let report: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(report["allocations"], 6);
    assert_eq!(report["mode"], "interleaved");
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn test_protection_can_be_enabled_mid_run() {
    GhostToken::new(|mut token| {
        let mut heap = CompartmentHeap::new(&token, RegionBackend::new());
        let a = heap.create_compartment().unwrap();
        let b = heap.create_compartment().unwrap();

        heap.switch_compartment(&mut token, a).unwrap();
        let h = heap.allocate(&token, 128).unwrap();
        heap.fill_with(&token, h, |_| 9).unwrap();
        heap.switch_compartment(&mut token, b).unwrap();
        assert_eq!(heap.backend().is_protected(a.domain()), Some(false));

        heap.set_backend_option(BackendOption::ProtectInactive, true);
        assert_eq!(heap.backend().is_protected(a.domain()), Some(true));
        assert_eq!(heap.backend().is_protected(b.domain()), Some(false));

        heap.set_backend_option(BackendOption::ProtectInactive, false);
        heap.switch_compartment(&mut token, a).unwrap();
        heap.free(&token, h).unwrap();
    });
}
