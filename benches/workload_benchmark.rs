use compart::backend::{HeapBackend, RegionBackend};
use compart::workload::AllocationSite;
use compart::{run_workload, CompartmentHeap, GhostToken, WorkloadConfig, WorkloadMode};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn config(mode: WorkloadMode, size: usize) -> WorkloadConfig {
    WorkloadConfig {
        compartments: 8,
        initial_compartments: None,
        pointers_per_compartment: 16,
        allocation_size: size,
        rounds: 1,
        mode,
        check_isolation: false,
    }
}

fn bench_workload(c: &mut Criterion) {
    let mut group = c.benchmark_group("Workload 8x16");

    for size in [256usize, 4096, 64 << 10] {
        group.throughput(Throughput::Bytes((8 * 16 * size) as u64));
        for mode in [WorkloadMode::Minimal, WorkloadMode::Interleaved] {
            let config = config(mode, size);
            group.bench_with_input(BenchmarkId::new(format!("system/{mode:?}"), size), &config, |b, config| {
                b.iter(|| black_box(run_workload(config, HeapBackend::system()).unwrap()));
            });
        }
        let config = config(WorkloadMode::Interleaved, size);
        group.bench_with_input(BenchmarkId::new("region/Interleaved", size), &config, |b, config| {
            b.iter(|| black_box(run_workload(config, RegionBackend::new()).unwrap()));
        });
    }

    group.finish();
}

fn bench_switch(c: &mut Criterion) {
    let mut group = c.benchmark_group("Switch");

    group.bench_function("alternate two compartments", |b| {
        GhostToken::new(|mut token| {
            let mut heap = CompartmentHeap::new(&token, HeapBackend::system());
            let a = heap.create_compartment().unwrap();
            let other = heap.create_compartment().unwrap();
            b.iter(|| {
                heap.switch_compartment(&mut token, a).unwrap();
                black_box(heap.switch_compartment(&mut token, other).unwrap());
            });
        });
    });

    group.bench_function("allocate fill free 1KiB", |b| {
        GhostToken::new(|mut token| {
            let mut heap = CompartmentHeap::new(&token, HeapBackend::system());
            let a = heap.create_compartment().unwrap();
            heap.switch_compartment(&mut token, a).unwrap();
            let site = AllocationSite::new(0, 0);
            b.iter(|| {
                let h = heap.allocate(&token, 1024).unwrap();
                heap.fill_with(&token, h, |k| site.word(k)).unwrap();
                heap.free(&token, black_box(h)).unwrap();
            });
        });
    });

    group.finish();
}

criterion_group!(benches, bench_workload, bench_switch);
criterion_main!(benches);
