//! Benchmarks for the convergence calculator and a full cascade run
//!
//! Target: a 1,000-LUN appliance resolves well under one job-poll interval

use capacity_autoscaler::capacity::convergence::{grow_to_floor, grow_to_threshold};
use capacity_autoscaler::{
    CascadeResolver, InMemoryAppliance, JobWaiter, LunUsage, PoolCapacity, Provisioning,
    ResizePolicy, UsageCollector, VolumeUsage,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const GIB: u64 = 1024 * 1024 * 1024;

fn bench_grow_to_threshold(c: &mut Criterion) {
    let mut group = c.benchmark_group("convergence");

    for used_percent in [81.0, 95.0, 99.9] {
        group.bench_with_input(
            BenchmarkId::new("grow_to_threshold", used_percent),
            &used_percent,
            |b, &used_percent| {
                let size = 100.0 * GIB as f64;
                let used = size * used_percent / 100.0;
                b.iter(|| grow_to_threshold(black_box(size), black_box(used), black_box(10.0)));
            },
        );
    }

    group.bench_function("grow_to_floor_10x", |b| {
        b.iter(|| grow_to_floor(black_box(1024.0), black_box(10_240.0), black_box(1.05)));
    });

    group.finish();
}

fn appliance(luns: usize) -> InMemoryAppliance {
    let mut appliance = InMemoryAppliance::new(
        "bench",
        PoolCapacity {
            aggregate_total_bytes: 1_000_000 * GIB,
            storage_capacity_gib: 1_000_000,
        },
    )
    .with_pending_polls(0);

    for v in 0..luns / 10 {
        appliance = appliance.with_volume(VolumeUsage {
            id: format!("vol-{:04}", v),
            name: format!("vol{}", v),
            size_bytes: 2_000 * GIB,
            available_bytes: 1_000 * GIB,
            provisioning: Provisioning::Thin,
            is_clone: false,
            parent_snapshot: None,
        });
    }
    for i in 0..luns {
        let volume = format!("vol-{:04}", i / 10);
        appliance = appliance.with_lun(LunUsage {
            id: format!("lun-{:05}", i),
            name: format!("/vol/{}/lun{}", volume, i),
            volume_id: volume.clone(),
            volume_name: volume,
            size_bytes: 100 * GIB,
            // Every third LUN crosses the resize threshold
            used_bytes: if i % 3 == 0 { 95 * GIB } else { 50 * GIB },
            provisioning: Provisioning::Thin,
        });
    }
    appliance
}

fn bench_cascade(c: &mut Criterion) {
    let mut group = c.benchmark_group("cascade");
    group.sample_size(20);

    let policy = ResizePolicy::default();
    let jobs = JobWaiter::new(
        Duration::from_millis(1),
        Duration::from_millis(1),
        1.0,
        Duration::from_secs(5),
        CancellationToken::new(),
    );

    for luns in [100usize, 1_000] {
        group.bench_with_input(BenchmarkId::new("thin_luns", luns), &luns, |b, &luns| {
            b.iter_batched(
                || appliance(luns),
                |appliance| {
                    tokio_test::block_on(async {
                        let usage = appliance.fetch_usage().await.unwrap_or_else(|e| panic!("{}", e));
                        let outcome =
                            CascadeResolver::new("bench", &policy, &appliance, &jobs, usage).run().await;
                        black_box(outcome.decisions.len())
                    })
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_grow_to_threshold, bench_cascade);
criterion_main!(benches);
