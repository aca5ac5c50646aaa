//! Lifecycle overhead benchmarks.
//!
//! Measures a full StartUp/CleanUp cycle against the simulator and the cost
//! of the already-done fast paths that repeat callers hit.

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use mpibridge_core::{BridgeConfig, LifecycleManager, SimRuntime};

fn bench_full_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("lifecycle_cycle");

    for hook in [true, false] {
        let label = if hook { "hook_on" } else { "hook_off" };
        group.bench_with_input(BenchmarkId::new("startup_cleanup", label), &hook, |b, &hook| {
            b.iter(|| {
                let config = BridgeConfig {
                    finalize_hook: hook,
                    ..BridgeConfig::default()
                };
                let m = LifecycleManager::with_config(SimRuntime::new(), config);
                black_box(m.start_up());
                black_box(m.clean_up());
            });
        });
    }

    group.bench_function("startup_finalize", |b| {
        b.iter(|| {
            let rt = Arc::new(SimRuntime::new());
            let m = LifecycleManager::new(Arc::clone(&rt));
            m.start_up();
            black_box(rt.finalize());
        });
    });

    group.finish();
}

fn bench_noop_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("lifecycle_noop");

    let started = LifecycleManager::new(SimRuntime::new());
    started.start_up();
    group.bench_function("startup_already_done", |b| {
        b.iter(|| black_box(started.start_up()));
    });

    let cleaned = LifecycleManager::new(SimRuntime::new());
    cleaned.start_up();
    cleaned.clean_up();
    group.bench_function("cleanup_already_done", |b| {
        b.iter(|| black_box(cleaned.clean_up()));
    });

    group.bench_function("phase_query", |b| {
        b.iter(|| black_box(cleaned.phase()));
    });

    group.finish();
}

criterion_group!(benches, bench_full_cycle, bench_noop_paths);
criterion_main!(benches);
