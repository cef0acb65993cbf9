//! Throughput benchmarks: replay a synthetic trace through a hierarchy and
//! measure operations/sec, mirroring the teacher crate's
//! `criterion_group!`/`criterion_main!` layout (cold-start vs. warm
//! throughput groups, per-group sample/measurement tuning).

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};

use coherence_sim::{CacheConfig, CoreHandle, Geometry, HierarchyConfig, NullMonitor};

fn single_l1_config() -> HierarchyConfig {
    HierarchyConfig {
        block_bits: 6,
        caches: vec![CacheConfig {
            name: "l1".into(),
            index_bits: 6,
            ways: 8,
            extended_ways: 0,
            victim_ways: 0,
            replacer: "lru".into(),
            indexer: "norm".into(),
            policy: "msi".into(),
            partitions: 1,
            copy_buffers: 4,
            with_data: true,
            with_directory: false,
            seed: 1,
            outer: "memory".into(),
        }],
        dispatcher: None,
    }
}

fn two_level_config() -> HierarchyConfig {
    HierarchyConfig {
        block_bits: 6,
        caches: vec![
            CacheConfig {
                name: "l2".into(),
                index_bits: 8,
                ways: 16,
                extended_ways: 0,
                victim_ways: 0,
                replacer: "lru".into(),
                indexer: "norm".into(),
                policy: "mesi".into(),
                partitions: 1,
                copy_buffers: 4,
                with_data: true,
                with_directory: true,
                seed: 1,
                outer: "memory".into(),
            },
            CacheConfig {
                name: "l1a".into(),
                index_bits: 6,
                ways: 8,
                extended_ways: 0,
                victim_ways: 0,
                replacer: "lru".into(),
                indexer: "norm".into(),
                policy: "mesi".into(),
                partitions: 1,
                copy_buffers: 4,
                with_data: true,
                with_directory: false,
                seed: 2,
                outer: "l2".into(),
            },
            CacheConfig {
                name: "l1b".into(),
                index_bits: 6,
                ways: 8,
                extended_ways: 0,
                victim_ways: 0,
                replacer: "lru".into(),
                indexer: "norm".into(),
                policy: "mesi".into(),
                partitions: 1,
                copy_buffers: 4,
                with_data: true,
                with_directory: false,
                seed: 3,
                outer: "l2".into(),
            },
        ],
        dispatcher: None,
    }
}

/// A synthetic trace: a working set of 256 lines, touched with ~1-in-8
/// writes, enough addresses to generate steady capacity misses against the
/// configured cache sizes above.
fn synthetic_addrs(n: usize) -> Vec<(u64, bool)> {
    (0..n)
        .map(|i| {
            let addr = ((i * 2654435761usize) % (256 * 64)) as u64 & !0x3F;
            (addr, i % 8 == 0)
        })
        .collect()
}

fn bench_single_l1_warm_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_l1_warm_throughput");
    group.sample_size(30);
    group.measurement_time(std::time::Duration::from_secs(5));

    let trace = synthetic_addrs(4096);
    group.bench_function("read_write_mix", |b| {
        b.iter(|| {
            let cfg = single_l1_config();
            let h = cfg.build(Arc::new(NullMonitor)).expect("valid config");
            let l1 = h.get("l1").unwrap();
            let geom = Geometry::new(6, 6);
            let handle = CoreHandle::new(l1, geom, 0);
            for &(addr, is_write) in &trace {
                if is_write {
                    black_box(handle.write(black_box(addr), &[0xAB; 64]));
                } else {
                    black_box(handle.read(black_box(addr)));
                }
            }
        });
    });
    group.finish();
}

fn bench_two_level_hierarchy(c: &mut Criterion) {
    let mut group = c.benchmark_group("two_level_hierarchy");
    group.sample_size(20);
    group.warm_up_time(std::time::Duration::from_millis(500));
    group.measurement_time(std::time::Duration::from_secs(8));

    let trace_a = synthetic_addrs(2048);
    let trace_b = synthetic_addrs(2048);

    group.bench_function("two_cores_shared_l2", |b| {
        b.iter(|| {
            let cfg = two_level_config();
            let h = cfg.build(Arc::new(NullMonitor)).expect("valid config");
            let l1a = h.get("l1a").unwrap();
            let l1b = h.get("l1b").unwrap();
            let geom = Geometry::new(6, 6);
            let core_a = CoreHandle::new(l1a, geom, 0);
            let core_b = CoreHandle::new(l1b, geom, 0);
            for i in 0..trace_a.len() {
                let (addr_a, write_a) = trace_a[i];
                let (addr_b, write_b) = trace_b[i];
                if write_a {
                    black_box(core_a.write(black_box(addr_a), &[0xCD; 64]));
                } else {
                    black_box(core_a.read(black_box(addr_a)));
                }
                if write_b {
                    black_box(core_b.write(black_box(addr_b), &[0xEF; 64]));
                } else {
                    black_box(core_b.read(black_box(addr_b)));
                }
            }
        });
    });
    group.finish();
}

criterion_group!(warm_throughput, bench_single_l1_warm_throughput);
criterion_group!(hierarchy_throughput, bench_two_level_hierarchy);
criterion_main!(warm_throughput, hierarchy_throughput);
