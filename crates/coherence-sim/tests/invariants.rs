//! Property-based invariants (spec §8, "universally quantified over
//! configurations and traces"): these don't pin one worked example, they
//! generate many and assert a property that must hold for all of them.

use std::sync::Arc;
use std::thread;

use proptest::prelude::*;

use coherence_sim::buffer::CopyBufferPool;
use coherence_sim::lock::TxLockTable;
use coherence_sim::{
    CacheConfig, CacheState, CoreHandle, CountingMonitor, Geometry, HierarchyConfig, Monitor,
    Priority,
};

fn two_l1s_over_shared_l2() -> HierarchyConfig {
    HierarchyConfig {
        block_bits: 6,
        caches: vec![
            CacheConfig {
                name: "l2".into(),
                index_bits: 3,
                ways: 4,
                extended_ways: 0,
                victim_ways: 0,
                replacer: "lru".into(),
                indexer: "norm".into(),
                policy: "msi".into(),
                partitions: 1,
                copy_buffers: 2,
                with_data: true,
                with_directory: true,
                seed: 1,
                outer: "memory".into(),
            },
            CacheConfig {
                name: "l1a".into(),
                index_bits: 2,
                ways: 2,
                extended_ways: 0,
                victim_ways: 0,
                replacer: "lru".into(),
                indexer: "norm".into(),
                policy: "msi".into(),
                partitions: 1,
                copy_buffers: 2,
                with_data: true,
                with_directory: false,
                seed: 2,
                outer: "l2".into(),
            },
            CacheConfig {
                name: "l1b".into(),
                index_bits: 2,
                ways: 2,
                extended_ways: 0,
                victim_ways: 0,
                replacer: "lru".into(),
                indexer: "norm".into(),
                policy: "msi".into(),
                partitions: 1,
                copy_buffers: 2,
                with_data: true,
                with_directory: false,
                seed: 3,
                outer: "l2".into(),
            },
        ],
        dispatcher: None,
    }
}

/// A random trace over two cores and two addresses: which core issues the
/// op, whether it's a read or a write, and which of two addresses it
/// targets.
#[derive(Debug, Clone, Copy)]
enum Op {
    Read(bool, bool),
    Write(bool, bool),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    (any::<bool>(), any::<bool>(), any::<bool>()).prop_map(|(is_write, core, addr)| {
        if is_write {
            Op::Write(core, addr)
        } else {
            Op::Read(core, addr)
        }
    })
}

fn modified_or_exclusive_owners(
    l1a: &coherence_sim::CoherentCache,
    l1b: &coherence_sim::CoherentCache,
    addr: coherence_sim::LineAddr,
) -> usize {
    [l1a, l1b]
        .iter()
        .filter(|cache| {
            cache
                .core()
                .hit(addr)
                .map(|slot| {
                    let line = cache.core().line(slot).lock().expect("line poisoned");
                    matches!(line.meta.state, CacheState::Modified | CacheState::Exclusive)
                })
                .unwrap_or(false)
        })
        .count()
}

proptest! {
    /// At no point in any trace do two sibling L1s simultaneously hold the
    /// same address Modified or Exclusive: outer-mediated probes must always
    /// downgrade the existing owner before a sibling can acquire write
    /// permission.
    #[test]
    fn at_most_one_owner_per_address(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let cfg = two_l1s_over_shared_l2();
        let monitor = Arc::new(CountingMonitor::new());
        let h = cfg.build(monitor as Arc<dyn Monitor>).expect("valid config");
        let l1a = h.get("l1a").unwrap();
        let l1b = h.get("l1b").unwrap();
        let geom = Geometry::new(6, 2);
        let core_a = CoreHandle::new(l1a, geom, 0);
        let core_b = CoreHandle::new(l1b, geom, 0);

        let addr_x: u64 = 0x40;
        let addr_y: u64 = 0x80;

        for op in ops {
            let (core, addr, is_write) = match op {
                Op::Read(core, addr) => (core, addr, false),
                Op::Write(core, addr) => (core, addr, true),
            };
            let handle = if core { &core_b } else { &core_a };
            let raw_addr = if addr { addr_y } else { addr_x };

            if is_write {
                handle.write(raw_addr, &[0x42u8; 64]);
            } else {
                handle.read(raw_addr);
            }

            for &raw in &[addr_x, addr_y] {
                let norm = geom.normalize(raw);
                let owners = modified_or_exclusive_owners(l1a, l1b, norm);
                prop_assert!(owners <= 1, "more than one sibling held {:#x} as Modified/Exclusive", raw);
            }
        }
    }

    /// Copy-buffer checkout/return never lets more items be in use than the
    /// pool's constructed capacity, under arbitrary concurrent hold patterns.
    #[test]
    fn copy_buffer_pool_conserves_capacity(
        capacity in 1usize..6,
        workers in 1usize..10,
    ) {
        let pool = Arc::new(CopyBufferPool::new((0..capacity).map(|i| i as u32).collect()));
        let mut handles = Vec::new();
        for _ in 0..workers {
            let pool = Arc::clone(&pool);
            handles.push(thread::spawn(move || {
                let _guard = pool.acquire();
                thread::yield_now();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        prop_assert_eq!(pool.free_count(), pool.capacity());
    }

    /// The per-address-stripe transaction lock never grants two holders the
    /// same stripe concurrently, regardless of how many distinct addresses
    /// and priorities contend for it.
    #[test]
    fn tx_lock_table_is_mutually_exclusive_per_stripe(
        num_addrs in 1u64..4,
        contenders in 2usize..8,
    ) {
        let table = Arc::new(TxLockTable::new(1, 6)); // 1 stripe: force contention
        let active = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut handles = Vec::new();
        for i in 0..contenders {
            let table = Arc::clone(&table);
            let active = Arc::clone(&active);
            let geom = Geometry::new(6, 4);
            let addr = geom.normalize((i as u64 % num_addrs) * 0x40);
            let prio = if i % 2 == 0 { Priority::Acquire } else { Priority::Probe };
            handles.push(thread::spawn(move || {
                let guard = table.acquire(addr, prio);
                let now = active.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                assert_eq!(now, 1, "tx lock table granted overlapping holders on one stripe");
                thread::yield_now();
                active.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                table.release(guard);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
