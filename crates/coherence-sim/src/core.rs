//! Cache core: one cache's partitions, locks, and copy-buffer pools bound
//! together behind the hit/replace/access contract the ports drive (spec
//! §4.4).

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Mutex;

use crate::addr::LineAddr;
use crate::array::{LineSlot, LocInfo, Partition};
use crate::buffer::CopyBufferPool;
use crate::command::Priority;
use crate::geometry::Geometry;
use crate::lock::{LineLockTable, TxGuard, TxLockTable};
use crate::metadata::{Data, Metadata};

/// Identifies a line's home within a cache: which partition (an index past
/// the last real partition means the victim partition), which set, which
/// way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub partition: usize,
    pub set: usize,
    pub way: usize,
}

/// Owns the arrays, replacers, the partition-selection RNG, and the
/// copy-buffer pools for one cache (spec §4.4).
pub struct CacheCore {
    name: String,
    geom: Geometry,
    partitions: Vec<Partition>,
    victim: Option<Partition>,
    tx_lock: TxLockTable,
    line_lock: LineLockTable,
    meta_pool: CopyBufferPool<Metadata>,
    data_pool: CopyBufferPool<Data>,
    partition_rng: Mutex<ChaCha8Rng>,
}

impl CacheCore {
    pub fn new(
        name: impl Into<String>,
        geom: Geometry,
        partitions: Vec<Partition>,
        victim: Option<Partition>,
        num_copy_buffers: usize,
        block_bytes: usize,
        seed: u64,
    ) -> Self {
        let meta_pool = CopyBufferPool::new(
            (0..num_copy_buffers.max(1))
                .map(|_| Metadata::invalid())
                .collect(),
        );
        let data_pool = CopyBufferPool::new(
            (0..num_copy_buffers.max(1))
                .map(|_| Data::new(block_bytes))
                .collect(),
        );
        Self {
            name: name.into(),
            geom,
            partitions,
            victim,
            tx_lock: TxLockTable::new(1024, geom.block_bits),
            line_lock: LineLockTable::new(),
            meta_pool,
            data_pool,
            partition_rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn geometry(&self) -> Geometry {
        self.geom
    }

    pub fn tx_lock(&self) -> &TxLockTable {
        &self.tx_lock
    }

    pub fn line_lock(&self) -> &LineLockTable {
        &self.line_lock
    }

    pub fn acquire_tx(&self, addr: LineAddr, prio: Priority) -> TxGuard<'_> {
        self.tx_lock.acquire(addr, prio)
    }

    pub fn release_tx(&self, guard: TxGuard<'_>) {
        self.tx_lock.release(guard)
    }

    /// Search every real partition, then the victim partition if present.
    /// Returns the first tag match (spec §3: "at most one partition's set
    /// holds a matching tag for a given address" is the invariant this
    /// relies on not having to arbitrate ties).
    pub fn hit(&self, addr: LineAddr) -> Option<Slot> {
        let tag = self.geom.tag(addr);
        for (pi, part) in self.partitions.iter().enumerate() {
            let set = part.set_of(addr, pi);
            if let Some(way) = part.hit(set, tag) {
                return Some(Slot { partition: pi, set, way });
            }
        }
        if let Some(victim) = &self.victim {
            let set = victim.set_of(addr, 0);
            if let Some(way) = victim.hit(set, tag) {
                return Some(Slot { partition: self.partitions.len(), set, way });
            }
        }
        None
    }

    /// Choose where a missed line should be filled: a uniformly-random
    /// partition for multi-partition (skewed) caches, the only partition
    /// otherwise, then that partition's replacer picks the way.
    pub fn replace(&self, addr: LineAddr) -> Slot {
        let pi = if self.partitions.len() <= 1 {
            0
        } else {
            let mut rng = self.partition_rng.lock().expect("partition rng poisoned");
            rng.gen_range(0..self.partitions.len())
        };
        let part = &self.partitions[pi];
        let set = part.set_of(addr, pi);
        let way = part.replace_way(set);
        Slot { partition: pi, set, way }
    }

    fn partition_at(&self, slot: Slot) -> &Partition {
        if slot.partition < self.partitions.len() {
            &self.partitions[slot.partition]
        } else {
            self.victim.as_ref().expect("victim slot with no victim partition configured")
        }
    }

    pub fn line(&self, slot: Slot) -> &std::sync::Mutex<LineSlot> {
        self.partition_at(slot).line(slot.set, slot.way)
    }

    pub fn access_replacer(&self, slot: Slot, is_release: bool) {
        self.partition_at(slot).replacer.access(slot.set, slot.way, is_release);
    }

    pub fn invalidate_replacer(&self, slot: Slot) {
        self.partition_at(slot).replacer.invalid(slot.set, slot.way);
    }

    pub fn is_extended_way(&self, slot: Slot) -> bool {
        self.partition_at(slot).is_extended_way(slot.way)
    }

    pub fn meta_copy_buffer(&self) -> crate::buffer::CopyBufferGuard<'_, Metadata> {
        self.meta_pool.acquire()
    }

    pub fn data_copy_buffer(&self) -> crate::buffer::CopyBufferGuard<'_, Data> {
        self.data_pool.acquire()
    }

    /// Every real partition's (set, way-range) location for `addr` in this
    /// cache, independent of whether the line actually hits anywhere (spec
    /// §4.4 `query_loc`/`query_fill_loc`, merged into one operation: this
    /// crate's `LocInfo` already carries one [`crate::array::PartitionLoc`]
    /// per partition, so there is no separate "where it hit" vs. "where it
    /// would land" query to make — every partition's set is reported
    /// unconditionally, same as the original's `query_fill_loc`). The
    /// victim partition is never included; see [`crate::array::LocInfo`].
    pub fn query_loc(&self, addr: LineAddr) -> LocInfo {
        let partitions = self
            .partitions
            .iter()
            .enumerate()
            .map(|(pi, part)| crate::array::PartitionLoc {
                partition: pi,
                set: part.set_of(addr, pi),
                way_start: 0,
                way_end: part.ways,
            })
            .collect();
        LocInfo { cache_name: self.name.clone(), partitions }
    }

    /// Every line address currently valid anywhere in this cache (all
    /// partitions, then the victim partition). Used by `flush_cache` (spec
    /// §6: "iterate every (partition,set,way) and flush each valid line").
    pub fn all_valid_addrs(&self) -> Vec<LineAddr> {
        let mut out = Vec::new();
        for part in self.partitions.iter().chain(self.victim.as_ref()) {
            for set in &part.lines {
                for slot in set {
                    let slot = slot.lock().expect("line lock poisoned");
                    if let (true, Some(addr)) = (slot.meta.state.is_valid(), slot.meta.line_addr) {
                        out.push(addr);
                    }
                }
            }
        }
        out
    }
}
