//! Cache array: associative lookup by tag across a set's ways (spec §4.1).

use std::sync::Mutex;

use crate::addr::LineAddr;
use crate::error::{bug, CoherenceBug};
use crate::geometry::Geometry;
use crate::index::Indexer;
use crate::metadata::{Data, Metadata};
use crate::replacer::Replacer;

/// One (metadata, data) slot. The `Mutex` here *is* the per-line advisory
/// lock from spec §3/§9 — distinct from, and never collapsed with, the
/// per-set transaction priority lock in [`crate::lock`].
pub struct LineSlot {
    pub meta: Metadata,
    pub data: Option<Data>,
}

impl LineSlot {
    fn invalid(block_bytes: usize, with_data: bool, with_directory: bool) -> Self {
        Self {
            meta: if with_directory {
                Metadata::invalid_with_directory()
            } else {
                Metadata::invalid()
            },
            data: if with_data { Some(Data::new(block_bytes)) } else { None },
        }
    }
}

/// One partition's (set, way-range) location for a query (spec §3
/// `LocInfo`): where `addr` would land in that partition, independent of
/// whether anything is actually resident there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionLoc {
    pub partition: usize,
    pub set: usize,
    pub way_start: usize,
    pub way_end: usize,
}

/// Where an address could live in one cache: one [`PartitionLoc`] per
/// partition of that cache (spec §8: "`query_loc(a)` contains a `LocInfo`
/// pointing to the set `c.index(a)` in every partition of `c`" — a skewed
/// cache's partitions each compute a different set for the same address, so
/// a single (set, way-range) pair cannot describe the whole cache). The
/// victim partition is never included: it has no address-keyed set to
/// report, only a replacement policy over its one set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocInfo {
    pub cache_name: String,
    pub partitions: Vec<PartitionLoc>,
}

/// A `nset x way_num` grid, one of possibly several partitions inside a
/// cache, or the single-set victim partition appended after them.
pub struct Partition {
    pub(crate) lines: Vec<Vec<Mutex<LineSlot>>>,
    pub(crate) indexer: Box<dyn Indexer>,
    pub(crate) replacer: Box<dyn Replacer>,
    pub(crate) extended_ways: usize,
    pub ways: usize,
    pub block_bytes: usize,
}

impl Partition {
    pub fn new(
        geom: Geometry,
        indexer: Box<dyn Indexer>,
        replacer: Box<dyn Replacer>,
        ways: usize,
        extended_ways: usize,
        with_data: bool,
        with_directory: bool,
    ) -> Self {
        let num_sets = indexer.num_sets();
        let total_ways = ways + extended_ways;
        let lines = (0..num_sets)
            .map(|_| {
                (0..total_ways)
                    .map(|_| Mutex::new(LineSlot::invalid(1usize << geom.block_bits, with_data, with_directory)))
                    .collect()
            })
            .collect();
        Self {
            lines,
            indexer,
            replacer,
            extended_ways,
            ways: total_ways,
            block_bytes: 1usize << geom.block_bits,
        }
    }

    /// A fully-associative victim partition: `IW=0`, `VW` ways (spec §4.1).
    pub fn new_victim(
        geom: Geometry,
        replacer: Box<dyn Replacer>,
        victim_ways: usize,
        with_data: bool,
        with_directory: bool,
    ) -> Self {
        let victim_geom = Geometry::new(geom.block_bits, 0);
        Self::new(
            victim_geom,
            Box::new(crate::index::NormIndexer::new(victim_geom)),
            replacer,
            victim_ways,
            0,
            with_data,
            with_directory,
        )
    }

    pub fn num_sets(&self) -> usize {
        self.indexer.num_sets()
    }

    pub fn set_of(&self, addr: LineAddr, partition_index: usize) -> usize {
        self.indexer.set_of(addr, partition_index)
    }

    /// Linear match across ways of `set`. First match wins (spec §4.1: "ties
    /// impossible by invariant").
    pub fn hit(&self, set: usize, tag: u64) -> Option<usize> {
        for (way, slot) in self.lines[set].iter().enumerate() {
            let slot = slot.lock().expect("line lock poisoned");
            if slot.meta.tag_matches(tag) {
                return Some(way);
            }
        }
        None
    }

    pub fn line(&self, set: usize, way: usize) -> &Mutex<LineSlot> {
        &self.lines[set][way]
    }

    pub fn replace_way(&self, set: usize) -> usize {
        self.replacer.replace(set)
    }

    pub fn is_extended_way(&self, way: usize) -> bool {
        way >= self.ways - self.extended_ways
    }

    /// Unchecked access: caller must already hold set priority (spec §4.1
    /// "callers hold priority"). Panics with a typed [`CoherenceBug`] if the
    /// slot turns out Invalid, which would mean the caller's priority
    /// discipline was violated.
    pub fn must_get_meta(&self, set: usize, way: usize) -> Metadata {
        let slot = self.lines[set][way].lock().expect("line lock poisoned");
        if !slot.meta.state.is_valid() {
            bug!(CoherenceBug::HitMetaMismatch);
        }
        slot.meta.clone()
    }
}
