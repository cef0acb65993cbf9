//! Core-facing API (spec §6): the surface a simulated core or trace replay
//! front-end actually calls. Thin wrapper over [`crate::cache::CoherentCache`]
//! that normalizes addresses and always drives the grant-to-finish handshake
//! to completion before returning, so callers never see a mid-transaction
//! state.

use crate::addr::RawAddr;
use crate::array::LocInfo;
use crate::cache::CoherentCache;
use crate::command::Cmd;
use crate::error::Unimplemented;
use crate::geometry::Geometry;
use crate::metadata::Data;

/// One core's private connection into the hierarchy.
pub struct CoreHandle<'a> {
    cache: &'a CoherentCache,
    geom: Geometry,
    core_id: u8,
}

impl<'a> CoreHandle<'a> {
    pub fn new(cache: &'a CoherentCache, geom: Geometry, core_id: u8) -> Self {
        Self { cache, geom, core_id }
    }

    fn finish_after<T>(&self, addr: RawAddr, f: impl FnOnce() -> T) -> T {
        let norm = self.geom.normalize(addr);
        let result = f();
        self.cache.finish(norm, self.core_id);
        result
    }

    pub fn read(&self, addr: RawAddr) -> Data {
        let norm = self.geom.normalize(addr);
        self.finish_after(addr, || {
            self.cache.acquire(Cmd::Read, norm, self.core_id).data.expect("cached line has no data")
        })
    }

    pub fn write(&self, addr: RawAddr, value: &[u8]) -> Data {
        let norm = self.geom.normalize(addr);
        self.finish_after(addr, || {
            self.cache.acquire(Cmd::Write, norm, self.core_id);
            self.cache.store(norm, value);
            self.cache.peek(norm).expect("line just granted Modified must be present")
        })
    }

    pub fn prefetch(&self, addr: RawAddr) {
        let norm = self.geom.normalize(addr);
        self.finish_after(addr, || {
            self.cache.acquire(Cmd::Prefetch, norm, self.core_id);
        })
    }

    /// `clflush`: writeback then invalidate.
    pub fn flush(&self, addr: RawAddr) {
        let norm = self.geom.normalize(addr);
        self.cache.flush(norm, true);
    }

    /// `clwb`: writeback, line remains valid (Shared).
    pub fn writeback(&self, addr: RawAddr) {
        let norm = self.geom.normalize(addr);
        self.cache.flush(norm, false);
    }

    /// `wbinvd`: a whole-machine writeback-invalidate. Spec §6 marks this
    /// "may be unimplemented and must fail loudly if so" — no configuration
    /// in this crate declares support for it (a real `wbinvd` would need to
    /// reach every cache and core in the hierarchy, not just this handle's
    /// own private path), so every [`CoreHandle`] rejects it rather than
    /// silently downgrading to a same-cache-only `flush_cache`.
    pub fn writeback_invalidate(&self) -> Result<(), Unimplemented> {
        Err(Unimplemented("writeback_invalidate"))
    }

    /// Flush every currently-valid line in this core's private cache (spec
    /// §6: "iterate every (partition,set,way) and flush each valid line").
    pub fn flush_cache(&self) {
        self.cache.flush_all();
    }

    /// Every cache from this core's private cache out to memory's location
    /// for `addr`, one [`LocInfo`] per cache on that path (spec §6
    /// `query_loc`). Reports where `addr` would land regardless of whether
    /// it is actually resident anywhere.
    pub fn query_loc(&self, addr: RawAddr) -> Vec<LocInfo> {
        let norm = self.geom.normalize(addr);
        self.cache.query_loc(norm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Partition;
    use crate::core::CacheCore;
    use crate::index::NormIndexer;
    use crate::memory::MemoryModel;
    use crate::monitor::NullMonitor;
    use crate::policy::Policy;
    use crate::replacer::Lru;
    use std::sync::Arc;

    fn l1_over_memory(geom: Geometry) -> CoherentCache {
        let part = Partition::new(
            geom,
            Box::new(NormIndexer::new(geom)),
            Box::new(Lru::new(geom.num_sets(), 4)),
            4,
            0,
            true,
            true,
        );
        let core = CacheCore::new("l1", geom, vec![part], None, 2, 1usize << geom.block_bits, 3);
        let mem = Arc::new(MemoryModel::new(geom.block_bits));
        CoherentCache::new("l1", core, Policy::msi(), 0, vec![], mem, Arc::new(NullMonitor))
    }

    #[test]
    fn write_then_read_back_same_byte() {
        let geom = Geometry::new(6, 2);
        let cache = l1_over_memory(geom);
        let handle = CoreHandle::new(&cache, geom, 0);
        handle.write(0x40, &[9u8; 64]);
        let data = handle.read(0x40);
        assert_eq!(data.words[0], 9);
    }

    #[test]
    fn query_loc_reports_location_before_and_after_touch() {
        let geom = Geometry::new(6, 2);
        let cache = l1_over_memory(geom);
        let handle = CoreHandle::new(&cache, geom, 0);

        let before = handle.query_loc(0x80);
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].cache_name, "l1");

        handle.read(0x80);

        let after = handle.query_loc(0x80);
        assert_eq!(after, before, "query_loc does not depend on residency");
    }

    #[test]
    fn writeback_invalidate_is_unimplemented() {
        let geom = Geometry::new(6, 2);
        let cache = l1_over_memory(geom);
        let handle = CoreHandle::new(&cache, geom, 0);
        assert!(handle.writeback_invalidate().is_err());
    }

    #[test]
    fn flush_cache_invalidates_every_touched_line() {
        let geom = Geometry::new(6, 2);
        let cache = l1_over_memory(geom);
        let handle = CoreHandle::new(&cache, geom, 0);
        handle.write(0x40, &[1u8; 64]);
        handle.read(0x80);
        assert!(cache.core().hit(geom.normalize(0x40)).is_some());
        assert!(cache.core().hit(geom.normalize(0x80)).is_some());

        handle.flush_cache();

        assert!(cache.core().hit(geom.normalize(0x40)).is_none());
        assert!(cache.core().hit(geom.normalize(0x80)).is_none());
    }
}
