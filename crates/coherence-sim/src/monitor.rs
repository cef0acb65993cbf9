//! Monitor hook (spec §4.13, §6): an observer attached to a cache that sees
//! every hit/miss/invalidate, and may veto a transaction before it commits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::addr::LineAddr;
use crate::geometry::Geometry;
use crate::metadata::{Data, Metadata};

/// Observes one cache's traffic. `attach` runs once per cache at hierarchy
/// build time and receives the cache's [`Geometry`] so it can refuse to be
/// wired in if it doesn't recognize the shape (spec §7 kind 5, "external
/// policy rejection" surfaces as a plain `bool`, not an error type, per
/// spec §6).
///
/// `read`/`write`/`invalid` carry the same `(ai, s, w, meta, data)` slot
/// identity spec §6 gives the monitor interface, alongside `hit` (this
/// crate's hit/miss counters need it; the original threads it through as a
/// bool too — see `cache.hpp`'s `hook_read`/`hook_write`/`hook_manage`) so a
/// monitor can reconstruct exactly which way of which set it is being told
/// about, e.g. to emit the `<name> op addr16 ai02 s04 w02 hit` tracer line.
pub trait Monitor: Send + Sync {
    fn attach(&self, cache_name: &str, geometry: &Geometry) -> bool {
        let _ = (cache_name, geometry);
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &self,
        _cache_name: &str,
        _addr: LineAddr,
        _ai: usize,
        _s: usize,
        _w: usize,
        _hit: bool,
        _meta: &Metadata,
        _data: Option<&Data>,
    ) {
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &self,
        _cache_name: &str,
        _addr: LineAddr,
        _ai: usize,
        _s: usize,
        _w: usize,
        _hit: bool,
        _meta: &Metadata,
        _data: Option<&Data>,
    ) {
    }

    fn invalid(&self, _cache_name: &str, _addr: LineAddr, _ai: usize, _s: usize, _w: usize, _meta: &Metadata) {}

    fn start(&self) {}
    fn stop(&self) {}
    fn pause(&self) {}
    fn resume(&self) {}
    fn reset(&self) {}
}

/// The default: observes nothing, vetoes nothing.
pub struct NullMonitor;

impl Monitor for NullMonitor {}

/// Counts hits, misses, and invalidations per cache name. Used by the
/// scenario tests (spec §8's worked example table reports miss counts per
/// cache).
#[derive(Default)]
pub struct CountingMonitor {
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    running: Mutex<bool>,
}

impl CountingMonitor {
    pub fn new() -> Self {
        Self { running: Mutex::new(true), ..Default::default() }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    fn is_running(&self) -> bool {
        *self.running.lock().expect("monitor running flag poisoned")
    }

    fn record(&self, hit: bool) {
        if !self.is_running() {
            return;
        }
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Monitor for CountingMonitor {
    fn read(&self, _cache_name: &str, _addr: LineAddr, _ai: usize, _s: usize, _w: usize, hit: bool, _meta: &Metadata, _data: Option<&Data>) {
        self.record(hit);
    }

    fn write(&self, _cache_name: &str, _addr: LineAddr, _ai: usize, _s: usize, _w: usize, hit: bool, _meta: &Metadata, _data: Option<&Data>) {
        self.record(hit);
    }

    fn invalid(&self, _cache_name: &str, _addr: LineAddr, _ai: usize, _s: usize, _w: usize, _meta: &Metadata) {
        if self.is_running() {
            self.invalidations.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn start(&self) {
        *self.running.lock().expect("monitor running flag poisoned") = true;
    }

    fn stop(&self) {
        *self.running.lock().expect("monitor running flag poisoned") = false;
    }

    fn pause(&self) {
        self.stop();
    }

    fn resume(&self) {
        self.start();
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.invalidations.store(0, Ordering::Relaxed);
    }
}

/// A monitor that refuses every attach, exercising spec §7 kind 5 (a
/// hierarchy may legally run with a monitor that declines to observe a
/// given cache).
pub struct RefusingMonitor;

impl Monitor for RefusingMonitor {
    fn attach(&self, _cache_name: &str, _geometry: &Geometry) -> bool {
        false
    }
}
