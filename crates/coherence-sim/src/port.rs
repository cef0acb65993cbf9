//! Inner/outer port contract (spec §4.6, §4.7).
//!
//! The spec gives inner ports and outer ports separate interfaces because a
//! real (async, event-driven) implementation answers a grant and its finish
//! on different call stacks. This engine drives every transaction
//! synchronously end to end under one `TxLockTable` hold, so both directions
//! collapse onto one [`CacheLink`] trait: calling "up" toward memory is an
//! `acquire`/`writeback`/`finish`, calling "down" toward cores is a `probe`.
//! Every [`crate::cache::CoherentCache`] and [`crate::memory::MemoryModel`]
//! implements it; `finish` still runs as an explicit second step (and
//! [`crate::lock::LineLockTable`] still brackets the window between grant and
//! finish) so the handshake's ordering guarantees hold even though nothing
//! can interleave inside one synchronous call today — see DESIGN.md.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::addr::LineAddr;
use crate::command::Cmd;
use crate::metadata::{Data, Metadata};

/// What an `acquire` returns to its caller: the line's (now-updated) metadata
/// and, if this cache stores data, the payload.
#[derive(Debug, Clone)]
pub struct AcquireResp {
    pub meta: Metadata,
    pub data: Option<Data>,
}

/// What a `probe` returns to its caller: whether the probed line was dirty
/// and, if so, the data that must flow upstream with it.
#[derive(Debug, Clone, Default)]
pub struct ProbeResp {
    pub dirty: bool,
    pub data: Option<Data>,
}

/// One direction of one cache-to-cache (or cache-to-memory) link.
pub trait CacheLink: Send + Sync {
    /// An inner cache (or core handle) requests `cmd` access to `addr`.
    /// `requester_id` is this link's numeric id from the caller's
    /// perspective, used for directory bookkeeping.
    fn acquire(&self, cmd: Cmd, addr: LineAddr, requester_id: u8) -> AcquireResp;

    /// An outer cache asks this cache (playing inner here) to invalidate or
    /// downgrade `addr`, recursing into this cache's own inner caches first.
    fn probe(&self, cmd: Cmd, addr: LineAddr) -> ProbeResp;

    /// An inner cache reports a writeback (eviction, flush, or a clean
    /// writeback-without-invalidate) for `addr`.
    fn writeback(&self, cmd: Cmd, addr: LineAddr, data: Option<Data>);

    /// Closes the grant from a prior `acquire`, releasing this cache's
    /// `LineLockTable` hold on `addr` so back-probes may proceed.
    fn finish(&self, addr: LineAddr, requester_id: u8);

    /// Every cache from here out to memory's (set, way-range) location for
    /// `addr` (spec §4.6 `query_loc_resp`: "append this cache's `LocInfo` to
    /// the list and recurse outward"). Reports where `addr` would land in
    /// every partition of every cache on this path, independent of
    /// residency; the terminal memory model contributes nothing.
    fn query_loc(&self, addr: LineAddr) -> Vec<crate::array::LocInfo>;

    /// Numeric id this cache would present to its own outer, used when
    /// wiring the hierarchy (spec §6 wiring API).
    fn inner_id(&self) -> u8 {
        0
    }
}

/// One outstanding grant-to-finish transaction, tracked so a late or
/// duplicate `finish` can be diagnosed instead of silently corrupting state.
#[derive(Debug, Clone, Copy)]
pub struct PendingXact {
    pub addr: LineAddr,
    pub requester_id: u8,
}

/// Keyed by the process-wide [`crate::uniqueid::UniqueId`] minted at grant
/// time (spec §9 "process-wide UniqueID... initialize by hierarchy").
#[derive(Default)]
pub struct PendingXactTable {
    entries: Mutex<HashMap<u64, PendingXact>>,
}

impl PendingXactTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: u64, xact: PendingXact) {
        self.entries.lock().expect("pending xact table poisoned").insert(id, xact);
    }

    /// Removes and returns the entry for `id`. Panics (via `bug!`) if
    /// missing — spec §7 kind 2, a `finish_resp` with no matching grant is a
    /// protocol-level invariant violation, not a retryable condition.
    pub fn remove(&self, id: u64) -> PendingXact {
        let mut entries = self.entries.lock().expect("pending xact table poisoned");
        match entries.remove(&id) {
            Some(x) => x,
            None => crate::error::bug!(crate::error::CoherenceBug::PendingXactMissing {
                addr: 0
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("pending xact table poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
