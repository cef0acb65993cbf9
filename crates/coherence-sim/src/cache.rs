//! One coherent cache: a [`crate::core::CacheCore`] plus a
//! [`crate::policy::Policy`], wired to its inner children and outer link
//! (spec §4.10 `CoherentCache`, §4.6 `acquire_resp`, §4.7 `probe_resp`).

use std::sync::{Arc, RwLock};

use crate::addr::LineAddr;
use crate::command::{Cmd, Priority};
use crate::core::CacheCore;
use crate::metadata::{CacheState, Directory};
use crate::monitor::Monitor;
use crate::policy::Policy;
use crate::port::{AcquireResp, CacheLink, PendingXact, PendingXactTable, ProbeResp};
use crate::uniqueid::UniqueIdSource;

/// One node of the hierarchy. `inner_links` are this cache's own inner
/// caches (empty for a cache whose only inner neighbors are cores, which
/// talk to it through [`crate::handle::CoreHandle`] rather than
/// [`CacheLink`]); `outer` is the next cache up, or a
/// [`crate::memory::MemoryModel`] at the root.
pub struct CoherentCache {
    name: String,
    core: CacheCore,
    policy: Policy,
    inner_id: u8,
    /// Behind a `RwLock` rather than a plain `Vec` because a hierarchy is
    /// wired outer-first: a cache's outer must already exist when this
    /// struct is constructed, but its own inner children are constructed
    /// only afterward and register themselves via [`Self::register_inner`].
    inner_links: RwLock<Vec<Arc<dyn CacheLink>>>,
    outer: Arc<dyn CacheLink>,
    pending: PendingXactTable,
    outstanding_by_addr: std::sync::Mutex<std::collections::HashMap<LineAddr, u64>>,
    uid_source: UniqueIdSource,
    monitor: Arc<dyn Monitor>,
}

impl CoherentCache {
    pub fn new(
        name: impl Into<String>,
        core: CacheCore,
        policy: Policy,
        inner_id: u8,
        inner_links: Vec<Arc<dyn CacheLink>>,
        outer: Arc<dyn CacheLink>,
        monitor: Arc<dyn Monitor>,
    ) -> Self {
        let name = name.into();
        monitor.attach(&name, &core.geometry());
        tracing::debug!(cache = %name, inner_id, "cache constructed");
        Self {
            name,
            core,
            policy,
            inner_id,
            inner_links: RwLock::new(inner_links),
            outer,
            pending: PendingXactTable::new(),
            outstanding_by_addr: std::sync::Mutex::new(std::collections::HashMap::new()),
            uid_source: UniqueIdSource::new(),
            monitor,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn core(&self) -> &CacheCore {
        &self.core
    }

    /// Writes `value` directly into an already-granted line's data, without
    /// running the coherence protocol again. Called by
    /// [`crate::handle::CoreHandle::write`] immediately after `acquire`
    /// returns a `Modified` grant — `acquire` itself only returns a snapshot
    /// clone of the data, since a caller may not intend to mutate it (a
    /// plain `Read`).
    pub fn store(&self, addr: LineAddr, value: &[u8]) {
        if let Some(slot) = self.core.hit(addr) {
            let mut line = self.core.line(slot).lock().expect("line poisoned");
            if let Some(data) = &mut line.data {
                data.full_write(value);
            }
        }
    }

    /// Current data for `addr` if present, without touching replacement
    /// state or the coherence protocol.
    pub fn peek(&self, addr: LineAddr) -> Option<crate::metadata::Data> {
        let slot = self.core.hit(addr)?;
        let line = self.core.line(slot).lock().expect("line poisoned");
        line.data.clone()
    }

    /// Registers an inner cache after construction (spec §6 wiring API:
    /// caches are connected after being built, outer-first).
    pub fn register_inner(&self, link: Arc<dyn CacheLink>) {
        self.inner_links.write().expect("inner links poisoned").push(link);
    }

    fn record_pending(&self, addr: LineAddr, requester_id: u8) {
        let id = self.uid_source.next();
        self.pending.insert(id, PendingXact { addr, requester_id });
        self.outstanding_by_addr
            .lock()
            .expect("outstanding map poisoned")
            .insert(addr, id);
        self.core.line_lock().lock_for_finish(addr);
    }

    /// Invalidate or downgrade every recorded inner sharer of `addr` except
    /// `exclude_id`, per `cmd`. Used both by the access path (promoting past
    /// current sharers) and the writeback/flush path (evicting this line
    /// entirely, so nothing is excluded there).
    fn sync_inner(&self, addr: LineAddr, cmd: Cmd, sharers: Option<Directory>, exclude_id: Option<u8>) -> ProbeResp {
        let mut out = ProbeResp::default();
        let links = self.inner_links.read().expect("inner links poisoned");
        for link in links.iter() {
            let id = link.inner_id();
            if Some(id) == exclude_id {
                continue;
            }
            let should_probe = match &sharers {
                Some(dir) => dir.contains(id),
                None => true, // broadcast: no directory, probe every child
            };
            if !should_probe {
                continue;
            }
            let resp = link.probe(cmd, addr);
            if resp.dirty {
                out.dirty = true;
                out.data = resp.data;
            }
        }
        out
    }
}

impl CacheLink for CoherentCache {
    fn acquire(&self, cmd: Cmd, addr: LineAddr, requester_id: u8) -> AcquireResp {
        let _txg = self.core.acquire_tx(addr, Priority::Acquire);
        tracing::trace!(cache = %self.name, ?cmd, addr = addr.raw(), requester_id, "acquire");

        if let Some(slot) = self.core.hit(addr) {
            let snapshot = {
                let line = self.core.line(slot).lock().expect("line poisoned");
                line.meta.clone()
            };

            let (need_sync, probe_cmd) = self.policy.access_need_sync(cmd, &snapshot);
            if need_sync {
                let resp = self.sync_inner(addr, probe_cmd, snapshot.directory, Some(requester_id));
                let mut line = self.core.line(slot).lock().expect("line poisoned");
                if let Some(dir) = &mut line.meta.directory {
                    if probe_cmd == Cmd::ProbeInvalidate {
                        let links = self.inner_links.read().expect("inner links poisoned");
                        for id in links.iter().map(|l| l.inner_id()) {
                            if id != requester_id {
                                dir.remove(id);
                            }
                        }
                    }
                }
                if resp.dirty {
                    if let Some(data) = resp.data {
                        line.data = Some(data);
                    }
                    line.meta.dirty = true;
                    // Probed-writeback during the sync: a write occurred on
                    // this line, so it gets the release-flavored replacer
                    // update and hook_write, same as write_line below (spec
                    // §4.6 acquire_resp step 2).
                    let meta_snapshot = line.meta.clone();
                    let data_snapshot = line.data.clone();
                    drop(line);
                    self.core.access_replacer(slot, true);
                    self.monitor.write(
                        &self.name,
                        addr,
                        slot.partition,
                        slot.set,
                        slot.way,
                        true,
                        &meta_snapshot,
                        data_snapshot.as_ref(),
                    );
                }
            }

            let (promote, _promote_local, new_cmd) = self.policy.access_need_promote(cmd, &snapshot);
            if promote {
                let outer_cmd = self.policy.cmd_for_outer_acquire(new_cmd);
                // Hold a copy buffer across the outer call: it shields this
                // line's pre-promotion snapshot while the call is in flight
                // and, by pool capacity, bounds how many promotions this
                // cache can have outstanding at once (spec §5, §9).
                let mut held_meta = self.core.meta_copy_buffer();
                *held_meta = snapshot.clone();
                let outer_resp = self.outer.acquire(outer_cmd, addr, self.inner_id);
                drop(held_meta);
                let mut line = self.core.line(slot).lock().expect("line poisoned");
                if let Some(data) = outer_resp.data {
                    line.data = Some(data);
                }
                self.policy.meta_after_fetch(&mut line.meta, new_cmd);
            }

            let (data_out, meta_out) = {
                let mut line = self.core.line(slot).lock().expect("line poisoned");
                self.policy.meta_after_grant(&mut line.meta, cmd, requester_id);
                self.core.access_replacer(slot, false);
                (line.data.clone(), line.meta.clone())
            };

            self.monitor.read(
                &self.name,
                addr,
                slot.partition,
                slot.set,
                slot.way,
                true,
                &meta_out,
                data_out.as_ref(),
            );
            self.record_pending(addr, requester_id);
            return AcquireResp { meta: meta_out, data: data_out };
        }

        // Miss: pick a victim, evict it if occupied, fetch from outer, fill.
        let slot = self.core.replace(addr);
        {
            let occupied = {
                let line = self.core.line(slot).lock().expect("line poisoned");
                line.meta.state.is_valid()
            };
            if occupied {
                let victim_addr = {
                    let line = self.core.line(slot).lock().expect("line poisoned");
                    line.meta.line_addr
                };
                if let Some(victim_addr) = victim_addr {
                    let snapshot = {
                        let line = self.core.line(slot).lock().expect("line poisoned");
                        line.meta.clone()
                    };
                    let (need_sync, probe_cmd) = self.policy.writeback_need_sync(&snapshot);
                    let mut probe_resp = ProbeResp::default();
                    if need_sync {
                        probe_resp = self.sync_inner(victim_addr, probe_cmd, snapshot.directory, None);
                        if probe_resp.dirty {
                            let mut line = self.core.line(slot).lock().expect("line poisoned");
                            if let Some(data) = probe_resp.data.clone() {
                                line.data = Some(data);
                            }
                            line.meta.dirty = true;
                        }
                    }
                    let (mut dirty, wb_cmd) = self.policy.writeback_need_writeback(&snapshot);
                    dirty = dirty || probe_resp.dirty;
                    let data = {
                        let line = self.core.line(slot).lock().expect("line poisoned");
                        line.data.clone()
                    };
                    if dirty {
                        let _evict_buf = self.core.data_copy_buffer();
                        self.outer.writeback(wb_cmd, victim_addr, data);
                    }
                    let mut line = self.core.line(slot).lock().expect("line poisoned");
                    self.policy.meta_after_evict(&mut line.meta);
                    self.core.invalidate_replacer(slot);
                }
            }
        }

        let outer_cmd = self.policy.cmd_for_outer_acquire(cmd);
        // Same rationale as the promote path above: the copy buffer bounds
        // concurrent outstanding fetches on this cache to pool capacity.
        let _fill_buf = self.core.data_copy_buffer();
        let outer_resp = self.outer.acquire(outer_cmd, addr, self.inner_id);
        drop(_fill_buf);

        let (data_out, meta_out) = {
            let mut line = self.core.line(slot).lock().expect("line poisoned");
            line.meta.tag = self.core.geometry().tag(addr);
            line.meta.line_addr = Some(addr);
            if let Some(data) = outer_resp.data {
                line.data = Some(data);
            }
            self.policy.meta_after_fetch(&mut line.meta, cmd);
            self.policy.meta_after_grant(&mut line.meta, cmd, requester_id);
            self.core.access_replacer(slot, false);
            (line.data.clone(), line.meta.clone())
        };

        self.monitor.read(
            &self.name,
            addr,
            slot.partition,
            slot.set,
            slot.way,
            false,
            &meta_out,
            data_out.as_ref(),
        );
        self.record_pending(addr, requester_id);
        AcquireResp { meta: meta_out, data: data_out }
    }

    fn probe(&self, cmd: Cmd, addr: LineAddr) -> ProbeResp {
        self.core.line_lock().wait_until_unlocked(addr);
        let _txg = self.core.acquire_tx(addr, Priority::Probe);
        tracing::trace!(cache = %self.name, ?cmd, addr = addr.raw(), "probe");

        let Some(slot) = self.core.hit(addr) else {
            return ProbeResp::default();
        };

        let snapshot = {
            let line = self.core.line(slot).lock().expect("line poisoned");
            line.meta.clone()
        };

        let (need_sub, sub_cmd) = self.policy.probe_need_sync(cmd, &snapshot);
        let mut collected = ProbeResp::default();
        if need_sub {
            collected = self.sync_inner(addr, sub_cmd, snapshot.directory, None);
        }

        let writeback_needed = self.policy.probe_need_writeback(cmd, &snapshot) || collected.dirty;
        let data_out = {
            let line = self.core.line(slot).lock().expect("line poisoned");
            line.data.clone().or(collected.data)
        };

        let meta_after = {
            let mut line = self.core.line(slot).lock().expect("line poisoned");
            self.policy.meta_after_probe(&mut line.meta, cmd, 0);
            line.meta.clone()
        };
        if cmd.evicts() {
            self.core.invalidate_replacer(slot);
            self.monitor.invalid(&self.name, addr, slot.partition, slot.set, slot.way, &meta_after);
        }

        ProbeResp { dirty: writeback_needed, data: data_out }
    }

    fn writeback(&self, cmd: Cmd, addr: LineAddr, data: Option<crate::metadata::Data>) {
        let _txg = self.core.acquire_tx(addr, Priority::Release);
        tracing::trace!(cache = %self.name, ?cmd, addr = addr.raw(), "writeback");
        if let Some(slot) = self.core.hit(addr) {
            let (meta_snapshot, data_snapshot) = {
                let mut line = self.core.line(slot).lock().expect("line poisoned");
                if let Some(data) = data {
                    line.data = Some(data);
                }
                self.policy.meta_after_release(&mut line.meta, cmd);
                (line.meta.clone(), line.data.clone())
            };
            // write_line (spec §4.6): replacer update, hook_write.
            self.core.access_replacer(slot, true);
            self.monitor.write(
                &self.name,
                addr,
                slot.partition,
                slot.set,
                slot.way,
                true,
                &meta_snapshot,
                data_snapshot.as_ref(),
            );
        } else {
            // No local copy (e.g. a non-inclusive or exclusive intermediate
            // cache): forward straight to this cache's own outer. Still
            // bounded by the data-buffer pool like every other outer call.
            let _fwd_buf = self.core.data_copy_buffer();
            self.outer.writeback(cmd, addr, data);
        }
    }

    fn finish(&self, addr: LineAddr, requester_id: u8) {
        let id = {
            let mut map = self.outstanding_by_addr.lock().expect("outstanding map poisoned");
            map.remove(&addr)
        };
        if let Some(id) = id {
            let xact = self.pending.remove(id);
            debug_assert_eq!(xact.requester_id, requester_id);
        }
        self.core.line_lock().unlock_after_finish(addr);
        tracing::trace!(cache = %self.name, addr = addr.raw(), requester_id, "finish");
        self.outer.finish(addr, self.inner_id);
    }

    fn query_loc(&self, addr: LineAddr) -> Vec<crate::array::LocInfo> {
        let mut locs = vec![self.core.query_loc(addr)];
        locs.extend(self.outer.query_loc(addr));
        locs
    }

    fn inner_id(&self) -> u8 {
        self.inner_id
    }
}

/// Flush this line at this exact cache: invalidate it, writing back dirty
/// data first, after syncing any inner sharers (spec §4.6 `flush_resp`).
/// Not part of [`CacheLink`] (cores, not outer caches, request flushes)
/// so it lives as an inherent method the core-facing handle calls directly.
impl CoherentCache {
    /// Whole-cache sweep: flush every currently-valid line (spec §6
    /// `flush_cache`). Each line is flushed independently under its own
    /// transaction, exactly as a caller issuing one `flush` per address
    /// observed via `query_loc` would.
    pub fn flush_all(&self) {
        for addr in self.core.all_valid_addrs() {
            self.flush(addr, true);
        }
    }

    pub fn flush(&self, addr: LineAddr, also_invalidate: bool) {
        let _txg = self.core.acquire_tx(addr, Priority::FLUSH);
        tracing::trace!(cache = %self.name, addr = addr.raw(), also_invalidate, "flush");
        let Some(slot) = self.core.hit(addr) else { return };

        let snapshot = {
            let line = self.core.line(slot).lock().expect("line poisoned");
            line.meta.clone()
        };
        let (need_sync, probe_cmd) = self.policy.flush_need_sync(self.policy.cmd_for_flush(), &snapshot);
        let mut probe_resp = ProbeResp::default();
        if need_sync {
            probe_resp = self.sync_inner(addr, probe_cmd, snapshot.directory, None);
            if probe_resp.dirty {
                let mut line = self.core.line(slot).lock().expect("line poisoned");
                if let Some(data) = probe_resp.data.clone() {
                    line.data = Some(data);
                }
                line.meta.dirty = true;
            }
        }

        if snapshot.dirty || probe_resp.dirty {
            let data = {
                let line = self.core.line(slot).lock().expect("line poisoned");
                line.data.clone()
            };
            let _fwd_buf = self.core.data_copy_buffer();
            self.outer.writeback(Cmd::Writeback, addr, data);
        }

        let mut line = self.core.line(slot).lock().expect("line poisoned");
        if also_invalidate {
            self.policy.meta_after_flush(&mut line.meta);
            self.core.invalidate_replacer(slot);
            let meta_after = line.meta.clone();
            drop(line);
            self.monitor.invalid(&self.name, addr, slot.partition, slot.set, slot.way, &meta_after);
        } else {
            line.meta.dirty = false;
            line.meta.state = CacheState::Shared;
        }
    }
}
