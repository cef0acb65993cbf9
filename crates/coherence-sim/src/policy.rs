//! Coherence policy: the pure-function decision layer (spec §4.5).
//!
//! MI/MSI/MESI/Exclusive-MSI/Exclusive-MESI are not five separate types —
//! they differ only in the decisions these functions make (spec §4.5
//! closing line), so they are five constructors of one data-driven
//! [`Policy`] rather than five duplicated structs. A non-exclusive policy's
//! metadata tracks the *aggregate* permission outstanding among this cache's
//! inner sharers (the usual "parent state = highest child permission"
//! convention for an inclusive intermediate cache); an exclusive policy
//! instead leaves the line `Owned` + `extended` here once granted inward,
//! recording directory residency only, per spec §4.12's "extended-way
//! region used for directory-residence-only entries". See DESIGN.md for the
//! Open-Question decision on where that extended entry lives.

use crate::command::Cmd;
use crate::metadata::{CacheState, Metadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProtocolKind {
    Mi,
    Msi,
    Mesi,
}

/// A coherence protocol's pure decision functions, parameterized by
/// protocol kind and whether this cache is configured exclusive.
pub struct Policy {
    kind: ProtocolKind,
    exclusive: bool,
}

impl Policy {
    pub fn mi() -> Self {
        Self { kind: ProtocolKind::Mi, exclusive: false }
    }
    pub fn msi() -> Self {
        Self { kind: ProtocolKind::Msi, exclusive: false }
    }
    pub fn mesi() -> Self {
        Self { kind: ProtocolKind::Mesi, exclusive: false }
    }
    pub fn exclusive_msi() -> Self {
        Self { kind: ProtocolKind::Msi, exclusive: true }
    }
    pub fn exclusive_mesi() -> Self {
        Self { kind: ProtocolKind::Mesi, exclusive: true }
    }

    fn supports_exclusive_state(&self) -> bool {
        self.kind == ProtocolKind::Mesi
    }

    // ── Static traits (spec §4.5) ──────────────────────────────────────────

    /// Only the terminal memory boundary overrides this to `true` (spec
    /// §4.7's "is_uncached()... marks the terminal (memory) boundary");
    /// plugged in at the [`crate::memory::MemoryModel`] port rather than
    /// here, since every real cache-level protocol is cached by definition.
    pub fn is_uncached(&self) -> bool {
        false
    }

    pub fn sync_need_lock(&self) -> bool {
        true
    }

    // ── access path (spec §4.6 step 2) ─────────────────────────────────────

    /// Does granting `cmd` to an inner cache require first back-probing
    /// *this cache's own* inner caches?
    pub fn access_need_sync(&self, cmd: Cmd, meta: &Metadata) -> (bool, Cmd) {
        if !meta.state.is_valid() {
            return (false, cmd);
        }
        match cmd {
            Cmd::Write => (true, Cmd::ProbeInvalidate),
            Cmd::Read | Cmd::Prefetch => match meta.state {
                CacheState::Modified => (true, Cmd::ProbeDowngrade),
                CacheState::Exclusive if self.supports_exclusive_state() => {
                    (true, Cmd::ProbeDowngrade)
                }
                _ => (false, cmd),
            },
            _ => (false, cmd),
        }
    }

    /// After any required sync, must this cache fetch further from its own
    /// outer (`promote`), or can it satisfy the request from its own
    /// already-valid copy (`promote_local`)?
    ///
    /// A write hit on a `Shared` line still promotes to the outer: this
    /// cache's own inner sync only reaches its *own* inner children, never
    /// sibling caches reachable solely through the shared outer, so the
    /// outer is the one that must invalidate those siblings. Only
    /// `Modified` (already sole owner) and `Exclusive` (sole ownership
    /// already confirmed at the grant that produced it) may upgrade
    /// silently.
    pub fn access_need_promote(&self, cmd: Cmd, meta: &Metadata) -> (bool, bool, Cmd) {
        if !meta.state.is_valid() {
            return (true, false, cmd);
        }
        match cmd {
            Cmd::Write => match meta.state {
                CacheState::Modified => (false, false, cmd),
                CacheState::Exclusive => (false, true, cmd),
                _ => (true, false, cmd),
            },
            Cmd::Read | Cmd::Prefetch => (false, false, cmd),
            _ => (false, false, cmd),
        }
    }

    // ── probe path, received from this cache's own outer (spec §4.7) ──────

    pub fn probe_need_sync(&self, cmd: Cmd, meta: &Metadata) -> (bool, Cmd) {
        (meta.state.is_valid(), cmd)
    }

    pub fn probe_need_writeback(&self, _cmd: Cmd, meta: &Metadata) -> bool {
        meta.dirty
    }

    /// Consult the directory (if present) to decide whether inner cache
    /// `inner_id` needs a sub-probe at all; broadcast caches (no directory)
    /// always say yes.
    pub fn probe_need_probe(&self, cmd: Cmd, meta: &Metadata, inner_id: u8) -> (bool, Cmd) {
        match &meta.directory {
            Some(dir) => (dir.contains(inner_id), cmd),
            None => (true, cmd),
        }
    }

    // ── eviction / writeback path (spec §4.8) ──────────────────────────────

    pub fn writeback_need_sync(&self, meta: &Metadata) -> (bool, Cmd) {
        (meta.state.is_valid(), Cmd::ProbeInvalidate)
    }

    pub fn writeback_need_writeback(&self, meta: &Metadata) -> (bool, Cmd) {
        (meta.dirty, Cmd::Writeback)
    }

    // ── flush path (spec §4.9) ──────────────────────────────────────────────

    pub fn flush_need_sync(&self, _cmd: Cmd, meta: &Metadata) -> (bool, Cmd) {
        (meta.state.is_valid(), Cmd::ProbeInvalidate)
    }

    // ── command translation helpers ────────────────────────────────────────

    pub fn cmd_for_outer_acquire(&self, cmd: Cmd) -> Cmd {
        cmd
    }

    pub fn cmd_for_finish(&self, _id: u8) -> Cmd {
        Cmd::Finish
    }

    pub fn cmd_for_flush(&self) -> Cmd {
        Cmd::Flush
    }

    // ── state transitions (spec §4.5 closing bullet, §4.12 table) ─────────

    /// Applied at the outer port after a fresh fetch from outer completes.
    pub fn meta_after_fetch(&self, meta: &mut Metadata, cmd: Cmd) {
        meta.state = match self.kind {
            ProtocolKind::Mi => CacheState::Modified,
            ProtocolKind::Msi => match cmd {
                Cmd::Write => CacheState::Modified,
                _ => CacheState::Shared,
            },
            ProtocolKind::Mesi => match cmd {
                Cmd::Write => CacheState::Modified,
                _ => CacheState::Exclusive,
            },
        };
        meta.dirty = meta.state == CacheState::Modified;
    }

    /// Applied at the inner port after granting `cmd` downward to `inner_id`.
    pub fn meta_after_grant(&self, meta: &mut Metadata, cmd: Cmd, inner_id: u8) {
        if let Some(dir) = &mut meta.directory {
            dir.add(inner_id);
        }
        if self.exclusive {
            // Directory-residence only: this level keeps no usable copy of
            // its own once an inner cache owns the line outright.
            meta.state = CacheState::Owned;
            meta.extended = true;
            meta.dirty = cmd == Cmd::Write;
            return;
        }
        let sole_sharer = meta
            .directory
            .as_ref()
            .map(|d| d.count() <= 1)
            .unwrap_or(true);
        meta.state = match cmd {
            Cmd::Write => CacheState::Modified,
            _ => {
                if self.supports_exclusive_state() && sole_sharer {
                    CacheState::Exclusive
                } else {
                    CacheState::Shared
                }
            }
        };
        meta.dirty = meta.state == CacheState::Modified;
    }

    /// Applied to a writeback-carrying release from an inner cache.
    pub fn meta_after_release(&self, meta: &mut Metadata, cmd: Cmd) {
        match cmd {
            Cmd::Writeback | Cmd::ProbedWriteback => {
                meta.dirty = true;
                if meta.state == CacheState::Invalid {
                    meta.state = CacheState::Shared;
                }
            }
            Cmd::WritebackClean => {
                meta.dirty = true;
                meta.state = CacheState::Shared;
            }
            _ => {}
        }
    }

    /// Applied to the outer-side copy of a line this cache just fetched
    /// from its outer and is about to forward (meta_after_fetch handles the
    /// inner-facing copy already — this covers the accounting symmetric
    /// call named in spec §4.7 `writeback_req` -> `meta_after_writeback`).
    pub fn meta_after_writeback(&self, meta: &mut Metadata) {
        meta.dirty = false;
    }

    pub fn meta_after_evict(&self, meta: &mut Metadata) {
        meta.invalidate();
    }

    pub fn meta_after_flush(&self, meta: &mut Metadata) {
        meta.invalidate();
    }

    /// Applied to the probed cache's own copy after responding to an
    /// outer-initiated probe. Directory bookkeeping for a *specific* inner
    /// sharer is a separate, simpler operation the caller performs directly
    /// on [`Metadata::directory`] inside the fan-out loop (this function
    /// only updates the probed cache's own state/dirty bits).
    pub fn meta_after_probe(&self, meta: &mut Metadata, cmd: Cmd, _inner_id: u8) {
        match cmd {
            Cmd::ProbeInvalidate => meta.invalidate(),
            Cmd::ProbeDowngrade => {
                if meta.state == CacheState::Modified {
                    meta.dirty = false;
                }
                if matches!(meta.state, CacheState::Modified | CacheState::Exclusive) {
                    meta.state = CacheState::Shared;
                }
            }
            _ => {}
        }
    }
}
