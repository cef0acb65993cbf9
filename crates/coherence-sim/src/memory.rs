//! Terminal memory model (spec §2's leaf-first component list: `memory
//! model`). Answers every acquire as permanent, always-clean storage;
//! accepts every writeback unconditionally; never needs a finish handshake
//! (spec §4.7 "uncached outer ports skip finish handshakes").

use std::collections::HashMap;
use std::sync::Mutex;

use crate::addr::LineAddr;
use crate::command::Cmd;
use crate::metadata::{CacheState, Data, Metadata};
use crate::port::{AcquireResp, CacheLink, ProbeResp};

/// Backing store keyed by line address. Lines not yet written read as
/// zero-filled blocks, matching a freshly-mapped page.
pub struct MemoryModel {
    block_bytes: usize,
    lines: Mutex<HashMap<LineAddr, Data>>,
}

impl MemoryModel {
    pub fn new(block_bits: u32) -> Self {
        Self {
            block_bytes: 1usize << block_bits,
            lines: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_uncached(&self) -> bool {
        true
    }
}

impl CacheLink for MemoryModel {
    fn acquire(&self, cmd: Cmd, addr: LineAddr, _requester_id: u8) -> AcquireResp {
        let mut lines = self.lines.lock().expect("memory model poisoned");
        let data = lines
            .entry(addr)
            .or_insert_with(|| Data::new(self.block_bytes))
            .clone();
        let mut meta = Metadata::invalid();
        meta.state = CacheState::Modified;
        meta.dirty = cmd == Cmd::Write;
        meta.line_addr = Some(addr);
        AcquireResp { meta, data: Some(data) }
    }

    fn probe(&self, _cmd: Cmd, _addr: LineAddr) -> ProbeResp {
        // Memory is never an inner cache to anything; nothing above it
        // ever probes down past it.
        ProbeResp::default()
    }

    fn writeback(&self, _cmd: Cmd, addr: LineAddr, data: Option<Data>) {
        if let Some(data) = data {
            self.lines.lock().expect("memory model poisoned").insert(addr, data);
        }
    }

    fn finish(&self, _addr: LineAddr, _requester_id: u8) {
        // Uncached boundary: nothing to close.
    }

    fn query_loc(&self, _addr: LineAddr) -> Vec<crate::array::LocInfo> {
        // Terminal boundary: memory has no partitions to report, and
        // nothing is further out to recurse into.
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritten_line_reads_as_zero() {
        let mem = MemoryModel::new(6);
        let addr = LineAddr(0x40);
        let resp = mem.acquire(Cmd::Read, addr, 0);
        assert!(resp.data.unwrap().words.iter().all(|&b| b == 0));
    }

    #[test]
    fn writeback_then_acquire_round_trips_data() {
        let mem = MemoryModel::new(6);
        let addr = LineAddr(0x40);
        let mut data = Data::new(64);
        data.full_write(&[7u8; 64]);
        mem.writeback(Cmd::Writeback, addr, Some(data));
        let resp = mem.acquire(Cmd::Read, addr, 0);
        assert_eq!(resp.data.unwrap().words[0], 7);
    }
}
