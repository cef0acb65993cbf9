//! Per-set replacement policy (spec §4.3).

use std::sync::Mutex;

/// Per-set replacer state + operations. Implementations own no knowledge of
/// addresses or tags — only way indices within a set — matching the spec's
/// "never touches state" note for `replace`.
pub trait Replacer: Send + Sync {
    /// Pick a victim way for `set`. Never mutates recency state.
    fn replace(&self, set: usize) -> usize;

    /// Update recency/priority after an access. `is_release` distinguishes a
    /// writeback-driven access from an ordinary hit/fill.
    fn access(&self, set: usize, way: usize, is_release: bool);

    /// Mark a way as freshly reusable (after an eviction or invalidation).
    fn invalid(&self, set: usize, way: usize);
}

/// True LRU: a per-set recency stack, most-recently-used at the back.
pub struct Lru {
    order: Vec<Mutex<Vec<usize>>>,
    ways: usize,
}

impl Lru {
    pub fn new(num_sets: usize, ways: usize) -> Self {
        let order = (0..num_sets)
            .map(|_| Mutex::new((0..ways).collect()))
            .collect();
        Self { order, ways }
    }
}

impl Replacer for Lru {
    fn replace(&self, set: usize) -> usize {
        let order = self.order[set].lock().expect("lru mutex poisoned");
        order[0]
    }

    fn access(&self, set: usize, way: usize, _is_release: bool) {
        let mut order = self.order[set].lock().expect("lru mutex poisoned");
        if let Some(pos) = order.iter().position(|&w| w == way) {
            order.remove(pos);
        }
        order.push(way);
    }

    fn invalid(&self, set: usize, way: usize) {
        // A freshly-invalid way becomes the next victim: move it to the front.
        let mut order = self.order[set].lock().expect("lru mutex poisoned");
        if let Some(pos) = order.iter().position(|&w| w == way) {
            order.remove(pos);
        }
        order.insert(0, way);
        debug_assert_eq!(order.len(), self.ways);
    }
}

/// FIFO: insertion order governs eviction; ordinary hits do not reorder.
pub struct Fifo {
    order: Vec<Mutex<Vec<usize>>>,
}

impl Fifo {
    pub fn new(num_sets: usize, ways: usize) -> Self {
        let order = (0..num_sets)
            .map(|_| Mutex::new((0..ways).collect()))
            .collect();
        Self { order }
    }
}

impl Replacer for Fifo {
    fn replace(&self, set: usize) -> usize {
        let order = self.order[set].lock().expect("fifo mutex poisoned");
        order[0]
    }

    fn access(&self, _set: usize, _way: usize, _is_release: bool) {
        // FIFO ignores hits entirely; only fills/invalidations reorder.
    }

    fn invalid(&self, set: usize, way: usize) {
        let mut order = self.order[set].lock().expect("fifo mutex poisoned");
        if let Some(pos) = order.iter().position(|&w| w == way) {
            order.remove(pos);
        }
        order.push(way);
    }
}

/// SRRIP (Static Re-Reference Interval Prediction, Jaleel et al. 2010).
/// Each way carries a 2-bit RRPV; a hit sets RRPV to 0 (near-immediate
/// re-reference), a miss searches for an RRPV == MAX way, aging every way by
/// 1 if none is found, and repeating.
pub struct Srrip {
    rrpv: Vec<Mutex<Vec<u8>>>,
}

const RRPV_MAX: u8 = 3;
const RRPV_LONG: u8 = 2;

impl Srrip {
    pub fn new(num_sets: usize, ways: usize) -> Self {
        let rrpv = (0..num_sets)
            .map(|_| Mutex::new(vec![RRPV_MAX; ways]))
            .collect();
        Self { rrpv }
    }
}

impl Replacer for Srrip {
    fn replace(&self, set: usize) -> usize {
        let mut rrpv = self.rrpv[set].lock().expect("srrip mutex poisoned");
        loop {
            if let Some(way) = rrpv.iter().position(|&v| v == RRPV_MAX) {
                return way;
            }
            for v in rrpv.iter_mut() {
                *v += 1;
            }
        }
    }

    fn access(&self, set: usize, way: usize, is_release: bool) {
        let mut rrpv = self.rrpv[set].lock().expect("srrip mutex poisoned");
        rrpv[way] = if is_release { RRPV_LONG } else { 0 };
    }

    fn invalid(&self, set: usize, way: usize) {
        let mut rrpv = self.rrpv[set].lock().expect("srrip mutex poisoned");
        rrpv[way] = RRPV_MAX;
    }
}
