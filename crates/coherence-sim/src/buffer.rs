//! Copy-buffer pool (spec §3 "Copy buffer", §5 "Copy-buffer pools").
//!
//! Scoped acquisition of a detached metadata/data instance, drawn from a
//! small bounded pool sized for the worst-case number of outstanding
//! transactions a cache may host (typically 2 — spec §9's "pool-size-of-2
//! assumption"). Mirrors the slot-checkout shape of the teacher crate's
//! `InterpreterPool`: a `Mutex<VecDeque<_>>` of free items plus a `Condvar`
//! for waiters, except here checkout never falls back to "skip the pool" —
//! per spec §5, "allocation asserts non-empty (so misconfiguration surfaces
//! immediately)", so exhaustion beyond the constructed size is a
//! [`CoherenceBug`], not a blocking wait. Waiting is only ever for an item
//! that is *currently in use* to be returned, never for more items to be
//! minted.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::error::{bug, CoherenceBug};

/// A bounded pool of reusable `T` instances. `T` is cloned to seed each slot,
/// so `T: Clone + Default`-shaped factories are typical (e.g. a blank
/// `Metadata` or `Data` block).
pub struct CopyBufferPool<T> {
    free: Mutex<VecDeque<T>>,
    cv: Condvar,
    capacity: usize,
}

/// A checked-out buffer. Returns itself to the pool on drop, so a panic
/// mid-transaction cannot leak the slot permanently (it still violates the
/// "every buffer is returned exactly once" invariant in spirit, but does not
/// wedge every subsequent transaction on this cache).
pub struct CopyBufferGuard<'a, T> {
    pool: &'a CopyBufferPool<T>,
    item: Option<T>,
}

impl<T> CopyBufferPool<T> {
    pub fn new(items: Vec<T>) -> Self {
        let capacity = items.len();
        Self {
            free: Mutex::new(items.into()),
            cv: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of items currently free. `capacity() - free_count()` is the
    /// number in use; the buffer-conservation invariant (spec §8) says this
    /// sum never exceeds `capacity()`.
    pub fn free_count(&self) -> usize {
        self.free.lock().expect("buffer pool mutex poisoned").len()
    }

    /// Acquire a buffer, blocking if every item is currently checked out.
    /// Per spec §5, a misconfigured pool of capacity 0 is a [`CoherenceBug`],
    /// not a silent hang.
    pub fn acquire(&self) -> CopyBufferGuard<'_, T> {
        if self.capacity == 0 {
            bug!(CoherenceBug::PoolExhausted);
        }
        let mut free = self.free.lock().expect("buffer pool mutex poisoned");
        while free.is_empty() {
            free = self.cv.wait(free).expect("buffer pool condvar poisoned");
        }
        let item = free.pop_front().expect("checked non-empty above");
        CopyBufferGuard { pool: self, item: Some(item) }
    }
}

impl<'a, T> std::ops::Deref for CopyBufferGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.item.as_ref().expect("item taken before drop")
    }
}

impl<'a, T> std::ops::DerefMut for CopyBufferGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("item taken before drop")
    }
}

impl<'a, T> Drop for CopyBufferGuard<'a, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            let mut free = self.pool.free.lock().expect("buffer pool mutex poisoned");
            free.push_back(item);
            drop(free);
            self.pool.cv.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_drop_returns_to_pool() {
        let pool = CopyBufferPool::new(vec![1u32, 2]);
        assert_eq!(pool.free_count(), 2);
        {
            let _g = pool.acquire();
            assert_eq!(pool.free_count(), 1);
        }
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn conservation_holds_across_concurrent_checkout() {
        use std::sync::Arc;
        let pool = Arc::new(CopyBufferPool::new(vec![0u32; 2]));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            handles.push(std::thread::spawn(move || {
                let _g = pool.acquire();
                std::thread::sleep(std::time::Duration::from_micros(200));
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pool.free_count(), pool.capacity());
    }

    #[test]
    #[should_panic(expected = "PoolExhausted")]
    fn zero_capacity_pool_is_a_bug() {
        let pool: CopyBufferPool<u32> = CopyBufferPool::new(vec![]);
        let _ = pool.acquire();
    }
}
