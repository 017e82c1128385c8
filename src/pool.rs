//! Process-wide reusable allocations for emitted code and streaming.
//!
//! Pools are LIFO stacks of slabs behind a mutex, lazily initialized on
//! first use and inert otherwise. A released slab keeps its capacity but
//! has its used size cleared, so a warm pool makes per-call allocation
//! cost asymptotically zero. Released slabs may be reacquired by any
//! thread.

use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

/// The sentinel stored in a capture slot that has not been written.
/// Result materialization turns it into an empty, non-participating group.
pub const NO_POS: usize = usize::MAX;

/// Objects that can be returned to a pool. Reset must clear logical
/// length only, never capacity.
pub trait Reset {
    fn reset(&mut self);
}

/// A LIFO pool of reusable slabs.
pub struct Pool<T> {
    items: Mutex<Vec<T>>,
    create: fn() -> T,
}

impl<T: Reset> Pool<T> {
    pub const fn new(create: fn() -> T) -> Pool<T> {
        Pool { items: Mutex::new(Vec::new()), create }
    }

    /// Acquires a slab, creating one if the pool is empty. The slab is
    /// exclusively owned until the guard drops.
    pub fn get(&'static self) -> PoolGuard<T> {
        let item = self
            .items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .unwrap_or_else(|| (self.create)());
        PoolGuard { item: Some(item), pool: self }
    }

    fn put(&self, mut item: T) {
        item.reset();
        self.items.lock().unwrap_or_else(|e| e.into_inner()).push(item);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Exclusive ownership of a pooled slab; returns it cleared on drop.
pub struct PoolGuard<T: Reset + 'static> {
    item: Option<T>,
    pool: &'static Pool<T>,
}

impl<T: Reset> Deref for PoolGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().unwrap()
    }
}

impl<T: Reset> DerefMut for PoolGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap()
    }
}

impl<T: Reset> Drop for PoolGuard<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.put(item);
        }
    }
}

/// Per-call state for an emitted backtracking engine: the frame stack, the
/// capture log and the capture slot array.
///
/// Frames are `(input offset, next instruction, capture checkpoint)`; the
/// checkpoint is a length into `log`, and restoring a frame truncates the
/// log back to it, replaying prior slot values in reverse.
#[derive(Debug, Default)]
pub struct MatchScratch {
    pub stack: Vec<(usize, usize, usize)>,
    pub log: Vec<(u32, usize)>,
    pub slots: Vec<usize>,
}

impl MatchScratch {
    pub fn new(nslots: usize) -> MatchScratch {
        MatchScratch {
            stack: Vec::new(),
            log: Vec::new(),
            slots: vec![NO_POS; nslots],
        }
    }

    /// Prepares the scratch for a call tracking `nslots` capture slots.
    /// Patterns of different shapes share the pool, so the slot array is
    /// sized here rather than at construction.
    pub fn prepare(&mut self, nslots: usize) {
        self.stack.clear();
        self.log.clear();
        self.slots.clear();
        self.slots.resize(nslots, NO_POS);
    }
}

impl Reset for MatchScratch {
    fn reset(&mut self) {
        self.stack.clear();
        self.log.clear();
        self.slots.clear();
    }
}

impl Reset for Vec<u8> {
    fn reset(&mut self) {
        self.clear();
    }
}

static SCRATCH: Pool<MatchScratch> = Pool::new(MatchScratch::default);
static BUFFERS: Pool<Vec<u8>> = Pool::new(Vec::new);

/// Acquires match scratch from the process-wide pool, sized for `nslots`
/// capture slots. Emitted code calls this when pooling is enabled.
pub fn scratch(nslots: usize) -> PoolGuard<MatchScratch> {
    let mut guard = SCRATCH.get();
    guard.prepare(nslots);
    guard
}

/// Acquires a byte buffer from the process-wide pool, used by the
/// streaming runtime for its input and output buffers.
pub fn buffer(capacity: usize) -> PoolGuard<Vec<u8>> {
    let mut guard = BUFFERS.get();
    if guard.capacity() < capacity {
        let extra = capacity - guard.len();
        guard.reserve(extra);
    }
    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_round_trips_and_keeps_capacity() {
        let cap = {
            let mut s = scratch(4);
            assert_eq!(s.slots, vec![NO_POS; 4]);
            s.stack.push((0, 1, 0));
            s.log.push((0, NO_POS));
            for _ in 0..100 {
                s.stack.push((9, 9, 0));
            }
            s.stack.capacity()
        };
        // The released slab is cleared but its backing store survives.
        let s = scratch(2);
        assert_eq!(s.slots.len(), 2);
        assert!(s.stack.is_empty());
        assert!(s.log.is_empty());
        assert!(s.stack.capacity() >= cap);
    }

    #[test]
    fn lifo_reuse() {
        static POOL: Pool<Vec<u8>> = Pool::new(Vec::new);
        {
            let mut a = POOL.get();
            a.extend_from_slice(b"xxxx");
        }
        assert_eq!(POOL.len(), 1);
        {
            let b = POOL.get();
            assert!(b.is_empty());
            assert!(b.capacity() >= 4);
            assert_eq!(POOL.len(), 0);
        }
        assert_eq!(POOL.len(), 1);
    }

    #[test]
    fn buffers_reserve_requested_capacity() {
        let b = buffer(1 << 12);
        assert!(b.capacity() >= 1 << 12);
    }
}
