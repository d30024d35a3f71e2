use std::cell::Cell;

use super::Condvar;
use crate::fiber::record::Rc;

/// A drain-to-full barrier (spec.md §4.4): the inverse of [`super::Semaphore`]
/// — `acquire` increments the count and wakes waiters, `release`
/// decrements it, and `wait` blocks until the count reaches `capacity`.
/// Useful for "wait until N workers have all checked in" shutdown/startup
/// barriers.
pub struct InvertedSemaphore {
    count: Cell<u32>,
    capacity: u32,
    cond: Condvar,
}

impl InvertedSemaphore {
    pub fn new(capacity: u32) -> Self {
        InvertedSemaphore {
            count: Cell::new(0),
            capacity,
            cond: Condvar::new(),
        }
    }

    /// Increments the count (capped at `capacity`) and wakes every fiber
    /// blocked in [`wait`](InvertedSemaphore::wait).
    pub fn acquire(&self) {
        self.count.set((self.count.get() + 1).min(self.capacity));
        self.cond.signal_all();
    }

    /// Decrements the count.
    pub fn release(&self) {
        let c = self.count.get();
        if c > 0 {
            self.count.set(c - 1);
        }
    }

    /// Blocks while the count hasn't yet reached `capacity`.
    pub fn wait(&self) -> Rc {
        loop {
            if self.count.get() >= self.capacity {
                return Rc::Ok;
            }
            let rc = self.cond.wait();
            if !rc.is_ok() {
                return rc;
            }
        }
    }
}
