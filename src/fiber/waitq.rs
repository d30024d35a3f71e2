//! Generic FIFO wait queue (spec.md §4.4).
//!
//! A wait queue is intrusive: membership links live directly on the
//! [`FiberRecord`](super::record::FiberRecord) (`waitq_prev`/`waitq_next`),
//! so attaching/detaching a fiber never allocates. Every synchronization
//! primitive (condvar, semaphore, rwlock, signal owner slot, a fiber's own
//! joiners) is built out of one `WaitQueue` value plus the operations
//! below.

use super::pool::{Pool, Slot};

/// A FIFO list of waiting fibers.
#[derive(Default)]
pub struct WaitQueue {
    head: Option<Slot>,
    tail: Option<Slot>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        WaitQueue {
            head: None,
            tail: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Appends `slot` to the tail of `self`. The fiber must not already be
    /// a member of a different wait queue (per the single-membership
    /// invariant in spec.md §3) — callers that move a fiber between
    /// queues detach it explicitly first via [`WaitQueue::remove`].
    pub fn append_self(&mut self, pool: &mut Pool, slot: Slot) {
        debug_assert!(
            !pool.record(slot).on_waitq,
            "fiber is already a member of a wait queue"
        );
        pool.record_mut(slot).waitq_prev = self.tail;
        pool.record_mut(slot).waitq_next = None;
        match self.tail {
            Some(tail) => pool.record_mut(tail).waitq_next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
        pool.record_mut(slot).on_waitq = true;
    }

    /// Pops and returns the head of the queue, if any, detaching it.
    pub fn resume_one(&mut self, pool: &mut Pool) -> Option<Slot> {
        let head = self.head?;
        self.unlink(pool, head);
        Some(head)
    }

    /// Detaches and returns every fiber currently on the queue, in FIFO
    /// order.
    pub fn resume_all(&mut self, pool: &mut Pool) -> Vec<Slot> {
        let mut out = Vec::new();
        while let Some(slot) = self.resume_one(pool) {
            out.push(slot);
        }
        out
    }

    /// Removes an arbitrary member (used by timeouts/interrupts that must
    /// detach a specific waiter rather than the head). A no-op if the
    /// fiber isn't currently on *this* queue.
    pub fn remove(&mut self, pool: &mut Pool, slot: Slot) {
        if !pool.record(slot).on_waitq {
            return;
        }
        self.unlink(pool, slot);
    }

    fn unlink(&mut self, pool: &mut Pool, slot: Slot) {
        let (prev, next) = {
            let r = pool.record(slot);
            (r.waitq_prev, r.waitq_next)
        };
        match prev {
            Some(p) => pool.record_mut(p).waitq_next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => pool.record_mut(n).waitq_prev = prev,
            None => self.tail = prev,
        }
        let r = pool.record_mut(slot);
        r.waitq_prev = None;
        r.waitq_next = None;
        r.on_waitq = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber::record::FiberRecord;

    fn push_dummy(pool: &mut Pool) -> Slot {
        pool.push_raw(FiberRecord::new_dormant())
    }

    #[test]
    fn fifo_order() {
        let mut pool = Pool::new();
        let mut wq = WaitQueue::new();
        let a = push_dummy(&mut pool);
        let b = push_dummy(&mut pool);
        let c = push_dummy(&mut pool);
        wq.append_self(&mut pool, a);
        wq.append_self(&mut pool, b);
        wq.append_self(&mut pool, c);
        assert_eq!(wq.resume_all(&mut pool), vec![a, b, c]);
        assert!(wq.is_empty());
    }

    #[test]
    fn remove_middle() {
        let mut pool = Pool::new();
        let mut wq = WaitQueue::new();
        let a = push_dummy(&mut pool);
        let b = push_dummy(&mut pool);
        let c = push_dummy(&mut pool);
        wq.append_self(&mut pool, a);
        wq.append_self(&mut pool, b);
        wq.append_self(&mut pool, c);
        wq.remove(&mut pool, b);
        assert_eq!(wq.resume_all(&mut pool), vec![a, c]);
    }
}
