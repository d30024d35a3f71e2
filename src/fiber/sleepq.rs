//! Deadline-ordered sleep queue (spec.md §4.2).
//!
//! Realized as a `BTreeMap<u64, Slot>` from absolute deadline to "bucket
//! host" slot (the `O(log N)` ordered-tree realization spec.md §9 calls
//! out as equivalent to a bitmap trie), with same-deadline collisions
//! chained through an *intrusive* doubly-linked list threaded through the
//! fiber records themselves (`sleepq_prev`/`sleepq_next`/`sleepq_tail`) —
//! no per-bucket heap allocation on the hot path.

use std::collections::BTreeMap;

use super::pool::{Pool, Slot};
use super::record::{Deadline, EnqueuePolicy};

#[derive(Default)]
pub struct SleepQueue {
    tree: BTreeMap<u64, Slot>,
}

impl SleepQueue {
    pub fn new() -> Self {
        SleepQueue {
            tree: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Earliest deadline currently queued, without removing it, as a raw
    /// tick value. Returns the tree key directly rather than wrapping it
    /// in a [`Deadline`]: `Deadline::at` asserts its input isn't one of
    /// the `FOREVER`/`UNDEFINED` sentinels, but `giveup`/`sleep(FOREVER)`
    /// legitimately park a fiber at `Deadline::FOREVER`, which would then
    /// be the queue's true minimum and trip that assert.
    pub fn min(&self) -> Option<u64> {
        self.tree.keys().next().copied()
    }

    /// The bucket host at the earliest deadline, without removing it.
    pub fn min_host(&self) -> Option<Slot> {
        self.tree.values().next().copied()
    }

    /// Unconditionally links `slot` into the queue at `deadline`,
    /// following `policy` for same-deadline collisions. `slot` must not
    /// already be a member of the sleep queue (spec.md §3 invariant).
    pub fn insert(&mut self, pool: &mut Pool, slot: Slot, deadline: Deadline, policy: EnqueuePolicy) {
        debug_assert!(
            !pool.record(slot).deadline.is_defined(),
            "fiber already in the sleep queue"
        );
        let ticks = deadline.ticks();
        pool.record_mut(slot).deadline = deadline;

        match self.tree.get(&ticks).copied() {
            None => {
                let r = pool.record_mut(slot);
                r.sleepq_is_host = true;
                r.sleepq_prev = None;
                r.sleepq_next = None;
                r.sleepq_tail = None;
                self.tree.insert(ticks, slot);
            }
            Some(host) => match policy {
                EnqueuePolicy::Prepend => self.prepend_as_new_host(pool, ticks, host, slot),
                EnqueuePolicy::Append => self.append_to_bucket(pool, host, slot),
            },
        }
    }

    /// spec.md §4.2 `insert_once`: idempotent against *any* current
    /// sleep-queue membership (see SPEC_FULL.md §9 for why), inserting at
    /// the head of the target bucket when it does insert.
    pub fn insert_once(&mut self, pool: &mut Pool, slot: Slot, deadline: Deadline) {
        if pool.record(slot).deadline.is_defined() {
            return;
        }
        self.insert(pool, slot, deadline, EnqueuePolicy::Prepend);
    }

    /// spec.md §4.2 `remove`: silently ignored if `slot` isn't present.
    pub fn remove(&mut self, pool: &mut Pool, slot: Slot) {
        let deadline = pool.record(slot).deadline;
        if !deadline.is_defined() {
            return;
        }
        let ticks = deadline.ticks();
        let is_host = pool.record(slot).sleepq_is_host;

        if is_host {
            let next = pool.record(slot).sleepq_next;
            let tail = pool.record(slot).sleepq_tail;
            match next {
                None => {
                    self.tree.remove(&ticks);
                }
                Some(new_host) => {
                    let new_host_is_tail = tail == Some(new_host);
                    let r = pool.record_mut(new_host);
                    r.sleepq_prev = None;
                    r.sleepq_is_host = true;
                    r.sleepq_tail = if new_host_is_tail { None } else { tail };
                    self.tree.insert(ticks, new_host);
                }
            }
        } else {
            let prev = pool.record(slot).sleepq_prev;
            let next = pool.record(slot).sleepq_next;
            let prev = prev.expect("non-host sleep-queue member must have a prev link");
            pool.record_mut(prev).sleepq_next = next;
            match next {
                Some(n) => pool.record_mut(n).sleepq_prev = Some(prev),
                None => {
                    // `slot` was the tail; fix up the host's tail pointer.
                    let host = *self.tree.get(&ticks).expect("bucket must still have a host");
                    let prev_is_host = prev == host;
                    pool.record_mut(host).sleepq_tail = if prev_is_host { None } else { Some(prev) };
                }
            }
        }

        let r = pool.record_mut(slot);
        r.deadline = Deadline::UNDEFINED;
        r.sleepq_is_host = false;
        r.sleepq_prev = None;
        r.sleepq_next = None;
        r.sleepq_tail = None;
    }

    /// Removes and returns every fiber whose deadline is `<= now`, in
    /// FIFO order within each deadline: host first, then bucket members
    /// in their original chain order (see DESIGN.md open question #3).
    pub fn drain_expired(&mut self, pool: &mut Pool, now: u64) -> Vec<Slot> {
        let mut out = Vec::new();
        loop {
            let Some((&ticks, &host)) = self.tree.iter().next() else {
                break;
            };
            if ticks > now {
                break;
            }
            self.tree.remove(&ticks);

            let mut member = pool.record(host).sleepq_next;
            out.push(host);
            {
                let r = pool.record_mut(host);
                r.deadline = Deadline::UNDEFINED;
                r.sleepq_is_host = false;
                r.sleepq_next = None;
                r.sleepq_tail = None;
            }
            while let Some(m) = member {
                let next = pool.record(m).sleepq_next;
                let r = pool.record_mut(m);
                r.deadline = Deadline::UNDEFINED;
                r.sleepq_prev = None;
                r.sleepq_next = None;
                out.push(m);
                member = next;
            }
        }
        out
    }

    fn prepend_as_new_host(&mut self, pool: &mut Pool, ticks: u64, old_host: Slot, new_host: Slot) {
        let old_tail = pool.record(old_host).sleepq_tail;
        {
            let r = pool.record_mut(old_host);
            r.sleepq_prev = Some(new_host);
            r.sleepq_is_host = false;
            r.sleepq_tail = None;
        }
        {
            let r = pool.record_mut(new_host);
            r.sleepq_is_host = true;
            r.sleepq_prev = None;
            r.sleepq_next = Some(old_host);
            r.sleepq_tail = Some(old_tail.unwrap_or(old_host));
        }
        self.tree.insert(ticks, new_host);
    }

    fn append_to_bucket(&mut self, pool: &mut Pool, host: Slot, new_member: Slot) {
        let tail = pool.record(host).sleepq_tail;
        let prev = tail.unwrap_or(host);
        pool.record_mut(prev).sleepq_next = Some(new_member);
        {
            let r = pool.record_mut(new_member);
            r.sleepq_is_host = false;
            r.sleepq_prev = Some(prev);
            r.sleepq_next = None;
        }
        pool.record_mut(host).sleepq_tail = Some(new_member);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber::record::FiberRecord;

    fn new_fiber(pool: &mut Pool) -> Slot {
        pool.push_raw(FiberRecord::new_dormant())
    }

    #[test]
    fn append_is_fifo() {
        let mut pool = Pool::new();
        let mut q = SleepQueue::new();
        let a = new_fiber(&mut pool);
        let b = new_fiber(&mut pool);
        let c = new_fiber(&mut pool);
        q.insert(&mut pool, a, Deadline::at(100), EnqueuePolicy::Append);
        q.insert(&mut pool, b, Deadline::at(100), EnqueuePolicy::Append);
        q.insert(&mut pool, c, Deadline::at(100), EnqueuePolicy::Append);
        assert_eq!(q.drain_expired(&mut pool, 100), vec![a, b, c]);
    }

    #[test]
    fn prepend_is_lifo_host() {
        let mut pool = Pool::new();
        let mut q = SleepQueue::new();
        let a = new_fiber(&mut pool);
        let b = new_fiber(&mut pool);
        q.insert(&mut pool, a, Deadline::at(50), EnqueuePolicy::Prepend);
        q.insert(&mut pool, b, Deadline::at(50), EnqueuePolicy::Prepend);
        // b is now host (inserted later, prepended), a trails it.
        assert_eq!(q.drain_expired(&mut pool, 50), vec![b, a]);
    }

    #[test]
    fn min_is_earliest_across_deadlines() {
        let mut pool = Pool::new();
        let mut q = SleepQueue::new();
        let a = new_fiber(&mut pool);
        let b = new_fiber(&mut pool);
        q.insert(&mut pool, b, Deadline::at(200), EnqueuePolicy::Append);
        q.insert(&mut pool, a, Deadline::at(100), EnqueuePolicy::Append);
        assert_eq!(q.min(), Some(100u64));
        assert_eq!(q.min_host(), Some(a));
    }

    #[test]
    fn remove_host_promotes_next_member() {
        let mut pool = Pool::new();
        let mut q = SleepQueue::new();
        let a = new_fiber(&mut pool);
        let b = new_fiber(&mut pool);
        let c = new_fiber(&mut pool);
        q.insert(&mut pool, a, Deadline::at(10), EnqueuePolicy::Append);
        q.insert(&mut pool, b, Deadline::at(10), EnqueuePolicy::Append);
        q.insert(&mut pool, c, Deadline::at(10), EnqueuePolicy::Append);
        q.remove(&mut pool, a);
        assert_eq!(q.min_host(), Some(b));
        assert_eq!(q.drain_expired(&mut pool, 10), vec![b, c]);
    }

    #[test]
    fn remove_middle_member_keeps_chain_intact() {
        let mut pool = Pool::new();
        let mut q = SleepQueue::new();
        let a = new_fiber(&mut pool);
        let b = new_fiber(&mut pool);
        let c = new_fiber(&mut pool);
        q.insert(&mut pool, a, Deadline::at(10), EnqueuePolicy::Append);
        q.insert(&mut pool, b, Deadline::at(10), EnqueuePolicy::Append);
        q.insert(&mut pool, c, Deadline::at(10), EnqueuePolicy::Append);
        q.remove(&mut pool, b);
        assert_eq!(q.drain_expired(&mut pool, 10), vec![a, c]);
    }

    #[test]
    fn remove_tail_member_updates_host_tail() {
        let mut pool = Pool::new();
        let mut q = SleepQueue::new();
        let a = new_fiber(&mut pool);
        let b = new_fiber(&mut pool);
        q.insert(&mut pool, a, Deadline::at(10), EnqueuePolicy::Append);
        q.insert(&mut pool, b, Deadline::at(10), EnqueuePolicy::Append);
        q.remove(&mut pool, b);
        let c = new_fiber(&mut pool);
        q.insert(&mut pool, c, Deadline::at(10), EnqueuePolicy::Append);
        assert_eq!(q.drain_expired(&mut pool, 10), vec![a, c]);
    }

    #[test]
    fn remove_absent_is_noop() {
        let mut pool = Pool::new();
        let mut q = SleepQueue::new();
        let a = new_fiber(&mut pool);
        q.remove(&mut pool, a); // never inserted
        assert!(q.is_empty());
    }

    #[test]
    fn insert_once_is_idempotent() {
        let mut pool = Pool::new();
        let mut q = SleepQueue::new();
        let a = new_fiber(&mut pool);
        q.insert_once(&mut pool, a, Deadline::RESUME_NOW);
        q.insert_once(&mut pool, a, Deadline::RESUME_NOW);
        assert_eq!(q.drain_expired(&mut pool, Deadline::RESUME_NOW.ticks()), vec![a]);
    }
}
