use std::cell::RefCell;
use std::time::Duration;

use crate::fiber::record::{EnqueuePolicy, Phase, Rc};
use crate::fiber::waitq::WaitQueue;
use crate::runtime::{self, with_runtime};

/// A condition variable (spec.md §4.4): one FIFO wait queue, woken by
/// [`signal_one`](Condvar::signal_one)/[`signal_all`](Condvar::signal_all).
/// Carries no data of its own — pair it with a `Cell`/`RefCell` (or see
/// [`super::Semaphore`]/[`super::RwLock`], both built on top of one) for
/// the predicate being waited on.
#[derive(Default)]
pub struct Condvar {
    waitq: RefCell<WaitQueue>,
}

impl Condvar {
    pub fn new() -> Self {
        Condvar {
            waitq: RefCell::new(WaitQueue::new()),
        }
    }

    /// Appends the calling fiber and yields until woken.
    pub fn wait(&self) -> Rc {
        // SAFETY: `wait_on` only dereferences this pointer in the brief
        // windows before/after the switch, never across it, and no other
        // fiber can run concurrently with this one. Going through
        // `as_ptr` instead of `borrow_mut` is load-bearing here: a
        // `RefMut` passed by `&mut` would stay borrowed across the
        // suspend below and panic the first other fiber that touches
        // this same `Condvar` while we're parked.
        unsafe { runtime::wait_on(self.waitq.as_ptr(), Phase::Condwait) }
    }

    /// As [`wait`](Condvar::wait), bounded by `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Rc {
        // SAFETY: see `wait` above.
        unsafe { runtime::wait_on_with_timeout(self.waitq.as_ptr(), Phase::Condwait, timeout) }
    }

    /// Wakes the longest-waiting fiber, if any. Returns whether anyone
    /// was woken.
    pub fn signal_one(&self) -> bool {
        with_runtime(|rt| runtime::wake_one(rt, &mut self.waitq.borrow_mut(), Rc::Ok, EnqueuePolicy::Prepend))
    }

    /// Wakes every waiting fiber.
    pub fn signal_all(&self) {
        with_runtime(|rt| runtime::wake_all(rt, &mut self.waitq.borrow_mut(), Rc::Ok, EnqueuePolicy::Prepend));
    }

    /// Wakes every waiting fiber, for use at teardown (spec.md §4.4
    /// `fini`) — identical to [`signal_all`](Condvar::signal_all).
    pub fn fini(&self) {
        self.signal_all();
    }
}
