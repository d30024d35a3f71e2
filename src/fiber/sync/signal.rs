use std::cell::Cell;
use std::time::Duration;

use crate::clock;
use crate::fiber::pool::FiberHandle;
use crate::fiber::record::{Deadline, EnqueuePolicy, Phase, Rc};
use crate::runtime::{self, with_runtime};

/// A one-owner wakeup ticket (spec.md §4.4). At most one fiber is
/// subscribed at a time; [`send`](Signal::send) wakes it iff it is
/// currently in `SIGNAL_SUBSCRIBE`, otherwise it is a no-op — in
/// particular, a `send` that arrives strictly before the matching
/// `subscribe` is simply lost (spec.md testable property #8).
#[derive(Default)]
pub struct Signal {
    owner: Cell<Option<FiberHandle>>,
}

impl Signal {
    pub fn new() -> Self {
        Signal { owner: Cell::new(None) }
    }

    /// Blocks until [`send`](Signal::send)/[`error`](Signal::error) is
    /// called.
    pub fn subscribe(&self) -> Rc {
        let me = with_runtime(|rt| {
            let cur = rt.current.expect("Signal::subscribe called outside a fiber");
            let me = rt.pool.handle_of(cur);
            self.owner.set(Some(me));
            rt.pool.record_mut(cur).phase = Phase::SignalSubscribe;
            me
        });
        let rc = runtime::suspend_current();
        // Clear ownership regardless of why we woke: a stray `send`
        // arriving afterward must not resume a future, unrelated
        // subscriber of this same `Signal`.
        if self.owner.get() == Some(me) {
            self.owner.set(None);
        }
        rc
    }

    /// As [`subscribe`](Signal::subscribe), but gives up and returns
    /// `Rc::Timedout` if nothing arrives within `timeout`.
    pub fn subscribe_with_timeout(&self, timeout: Duration) -> Rc {
        let me = with_runtime(|rt| {
            let cur = rt.current.expect("Signal::subscribe_with_timeout called outside a fiber");
            let me = rt.pool.handle_of(cur);
            self.owner.set(Some(me));
            rt.pool.record_mut(cur).phase = Phase::SignalSubscribe;
            let now = rt.clock.now();
            let deadline = Deadline::at(now.saturating_add(clock::duration_to_ticks(timeout)));
            rt.sleepq.insert(&mut rt.pool, cur, deadline, EnqueuePolicy::Append);
            me
        });
        let rc = runtime::suspend_current();
        // `error`/`send` clear `owner` themselves; if it's still us, the
        // sleep-queue timeout is what woke us instead.
        if self.owner.get() == Some(me) {
            self.owner.set(None);
            Rc::Timedout
        } else {
            rc
        }
    }

    /// Wakes the current subscriber, if any, with `Rc::Ok`.
    pub fn send(&self) {
        self.error(Rc::Ok);
    }

    /// As [`send`](Signal::send), but delivers `rc` instead of `Rc::Ok` —
    /// used to force a user-visible failure onto the waiting fiber.
    pub fn error(&self, rc: Rc) {
        with_runtime(|rt| {
            let Some(handle) = self.owner.get() else {
                return;
            };
            let Some(slot) = rt.pool.resolve(handle) else {
                return;
            };
            if rt.pool.record(slot).phase != Phase::SignalSubscribe {
                return;
            }
            rt.pool.record_mut(slot).rc = rc;
            self.owner.set(None);
            runtime::set_resume(rt, slot, EnqueuePolicy::Prepend);
        });
    }

    /// [`error`](Signal::error) followed by a join on the (now
    /// resumable) subscriber, for callers that need to wait for it to
    /// actually act on the forced wakeup before proceeding.
    pub fn error_and_join(&self, rc: Rc) -> Rc {
        let handle = self.owner.get();
        self.error(rc);
        match handle {
            Some(h) => runtime::join(h),
            None => Rc::JoinFailure,
        }
    }
}
