use std::cell::{Cell, RefCell};

use super::Signal;
use crate::fiber::record::Rc;

/// A single-slot producer/consumer handoff (spec.md §4.4): a producer
/// fiber calls [`yield`](Generator::yield) to hand a value to whoever
/// calls [`next`](Generator::next) next, then blocks until that consumer
/// has taken it (or signaled it away). Built from two [`Signal`]s so each
/// side only ever waits on the handoff it's actually expecting.
///
/// A bare pair of signals isn't quite enough: `Signal::send` strictly
/// before the matching `subscribe` is lost by design (spec.md testable
/// property #8), so whichever side happens to run first would drop its
/// wakeup and both fibers would park forever. `has_value` decouples "is
/// there a value waiting" from "did the signal race land" — each side
/// checks it before subscribing, so a value published before the other
/// side is listening is still found instead of depending on scheduling
/// order.
pub struct Generator<T> {
    /// Signaled by the producer once a value is in `slot`.
    ready: Signal,
    /// Signaled by the consumer once it has taken the value out of `slot`.
    taken: Signal,
    slot: RefCell<Option<T>>,
    has_value: Cell<bool>,
}

impl<T> Default for Generator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Generator<T> {
    pub fn new() -> Self {
        Generator {
            ready: Signal::new(),
            taken: Signal::new(),
            slot: RefCell::new(None),
            has_value: Cell::new(false),
        }
    }

    /// Stashes `value` for the next [`next`](Generator::next) call, then
    /// blocks until it's been picked up.
    pub fn r#yield(&self, value: T) -> Rc {
        *self.slot.borrow_mut() = Some(value);
        self.has_value.set(true);
        self.ready.send();
        loop {
            if !self.has_value.get() {
                return Rc::Ok;
            }
            let rc = self.taken.subscribe();
            if !rc.is_ok() {
                return rc;
            }
        }
    }

    /// Blocks until the producer yields a value, then takes it. `None`
    /// if woken by something other than a publish (e.g. a forced error
    /// via [`signal`](Generator::signal)).
    pub fn next(&self) -> Option<T> {
        loop {
            if self.has_value.get() {
                let value = self.slot.borrow_mut().take();
                self.has_value.set(false);
                self.taken.send();
                return value;
            }
            let rc = self.ready.subscribe();
            if !rc.is_ok() {
                return None;
            }
        }
    }

    /// Forces whichever side is currently parked (producer in `yield`,
    /// consumer in `next`) to wake with `rc`, joining it to be sure it
    /// has observed the forced wakeup.
    pub fn signal(&self, rc: Rc) -> Rc {
        let joined = self.ready.error_and_join(rc);
        if matches!(joined, Rc::JoinFailure) {
            self.taken.error_and_join(rc)
        } else {
            joined
        }
    }
}
