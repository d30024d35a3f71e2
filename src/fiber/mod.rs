//! Fibers: lightweight, cooperatively scheduled units of execution with
//! their own stack (spec.md §3, §4.1, §6).
//!
//! This module is the public surface; the actual bookkeeping lives in
//! [`runtime`](crate::runtime) (the singleton that owns the arena, sleep
//! queue and poller) and the submodules below, which model the data
//! structures spec.md §3/§9 call out: the arena ([`pool`]), one record per
//! fiber ([`record`]), the deadline-ordered sleep queue ([`sleepq`]), and
//! the generic intrusive wait queue every synchronization primitive in
//! [`sync`] is built from ([`waitq`]).

pub(crate) mod context;
pub(crate) mod pool;
pub(crate) mod record;
pub(crate) mod sleepq;
mod switch_x86_64;
pub mod sync;
pub(crate) mod waitq;

use std::time::Duration;

use crate::clock;
use crate::error::Result;
use crate::runtime::{self, with_runtime};

pub use pool::FiberHandle;
pub use record::Rc;

/// Builder for spawning a fiber with a non-default name or stack size,
/// and for getting a typed result back via [`JoinHandle`] (spec.md §6's
/// plain `spawn`/`new`, generalized the way `std::thread::Builder`
/// layers atop its own bare `thread::spawn`).
pub struct Builder<'a> {
    name: &'a str,
    stack_size: Option<usize>,
}

impl<'a> Builder<'a> {
    pub fn new() -> Self {
        Builder {
            name: "fiber",
            stack_size: None,
        }
    }

    pub fn name(mut self, name: &'a str) -> Self {
        self.name = name;
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Spawns `f` and returns a handle its result can be collected from.
    /// `T` is stashed via [`set_cld`] under the hood; [`JoinHandle::join`]
    /// retrieves it.
    pub fn spawn<T: 'static>(self, f: impl FnOnce() -> T + 'static) -> Result<JoinHandle<T>> {
        let prev_stack_size = self
            .stack_size
            .map(|bytes| with_runtime(|rt| rt.pool.set_stack_size(bytes)));
        let handle = spawn_with_cld(self.name, f);
        if let Some(prev) = prev_stack_size {
            with_runtime(|rt| rt.pool.set_stack_size(prev));
        }
        Ok(JoinHandle::new(handle?))
    }
}

impl<'a> Default for Builder<'a> {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_with_cld<T: 'static>(name: &str, f: impl FnOnce() -> T + 'static) -> Result<FiberHandle> {
    runtime::spawn(
        name,
        Box::new(move || {
            let result = f();
            let cur = runtime::current_slot().expect("fiber entry running outside its own fiber");
            with_runtime(|rt| rt.pool.record_mut(cur).cld = Some(Box::new(result)));
        }),
    )
}

/// A typed handle to a fiber's eventual result (SPEC_FULL.md §6, layered
/// atop the untyped [`FiberHandle`] + `join`/`get_cld` pair spec.md
/// describes).
pub struct JoinHandle<T> {
    handle: FiberHandle,
    _marker: std::marker::PhantomData<T>,
}

impl<T: 'static> JoinHandle<T> {
    fn new(handle: FiberHandle) -> Self {
        JoinHandle {
            handle,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn fiber(&self) -> FiberHandle {
        self.handle
    }

    /// Blocks until the fiber finishes. `None` if the join itself failed
    /// (self-join — can't happen from outside the fiber it names — or a
    /// stale handle) or the fiber panicked before stashing a result.
    pub fn join(self) -> Option<T> {
        let rc = runtime::join(self.handle);
        if !rc.is_ok() {
            return None;
        }
        with_runtime(|rt| rt.pool.take_cld_if_same_generation(self.handle))
            .and_then(|boxed| boxed.downcast::<T>().ok())
            .map(|b| *b)
    }
}

/// A fiber spawned without a typed result; just a thin rename of
/// [`JoinHandle<()>`] for call sites that don't care about `T`.
pub type UnitJoinHandle = JoinHandle<()>;

// ---------------------------------------------------------------------
// Constructors (spec.md §4.1/§6)
// ---------------------------------------------------------------------

/// Creates and runs a fiber, scheduled for its first turn immediately.
pub fn spawn(name: &str, f: impl FnOnce() + 'static) -> Result<FiberHandle> {
    runtime::spawn(name, Box::new(f))
}

/// Creates a fiber in the DORMANT phase without scheduling it; call
/// [`run`] to start it.
pub fn new(name: &str, f: impl FnOnce() + 'static) -> Result<FiberHandle> {
    runtime::new_dormant(name, Box::new(f))
}

/// Schedules a fiber created via [`new`] for its first turn. A
/// programming error (panics) if `handle` isn't DORMANT.
pub fn run(handle: FiberHandle) {
    with_runtime(|rt| {
        if let Some(slot) = rt.pool.resolve(handle) {
            runtime::run(rt, slot);
        }
    });
}

// ---------------------------------------------------------------------
// Suspension (spec.md §4.1/§5/§6)
// ---------------------------------------------------------------------

/// Gives up the CPU for one scheduler turn, remaining runnable.
pub fn yield_now() -> Rc {
    runtime::yield_now()
}

/// Sleeps for (at least) `d`, rounded up to whole ticks (nanoseconds).
pub fn sleep(d: Duration) -> Rc {
    runtime::sleep_ticks(clock::duration_to_ticks(d))
}

/// Sleeps for `usec` microseconds.
pub fn sleep_usec(usec: u64) -> Rc {
    runtime::sleep_ticks(clock::usec2ticks(usec))
}

/// Sleeps for exactly `ticks` ticks; `0` is equivalent to [`yield_now`].
pub fn sleep_ticks(ticks: u64) -> Rc {
    runtime::sleep_ticks(ticks)
}

/// Parks the calling fiber forever; only `interrupt`/`set_interrupt_and_join*`
/// can wake it back up.
pub fn giveup() {
    runtime::giveup()
}

/// Blocks until `target` finishes. `Rc::JoinFailure` on a self-join or a
/// stale/already-finalized handle.
pub fn join(target: FiberHandle) -> Rc {
    runtime::join(target)
}

/// As [`join`], but gives up and returns `Rc::Timedout` if `target`
/// hasn't finished within `timeout`.
pub fn join_with_timeout(target: FiberHandle, timeout: Duration) -> Rc {
    runtime::join_with_timeout(target, timeout)
}

/// Requests that `target` wake up immediately with `Rc::UserInterrupted`.
/// A no-op on an already-finalized target; a programming error to
/// interrupt yourself.
pub fn interrupt(target: FiberHandle) {
    runtime::set_interrupt(target)
}

pub fn set_interrupt_and_join(target: FiberHandle) -> Rc {
    runtime::set_interrupt_and_join(target)
}

pub fn set_interrupt_and_join_with_timeout(target: FiberHandle, timeout: Duration) -> Rc {
    runtime::set_interrupt_and_join_with_timeout(target, timeout)
}

/// Spawns `f` as a child fiber and waits up to `timeout` for it to
/// finish; on timeout the child is interrupted and this returns
/// `Rc::WaitTimeout` (spec.md §4.1 scenario E).
pub fn wait_for(name: &str, timeout: Duration, f: impl FnOnce() + 'static) -> Result<Rc> {
    runtime::wait_for(name, timeout, Box::new(f))
}

/// Non-blocking-in-spirit "has `target` finished yet", implemented as a
/// zero/short-timeout [`join_with_timeout`] (spec.md §4.1 `peek`).
pub fn peek(target: FiberHandle, timeout: Duration) -> Rc {
    runtime::peek(target, timeout)
}

// ---------------------------------------------------------------------
// Introspection (spec.md §6)
// ---------------------------------------------------------------------

/// A handle to the currently running fiber.
pub fn me() -> FiberHandle {
    let slot = runtime::current_slot().expect("fiber::me() called outside a fiber");
    runtime::handle_of(slot)
}

pub fn id(handle: FiberHandle) -> u64 {
    with_runtime(|rt| match rt.pool.resolve_any_generation(handle) {
        Some(slot) => rt.pool.record(slot).id,
        None => u64::MAX,
    })
}

pub fn is_runnable(handle: FiberHandle) -> bool {
    runtime::is_runnable(handle)
}

pub fn is_dead(handle: FiberHandle) -> bool {
    runtime::is_dead(handle)
}

/// Renames the calling fiber (truncated/padded to 8 bytes, spec.md §3).
pub fn set_name(name: &str) {
    with_runtime(|rt| {
        let cur = rt.current.expect("set_name called outside a fiber");
        rt.pool.record_mut(cur).set_name(name);
    });
}

pub fn name(handle: FiberHandle) -> String {
    with_runtime(|rt| match rt.pool.resolve_any_generation(handle) {
        Some(slot) => rt.pool.record(slot).name().to_string(),
        None => String::new(),
    })
}

/// Stashes an arbitrary, caller-defined value on the calling fiber's
/// record (spec.md §6 `cld`, "per-fiber client data"). Overwrites
/// whatever was stashed before.
pub fn set_cld<T: 'static>(value: T) {
    with_runtime(|rt| {
        let cur = rt.current.expect("set_cld called outside a fiber");
        rt.pool.record_mut(cur).cld = Some(Box::new(value));
    });
}

/// Retrieves (and clears) the calling fiber's stashed `cld`, if any and
/// if it was stashed as a `T`.
pub fn get_cld<T: 'static>() -> Option<T> {
    with_runtime(|rt| {
        let cur = rt.current.expect("get_cld called outside a fiber");
        rt.pool.record_mut(cur).cld.take()
    })
    .and_then(|boxed| boxed.downcast::<T>().ok())
    .map(|b| *b)
}

/// Sets the calling fiber's plain integer return value (spec.md §6
/// `set_retval`/`get_retval`), surfaced independently of `rc`.
pub fn set_retval(v: i32) {
    with_runtime(|rt| {
        let cur = rt.current.expect("set_retval called outside a fiber");
        rt.pool.record_mut(cur).retval = v;
    });
}

pub fn get_retval(handle: FiberHandle) -> i32 {
    with_runtime(|rt| match rt.pool.resolve_any_generation(handle) {
        Some(slot) => rt.pool.record(slot).retval,
        None => 0,
    })
}

/// Sets the tie-break policy (spec.md §4.2) used the next time the
/// calling fiber is rescheduled via `set_resume`/a wake-up. `true`
/// prepends (LIFO) within its target bucket, `false` (the default)
/// appends (FIFO).
pub fn set_prio(prepend: bool) {
    with_runtime(|rt| {
        let cur = rt.current.expect("set_prio called outside a fiber");
        rt.pool.record_mut(cur).enqueue_policy = if prepend {
            record::EnqueuePolicy::Prepend
        } else {
            record::EnqueuePolicy::Append
        };
    });
}

/// The process-wide context-switch counter as observed the last time the
/// calling fiber ran (SPEC_FULL.md §3 test-tooling addition, mirroring the
/// teacher's `fiber.csw()`).
pub fn csw() -> u64 {
    with_runtime(|rt| {
        let cur = rt.current.expect("csw called outside a fiber");
        rt.pool.record(cur).csw
    })
}

/// Whether any other fiber has run since the calling fiber last
/// suspended — a hint that a tight loop should call [`yield_now`] soon.
pub fn check_yield() -> bool {
    with_runtime(|rt| {
        let cur = rt.current.expect("check_yield called outside a fiber");
        rt.csw > rt.pool.record(cur).csw
    })
}

/// spec.md §4.1 `pin`/`unpin`/`gc`: pins a fiber's arena slot so it
/// survives finalization until explicitly unpinned, for callers that need
/// to read back post-mortem state (e.g. `get_retval`) before the slot is
/// recycled.
pub fn pin(handle: FiberHandle) {
    runtime::pin(handle)
}

pub fn unpin(handle: FiberHandle) {
    runtime::unpin(handle)
}

/// Reclaims finalized, unpinned slots back into the free list.
pub fn gc() {
    runtime::gc()
}

// ---------------------------------------------------------------------
// Time (spec.md §6: get_now_ticks[_precise], msec2ticks, ticks2sec,
// ticksdiff2sec). The conversion helpers live in `clock` since they need
// no runtime access; only the two "now" readings need the clock
// snapshot `runtime` owns.
// ---------------------------------------------------------------------

/// The scheduler's last clock snapshot, in ticks (nanoseconds). Does not
/// touch the kernel; cheap to call from a tight loop.
pub fn get_now_ticks() -> clock::Ticks {
    runtime::get_now_ticks()
}

/// As [`get_now_ticks`], but forces a fresh read of the system clock.
pub fn get_now_ticks_precise() -> clock::Ticks {
    runtime::get_now_ticks_precise()
}
