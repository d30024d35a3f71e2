//! The per-thread runtime singleton: owns the clock, fiber pool, sleep
//! queue and poller, and the "current fiber" cursor the rest of the
//! crate's public API threads through (spec.md §9: "the singletons ...
//! should be grouped into one runtime object that init/fini
//! constructs/destructs").
//!
//! Every operation that needs more than one subsystem goes through
//! [`with_runtime`], which hands out a short-lived `&mut Runtime` and
//! asserts (in debug builds) that it is never called reentrantly. The
//! three functions that actually perform a context switch
//! ([`suspend_current`], [`resume_fiber`], [`finalize_current_and_switch_back`])
//! deliberately bypass that assertion: they gather what they need from
//! the runtime, drop the borrow, perform the switch, and only then
//! re-acquire a fresh borrow on the other side. Holding a `&mut Runtime`
//! live *across* a switch would let the resumed stack re-enter the
//! runtime while the suspended stack's borrow is still notionally
//! outstanding — unsound with an `UnsafeCell` and a guaranteed spurious
//! panic with a `RefCell`, which is why this module uses the former with
//! a hand-rolled discipline instead of the latter.

use std::cell::UnsafeCell;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::clock::{self, Clock};
use crate::error::Result;
use crate::fiber::context::Context;
use crate::fiber::pool::{FiberHandle, Pool, Slot};
use crate::fiber::record::{Deadline, EnqueuePolicy, Phase, Rc};
use crate::fiber::sleepq::SleepQueue;
use crate::fiber::waitq::WaitQueue;
use crate::poller::{self, Poller};

/// Tunables gathered at [`init_with_config`] time (SPEC_FULL.md §2).
#[derive(Debug, Clone)]
pub struct Config {
    /// Default stack size for fibers spawned without an explicit
    /// `Builder::stack_size` override. Clamped/rounded per spec.md §6.
    pub stack_size: usize,
    /// Upper bound on how long the scheduler loop will block in one
    /// poll, when no sleeping fiber has an earlier deadline (spec.md
    /// §4.5 step 2: "the C sources use ~59 s").
    pub poll_cap: Duration,
    /// Tie-break policy `run`/`spawn` use by default (spec.md §4.2).
    pub default_enqueue_policy: EnqueuePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            stack_size: 256 * 1024,
            poll_cap: Duration::from_secs(59),
            default_enqueue_policy: EnqueuePolicy::Append,
        }
    }
}

pub struct Runtime {
    pub(crate) clock: Clock,
    pub(crate) pool: Pool,
    pub(crate) sleepq: SleepQueue,
    pub(crate) poller: Poller,
    pub(crate) config: Config,
    /// The saved context of the scheduler loop's own stack (i.e. this OS
    /// thread's original stack), switched into whenever a fiber suspends.
    pub(crate) scheduler_ctx: Context,
    pub(crate) current: Option<Slot>,
    pub(crate) shutdown: bool,
    /// Process-wide context-switch counter, snapshotted per-fiber for
    /// `check_yield`/`csw()` (SPEC_FULL.md §3).
    pub(crate) csw: u64,
}

thread_local! {
    static RUNTIME: UnsafeCell<Option<Runtime>> = UnsafeCell::new(None);
}

#[cfg(debug_assertions)]
thread_local! {
    static BORROWED: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

fn raw_ptr() -> *mut Option<Runtime> {
    RUNTIME.with(|cell| cell.get())
}

/// # Safety
/// Must only be called when no other live reference to the `Runtime`
/// exists on this thread, i.e. immediately before/after a context switch,
/// never held across one.
unsafe fn raw_mut() -> &'static mut Runtime {
    (*raw_ptr())
        .as_mut()
        .expect("weave::runtime::init() must be called before any fiber operation")
}

/// Runs `f` with exclusive access to the runtime. Never call this from
/// inside another `with_runtime` closure, and never perform a context
/// switch inside `f` — both are debug-asserted against.
pub(crate) fn with_runtime<R>(f: impl FnOnce(&mut Runtime) -> R) -> R {
    #[cfg(debug_assertions)]
    BORROWED.with(|b| {
        assert!(!b.get(), "reentrant with_runtime call on this thread");
        b.set(true);
    });
    // SAFETY: the reentrancy assert above (debug builds) and the
    // switch-boundary functions' documented discipline (release builds)
    // together ensure this is the only live access.
    let rt = unsafe { raw_mut() };
    let result = f(rt);
    #[cfg(debug_assertions)]
    BORROWED.with(|b| b.set(false));
    result
}

/// One-shot, idempotent. Must precede any fiber operation (spec.md §6).
pub fn init() -> Result<()> {
    init_with_config(Config::default())
}

pub fn init_with_config(config: Config) -> Result<()> {
    RUNTIME.with(|cell| {
        // SAFETY: no other borrow can be outstanding before init.
        let slot = unsafe { &mut *cell.get() };
        if slot.is_some() {
            return Ok(());
        }
        let poller = Poller::new()?;
        let mut pool = Pool::new();
        pool.set_stack_size(config.stack_size);
        *slot = Some(Runtime {
            clock: Clock::new(),
            pool,
            sleepq: SleepQueue::new(),
            poller,
            config,
            scheduler_ctx: Context::empty(),
            current: None,
            shutdown: false,
            csw: 0,
        });
        Ok(())
    })
}

/// Releases all runtime state. Fibers still on the holding list (abac >
/// 0) are leaked intentionally, per the pin contract (spec.md §6).
pub fn fini() {
    RUNTIME.with(|cell| {
        // SAFETY: called from outside the scheduler loop, no fiber is
        // running, so no borrow is outstanding.
        let slot = unsafe { &mut *cell.get() };
        *slot = None;
    });
}

/// Requests shutdown. Unlike a preemptible host, this always runs on the
/// same single thread as the scheduler loop, so there is never a blocking
/// poll in flight to wake up separately — see `scheduler.rs`'s module
/// docs and DESIGN.md for why no wake-up fiber is needed here.
pub fn shutdown() {
    with_runtime(|rt| rt.shutdown = true);
}

pub fn shutting_down() -> bool {
    with_runtime(|rt| rt.shutdown)
}

pub(crate) fn current_slot() -> Option<Slot> {
    with_runtime(|rt| rt.current)
}

pub(crate) fn handle_of(slot: Slot) -> FiberHandle {
    with_runtime(|rt| rt.pool.handle_of(slot))
}

// ---------------------------------------------------------------------
// Switch-boundary primitives
// ---------------------------------------------------------------------

/// Suspends the calling fiber: switches from its own context to the
/// scheduler's saved context, returning once someone resumes it. The
/// returned `Rc` is whatever the resumer wrote to this fiber's record.
pub(crate) fn suspend_current() -> Rc {
    // SAFETY: only ever called from within a running fiber; the
    // scheduler is parked (it switched into us) until this switch
    // returns, so these pointers are not concurrently touched.
    let (cur_ctx, sched_ctx): (*mut Context, *const Context) = unsafe {
        let rt = raw_mut();
        let slot = rt.current.expect("suspend_current called outside a fiber");
        (&mut rt.pool.record_mut(slot).context, &rt.scheduler_ctx)
    };
    unsafe {
        (*cur_ctx).switch_into(&*sched_ctx);
    }
    // SAFETY: control has returned to us; no switch is in flight.
    unsafe {
        let rt = raw_mut();
        rt.csw += 1;
        let slot = rt.current.expect("current slot cleared across a switch");
        // Snapshot the process-wide counter onto our own record so
        // `fiber::check_yield`/`fiber::csw` (called the *next* time we run)
        // can tell whether any switch has happened since.
        rt.pool.record_mut(slot).csw = rt.csw;
        rt.pool.record(slot).rc
    }
}

/// Switches from the scheduler's context into `slot`'s fiber context,
/// blocking the scheduler loop until that fiber suspends again (or
/// finalizes, via [`finalize_current_and_switch_back`]). Called only
/// from `scheduler.rs`.
pub(crate) fn resume_fiber(slot: Slot) {
    // SAFETY: called only from the scheduler loop, which never runs
    // concurrently with a fiber (single thread); no borrow is
    // outstanding across this switch on either side.
    unsafe {
        let rt = raw_mut();
        rt.current = Some(slot);
        let sched_ctx: *mut Context = &mut rt.scheduler_ctx;
        let fiber_ctx: *const Context = &rt.pool.record(slot).context;
        (*sched_ctx).switch_into(&*fiber_ctx);
    }
    // SAFETY: the fiber suspended (or finalized) and control is back.
    unsafe {
        raw_mut().current = None;
    }
}

/// Called from `pool::run_current_and_finalize` once a fiber's entry
/// function has returned (or panicked). Finalizes the record and
/// switches back to the scheduler; never returns.
pub(crate) fn finalize_current_and_switch_back(slot: Slot) -> ! {
    // SAFETY: runs on the fiber's own stack, no switch in flight.
    unsafe {
        finalize(raw_mut(), slot);
    }
    // SAFETY: see `resume_fiber`; symmetric switch back to the scheduler.
    unsafe {
        let rt = raw_mut();
        let fiber_ctx: *mut Context = &mut rt.pool.record_mut(slot).context;
        let sched_ctx: *const Context = &rt.scheduler_ctx;
        (*fiber_ctx).switch_into(&*sched_ctx);
    }
    unreachable!("a finalized fiber's context was switched back into")
}

// ---------------------------------------------------------------------
// Fiber lifecycle (spec.md §4.1)
// ---------------------------------------------------------------------

/// spec.md §4.1 `set_resume`: clears any prior sleep-queue membership,
/// then reinserts at `RESUME_NOW` under `policy`.
pub(crate) fn set_resume(rt: &mut Runtime, slot: Slot, policy: EnqueuePolicy) {
    rt.sleepq.remove(&mut rt.pool, slot);
    let r = rt.pool.record_mut(slot);
    r.phase = Phase::SetResume;
    r.enqueue_policy = policy;
    rt.sleepq.insert(&mut rt.pool, slot, Deadline::RESUME_NOW, policy);
}

/// Fast path used by the poller dispatch step (spec.md §4.5 step 4): the
/// fiber is known not to already be in the sleep queue (fd/path waiters
/// never are, per the single-membership invariant), so this skips
/// `set_resume`'s unconditional `sleepq.remove` lookup.
pub(crate) fn set_resume_fast(rt: &mut Runtime, slot: Slot, policy: EnqueuePolicy) {
    debug_assert!(!rt.pool.record(slot).deadline.is_defined());
    let r = rt.pool.record_mut(slot);
    r.phase = Phase::SetResume;
    r.enqueue_policy = policy;
    rt.sleepq.insert(&mut rt.pool, slot, Deadline::RESUME_NOW, policy);
}

/// spec.md §4.1 `run`: precondition phase == DORMANT.
pub(crate) fn run(rt: &mut Runtime, slot: Slot) {
    assert_eq!(
        rt.pool.record(slot).phase,
        Phase::Dormant,
        "fiber::run on a non-dormant fiber is a programming error"
    );
    let policy = rt.config.default_enqueue_policy;
    set_resume(rt, slot, policy);
}

pub(crate) fn spawn(name: &str, f: Box<dyn FnOnce()>) -> Result<FiberHandle> {
    with_runtime(|rt| {
        let handle = rt.pool.new_fiber(name, f)?;
        run(rt, handle.slot);
        Ok(handle)
    })
}

pub(crate) fn new_dormant(name: &str, f: Box<dyn FnOnce()>) -> Result<FiberHandle> {
    with_runtime(|rt| rt.pool.new_fiber(name, f))
}

/// Detaches every fiber on `waitq`, stamps `rc`, and schedules each via
/// `set_resume`, preserving FIFO order. Shared by `finalize`'s joiner
/// wake-up and every sync primitive in `fiber::sync`.
pub(crate) fn wake_all(rt: &mut Runtime, waitq: &mut WaitQueue, rc: Rc, policy: EnqueuePolicy) {
    for woken in waitq.resume_all(&mut rt.pool) {
        rt.pool.record_mut(woken).rc = rc;
        set_resume(rt, woken, policy);
    }
}

/// As [`wake_all`] but only the head of the queue; returns whether
/// anyone was woken.
pub(crate) fn wake_one(rt: &mut Runtime, waitq: &mut WaitQueue, rc: Rc, policy: EnqueuePolicy) -> bool {
    match waitq.resume_one(&mut rt.pool) {
        Some(woken) => {
            rt.pool.record_mut(woken).rc = rc;
            set_resume(rt, woken, policy);
            true
        }
        None => false,
    }
}

fn clear_poller_attachment(rt: &mut Runtime, slot: Slot, attachment: poller::Attachment) {
    match attachment {
        poller::Attachment::Fd { fd, .. } => rt.poller.clear_fd(fd, slot),
        poller::Attachment::Path { watch } => rt.poller.stat_destroy(watch),
    }
}

/// spec.md §4.1 `finalize`: clears deadline, resumes all joiners (with
/// this fiber's final rc), clears the poller attachment, recycles the
/// record.
pub(crate) fn finalize(rt: &mut Runtime, slot: Slot) {
    rt.sleepq.remove(&mut rt.pool, slot);
    if let Some(attachment) = rt.pool.record_mut(slot).poller_attachment.take() {
        clear_poller_attachment(rt, slot, attachment);
    }
    let final_rc = rt.pool.record(slot).rc;
    let mut joiners = std::mem::take(&mut rt.pool.record_mut(slot).joiners);
    wake_all(rt, &mut joiners, final_rc, EnqueuePolicy::Append);

    let r = rt.pool.record_mut(slot);
    r.finalized = true;
    r.phase = Phase::Dormant;
    rt.pool.recycle(slot);
}

/// spec.md §4.1 `pin`/`unpin`/`gc`.
pub fn pin(handle: FiberHandle) {
    with_runtime(|rt| {
        if let Some(slot) = rt.pool.resolve(handle) {
            rt.pool.pin(slot);
        }
    });
}

pub fn unpin(handle: FiberHandle) {
    with_runtime(|rt| {
        // A fiber being unpinned has, by construction, already finalized
        // (that's the whole point of pinning it), so this must tolerate
        // `finalized == true` where `pin` above does not.
        if let Some(slot) = rt.pool.resolve_any_generation(handle) {
            rt.pool.unpin(slot);
        }
    });
}

pub fn gc() {
    with_runtime(|rt| rt.pool.gc());
}

// ---------------------------------------------------------------------
// Suspension primitives (spec.md §4.1, §5)
// ---------------------------------------------------------------------

pub(crate) fn sleep_ticks(ticks: u64) -> Rc {
    with_runtime(|rt| {
        let cur = rt.current.expect("sleep called outside a fiber");
        let now = rt.clock.now();
        let deadline = if ticks == 0 {
            Deadline::RESUME_NOW
        } else {
            Deadline::at(now.saturating_add(ticks))
        };
        rt.pool.record_mut(cur).phase = Phase::Sleep;
        rt.sleepq.insert(&mut rt.pool, cur, deadline, EnqueuePolicy::Append);
    });
    suspend_current()
}

/// spec.md §4.1 `yield`: give up the CPU for one turn, remaining
/// runnable. Equivalent to `sleep(0)`.
pub(crate) fn yield_now() -> Rc {
    sleep_ticks(0)
}

/// spec.md §4.1 `giveup`: park forever; only an external `set_resume`/
/// `set_interrupt` can wake this fiber back up.
pub(crate) fn giveup() {
    with_runtime(|rt| {
        let cur = rt.current.expect("giveup called outside a fiber");
        rt.pool.record_mut(cur).phase = Phase::Sleep;
        rt.sleepq.insert(&mut rt.pool, cur, Deadline::FOREVER, EnqueuePolicy::Append);
    });
    suspend_current();
}

/// spec.md §4.1 `join`. JOIN_FAILURE covers both "no such fiber" (already
/// finalized or never existed) and self-join.
pub(crate) fn join(target: FiberHandle) -> Rc {
    let registered = with_runtime(|rt| {
        let cur = rt.current.expect("join called outside a fiber");
        let target_slot = rt.pool.resolve(target)?;
        if target_slot == cur {
            return None;
        }
        let mut joiners = std::mem::take(&mut rt.pool.record_mut(target_slot).joiners);
        joiners.append_self(&mut rt.pool, cur);
        rt.pool.record_mut(target_slot).joiners = joiners;
        rt.pool.record_mut(cur).phase = Phase::Join;
        Some(())
    });
    match registered {
        None => Rc::JoinFailure,
        Some(()) => suspend_current(),
    }
}

/// spec.md §4.1 `join` with a bound: if the target hasn't finished by
/// `timeout`, detaches from its joiners waitq and returns TIMEDOUT. Shared
/// by `set_interrupt_and_join_with_timeout` and `wait_for`.
pub(crate) fn join_with_timeout(target: FiberHandle, timeout: Duration) -> Rc {
    let setup = with_runtime(|rt| {
        let cur = rt.current.expect("join called outside a fiber");
        let target_slot = rt.pool.resolve(target)?;
        if target_slot == cur {
            return None;
        }
        let now = rt.clock.now();
        let deadline = Deadline::at(now.saturating_add(clock::duration_to_ticks(timeout)));
        let mut joiners = std::mem::take(&mut rt.pool.record_mut(target_slot).joiners);
        joiners.append_self(&mut rt.pool, cur);
        rt.pool.record_mut(target_slot).joiners = joiners;
        rt.pool.record_mut(cur).phase = Phase::Join;
        rt.sleepq.insert(&mut rt.pool, cur, deadline, EnqueuePolicy::Append);
        Some((cur, target_slot))
    });
    let Some((cur, target_slot)) = setup else {
        return Rc::JoinFailure;
    };

    let rc = suspend_current();

    with_runtime(|rt| {
        if rt.pool.record(cur).on_waitq {
            // Still attached to the target's joiners: our own timeout
            // fired first. Detach and report TIMEDOUT (spec.md §4.1
            // set_interrupt_and_join_with_timeout).
            let mut joiners = std::mem::take(&mut rt.pool.record_mut(target_slot).joiners);
            joiners.remove(&mut rt.pool, cur);
            rt.pool.record_mut(target_slot).joiners = joiners;
            rt.pool.record_mut(cur).rc = Rc::Timedout;
            Rc::Timedout
        } else {
            rc
        }
    })
}

/// Appends the calling fiber to `waitq`, sets its phase, and suspends.
/// Shared by every blocking primitive in `fiber::sync` (condvar wait,
/// signal subscribe, semaphore/rwlock acquire): each owns one `WaitQueue`
/// and calls this instead of reimplementing the append-then-suspend
/// dance. The caller is responsible for detaching `waitq`'s membership
/// again (e.g. in the wake path); `finalize`'s own interrupt handling
/// does not reach into an arbitrary sync-primitive waitq, so a fiber
/// blocked here is only reliably woken by that primitive's own
/// signal/release, not by `set_interrupt` (see `fiber::sync` module docs).
///
/// Takes a raw pointer rather than `&mut WaitQueue` deliberately: the
/// primitive's `WaitQueue` is normally reached through a `RefCell`, and a
/// `RefMut` passed in as `&mut` would stay alive for the whole call —
/// including the suspend below — leaving the `RefCell` mutably borrowed
/// while the fiber is parked. The first other fiber to touch the same
/// primitive (e.g. `signal_one`) would then hit `BorrowMutError`. Callers
/// go through `RefCell::as_ptr` instead, exactly as `with_runtime`'s own
/// switch-boundary functions bypass their reentrancy guard around a
/// switch.
///
/// # Safety
/// `waitq` must point to a live `WaitQueue` for the duration of this
/// call, and nothing else may alias it for the two brief windows where
/// it's dereferenced here (before and after the switch) — guaranteed by
/// the single-threaded cooperative model, since no other fiber runs
/// while this one is on CPU.
pub(crate) unsafe fn wait_on(waitq: *mut WaitQueue, phase: Phase) -> Rc {
    with_runtime(|rt| {
        let cur = rt.current.expect("wait_on called outside a fiber");
        (*waitq).append_self(&mut rt.pool, cur);
        rt.pool.record_mut(cur).phase = phase;
    });
    suspend_current()
}

/// As [`wait_on`], but also races a sleep-queue timeout, mirroring
/// `join_with_timeout`'s `on_waitq`-based race resolution: if the
/// fiber is still linked into `waitq` once it wakes, its own timeout
/// fired first, so it detaches itself and reports `Rc::Timedout`.
///
/// # Safety
/// Same contract as [`wait_on`].
pub(crate) unsafe fn wait_on_with_timeout(waitq: *mut WaitQueue, phase: Phase, timeout: Duration) -> Rc {
    let cur = with_runtime(|rt| {
        let cur = rt.current.expect("wait_on_with_timeout called outside a fiber");
        (*waitq).append_self(&mut rt.pool, cur);
        rt.pool.record_mut(cur).phase = phase;
        let now = rt.clock.now();
        let deadline = Deadline::at(now.saturating_add(clock::duration_to_ticks(timeout)));
        rt.sleepq.insert(&mut rt.pool, cur, deadline, EnqueuePolicy::Append);
        cur
    });
    let rc = suspend_current();
    with_runtime(|rt| {
        if rt.pool.record(cur).on_waitq {
            (*waitq).remove(&mut rt.pool, cur);
            rt.pool.record_mut(cur).rc = Rc::Timedout;
            Rc::Timedout
        } else {
            rc
        }
    })
}

/// spec.md §4.1 `set_interrupt`. A no-op on an already-finalized target
/// (testable property #5). Self-interruption is a programming error.
pub(crate) fn set_interrupt(target: FiberHandle) {
    with_runtime(|rt| {
        let cur = rt.current;
        let Some(slot) = rt.pool.resolve(target) else {
            return;
        };
        assert_ne!(Some(slot), cur, "a fiber cannot interrupt itself");
        rt.sleepq.remove(&mut rt.pool, slot);
        if let Some(attachment) = rt.pool.record_mut(slot).poller_attachment.take() {
            clear_poller_attachment(rt, slot, attachment);
        }
        rt.pool.record_mut(slot).rc = Rc::UserInterrupted;
        rt.pool.record_mut(slot).phase = Phase::SetInterrupt;
        set_resume(rt, slot, EnqueuePolicy::Append);
    });
}

pub(crate) fn set_interrupt_and_join(target: FiberHandle) -> Rc {
    set_interrupt(target);
    join(target)
}

pub(crate) fn set_interrupt_and_join_with_timeout(target: FiberHandle, timeout: Duration) -> Rc {
    set_interrupt(target);
    join_with_timeout(target, timeout)
}

/// spec.md §4.1 `wait_for`/scenario E: spawns `f` as a child fiber, waits
/// up to `timeout` for it to finish. On timeout the parent returns
/// `WAIT_TIMEOUT` and the child is interrupted (its own rc becomes
/// `TIMEDOUT`).
pub(crate) fn wait_for(name: &str, timeout: Duration, f: Box<dyn FnOnce()>) -> Result<Rc> {
    let child = spawn(name, f)?;
    let rc = join_with_timeout(child, timeout);
    if rc == Rc::Timedout {
        set_interrupt(child);
        return Ok(Rc::WaitTimeout);
    }
    Ok(rc)
}

/// spec.md §4.1 `peek`: non-yielding in spirit, but since finding out
/// "has this fiber died yet" requires giving it at least one scheduler
/// turn, `peek` is `join_with_timeout` with `msec == 0`.
pub(crate) fn peek(target: FiberHandle, timeout: Duration) -> Rc {
    join_with_timeout(target, timeout)
}

// ---------------------------------------------------------------------
// Introspection (spec.md §6)
// ---------------------------------------------------------------------

pub(crate) fn is_runnable(handle: FiberHandle) -> bool {
    with_runtime(|rt| rt.pool.resolve(handle).is_some())
}

pub(crate) fn is_dead(handle: FiberHandle) -> bool {
    !is_runnable(handle)
}

pub(crate) fn get_now_ticks() -> clock::Ticks {
    with_runtime(|rt| rt.clock.now())
}

pub(crate) fn get_now_ticks_precise() -> clock::Ticks {
    with_runtime(|rt| rt.clock.now_precise())
}

// ---------------------------------------------------------------------
// Poller-facing suspension (spec.md §4.3)
// ---------------------------------------------------------------------

pub(crate) fn wait_for_fd(fd: RawFd, interest: poller::Interest) -> Rc {
    let cur = with_runtime(|rt| rt.current.expect("wait_for_read/write/events outside a fiber"));
    let reg = with_runtime(|rt| rt.poller.register(fd, interest, cur));
    if let Err(rc) = reg {
        return rc;
    }
    with_runtime(|rt| {
        let r = rt.pool.record_mut(cur);
        r.poller_attachment = Some(poller::Attachment::Fd { fd, interest });
        r.phase = if interest == poller::Interest::READ {
            Phase::Read
        } else if interest == poller::Interest::WRITE {
            Phase::Write
        } else {
            Phase::OtherPoller
        };
    });
    suspend_current()
}

pub(crate) fn wait_for_events(fd: RawFd, mask: &mut poller::Interest) -> Rc {
    let rc = wait_for_fd(fd, poller::Interest::READ | poller::Interest::WRITE);
    *mask = with_runtime(|rt| {
        let cur = rt.current.expect("wait_for_events outside a fiber");
        std::mem::replace(&mut rt.pool.record_mut(cur).poller_delivered_mask, poller::Interest::empty())
    });
    rc
}

pub(crate) fn clear_event(slot: Slot) {
    with_runtime(|rt| {
        if let Some(attachment) = rt.pool.record_mut(slot).poller_attachment.take() {
            clear_poller_attachment(rt, slot, attachment);
        }
    });
}

pub(crate) fn stat_wait(watch: poller::PathWatch, observed: &mut poller::PathEvent) -> Rc {
    let cur = with_runtime(|rt| rt.current.expect("stat_wait called outside a fiber"));
    let bound = with_runtime(|rt| rt.poller.stat_bind(watch, cur));
    if let Err(rc) = bound {
        return rc;
    }
    with_runtime(|rt| {
        let r = rt.pool.record_mut(cur);
        r.poller_attachment = Some(poller::Attachment::Path { watch });
        r.phase = Phase::OtherPoller;
    });
    let rc = suspend_current();
    *observed = with_runtime(|rt| {
        std::mem::replace(&mut rt.pool.record_mut(cur).poller_delivered_path_event, poller::PathEvent::empty())
    });
    rc
}

// ---------------------------------------------------------------------
// Scheduler loop entry point (see scheduler.rs)
// ---------------------------------------------------------------------

/// spec.md §6 `loop()`: runs the scheduler until shutdown.
pub fn r#loop() -> Result<()> {
    crate::scheduler::run()
}
