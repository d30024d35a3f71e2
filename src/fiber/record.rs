//! The fiber record: lifecycle phase, result code, deadline and the
//! assorted intrusive links the sleep queue / wait queues thread through
//! it. See spec.md §3 for the data model this mirrors field-for-field.

use std::os::raw::c_void;

use super::context::{Context, Stack};
use super::pool::Slot;

/// Lifecycle phase of a fiber record (spec.md §3).
///
/// The subset documented as "externally resumable" (spec.md GLOSSARY) is
/// exposed via [`Phase::is_externally_resumable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Dormant,
    Resumed,
    Read,
    Write,
    OtherPoller,
    Sleep,
    SetResume,
    SetInterrupt,
    SignalSubscribe,
    Join,
    JoinInterrupted,
    Condwait,
    Waitfor,
    Peek,
}

impl Phase {
    /// The phases in which `set_resume`/`set_interrupt` originating
    /// *outside* the poller are valid (spec.md GLOSSARY).
    pub fn is_externally_resumable(self) -> bool {
        matches!(
            self,
            Phase::Sleep
                | Phase::SetResume
                | Phase::SetInterrupt
                | Phase::SignalSubscribe
                | Phase::Join
                | Phase::JoinInterrupted
                | Phase::Condwait
                | Phase::Waitfor
                | Phase::Peek
        )
    }

    /// Phases a poller readiness event may validly target.
    pub fn is_poller_resumable(self) -> bool {
        matches!(self, Phase::Read | Phase::Write | Phase::OtherPoller)
    }
}

/// Result code sentinels (spec.md §3, §6).
///
/// User fibers may stash a non-negative value via [`crate::fiber::set_retval`];
/// that value rides along as `Rc::User` rather than overloading one of the
/// coordination sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rc {
    Ok,
    Exited,
    UserInterrupted,
    Timedout,
    Simultaneous,
    Poller,
    JoinFailure,
    /// `wait_for`'s own timeout sentinel, distinct from [`Rc::Timedout`]
    /// (which marks the *interrupted child's* rc in the same scenario).
    WaitTimeout,
    TryAcquireFail,
    User(i32),
}

impl Default for Rc {
    fn default() -> Self {
        Rc::Ok
    }
}

impl Rc {
    pub fn is_ok(self) -> bool {
        matches!(self, Rc::Ok | Rc::User(_))
    }
}

/// Tie-break policy within a sleep-queue bucket (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueuePolicy {
    /// FIFO within a deadline. Default; used by sleep, waitfor, and
    /// ordinary `set_resume`.
    Append,
    /// LIFO within a deadline. Used by `set_prio(true)` and the
    /// signal/condvar wake paths.
    Prepend,
}

impl Default for EnqueuePolicy {
    fn default() -> Self {
        EnqueuePolicy::Append
    }
}

/// Absolute deadline, with the three sentinels from spec.md §3/§5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(u64);

impl Deadline {
    /// Not a member of the sleep queue.
    pub const UNDEFINED: Deadline = Deadline(u64::MAX);
    /// "Never expires" — used by `giveup`/`sleep(FOREVER)` to park a
    /// fiber in the sleep queue without a real wakeup.
    pub const FOREVER: Deadline = Deadline(u64::MAX - 1);
    /// "Schedule on the next turn", per spec.md §5 ("deadline==1 in the
    /// tick domain").
    pub const RESUME_NOW: Deadline = Deadline(1);

    pub fn at(ticks: u64) -> Self {
        debug_assert!(
            ticks < Self::FOREVER.0,
            "deadline tick value collides with a sentinel"
        );
        Deadline(ticks)
    }

    pub fn is_defined(self) -> bool {
        self != Self::UNDEFINED
    }

    pub fn ticks(self) -> u64 {
        self.0
    }
}

/// One slot in the fiber arena.
///
/// Most fields are only meaningful while the fiber is alive; on
/// finalization (`finalize`, see `pool.rs`) they're reset to their dormant
/// defaults before the record is pushed onto the free list.
pub struct FiberRecord {
    // -- identity -------------------------------------------------------
    /// Monotonically increasing, never reused while the record refers to
    /// a live fiber. Reverts to `u64::MAX` ("-1") on recycle.
    pub id: u64,
    pub name: [u8; 8],
    pub name_len: u8,
    /// Bumped every time this arena slot is recycled; part of the
    /// generational handle that guards against stale references.
    pub generation: u32,

    // -- execution state --------------------------------------------------
    pub context: Context,
    pub stack: Option<Stack>,
    entry: Option<Box<dyn FnOnce()>>,

    // -- lifecycle --------------------------------------------------------
    pub phase: Phase,
    pub rc: Rc,
    pub retval: i32,

    // -- sleep queue membership -------------------------------------------
    pub deadline: Deadline,
    pub enqueue_policy: EnqueuePolicy,
    /// Whether this record is the bucket host for `deadline` in the sleep
    /// queue's ordered map (only meaningful while `deadline.is_defined()`).
    pub sleepq_is_host: bool,
    pub sleepq_prev: Option<Slot>,
    pub sleepq_next: Option<Slot>,
    /// Only meaningful on the host: the last member of the bucket chain,
    /// for O(1) FIFO append.
    pub sleepq_tail: Option<Slot>,

    // -- wait queue membership ---------------------------------------------
    /// The waitq this fiber is currently parked on (join target's waitq,
    /// a condvar's waitq, ...), if any.
    pub waitq_prev: Option<Slot>,
    pub waitq_next: Option<Slot>,
    pub on_waitq: bool,
    /// Fibers joined on *this* fiber.
    pub joiners: super::waitq::WaitQueue,

    // -- poller attachment --------------------------------------------------
    pub poller_attachment: Option<super::super::poller::Attachment>,
    /// Last mask/path-event delivered by the poller, consumed (and reset
    /// to empty) by `wait_for_events`/`stat_wait` once the fiber wakes.
    pub poller_delivered_mask: super::super::poller::Interest,
    pub poller_delivered_path_event: super::super::poller::PathEvent,

    // -- pin -------------------------------------------------------------
    pub abac: u32,
    /// Set once the entry function has returned or the record has been
    /// finalized for any other reason; a cleared entry is never resumed
    /// nor delivered events (spec.md §3 invariant).
    pub finalized: bool,

    // -- test tooling ---------------------------------------------------------
    pub csw: u64,

    /// Generic per-fiber user-data slot (spec.md §6 `set_cld`/`get_cld`).
    pub cld: Option<Box<dyn std::any::Any>>,
}

impl FiberRecord {
    pub fn new_dormant() -> Self {
        FiberRecord {
            id: u64::MAX,
            name: [0; 8],
            name_len: 0,
            generation: 0,
            context: Context::empty(),
            stack: None,
            entry: None,
            phase: Phase::Dormant,
            rc: Rc::Ok,
            retval: 0,
            deadline: Deadline::UNDEFINED,
            enqueue_policy: EnqueuePolicy::Append,
            sleepq_is_host: false,
            sleepq_prev: None,
            sleepq_next: None,
            sleepq_tail: None,
            waitq_prev: None,
            waitq_next: None,
            on_waitq: false,
            joiners: super::waitq::WaitQueue::new(),
            poller_attachment: None,
            poller_delivered_mask: super::super::poller::Interest::empty(),
            poller_delivered_path_event: super::super::poller::PathEvent::empty(),
            abac: 0,
            finalized: true,
            csw: 0,
            cld: None,
        }
    }

    pub fn set_name(&mut self, name: &str) {
        let bytes = name.as_bytes();
        let len = bytes.len().min(self.name.len());
        self.name[..len].copy_from_slice(&bytes[..len]);
        for b in &mut self.name[len..] {
            *b = 0;
        }
        self.name_len = len as u8;
    }

    pub fn name(&self) -> &str {
        std::str::from_utf8(&self.name[..self.name_len as usize]).unwrap_or("?")
    }

    pub fn take_entry(&mut self) -> Option<Box<dyn FnOnce()>> {
        self.entry.take()
    }

    pub fn set_entry(&mut self, f: Box<dyn FnOnce()>) {
        self.entry = Some(f);
    }

    pub fn has_entry(&self) -> bool {
        self.entry.is_some()
    }
}

/// The function every fresh stack's context is initialized to call: pulls
/// the closure back out of the record (passed through as a raw pointer,
/// see `pool.rs::Pool::new_fiber`) and runs it, then tells the scheduler
/// this fiber is done.
///
/// # Safety
/// `arg` must be a `*mut Slot` boxed and leaked by the pool when this
/// fiber was created.
pub(super) unsafe extern "C" fn fiber_trampoline(arg: *mut c_void) -> ! {
    let slot = *Box::from_raw(arg as *mut Slot);
    super::pool::run_current_and_finalize(slot);
    unreachable!("fiber entry returned control instead of switching to the scheduler");
}
