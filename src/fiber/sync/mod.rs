//! Synchronization primitives built on top of the fiber scheduler
//! (spec.md §4.4): a one-owner wakeup ticket, a condition variable, two
//! flavors of counting semaphore, a reader/writer lock, and a
//! producer/consumer generator. Every one of them is ultimately just a
//! [`WaitQueue`](super::waitq::WaitQueue) (or, for [`Signal`], a single
//! owner slot) plus [`crate::runtime::wait_on`]/`wake_one`/`wake_all` —
//! mirroring the shape of a `fiber::Mutex`/`Latch`/`Cond` split,
//! generalized to the handful of primitives spec.md calls for.
//!
//! **Interrupt caveat.** [`crate::fiber::interrupt`] only reliably wakes a
//! fiber blocked in a sleep-queue-backed phase (SLEEP, JOIN, WAITFOR,
//! PEEK, ...). A fiber blocked inside one of these primitives is linked
//! into that primitive's own private wait queue, which `set_interrupt`
//! has no reference to and therefore cannot unlink from — interrupting a
//! fiber mid-`wait`/`acquire` is unsupported here, same as upstream
//! fiber-based condition variables generally leave it unspecified.

mod condvar;
mod generator;
mod inverted_semaphore;
mod rwlock;
mod semaphore;
mod signal;

pub use condvar::Condvar;
pub use generator::Generator;
pub use inverted_semaphore::InvertedSemaphore;
pub use rwlock::{ReadGuard, RwLock, WriteGuard};
pub use semaphore::Semaphore;
pub use signal::Signal;
