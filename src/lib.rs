//! `weave` is a single-threaded, cooperative fiber runtime.
//!
//! A single OS thread runs a [`scheduler`] that multiplexes many lightweight
//! [`fiber`]s: a fiber has its own stack and yields control back to the
//! scheduler at well-defined suspension points (sleeping, waiting on I/O,
//! waiting on another fiber, waiting on a synchronization primitive).
//! The scheduler resumes a fiber when its deadline elapses in the
//! [sleep queue](fiber::sleepq) or when the [poller](poller) reports
//! readiness on a file descriptor or path it is watching.
//!
//! - [Fibers](fiber): spawn, sleep, yield, join, interrupt, wait-for.
//! - [Poller](poller): readiness-driven fd and path waits.
//! - [Synchronization primitives](fiber::sync): signal, condition
//!   variable, semaphore, inverted semaphore, rwlock, generator.
//! - [Clock](clock): monotonic time source shared by the sleep queue and
//!   the poller's blocking timeout.
//! - [Error handling](error).
//!
//! ### Scope
//!
//! This crate is a cooperative, single-core scheduler. It does not do
//! preemption, work stealing, or multi-core parallelism, and it does not
//! expose a general `Future`/`async fn` executor with pluggable reactors —
//! see `SPEC_FULL.md` in the repository root for the full rationale.
//!
//! ### Getting started
//!
//! ```no_run
//! use std::time::Duration;
//! use weave::fiber;
//!
//! weave::runtime::init();
//! fiber::spawn("greeter", || {
//!     fiber::sleep(Duration::from_millis(10));
//!     println!("hello from a fiber");
//! });
//! weave::runtime::shutdown();
//! weave::runtime::r#loop().unwrap();
//! ```

pub mod clock;
pub mod error;
pub mod fiber;
pub mod poller;
pub mod runtime;
mod scheduler;

pub use error::{Error, Result};
pub use fiber::{giveup, interrupt, join, me, sleep, spawn, yield_now};
