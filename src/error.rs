//! Error handling utils.
//!
//! Most of the coordination failures described in spec.md §7 (timeouts,
//! interrupts, simultaneous waiters, join failures) are not represented as
//! `Err` values here — they are surfaced as the `rc` of the suspension
//! primitive that observed them (see [`crate::fiber::Rc`]), exactly as
//! spec.md §7 prescribes. This module covers the other two error
//! families: resource errors (stack/context allocation) reported to the
//! caller of a constructor, and kernel poller errors reported to the
//! caller of [`crate::runtime::loop`](crate::runtime).

use std::io;

/// A specialized [`Result`] type for the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents the recoverable error cases of the crate.
///
/// Invariant violations (double free of a fiber record, self-interrupt,
/// resuming a non-dormant context) are *not* part of this enum: per
/// spec.md §7 they are programming errors and abort with a diagnostic
/// rather than unwinding through a `Result`.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Failed to `mmap` or `mprotect` a fiber's stack.
    #[error("failed to allocate fiber stack: {0}")]
    StackAlloc(#[source] io::Error),

    /// Failed to capture the initial machine context for a new fiber.
    #[error("failed to initialize fiber context")]
    ContextInit,

    /// The kernel poller reported an error outside of `EINTR` (which is
    /// retried transparently and never reaches this variant).
    #[error("poller error: {0}")]
    Poller(#[source] io::Error),

    /// Runtime API misuse that genuinely needs to propagate as a value
    /// instead of aborting, used by the few entry points that are public
    /// API rather than internal scheduler bookkeeping (e.g. registering
    /// the same path-watch twice with incompatible masks).
    #[error("invalid poller registration: {0}")]
    InvalidRegistration(String),

    /// Any other I/O error bubbled up from a wrapped file descriptor.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
