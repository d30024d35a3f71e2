//! Monotonic time source.
//!
//! The clock has two views, per spec.md §3: `ticks` (the unit the sleep
//! queue is keyed on internally) and `nsec` (nanoseconds since an
//! unspecified epoch, exposed for display/debugging). This implementation
//! picks `ticks == nsec`: a tick is a nanosecond, taken from
//! `CLOCK_MONOTONIC`. That keeps `msec2ticks`/`ticks2sec` exact integer
//! arithmetic instead of needing a precomputed counter frequency, at the
//! cost of the (much less portable) alternative of driving ticks off a raw
//! CPU counter. The scheduler loop calls [`Clock::refresh`] once per turn;
//! [`Clock::now`] returns that snapshot and [`Clock::now_precise`] forces
//! a fresh read.

use std::time::Duration;

/// An absolute point on the monotonic tick axis. See spec.md §3's
/// `Deadline`, whose special values are layered on top of this type in
/// [`crate::fiber::record::Deadline`].
pub type Ticks = u64;

fn clock_gettime_ns(clock_id: libc::clockid_t) -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid out-pointer for clock_gettime; CLOCK_MONOTONIC
    // is supported on every Linux kernel this crate targets.
    let rc = unsafe { libc::clock_gettime(clock_id, &mut ts) };
    debug_assert_eq!(rc, 0, "clock_gettime failed: {}", io_last_error());
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

fn io_last_error() -> std::io::Error {
    std::io::Error::last_os_error()
}

/// Monotonic clock snapshot, refreshed once per scheduler turn.
#[derive(Debug)]
pub struct Clock {
    /// nanoseconds since CLOCK_MONOTONIC's unspecified epoch, as of the
    /// last [`refresh`](Clock::refresh)/[`now_precise`](Clock::now_precise).
    last_ns: Ticks,
}

impl Clock {
    pub fn new() -> Self {
        Clock {
            last_ns: clock_gettime_ns(libc::CLOCK_MONOTONIC),
        }
    }

    /// The last snapshot taken. Does not touch the kernel.
    #[inline(always)]
    pub fn now(&self) -> Ticks {
        self.last_ns
    }

    /// Forces a fresh read of `CLOCK_MONOTONIC` and returns it.
    #[inline]
    pub fn now_precise(&mut self) -> Ticks {
        self.last_ns = clock_gettime_ns(libc::CLOCK_MONOTONIC);
        self.last_ns
    }

    /// Refreshes the snapshot. Called once per scheduler turn
    /// (spec.md §4.5 step 1 and step 3).
    #[inline]
    pub fn refresh(&mut self) {
        self.last_ns = clock_gettime_ns(libc::CLOCK_MONOTONIC);
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts a millisecond duration to ticks.
#[inline(always)]
pub fn msec2ticks(msec: u64) -> Ticks {
    msec.saturating_mul(1_000_000)
}

/// Converts a microsecond duration to ticks.
#[inline(always)]
pub fn usec2ticks(usec: u64) -> Ticks {
    usec.saturating_mul(1_000)
}

/// Converts a tick count to seconds.
#[inline(always)]
pub fn ticks2sec(ticks: Ticks) -> f64 {
    ticks as f64 / 1_000_000_000.0
}

/// Converts the (possibly negative, hence the signed inputs) difference
/// between two tick values to seconds.
#[inline(always)]
pub fn ticksdiff2sec(a: Ticks, b: Ticks) -> f64 {
    (a as i128 - b as i128) as f64 / 1_000_000_000.0
}

/// Converts an arbitrary [`Duration`] to ticks, saturating at `u64::MAX`
/// instead of panicking on overflow — a pathologically large timeout is
/// just an unreachable deadline, not an error.
#[inline]
pub fn duration_to_ticks(d: Duration) -> Ticks {
    d.as_nanos().min(u128::from(u64::MAX)) as u64
}

/// Converts a tick count to a [`Duration`], saturating at zero for ticks
/// that have already elapsed relative to `now`.
#[inline]
pub fn ticks_until(deadline: Ticks, now: Ticks) -> Duration {
    if deadline <= now {
        Duration::ZERO
    } else {
        Duration::from_nanos(deadline - now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_monotonic() {
        let mut clock = Clock::new();
        let a = clock.now_precise();
        let b = clock.now_precise();
        assert!(b >= a);
    }

    #[test]
    fn round_trip_time_conversions() {
        // Testable property #7: ticks2sec(msec2ticks(m)) * 1000 ~= m
        for m in [0u64, 1, 17, 1000, 1_000_000, 999_999_999] {
            let ticks = msec2ticks(m);
            let back = ticks2sec(ticks) * 1000.0;
            assert!((back - m as f64).abs() <= 1.0, "m={m} back={back}");
        }
    }

    #[test]
    fn ticks_until_saturates() {
        assert_eq!(ticks_until(5, 10), Duration::ZERO);
        assert_eq!(ticks_until(15, 10), Duration::from_nanos(5));
    }
}
