//! The top-level scheduler loop (spec.md §4.5): interleaves timer
//! expiry, kernel polling, and fiber resumption on the single runtime
//! thread.

use crate::clock;
use crate::error::Result;
use crate::fiber::pool::Slot;
use crate::fiber::record::EnqueuePolicy;
use crate::poller::ReadyEvent;
use crate::runtime::{self, with_runtime};

/// Runs the scheduler until [`crate::runtime::shutdown`] is observed.
/// `shutdown()` sets its flag synchronously on this same thread, so
/// unlike a preemptible host there is never a blocking poll in flight
/// when it's set — the loop simply doesn't start another one (see
/// DESIGN.md).
pub(crate) fn run() -> Result<()> {
    loop {
        // Step 1: sift the sleep queue, running everything whose
        // deadline has passed, host first then bucket members in
        // insertion order (DESIGN.md open question #3).
        let runq = with_runtime(|rt| {
            rt.clock.refresh();
            let now = rt.clock.now();
            rt.sleepq.drain_expired(&mut rt.pool, now)
        });
        for slot in runq {
            resume_one(slot);
        }

        // Step 2: observe shutdown before computing a wait bound.
        if with_runtime(|rt| rt.shutdown) {
            break;
        }
        let timeout = with_runtime(|rt| {
            let now = rt.clock.now();
            match rt.sleepq.min() {
                Some(ticks) => clock::ticks_until(ticks, now).min(rt.config.poll_cap),
                None => rt.config.poll_cap,
            }
        });

        // Step 3: block on the kernel poller for at most `timeout`.
        let events = with_runtime(|rt| rt.poller.poll(timeout))?;
        with_runtime(|rt| rt.clock.refresh());

        // Step 4 & 5: dispatch readiness, discarding anything stale.
        for event in events {
            dispatch(event);
        }
    }
    Ok(())
}

fn resume_one(slot: Slot) {
    let phase = with_runtime(|rt| rt.pool.record(slot).phase);
    if !phase.is_externally_resumable() {
        log::debug!("resuming fiber in phase {phase:?}, diagnosed but still performed");
    }
    runtime::resume_fiber(slot);
}

fn dispatch(event: ReadyEvent) {
    with_runtime(|rt| {
        let phase = rt.pool.record(event.slot).phase;
        if !phase.is_poller_resumable() {
            log::debug!(
                "poller delivered readiness to fiber '{}' in phase {phase:?}, diagnosed but still delivered",
                rt.pool.record(event.slot).name()
            );
        }
        let r = rt.pool.record_mut(event.slot);
        r.rc = event.rc;
        r.poller_delivered_mask = event.mask;
        r.poller_delivered_path_event = event.path_event;
        r.poller_attachment = None;
        runtime::set_resume_fast(rt, event.slot, EnqueuePolicy::Append);
    });
}
