//! Runtime-level time surface (spec.md §6 `get_now_ticks[_precise]`).
//! The pure conversion helpers (`msec2ticks`/`ticks2sec`/round-trip
//! property #7) have their own unit tests in `src/clock.rs`.

use weave::fiber;

#[test]
fn get_now_ticks_is_monotonic_within_a_fiber() {
    weave::runtime::init().unwrap();

    fiber::spawn("clock-watcher", || {
        let a = fiber::get_now_ticks_precise();
        let b = fiber::get_now_ticks_precise();
        assert!(b >= a);

        // The cheap, non-precise reading reflects the same snapshot
        // until the scheduler loop refreshes it on the next turn.
        let snap = fiber::get_now_ticks();
        assert!(snap >= b);

        weave::runtime::shutdown();
    })
    .unwrap();

    weave::runtime::r#loop().unwrap();
    weave::runtime::fini();
}
