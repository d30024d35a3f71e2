//! Scheduler ordering guarantees (spec.md §8 properties #1, #2, scenarios
//! A, B): deadline monotonicity and FIFO-within-deadline.

use std::cell::RefCell;
use std::rc::Rc as StdRc;
use std::time::{Duration, Instant};

use weave::fiber;

/// Each test gets its own OS thread (the default `cargo test` runner),
/// and the runtime is a thread-local singleton, so tests never interfere
/// with each other. `init`/`fini` bracket every test to leave a clean
/// slate behind.
fn with_runtime(f: impl FnOnce()) {
    weave::runtime::init().unwrap();
    f();
    weave::runtime::fini();
}

#[test]
fn scenario_a_shorter_sleep_wakes_first() {
    with_runtime(|| {
        let order: StdRc<RefCell<Vec<&'static str>>> = StdRc::new(RefCell::new(Vec::new()));
        let rcs: StdRc<RefCell<Vec<fiber::Rc>>> = StdRc::new(RefCell::new(Vec::new()));

        let o1 = order.clone();
        let r1 = rcs.clone();
        fiber::spawn("s1", move || {
            let rc = fiber::sleep(Duration::from_millis(10));
            o1.borrow_mut().push("s1");
            r1.borrow_mut().push(rc);
        })
        .unwrap();

        let o2 = order.clone();
        let r2 = rcs.clone();
        fiber::spawn("s2", move || {
            let rc = fiber::sleep(Duration::from_millis(20));
            o2.borrow_mut().push("s2");
            r2.borrow_mut().push(rc);
            weave::runtime::shutdown();
        })
        .unwrap();

        weave::runtime::r#loop().unwrap();

        assert_eq!(*order.borrow(), vec!["s1", "s2"]);
        assert!(rcs.borrow().iter().all(|rc| rc.is_ok()));
    });
}

#[test]
fn scenario_b_equal_deadline_fifo_within_bucket() {
    with_runtime(|| {
        let order: StdRc<RefCell<Vec<u32>>> = StdRc::new(RefCell::new(Vec::new()));
        let start = Instant::now();

        for i in 0..10u32 {
            let o = order.clone();
            fiber::spawn(&format!("s{i}"), move || {
                fiber::sleep(Duration::from_millis(50));
                o.borrow_mut().push(i);
                if i == 9 {
                    weave::runtime::shutdown();
                }
            })
            .unwrap();
        }

        weave::runtime::r#loop().unwrap();

        assert_eq!(*order.borrow(), (0..10).collect::<Vec<_>>());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(45), "woke too early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(200), "woke too late: {elapsed:?}");
    });
}

#[test]
fn yield_now_does_not_sleep() {
    with_runtime(|| {
        let ran = StdRc::new(RefCell::new(false));
        let r = ran.clone();
        fiber::spawn("yielder", move || {
            let rc = fiber::yield_now();
            assert!(rc.is_ok());
            *r.borrow_mut() = true;
            weave::runtime::shutdown();
        })
        .unwrap();
        weave::runtime::r#loop().unwrap();
        assert!(*ran.borrow());
    });
}

#[test]
fn join_handle_collects_typed_result() {
    with_runtime(|| {
        let handle = fiber::Builder::new()
            .name("worker")
            .spawn(|| {
                fiber::sleep(Duration::from_millis(5));
                42i32
            })
            .unwrap();

        fiber::spawn("waiter", move || {
            let result = handle.join();
            assert_eq!(result, Some(42));
            weave::runtime::shutdown();
        })
        .unwrap();

        weave::runtime::r#loop().unwrap();
    });
}

#[test]
fn scenario_e_wait_for_timeout_interrupts_child() {
    with_runtime(|| {
        let parent_rc = StdRc::new(RefCell::new(None));
        let child_rc_seen = StdRc::new(RefCell::new(None));

        let p = parent_rc.clone();
        let c = child_rc_seen.clone();
        fiber::spawn("parent", move || {
            let rc = fiber::wait_for("child", Duration::from_millis(100), move || {
                let rc = fiber::sleep(Duration::from_millis(300));
                c.borrow_mut().replace(rc);
            })
            .unwrap();
            p.borrow_mut().replace(rc);
            // Give the interrupted child a turn to record its own rc
            // before we shut the loop down.
            fiber::sleep(Duration::from_millis(5));
            weave::runtime::shutdown();
        })
        .unwrap();

        weave::runtime::r#loop().unwrap();

        assert_eq!(*parent_rc.borrow(), Some(fiber::Rc::WaitTimeout));
        assert_eq!(*child_rc_seen.borrow(), Some(fiber::Rc::Timedout));
    });
}
