//! Synchronization primitives (spec.md §4.4, §8 property #8, scenario F).

use std::cell::RefCell;
use std::rc::Rc as StdRc;
use std::time::Duration;

use weave::fiber;
use weave::fiber::sync::{Condvar, Generator, InvertedSemaphore, RwLock, Semaphore, Signal};

fn with_runtime(f: impl FnOnce()) {
    weave::runtime::init().unwrap();
    f();
    weave::runtime::fini();
}

#[test]
fn signal_send_before_subscribe_is_lost() {
    // spec.md §8 property #8: a send strictly before the matching
    // subscribe does nothing observable.
    with_runtime(|| {
        let signal = StdRc::new(Signal::new());
        signal.send(); // no subscriber yet; must be a no-op

        let woke = StdRc::new(RefCell::new(false));
        let s = signal.clone();
        let w = woke.clone();
        fiber::spawn("waiter", move || {
            let rc = s.subscribe_with_timeout(Duration::from_millis(20));
            *w.borrow_mut() = rc == fiber::Rc::Timedout;
            weave::runtime::shutdown();
        })
        .unwrap();

        weave::runtime::r#loop().unwrap();
        assert!(*woke.borrow(), "a stale send must not satisfy a later subscribe");
    });
}

#[test]
fn signal_send_while_subscribed_wakes_exactly_one() {
    with_runtime(|| {
        let signal = StdRc::new(Signal::new());
        let woke = StdRc::new(RefCell::new(false));

        let s = signal.clone();
        let w = woke.clone();
        fiber::spawn("waiter", move || {
            let rc = s.subscribe();
            *w.borrow_mut() = rc.is_ok();
        })
        .unwrap();

        let s2 = signal.clone();
        fiber::spawn("sender", move || {
            fiber::sleep(Duration::from_millis(5));
            s2.send();
            weave::runtime::shutdown();
        })
        .unwrap();

        weave::runtime::r#loop().unwrap();
        assert!(*woke.borrow());
    });
}

#[test]
fn condvar_signal_one_wakes_a_single_waiter() {
    with_runtime(|| {
        let cond = StdRc::new(Condvar::new());
        let woke_count = StdRc::new(RefCell::new(0u32));

        for _ in 0..3 {
            let c = cond.clone();
            let w = woke_count.clone();
            fiber::spawn("waiter", move || {
                let rc = c.wait();
                if rc.is_ok() {
                    *w.borrow_mut() += 1;
                }
            })
            .unwrap();
        }

        let c = cond.clone();
        fiber::spawn("signaler", move || {
            fiber::yield_now();
            c.signal_one();
            fiber::sleep(Duration::from_millis(5));
            weave::runtime::shutdown();
        })
        .unwrap();

        weave::runtime::r#loop().unwrap();
        assert_eq!(*woke_count.borrow(), 1);
    });
}

#[test]
fn scenario_f_semaphore_admits_capacity_then_queues() {
    with_runtime(|| {
        let sema = StdRc::new(Semaphore::new(3));
        let concurrent = StdRc::new(RefCell::new(0i32));
        let max_concurrent = StdRc::new(RefCell::new(0i32));
        let finished = StdRc::new(RefCell::new(0u32));

        for i in 0..5u32 {
            let s = sema.clone();
            let c = concurrent.clone();
            let m = max_concurrent.clone();
            let f = finished.clone();
            fiber::spawn(&format!("worker{i}"), move || {
                let rc = s.acquire();
                assert!(rc.is_ok());
                *c.borrow_mut() += 1;
                let now = *c.borrow();
                if now > *m.borrow() {
                    *m.borrow_mut() = now;
                }
                fiber::sleep(Duration::from_millis(20));
                *c.borrow_mut() -= 1;
                s.release();
                *f.borrow_mut() += 1;
                if *f.borrow() == 5 {
                    weave::runtime::shutdown();
                }
            })
            .unwrap();
        }

        weave::runtime::r#loop().unwrap();

        assert_eq!(*finished.borrow(), 5);
        assert!(*max_concurrent.borrow() <= 3);
        assert_eq!(sema.count(), 3);
    });
}

#[test]
fn semaphore_try_acquire_fails_without_blocking() {
    with_runtime(|| {
        let sema = Semaphore::new(1);
        assert_eq!(sema.try_acquire(), fiber::Rc::Ok);
        assert_eq!(sema.try_acquire(), fiber::Rc::TryAcquireFail);
        sema.release();
        assert_eq!(sema.try_acquire(), fiber::Rc::Ok);
    });
}

#[test]
fn inverted_semaphore_drains_once_all_acquire() {
    with_runtime(|| {
        let barrier = StdRc::new(InvertedSemaphore::new(3));
        let waiter_done = StdRc::new(RefCell::new(false));

        let b = barrier.clone();
        let wd = waiter_done.clone();
        fiber::spawn("waiter", move || {
            let rc = b.wait();
            *wd.borrow_mut() = rc.is_ok();
            weave::runtime::shutdown();
        })
        .unwrap();

        for _ in 0..3 {
            let b = barrier.clone();
            fiber::spawn("arriver", move || {
                fiber::yield_now();
                b.acquire();
            })
            .unwrap();
        }

        weave::runtime::r#loop().unwrap();
        assert!(*waiter_done.borrow());
    });
}

#[test]
fn rwlock_allows_concurrent_readers_excludes_writer() {
    with_runtime(|| {
        let lock = StdRc::new(RwLock::new(0i32));
        let reader_overlap = StdRc::new(RefCell::new(false));
        let active_readers = StdRc::new(RefCell::new(0i32));

        for _ in 0..2 {
            let l = lock.clone();
            let ov = reader_overlap.clone();
            let ar = active_readers.clone();
            fiber::spawn("reader", move || {
                let guard = l.read();
                *ar.borrow_mut() += 1;
                if *ar.borrow() > 1 {
                    *ov.borrow_mut() = true;
                }
                fiber::sleep(Duration::from_millis(10));
                drop(guard);
                *ar.borrow_mut() -= 1;
            })
            .unwrap();
        }

        let l = lock.clone();
        fiber::spawn("writer", move || {
            fiber::sleep(Duration::from_millis(2));
            let mut guard = l.write();
            *guard = 99;
            weave::runtime::shutdown();
        })
        .unwrap();

        weave::runtime::r#loop().unwrap();

        assert!(*reader_overlap.borrow(), "both readers should have overlapped");
        assert_eq!(*lock.read(), 99);
    });
}

#[test]
fn rwlock_try_write_fails_while_held() {
    with_runtime(|| {
        let lock = RwLock::new(());
        let _guard = lock.read();
        assert!(lock.try_write().is_err());
    });
}

#[test]
fn generator_hands_off_values_in_order() {
    with_runtime(|| {
        let gen: StdRc<Generator<i32>> = StdRc::new(Generator::new());
        let received = StdRc::new(RefCell::new(Vec::new()));

        let g = gen.clone();
        fiber::spawn("producer", move || {
            for i in 0..3 {
                g.r#yield(i);
            }
        })
        .unwrap();

        let g = gen.clone();
        let r = received.clone();
        fiber::spawn("consumer", move || {
            for _ in 0..3 {
                if let Some(v) = g.next() {
                    r.borrow_mut().push(v);
                }
            }
            weave::runtime::shutdown();
        })
        .unwrap();

        weave::runtime::r#loop().unwrap();
        assert_eq!(*received.borrow(), vec![0, 1, 2]);
    });
}

#[test]
fn check_yield_detects_intervening_switches() {
    with_runtime(|| {
        let saw_switch = StdRc::new(RefCell::new(false));
        let s = saw_switch.clone();
        fiber::spawn("a", move || {
            assert!(!fiber::check_yield());
            fiber::yield_now();
            *s.borrow_mut() = fiber::check_yield();
        })
        .unwrap();
        fiber::spawn("b", move || {
            fiber::yield_now();
            weave::runtime::shutdown();
        })
        .unwrap();
        weave::runtime::r#loop().unwrap();
        assert!(*saw_switch.borrow());
    });
}
