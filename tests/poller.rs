//! Readiness-driven fd waits (spec.md §4.3, §8 property #3, scenario C).

use std::cell::RefCell;
use std::io::{Read, Write};
use std::os::unix::io::{FromRawFd, RawFd};
use std::rc::Rc as StdRc;
use std::time::Duration;

use weave::fiber;
use weave::poller;

fn pipe() -> (RawFd, RawFd) {
    let mut fds = [0 as RawFd; 2];
    // SAFETY: `fds` is a valid 2-element out-array for pipe(2).
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(rc, 0, "pipe(2) failed: {}", std::io::Error::last_os_error());
    (fds[0], fds[1])
}

fn set_nonblocking(fd: RawFd) {
    // SAFETY: fd is a valid, open descriptor for the duration of this call.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
    }
}

#[test]
fn scenario_c_reader_wakes_on_writer_activity() {
    weave::runtime::init().unwrap();
    let (readfd, writefd) = pipe();
    set_nonblocking(readfd);
    set_nonblocking(writefd);

    let byte_read = StdRc::new(RefCell::new(None));
    let br = byte_read.clone();
    fiber::spawn("reader", move || {
        let rc = poller::wait_for_read(readfd);
        assert!(rc.is_ok());
        let mut file = unsafe { std::fs::File::from_raw_fd(readfd) };
        let mut buf = [0u8; 1];
        let n = file.read(&mut buf).unwrap();
        std::mem::forget(file); // fd ownership stays with the test
        *br.borrow_mut() = Some((n, buf[0]));
        weave::runtime::shutdown();
    })
    .unwrap();

    fiber::spawn("writer", move || {
        fiber::sleep(Duration::from_millis(30));
        let mut file = unsafe { std::fs::File::from_raw_fd(writefd) };
        file.write_all(&[7u8]).unwrap();
        std::mem::forget(file);
    })
    .unwrap();

    weave::runtime::r#loop().unwrap();

    assert_eq!(*byte_read.borrow(), Some((1, 7)));

    // SAFETY: both ends were `mem::forget`-ten above specifically so the
    // test, not a `File` drop racing the fiber closures, owns the close.
    unsafe {
        libc::close(readfd);
        libc::close(writefd);
    }
    weave::runtime::fini();
}

#[test]
fn property_3_simultaneous_wait_on_same_fd_side_is_rejected() {
    weave::runtime::init().unwrap();
    let (readfd, writefd) = pipe();
    set_nonblocking(readfd);
    set_nonblocking(writefd);

    let second_rc = StdRc::new(RefCell::new(None));
    let r2 = second_rc.clone();
    fiber::spawn("first-reader", move || {
        poller::wait_for_read(readfd);
    })
    .unwrap();

    fiber::spawn("second-reader", move || {
        // Give the first reader a turn to register before we collide.
        fiber::yield_now();
        let rc = poller::wait_for_read(readfd);
        *r2.borrow_mut() = Some(rc);
        weave::runtime::shutdown();
    })
    .unwrap();

    weave::runtime::r#loop().unwrap();

    assert_eq!(*second_rc.borrow(), Some(fiber::Rc::Simultaneous));

    unsafe {
        libc::close(readfd);
        libc::close(writefd);
    }
    weave::runtime::fini();
}
