//! Readiness-driven poller (spec.md §4.3).
//!
//! One `epoll` instance backs every fd-based wait in the runtime,
//! level-triggered. The registry is keyed by `(fd, side)` — `side` being
//! read or write — which is exactly spec.md §4.3's `(fd, event_mask)`
//! interest key collapsed into two independent slots per fd; a combined
//! wait (`crate::fiber::wait_for_events`) occupies both slots under the
//! same fiber. A second fiber trying to occupy an already-held slot gets
//! `SIMULTANEOUS` synchronously, with no side effects, per spec.md
//! testable property #3.
//!
//! Path-based waits are a separate registry on top of `inotify`; see
//! [`stat`].

use std::collections::HashMap;
use std::os::unix::io::RawFd;

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::fiber::pool::Slot;
use crate::fiber::record::Rc;

pub mod stat;
pub use stat::{PathEvent, PathWatch};

bitflags! {
    /// Which side(s) of an fd a fiber is waiting on.
    pub struct Interest: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
    }
}

/// What a fiber's [`crate::fiber::record::FiberRecord::poller_attachment`]
/// currently points at, so `clear_event` can unregister it without the
/// caller having to remember the details.
pub enum Attachment {
    Fd { fd: RawFd, interest: Interest },
    Path { watch: PathWatch },
}

#[derive(Default)]
struct FdState {
    read: Option<Slot>,
    write: Option<Slot>,
    armed: Interest,
}

impl FdState {
    fn wanted_mask(&self) -> Interest {
        let mut m = Interest::empty();
        if self.read.is_some() {
            m |= Interest::READ;
        }
        if self.write.is_some() {
            m |= Interest::WRITE;
        }
        m
    }

    fn is_empty(&self) -> bool {
        self.read.is_none() && self.write.is_none()
    }
}

/// One fiber's readiness result, ready to be applied by the scheduler
/// loop (spec.md §4.5 step 4): which fiber, what rc, and (for a combined
/// wait) which side(s) fired.
pub struct ReadyEvent {
    pub slot: Slot,
    pub rc: Rc,
    pub mask: Interest,
    pub path_event: PathEvent,
}

pub struct Poller {
    epoll_fd: RawFd,
    fds: HashMap<RawFd, FdState>,
    stat: stat::StatBackend,
}

impl Poller {
    pub fn new() -> Result<Self> {
        // SAFETY: epoll_create1 with a valid flags value always either
        // succeeds or returns -1/errno; we check for -1.
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(Error::Poller(std::io::Error::last_os_error()));
        }
        Ok(Poller {
            epoll_fd,
            fds: HashMap::new(),
            stat: stat::StatBackend::new(epoll_fd),
        })
    }

    fn arm(&mut self, fd: RawFd, mask: Interest, is_new: bool) -> Result<()> {
        let mut ev = libc::epoll_event {
            events: interest_to_epoll_bits(mask),
            u64: fd as u64,
        };
        let op = if is_new {
            libc::EPOLL_CTL_ADD
        } else {
            libc::EPOLL_CTL_MOD
        };
        // SAFETY: `ev` is a valid, fully initialized epoll_event.
        let rc = unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, &mut ev) };
        if rc != 0 {
            return Err(Error::Poller(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    fn disarm(&mut self, fd: RawFd) {
        // SAFETY: passing a null event pointer is valid for EPOLL_CTL_DEL
        // on modern Linux; older kernels merely ignore it.
        unsafe {
            libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut());
        }
    }

    /// Registers `slot` for `interest` on `fd`. Returns `Ok(())` on a
    /// clean (re)registration, or `Rc::Simultaneous` if any requested
    /// side is already held by a *different* fiber — with no side
    /// effects in that case (testable property #3).
    pub fn register(&mut self, fd: RawFd, interest: Interest, slot: Slot) -> std::result::Result<(), Rc> {
        let state = self.fds.entry(fd).or_default();
        if interest.contains(Interest::READ) {
            if let Some(existing) = state.read {
                if existing != slot {
                    return Err(Rc::Simultaneous);
                }
            }
        }
        if interest.contains(Interest::WRITE) {
            if let Some(existing) = state.write {
                if existing != slot {
                    return Err(Rc::Simultaneous);
                }
            }
        }

        let was_empty = state.is_empty();
        if interest.contains(Interest::READ) {
            state.read = Some(slot);
        }
        if interest.contains(Interest::WRITE) {
            state.write = Some(slot);
        }
        let new_mask = state.wanted_mask();
        let armed_before = state.armed;
        state.armed = new_mask;

        if new_mask != armed_before {
            if self.arm(fd, new_mask, was_empty).is_err() {
                // roll back bookkeeping; the fd-level error is surfaced to
                // the scheduler loop via the next poll() call instead.
                log::warn!("failed to arm epoll interest for fd {fd}");
            }
        }
        Ok(())
    }

    /// Unregisters whichever side(s) of `fd` belong to `slot`. Idempotent.
    pub fn clear_fd(&mut self, fd: RawFd, slot: Slot) {
        let Some(state) = self.fds.get_mut(&fd) else {
            return;
        };
        if state.read == Some(slot) {
            state.read = None;
        }
        if state.write == Some(slot) {
            state.write = None;
        }
        if state.is_empty() {
            self.disarm(fd);
            self.fds.remove(&fd);
        } else {
            let new_mask = state.wanted_mask();
            if new_mask != state.armed {
                state.armed = new_mask;
                let _ = self.arm(fd, new_mask, false);
            }
        }
    }

    /// Blocks for at most `timeout`, returning the readiness events
    /// observed (fd-based and path-based, merged). `EINTR` is retried
    /// transparently (spec.md §7); other errors propagate.
    pub fn poll(&mut self, timeout: std::time::Duration) -> Result<Vec<ReadyEvent>> {
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let mut raw = [libc::epoll_event { events: 0, u64: 0 }; 64];
        let n = loop {
            // SAFETY: `raw` is a valid out-buffer of the given capacity.
            let n = unsafe {
                libc::epoll_wait(
                    self.epoll_fd,
                    raw.as_mut_ptr(),
                    raw.len() as i32,
                    timeout_ms,
                )
            };
            if n < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(Error::Poller(err));
            }
            break n as usize;
        };

        let mut out = Vec::with_capacity(n);
        for ev in &raw[..n] {
            let fd = ev.u64 as RawFd;
            if self.stat.owns_fd(fd) {
                self.stat.drain_into(fd, &mut out);
                continue;
            }
            let Some(state) = self.fds.get_mut(&fd) else {
                log::debug!("orphan epoll event for fd {fd}, discarding");
                continue;
            };
            let errored = ev.events & (libc::EPOLLERR as u32 | libc::EPOLLHUP as u32) != 0;
            let readable = ev.events & libc::EPOLLIN as u32 != 0;
            let writable = ev.events & libc::EPOLLOUT as u32 != 0;

            if errored {
                for slot in [state.read.take(), state.write.take()].into_iter().flatten() {
                    out.push(ReadyEvent {
                        slot,
                        rc: Rc::Poller,
                        mask: Interest::empty(),
                        path_event: PathEvent::empty(),
                    });
                }
                self.disarm(fd);
                self.fds.remove(&fd);
                continue;
            }

            if state.read.is_some() && state.read == state.write {
                // combined wait_for_events: a single fiber occupies both
                // sides of this registration. Either side firing disarms
                // the whole registration — leaving the other side armed
                // would orphan it once the fiber's poller_attachment is
                // cleared, and a later event on it would have no owner.
                let slot = state.read.take().unwrap();
                state.write = None;
                let mut mask = Interest::empty();
                if readable {
                    mask |= Interest::READ;
                }
                if writable {
                    mask |= Interest::WRITE;
                }
                out.push(ReadyEvent {
                    slot,
                    rc: Rc::Ok,
                    mask,
                    path_event: PathEvent::empty(),
                });
            } else {
                if readable {
                    if let Some(slot) = state.read.take() {
                        out.push(ReadyEvent {
                            slot,
                            rc: Rc::Ok,
                            mask: Interest::READ,
                            path_event: PathEvent::empty(),
                        });
                    }
                }
                if writable {
                    if let Some(slot) = state.write.take() {
                        out.push(ReadyEvent {
                            slot,
                            rc: Rc::Ok,
                            mask: Interest::WRITE,
                            path_event: PathEvent::empty(),
                        });
                    }
                }
            }

            // one-shot semantics: disarm whatever sides just fired.
            let new_mask = state.wanted_mask();
            if new_mask.is_empty() {
                self.disarm(fd);
                self.fds.remove(&fd);
            } else if new_mask != state.armed {
                state.armed = new_mask;
                let _ = self.arm(fd, new_mask, false);
            }
        }
        Ok(out)
    }

    pub fn stat_new(&mut self, path: &std::path::Path) -> Result<PathWatch> {
        self.stat.watch(path)
    }

    /// Binds `slot` as the (sole) waiter for `watch`. Mirrors
    /// [`Poller::register`]'s `SIMULTANEOUS` rule: a second, distinct
    /// fiber binding the same still-pending watch is rejected.
    pub fn stat_bind(&mut self, watch: PathWatch, slot: Slot) -> std::result::Result<(), Rc> {
        self.stat.bind_waiter(watch, slot)
    }

    pub fn stat_destroy(&mut self, watch: PathWatch) {
        self.stat.unwatch(watch);
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        // SAFETY: epoll_fd was returned by a successful epoll_create1.
        unsafe {
            libc::close(self.epoll_fd);
        }
    }
}

// ---------------------------------------------------------------------
// Fiber-facing API (spec.md §6 "Poller API")
// ---------------------------------------------------------------------

/// Blocks the calling fiber until `fd` is readable. `0`/`Rc::Ok` on
/// success; the rc records the cause otherwise.
pub fn wait_for_read(fd: RawFd) -> Rc {
    crate::runtime::wait_for_fd(fd, Interest::READ)
}

pub fn wait_for_write(fd: RawFd) -> Rc {
    crate::runtime::wait_for_fd(fd, Interest::WRITE)
}

/// Combined reader/writer wait; `mask` is overwritten with whichever
/// side(s) fired.
pub fn wait_for_events(fd: RawFd, mask: &mut Interest) -> Rc {
    crate::runtime::wait_for_events(fd, mask)
}

/// Blocks until `fd` is readable, then reports the kernel's pending
/// input byte count (`FIONREAD`).
pub fn get_rbuflen(fd: RawFd) -> std::result::Result<usize, Rc> {
    let rc = wait_for_read(fd);
    if !rc.is_ok() {
        return Err(rc);
    }
    let mut n: libc::c_int = 0;
    // SAFETY: FIONREAD with a valid out-pointer on an fd the caller owns.
    let ok = unsafe { libc::ioctl(fd, libc::FIONREAD as _, &mut n) };
    if ok < 0 {
        return Err(Rc::Poller);
    }
    Ok(n.max(0) as usize)
}

/// Blocks until `fd` is writable, then reports the kernel's pending
/// output byte count (`TIOCOUTQ`).
pub fn get_wbuflen(fd: RawFd) -> std::result::Result<usize, Rc> {
    let rc = wait_for_write(fd);
    if !rc.is_ok() {
        return Err(rc);
    }
    let mut n: libc::c_int = 0;
    // SAFETY: TIOCOUTQ with a valid out-pointer on an fd the caller owns.
    let ok = unsafe { libc::ioctl(fd, libc::TIOCOUTQ as _, &mut n) };
    if ok < 0 {
        return Err(Rc::Poller);
    }
    Ok(n.max(0) as usize)
}

/// Establishes a path watch (spec.md §4.3's `stat_new`). Does not bind a
/// waiting fiber yet; call [`stat_wait`] to block on it.
pub fn stat_new(path: &std::path::Path) -> Result<PathWatch> {
    crate::runtime::with_runtime(|rt| rt.poller.stat_new(path))
}

/// Blocks the calling fiber until `watch` fires, writing which event(s)
/// were observed into `observed`.
pub fn stat_wait(watch: PathWatch, observed: &mut PathEvent) -> Rc {
    crate::runtime::stat_wait(watch, observed)
}

pub fn stat_destroy(watch: PathWatch) {
    crate::runtime::with_runtime(|rt| rt.poller.stat_destroy(watch));
}

fn interest_to_epoll_bits(interest: Interest) -> u32 {
    let mut bits = 0u32;
    if interest.contains(Interest::READ) {
        bits |= libc::EPOLLIN as u32;
    }
    if interest.contains(Interest::WRITE) {
        bits |= libc::EPOLLOUT as u32;
    }
    bits
}
