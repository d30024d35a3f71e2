//! Path-based readiness, layered on `inotify` (spec.md §4.3's "stat"
//! family: `stat_new`/`stat_wait`/`stat_destroy`).
//!
//! One shared `inotify` fd is registered with the main `epoll` instance the
//! first time a path watch is created; [`Poller::poll`](super::Poller::poll)
//! recognizes events on that fd and routes them here instead of through the
//! fd interest table.

use std::collections::HashMap;
use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::path::Path;

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::fiber::pool::Slot;
use crate::fiber::record::Rc;

use super::ReadyEvent;

bitflags! {
    /// Mirrors spec.md §4.3's path-event mask.
    pub struct PathEvent: u32 {
        const DELETE = 0b001;
        const WRITE = 0b010;
        const ATTRIB = 0b100;
    }
}

fn to_inotify_mask(ev: PathEvent) -> u32 {
    let mut m = 0;
    if ev.contains(PathEvent::DELETE) {
        m |= libc::IN_DELETE_SELF as u32 | libc::IN_DELETE as u32;
    }
    if ev.contains(PathEvent::WRITE) {
        m |= libc::IN_MODIFY as u32 | libc::IN_CLOSE_WRITE as u32;
    }
    if ev.contains(PathEvent::ATTRIB) {
        m |= libc::IN_ATTRIB as u32;
    }
    m
}

fn from_inotify_mask(raw: u32) -> PathEvent {
    let mut ev = PathEvent::empty();
    if raw & (libc::IN_DELETE_SELF as u32 | libc::IN_DELETE as u32) != 0 {
        ev |= PathEvent::DELETE;
    }
    if raw & (libc::IN_MODIFY as u32 | libc::IN_CLOSE_WRITE as u32) != 0 {
        ev |= PathEvent::WRITE;
    }
    if raw & libc::IN_ATTRIB as u32 != 0 {
        ev |= PathEvent::ATTRIB;
    }
    ev
}

/// A live path watch. Opaque to callers beyond passing it back to
/// [`super::Poller::stat_destroy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathWatch {
    wd: i32,
}

struct Watcher {
    slot: Option<Slot>,
    want: PathEvent,
}

pub(super) struct StatBackend {
    epoll_fd: RawFd,
    inotify_fd: Option<RawFd>,
    watches: HashMap<i32, Watcher>,
}

impl StatBackend {
    pub(super) fn new(epoll_fd: RawFd) -> Self {
        StatBackend {
            epoll_fd,
            inotify_fd: None,
            watches: HashMap::new(),
        }
    }

    fn ensure_inotify(&mut self) -> Result<RawFd> {
        if let Some(fd) = self.inotify_fd {
            return Ok(fd);
        }
        // SAFETY: IN_NONBLOCK | IN_CLOEXEC are valid flags.
        let fd = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
        if fd < 0 {
            return Err(Error::Poller(std::io::Error::last_os_error()));
        }
        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: fd as u64,
        };
        // SAFETY: `ev` is fully initialized and `fd` was just created.
        let rc = unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut ev) };
        if rc != 0 {
            let err = Error::Poller(std::io::Error::last_os_error());
            unsafe {
                libc::close(fd);
            }
            return Err(err);
        }
        self.inotify_fd = Some(fd);
        Ok(fd)
    }

    pub(super) fn owns_fd(&self, fd: RawFd) -> bool {
        self.inotify_fd == Some(fd)
    }

    /// spec.md §4.3 `stat_new`: establishes a watch for `want` on `path`,
    /// not yet bound to any waiting fiber (see [`super::Poller::register_stat_waiter`]).
    pub(super) fn watch(&mut self, path: &Path) -> Result<PathWatch> {
        self.watch_for(path, PathEvent::DELETE | PathEvent::WRITE | PathEvent::ATTRIB)
    }

    pub(super) fn watch_for(&mut self, path: &Path, want: PathEvent) -> Result<PathWatch> {
        let fd = self.ensure_inotify()?;
        let c_path = CString::new(path.as_os_str().as_encoded_bytes())
            .map_err(|_| Error::InvalidRegistration(format!("path contains NUL: {}", path.display())))?;
        // SAFETY: `c_path` is a valid, NUL-terminated C string for the
        // lifetime of this call.
        let wd = unsafe { libc::inotify_add_watch(fd, c_path.as_ptr(), to_inotify_mask(want)) };
        if wd < 0 {
            return Err(Error::Poller(std::io::Error::last_os_error()));
        }
        self.watches.insert(wd, Watcher { slot: None, want });
        Ok(PathWatch { wd })
    }

    pub(super) fn bind_waiter(&mut self, watch: PathWatch, slot: Slot) -> std::result::Result<(), Rc> {
        let Some(w) = self.watches.get_mut(&watch.wd) else {
            return Err(Rc::Poller);
        };
        if let Some(existing) = w.slot {
            if existing != slot {
                return Err(Rc::Simultaneous);
            }
        }
        w.slot = Some(slot);
        Ok(())
    }

    pub(super) fn unwatch(&mut self, watch: PathWatch) {
        if let Some(fd) = self.inotify_fd {
            // SAFETY: `fd` is our own inotify instance, `watch.wd` may
            // already be invalid (self-deleted); inotify_rm_watch simply
            // errors (EINVAL) in that case, which we ignore.
            unsafe {
                libc::inotify_rm_watch(fd, watch.wd);
            }
        }
        self.watches.remove(&watch.wd);
    }

    /// Drains and parses every pending `inotify_event` off the shared fd,
    /// translating each into a [`ReadyEvent`] for a bound waiter, if any.
    pub(super) fn drain_into(&mut self, fd: RawFd, out: &mut Vec<ReadyEvent>) {
        debug_assert_eq!(Some(fd), self.inotify_fd);
        const EVENT_HEADER: usize = std::mem::size_of::<libc::inotify_event>();
        let mut buf = [0u8; 4096];
        loop {
            // SAFETY: `buf` is a valid, writable byte buffer of the given
            // length; inotify read semantics return whole events only.
            let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut c_void_shim, buf.len()) };
            if n <= 0 {
                break;
            }
            let mut offset = 0usize;
            while offset + EVENT_HEADER <= n as usize {
                // SAFETY: offset is within the bytes actually read and the
                // kernel guarantees each event's fixed header plus `len`
                // name bytes are fully present.
                let event = unsafe { &*(buf.as_ptr().add(offset) as *const libc::inotify_event) };
                let wd = event.wd;
                let observed = from_inotify_mask(event.mask);
                if let Some(w) = self.watches.get_mut(&wd) {
                    if !(observed & w.want).is_empty() {
                        if let Some(slot) = w.slot.take() {
                            out.push(ReadyEvent {
                                slot,
                                rc: Rc::Ok,
                                mask: super::Interest::empty(),
                                path_event: observed,
                            });
                        }
                    }
                }
                offset += EVENT_HEADER + event.len as usize;
            }
        }
    }
}

// `libc::read`'s second parameter type differs by platform alias; this
// shim keeps the unsafe call above legible without an extra `as` chain.
type c_void_shim = std::os::raw::c_void;
