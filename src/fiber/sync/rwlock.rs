use std::cell::{Cell, UnsafeCell};
use std::fmt;
use std::ops::{Deref, DerefMut};

use super::Condvar;
use crate::fiber::record::Rc;

/// A single-threaded, fiber-yielding reader/writer lock (spec.md §4.4):
/// any number of readers may hold it concurrently, but a writer needs
/// exclusive access. Modeled on a `fiber::Mutex`/`MutexGuard` split,
/// generalized to two guard flavors sharing one [`Condvar`].
pub struct RwLock<T: ?Sized> {
    writer: Cell<bool>,
    readers: Cell<u32>,
    cond: Condvar,
    data: UnsafeCell<T>,
}

impl<T> RwLock<T> {
    pub fn new(t: T) -> Self {
        RwLock {
            writer: Cell::new(false),
            readers: Cell::new(0),
            cond: Condvar::new(),
            data: UnsafeCell::new(t),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> RwLock<T> {
    /// Blocks while a writer holds the lock, then registers as a reader.
    pub fn read(&self) -> ReadGuard<'_, T> {
        loop {
            if !self.writer.get() {
                self.readers.set(self.readers.get() + 1);
                return ReadGuard { lock: self };
            }
            self.cond.wait();
        }
    }

    /// Blocks while anyone (reader or writer) holds the lock, then takes
    /// exclusive ownership.
    pub fn write(&self) -> WriteGuard<'_, T> {
        loop {
            if !self.writer.get() && self.readers.get() == 0 {
                self.writer.set(true);
                return WriteGuard { lock: self };
            }
            self.cond.wait();
        }
    }

    /// Non-blocking [`read`](RwLock::read): `Err(Rc::TryAcquireFail)` if a
    /// writer currently holds the lock.
    pub fn try_read(&self) -> std::result::Result<ReadGuard<'_, T>, Rc> {
        if self.writer.get() {
            return Err(Rc::TryAcquireFail);
        }
        self.readers.set(self.readers.get() + 1);
        Ok(ReadGuard { lock: self })
    }

    /// Non-blocking [`write`](RwLock::write): `Err(Rc::TryAcquireFail)` if
    /// anyone currently holds the lock.
    pub fn try_write(&self) -> std::result::Result<WriteGuard<'_, T>, Rc> {
        if self.writer.get() || self.readers.get() > 0 {
            return Err(Rc::TryAcquireFail);
        }
        self.writer.set(true);
        Ok(WriteGuard { lock: self })
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn release_read(&self) {
        let r = self.readers.get() - 1;
        self.readers.set(r);
        if r == 0 {
            self.cond.signal_one();
        }
    }

    fn release_write(&self) {
        self.writer.set(false);
        self.cond.signal_all();
    }
}

impl<T: Default> Default for RwLock<T> {
    fn default() -> Self {
        RwLock::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for RwLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("RwLock");
        match self.try_read() {
            Ok(guard) => {
                d.field("data", &&*guard);
            }
            Err(_) => {
                struct LockedPlaceholder;
                impl fmt::Debug for LockedPlaceholder {
                    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        f.write_str("<locked>")
                    }
                }
                d.field("data", &LockedPlaceholder);
            }
        }
        d.finish_non_exhaustive()
    }
}

pub struct ReadGuard<'a, T: ?Sized + 'a> {
    lock: &'a RwLock<T>,
}

impl<T: ?Sized> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

impl<T: ?Sized> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for ReadGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

pub struct WriteGuard<'a, T: ?Sized + 'a> {
    lock: &'a RwLock<T>,
}

impl<T: ?Sized> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}

impl<T: ?Sized> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for WriteGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
