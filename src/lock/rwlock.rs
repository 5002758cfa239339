//! Reader-writer locks.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use crate::lock::SpinLock;
use crate::thread::wait_channel::WaitChannel;

struct RwState {
    readers: u32,
    writer_held: bool,
    /// Writers blocked in `write()`. While nonzero, new readers wait too.
    waiting_writers: u32,
}

/// A reader-writer lock with writer preference.
///
/// Any number of readers or one writer. A writer arriving while readers
/// hold the lock blocks new readers, so writers are not starved by a steady
/// reader stream; reader-mode and writer-mode are only ever entered from
/// the fully released state.
pub struct RwLock<T> {
    name: &'static str,
    state: SpinLock<RwState>,
    readers_wchan: WaitChannel,
    writers_wchan: WaitChannel,
    data: UnsafeCell<T>,
}

// SAFETY: the state machine serializes writers against everything; readers
// only get shared references.
unsafe impl<T: Send + Sync> Sync for RwLock<T> {}

impl<T> RwLock<T> {
    pub fn new(name: &'static str, data: T) -> Self {
        Self {
            name,
            state: SpinLock::new(name, RwState {
                readers: 0,
                writer_held: false,
                waiting_writers: 0,
            }),
            readers_wchan: WaitChannel::new(name),
            writers_wchan: WaitChannel::new(name),
            data: UnsafeCell::new(data),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Acquires the lock for shared reading.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        let mut state = self.state.lock();
        while state.writer_held || state.waiting_writers > 0 {
            self.readers_wchan.sleep(&mut state);
        }
        state.readers += 1;
        RwLockReadGuard {
            lock: self,
            _marker: PhantomData,
        }
    }

    /// Acquires the lock exclusively.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        let mut state = self.state.lock();
        state.waiting_writers += 1;
        while state.writer_held || state.readers > 0 {
            self.writers_wchan.sleep(&mut state);
        }
        state.waiting_writers -= 1;
        state.writer_held = true;
        RwLockWriteGuard {
            lock: self,
            _marker: PhantomData,
        }
    }

    fn release_read(&self) {
        let mut state = self.state.lock();
        debug_assert!(!state.writer_held);
        assert!(state.readers > 0, "rwlock {}: stray read release", self.name);
        state.readers -= 1;
        if state.readers == 0 && state.waiting_writers > 0 {
            self.writers_wchan.wake_one(&state);
        }
    }

    fn release_write(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.writer_held && state.readers == 0);
        state.writer_held = false;
        if state.waiting_writers > 0 {
            self.writers_wchan.wake_one(&state);
        } else {
            self.readers_wchan.wake_all(&state);
        }
    }
}

impl<T> Drop for RwLock<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        assert!(
            state.readers == 0 && !state.writer_held && state.waiting_writers == 0,
            "rwlock {}: destroyed while in use",
            self.name
        );
        // Sleepers are caught by the wait channels' drop checks.
    }
}

pub struct RwLockReadGuard<'s, T> {
    lock: &'s RwLock<T>,
    _marker: PhantomData<*const ()>,
}

pub struct RwLockWriteGuard<'s, T> {
    lock: &'s RwLock<T>,
    _marker: PhantomData<*const ()>,
}

// SAFETY: the guards only hand out references to `T`.
unsafe impl<'s, T: Sync> Sync for RwLockReadGuard<'s, T> {}
unsafe impl<'s, T: Sync> Sync for RwLockWriteGuard<'s, T> {}

impl<T> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

impl<T> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}

impl<T> Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: no writer while read-held.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: write-held.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: write-held and `&mut self` is exclusive.
        unsafe { &mut *self.lock.data.get() }
    }
}
