//! Sleeping locks.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use crate::lock::SpinLock;
use crate::thread::current::current;
use crate::thread::wait_channel::WaitChannel;

/// Long-term mutual exclusion, held by a thread.
///
/// Contenders sleep instead of spinning, so the lock may be held across
/// other suspensions. Not recursive: a holder taking the lock again is a
/// fatal error, as is any release by a non-holder.
pub struct Sleeplock<T> {
    name: &'static str,

    /// Thread holding the lock, by id; `None` when free.
    holder: SpinLock<Option<u64>>,

    wchan: WaitChannel,

    data: UnsafeCell<T>,
}

// SAFETY: the lock serializes all access to `data`.
unsafe impl<T: Send> Sync for Sleeplock<T> {}

impl<T> Sleeplock<T> {
    pub fn new(name: &'static str, data: T) -> Self {
        Self {
            name,
            holder: SpinLock::new(name, None),
            wchan: WaitChannel::new(name),
            data: UnsafeCell::new(data),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Acquires the lock, sleeping until it is free.
    pub fn lock(&self) -> SleeplockGuard<'_, T> {
        self.acquire();
        SleeplockGuard {
            lock: self,
            _marker: PhantomData,
        }
    }

    /// Whether the current thread holds the lock.
    pub fn holding(&self) -> bool {
        let tid = current(|cur| cur.thread.tid());
        *self.holder.lock() == Some(tid)
    }

    pub(crate) fn acquire(&self) {
        let tid = current(|cur| cur.thread.tid());
        let mut holder = self.holder.lock();
        if *holder == Some(tid) {
            panic!(
                "sleeplock {}: thread {} already holds it",
                self.name,
                current(|cur| cur.thread.name().to_string())
            );
        }
        while holder.is_some() {
            self.wchan.sleep(&mut holder);
        }
        *holder = Some(tid);
    }

    pub(crate) fn release(&self) {
        let tid = current(|cur| cur.thread.tid());
        let mut holder = self.holder.lock();
        assert!(
            *holder == Some(tid),
            "sleeplock {}: released by thread {}, which does not hold it",
            self.name,
            current(|cur| cur.thread.name().to_string())
        );
        *holder = None;
        self.wchan.wake_one(&holder);
    }
}

impl<T> Drop for Sleeplock<T> {
    fn drop(&mut self) {
        assert!(
            self.holder.get_mut().is_none(),
            "sleeplock {}: destroyed while held",
            self.name
        );
        // Destruction with sleepers is caught by the wait channel's drop.
    }
}

/// Guards that guarantee exclusive access to the lock's inner data.
pub struct SleeplockGuard<'s, T> {
    lock: &'s Sleeplock<T>,
    // The guard must be released by the thread that acquired it.
    _marker: PhantomData<*const ()>,
}

// SAFETY: the guard only hands out references to `T`.
unsafe impl<'s, T: Sync> Sync for SleeplockGuard<'s, T> {}

impl<'s, T> SleeplockGuard<'s, T> {
    /// The lock this guard came from. The condition variable uses this to
    /// release and re-take the lock around a sleep.
    pub(crate) fn sleeplock(&self) -> &'s Sleeplock<T> {
        self.lock
    }
}

impl<T> Drop for SleeplockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

impl<T> Deref for SleeplockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: the lock is held.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SleeplockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: the lock is held and `&mut self` is exclusive.
        unsafe { &mut *self.lock.data.get() }
    }
}
