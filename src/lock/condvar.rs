//! Condition variables.

use crate::lock::{SleeplockGuard, SpinLock};
use crate::thread::wait_channel::WaitChannel;

/// A condition variable bound to a `Sleeplock`.
///
/// Mesa-style: a signal makes a waiter runnable but transfers nothing, and
/// the waiter re-contends for the lock on the way out, so clients re-test
/// their predicate in a loop. The variable checks no predicate itself.
pub struct Condvar {
    name: &'static str,
    inner: SpinLock<()>,
    wchan: WaitChannel,
}

impl Condvar {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: SpinLock::new(name, ()),
            wchan: WaitChannel::new(name),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Releases the guard's lock, sleeps until signalled, and re-takes the
    /// lock before returning; the guard is valid again on return.
    pub fn wait<T>(&self, guard: &mut SleeplockGuard<'_, T>) {
        let lock = guard.sleeplock();
        let mut inner = self.inner.lock();
        // With our spin lock held, a signal cannot slip between the unlock
        // and the sleep.
        lock.release();
        self.wchan.sleep(&mut inner);
        drop(inner);
        lock.acquire();
    }

    /// Wakes one waiter. The caller usually holds the associated lock, but
    /// does not have to.
    pub fn signal(&self) {
        let inner = self.inner.lock();
        self.wchan.wake_one(&inner);
    }

    /// Wakes every waiter.
    pub fn broadcast(&self) {
        let inner = self.inner.lock();
        self.wchan.wake_all(&inner);
    }
}

// Destruction with waiters is caught by the wait channel's drop check.
