//! Wait channels.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::lock::SpinLockGuard;
use crate::thread::current::current;
use crate::thread::{make_runnable, switch, NewState, Thread};

/// A named parking lot for threads.
///
/// A wait channel has no lock of its own: every operation runs under an
/// external spin lock chosen by the client, witnessed here by the guard
/// argument. Sleeping releases that lock as part of the context switch and
/// takes it again before returning, so a wakeup serialized on the same lock
/// after the decision to sleep is never lost.
pub struct WaitChannel {
    name: &'static str,

    /// FIFO of sleeping threads. Guarded by the client's spin lock; the
    /// sleep-side insert additionally runs under the sleeper's run-queue
    /// lock inside the switch.
    queue: UnsafeCell<VecDeque<Arc<Thread>>>,
}

// SAFETY: the queue is only touched under the channel's guarding spin lock,
// asserted on every operation.
unsafe impl Send for WaitChannel {}
unsafe impl Sync for WaitChannel {}

impl WaitChannel {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            queue: UnsafeCell::new(VecDeque::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Goes to sleep on this channel, releasing the guard's lock while
    /// asleep and re-taking it before returning.
    ///
    /// No spin lock other than the guard's may be held.
    pub fn sleep<T>(&self, guard: &mut SpinLockGuard<'_, T>) {
        let lock = guard.raw();
        assert!(
            lock.holding(),
            "wchan {}: sleep without holding the lock",
            self.name
        );
        current(|cur| {
            assert_eq!(
                cur.cpu.spinlocks_held(),
                1,
                "wchan {}: thread {} sleeping with spin locks held",
                self.name,
                cur.thread.name()
            );
        });

        switch(NewState::Sleep { wchan: self, lock });

        // Awakened. Take the client's lock back so the guard is live again.
        lock.acquire();
    }

    /// Wakes up the thread that has slept longest on this channel, if any.
    pub fn wake_one<T>(&self, guard: &SpinLockGuard<'_, T>) {
        assert!(
            guard.raw().holding(),
            "wchan {}: wake without holding the lock",
            self.name
        );
        // SAFETY: the channel's guarding lock is held.
        let queue = unsafe { &mut *self.queue.get() };
        if let Some(thread) = queue.pop_front() {
            make_runnable(thread);
        }
    }

    /// Wakes up every thread sleeping on this channel.
    pub fn wake_all<T>(&self, guard: &SpinLockGuard<'_, T>) {
        assert!(
            guard.raw().holding(),
            "wchan {}: wake without holding the lock",
            self.name
        );
        // SAFETY: the channel's guarding lock is held.
        let queue = unsafe { &mut *self.queue.get() };
        while let Some(thread) = queue.pop_front() {
            make_runnable(thread);
        }
    }

    /// Whether nothing is sleeping here. Diagnostic.
    pub fn is_empty<T>(&self, guard: &SpinLockGuard<'_, T>) -> bool {
        assert!(
            guard.raw().holding(),
            "wchan {}: queried without holding the lock",
            self.name
        );
        // SAFETY: the channel's guarding lock is held.
        unsafe { (*self.queue.get()).is_empty() }
    }

    /// Called by the context switch with both the client's lock and the
    /// sleeper's run-queue lock held.
    pub(crate) fn enqueue(&self, thread: Arc<Thread>) {
        // SAFETY: see above.
        let queue = unsafe { &mut *self.queue.get() };
        queue.push_back(thread);
    }
}

impl Drop for WaitChannel {
    fn drop(&mut self) {
        // Exclusive access; no lock needed.
        assert!(
            self.queue.get_mut().is_empty(),
            "wchan {}: destroyed with sleepers",
            self.name
        );
    }
}
