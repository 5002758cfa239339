//! Counting semaphores.

use crate::lock::SpinLock;
use crate::thread::wait_channel::WaitChannel;

/// A counting semaphore with FIFO waiters.
pub struct Semaphore {
    name: &'static str,
    count: SpinLock<u32>,
    wchan: WaitChannel,
}

impl Semaphore {
    pub fn new(name: &'static str, initial: u32) -> Self {
        Self {
            name,
            count: SpinLock::new(name, initial),
            wchan: WaitChannel::new(name),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Decrements the count, sleeping until it is positive.
    pub fn p(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.wchan.sleep(&mut count);
        }
        *count -= 1;
    }

    /// Increments the count and wakes one waiter.
    ///
    /// The count does not saturate; issuing more `v`s than the counter can
    /// hold is a client contract violation, not a panic.
    pub fn v(&self) {
        let mut count = self.count.lock();
        *count = count.wrapping_add(1);
        self.wchan.wake_one(&count);
    }

    /// Current count. Diagnostic: the value may be stale by return time.
    pub fn count(&self) -> u32 {
        *self.count.lock()
    }
}

// Destruction with sleepers is caught by the wait channel's own drop check.
