//! Hosted machine primitives.
//!
//! The "machine" is the host OS: every kernel thread is backed by a host
//! thread, and a context switch is a token handoff between two of them. The
//! token cell plays the role of the saved callee-saved registers, stack
//! pointer and resume PC: granting the token *is* loading the incoming
//! context, blocking on it *is* being saved.

use std::hint::spin_loop;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

/// One machine word supporting test-and-set, load and store.
///
/// This is the only primitive the spin lock and the hangman serializer need
/// from the hardware.
pub struct LockWord(AtomicUsize);

impl LockWord {
    pub const fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    /// Writes 1 into the word and returns whether it was already set.
    ///
    /// The `Acquire` ordering pairs with the `Release` store in `clear()`:
    /// stores made in one critical section are visible to loads in the next.
    /// No extra fence is needed because of this pairing.
    pub fn test_and_set(&self) -> bool {
        self.0.swap(1, Ordering::Acquire) != 0
    }

    /// Reads the word without taking it. Used for test-and-test-and-set
    /// spinning, so contended waiters do not hammer the bus with writes.
    pub fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed) != 0
    }

    /// Clears the word, publishing the critical section. See `test_and_set`.
    pub fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }
}

/// Tells the CPU we are in a busy-wait loop.
pub fn spin_wait() {
    spin_loop();
}

/// The saved context of a kernel thread.
///
/// Holds one run token. A thread that is not running is blocked in `wait()`;
/// switching to it means granting the token. `grant` before `wait` is fine
/// (the token is left pending), which covers the window where a newborn
/// thread has been made runnable but its host thread has not parked yet.
pub struct SwitchFrame {
    run: Mutex<bool>,
    cond: Condvar,
}

impl SwitchFrame {
    pub fn new() -> Self {
        Self {
            run: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Hands the CPU to the thread owning this frame.
    pub fn grant(&self) {
        let mut run = self.run.lock().unwrap_or_else(|e| e.into_inner());
        *run = true;
        drop(run);
        self.cond.notify_one();
    }

    /// Blocks until some other thread grants this frame.
    pub fn wait(&self) {
        let mut run = self.run.lock().unwrap_or_else(|e| e.into_inner());
        while !*run {
            run = self
                .cond
                .wait(run)
                .unwrap_or_else(|e| e.into_inner());
        }
        *run = false;
    }
}
