//! Memory barriers.
//!
//! Each operation is a compiler barrier and, on machines that need it, a CPU
//! fence. The spin lock does not use these: its acquire/release orderings on
//! the lock word already publish the critical section. They are exported for
//! clients doing their own lock-free signalling.

use std::sync::atomic::{fence, Ordering};

/// Loads preceding the barrier happen before loads after it.
pub fn load_load() {
    fence(Ordering::Acquire);
}

/// Stores preceding the barrier happen before stores after it.
pub fn store_store() {
    fence(Ordering::Release);
}

/// Stores preceding the barrier happen before any access after it.
pub fn store_any() {
    fence(Ordering::SeqCst);
}

/// Accesses preceding the barrier happen before stores after it.
pub fn any_store() {
    fence(Ordering::Release);
}

/// Full barrier.
pub fn any_any() {
    fence(Ordering::SeqCst);
}
