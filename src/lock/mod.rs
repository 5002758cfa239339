//! Synchronization primitives.
//!
//! The spin lock is the foundation; everything else is a spin-locked state
//! word plus one or two wait channels.

mod condvar;
mod rwlock;
mod semaphore;
mod sleeplock;
mod spinlock;

pub use condvar::Condvar;
pub use rwlock::{RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use semaphore::Semaphore;
pub use sleeplock::{Sleeplock, SleeplockGuard};
pub use spinlock::{RawSpinLock, SpinLock, SpinLockGuard};
