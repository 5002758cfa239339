//! An SMP thread and synchronization substrate with a hosted machine layer.
//!
//! The crate models a small multiprocessor: a [`Kernel`] owns a set of CPUs,
//! each with a FIFO run queue and an idle thread; kernel threads are forked
//! onto a CPU and scheduled round-robin, preempted by a timer tick when one
//! is configured. On top of the spin lock and the wait channel sit the
//! blocking primitives: [`Semaphore`], [`Sleeplock`], [`Condvar`] and
//! [`RwLock`].
//!
//! The machine is the host OS. Each kernel thread is backed by a host
//! thread, a context switch is a token handoff, interrupt masking is
//! per-CPU bookkeeping, and the timer tick is a host thread calling
//! [`clock::hardclock`]. SMP is real: distinct CPUs run concurrently and
//! the spin lock provides genuine cross-CPU mutual exclusion.
//!
//! ```
//! use std::sync::Arc;
//! use threadcore::{KernelBuilder, Semaphore};
//!
//! let kernel = KernelBuilder::new().cpus(2).boot();
//! let done = Arc::new(Semaphore::new("done", 0));
//!
//! let d = done.clone();
//! kernel.fork("child", None, move || d.v()).unwrap();
//!
//! kernel.enter("main", move || done.p());
//! kernel.shutdown();
//! ```

pub mod arch;
pub mod clock;
pub mod cpu;
mod hangman;
pub mod intr;
pub mod kernel;
pub mod lock;
pub mod membar;
pub mod param;
pub mod proc;
pub mod thread;

pub use kernel::{Kernel, KernelBuilder};
pub use lock::{
    Condvar, RawSpinLock, RwLock, RwLockReadGuard, RwLockWriteGuard, Semaphore, Sleeplock,
    SleeplockGuard, SpinLock, SpinLockGuard,
};
pub use proc::Proc;
pub use thread::{ForkError, Thread, Threadstate, WaitChannel};
