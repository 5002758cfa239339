//! Current-thread identity.
//!
//! Every kernel thread is backed by a host thread, so "the current thread"
//! is a thread-local: set once when the backing thread starts, dropped when
//! it unwinds. Code running outside any kernel thread (boot, host-side test
//! glue) has no current thread; callers that can tolerate that use
//! `try_current`.

use std::cell::RefCell;
use std::sync::Arc;

use crate::cpu::Cpu;
use crate::kernel::Kernel;
use crate::thread::Thread;

pub(crate) struct Current {
    pub kernel: Arc<Kernel>,
    pub thread: Arc<Thread>,
    /// The CPU this thread is bound to. Threads do not migrate, so this is
    /// fixed for the thread's lifetime.
    pub cpu: Arc<Cpu>,
}

thread_local! {
    static CURRENT: RefCell<Option<Current>> = RefCell::new(None);
}

pub(crate) fn set_current(cur: Current) {
    CURRENT.with(|c| {
        let mut slot = c.borrow_mut();
        debug_assert!(slot.is_none(), "current thread set twice");
        *slot = Some(cur);
    });
}

pub(crate) fn try_current<R>(f: impl FnOnce(&Current) -> R) -> Option<R> {
    CURRENT.with(|c| c.borrow().as_ref().map(f))
}

/// Like `try_current`, but calling from outside a kernel thread is a bug.
pub(crate) fn current<R>(f: impl FnOnce(&Current) -> R) -> R {
    try_current(f).expect("no current kernel thread")
}
