//! Interrupt priority control for the current CPU.
//!
//! Two levels only: `None` (everything delivered) and `High` (everything
//! masked). Raises are counted per thread, so they nest and travel with a
//! thread across context switches: a thread parked mid-switch carries its
//! raises with it and undoes them itself on resume. The CPU's mask bit is
//! driven by the 0-to-1 and 1-to-0 edges of the running thread's count.
//!
//! A pending timer tick is delivered when the mask comes off, which is the
//! hosted reading of "interrupts fire when re-enabled": the tick sets a
//! per-CPU preempt flag, and the thread that re-enables yields.

use crate::thread::{self, current::try_current};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Ipl {
    None = 0,
    High = 1,
}

impl Ipl {
    pub(crate) fn from_raw(raw: u8) -> Ipl {
        match raw {
            0 => Ipl::None,
            _ => Ipl::High,
        }
    }
}

/// Sets the current thread's base priority level and returns the previous
/// one. Outside any kernel thread this is a no-op.
pub fn splx(new: Ipl) -> Ipl {
    let old = match try_current(|cur| {
        let old = cur.thread.base_spl();
        cur.thread.set_base_spl(new);
        old
    }) {
        Some(old) => old,
        None => return Ipl::None,
    };
    if new > old {
        splraise();
    } else if new < old {
        spllower();
    }
    old
}

/// Masks all interrupts on this CPU. Returns the previous level.
pub fn splhigh() -> Ipl {
    splx(Ipl::High)
}

/// Enables all interrupts on this CPU. Returns the previous level.
pub fn spl0() -> Ipl {
    splx(Ipl::None)
}

/// One counted raise to `High`. Used by `splx` and by spin-lock acquire.
pub(crate) fn splraise() {
    try_current(|cur| {
        let prev = cur.thread.iplhigh_inc();
        if prev == 0 {
            cur.cpu.set_interrupts(false);
        }
    });
}

/// Undoes one `splraise`. When the last raise comes off, the mask is lifted
/// and a pending tick, if any, is taken.
pub(crate) fn spllower() {
    let preempt = try_current(|cur| {
        let prev = cur.thread.iplhigh_dec();
        if prev == 1 {
            cur.cpu.set_interrupts(true);
            // The idle loop polls for itself.
            cur.cpu.take_preempt() && !cur.thread.is_idle()
        } else {
            false
        }
    })
    .unwrap_or(false);

    if preempt {
        thread::yield_now();
    }
}
