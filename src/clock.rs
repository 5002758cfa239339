//! The timer tick.
//!
//! The substrate does not own a clock; a periodic tick is an external event
//! routed in through `hardclock`. When the kernel is booted with a tick
//! period, a ticker host thread delivers it.

use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::kernel::Kernel;

/// Processes one timer tick: posts a preemption request to every CPU.
///
/// The request is taken when that CPU next lifts its interrupt mask, or
/// absorbed by its idle loop. A tick with nothing ready anywhere leaves
/// every CPU idling.
pub fn hardclock(kernel: &Kernel) {
    for cpu in kernel.cpus() {
        cpu.post_preempt();
    }
}

pub(crate) fn start_ticker(kernel: &Arc<Kernel>, period: Duration) -> JoinHandle<()> {
    let kernel: Weak<Kernel> = Arc::downgrade(kernel);
    std::thread::Builder::new()
        .name("hardclock".to_string())
        .spawn(move || loop {
            std::thread::sleep(period);
            let kernel = match kernel.upgrade() {
                Some(kernel) => kernel,
                None => break,
            };
            // Keep ticking while threads drain; they may need preempting to
            // get there.
            if kernel.is_shutting_down() && kernel.thread_count() == 0 {
                break;
            }
            hardclock(&kernel);
        })
        .expect("hardclock: could not spawn ticker")
}
