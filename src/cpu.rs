//! Per-CPU state.

use std::collections::VecDeque;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use spin::Once;

use crate::hangman::Actor;
use crate::lock::SpinLock;
use crate::thread::Thread;

/// How long an idle CPU waits for an IPI before re-scanning its queue.
const IDLE_POLL: Duration = Duration::from_millis(1);

pub struct Cpu {
    id: u32,

    /// Threads ready to run on this CPU, FIFO. The lock is held across the
    /// context switch: acquired by the outgoing thread, released by the
    /// incoming one.
    pub(crate) run_queue: SpinLock<VecDeque<Arc<Thread>>>,

    /// Exited threads awaiting reaping by this CPU's idle loop.
    pub(crate) zombies: SpinLock<VecDeque<Arc<Thread>>>,

    /// This CPU's idle thread. Set once at boot.
    idle: Once<Arc<Thread>>,

    /// The thread running on this CPU. Diagnostic; the authoritative
    /// identity is the running thread's own thread-local.
    curthread: AtomicPtr<Thread>,

    /// Number of spin locks held by this CPU.
    spinlocks: AtomicU32,

    /// Simulated hardware interrupt mask: true when interrupts are enabled.
    intr_enabled: AtomicBool,

    /// Set by the timer tick; honoured when the mask comes off.
    preempt_pending: AtomicBool,

    /// Set when another CPU kicks us to un-idle.
    ipi_pending: AtomicBool,

    /// True while the idle thread is waiting for work.
    idling: AtomicBool,

    kick_lock: Mutex<()>,
    kick_cond: Condvar,

    actor: Actor,
}

impl Cpu {
    pub(crate) fn new(id: u32) -> Self {
        Self {
            id,
            run_queue: SpinLock::new("run queue", VecDeque::new()),
            zombies: SpinLock::new("zombie list", VecDeque::new()),
            idle: Once::new(),
            curthread: AtomicPtr::new(ptr::null_mut()),
            spinlocks: AtomicU32::new(0),
            intr_enabled: AtomicBool::new(true),
            preempt_pending: AtomicBool::new(false),
            ipi_pending: AtomicBool::new(false),
            idling: AtomicBool::new(false),
            kick_lock: Mutex::new(()),
            kick_cond: Condvar::new(),
            actor: Actor::new(format!("cpu{}", id)),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Stable identity of a CPU record, for holder fields.
    pub(crate) fn as_ptr(cpu: &Arc<Cpu>) -> *mut Cpu {
        Arc::as_ptr(cpu) as *mut Cpu
    }

    pub fn spinlocks_held(&self) -> u32 {
        self.spinlocks.load(Ordering::Relaxed)
    }

    pub(crate) fn spinlocks_inc(&self) {
        self.spinlocks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn spinlocks_dec(&self) {
        let prev = self.spinlocks.fetch_sub(1, Ordering::Relaxed);
        assert!(prev > 0, "cpu{}: spin lock count underflow", self.id);
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.intr_enabled.load(Ordering::Relaxed)
    }

    pub(crate) fn set_interrupts(&self, enabled: bool) {
        self.intr_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Posts a timer tick to this CPU.
    pub(crate) fn post_preempt(&self) {
        self.preempt_pending.store(true, Ordering::Relaxed);
    }

    /// Consumes a pending tick, if any.
    pub(crate) fn take_preempt(&self) -> bool {
        self.preempt_pending.swap(false, Ordering::Relaxed)
    }

    pub(crate) fn set_curthread(&self, thread: &Arc<Thread>) {
        self.curthread
            .store(Arc::as_ptr(thread) as *mut Thread, Ordering::Relaxed);
    }

    pub(crate) fn curthread(&self) -> *const Thread {
        self.curthread.load(Ordering::Relaxed)
    }

    pub(crate) fn set_idle(&self, thread: Arc<Thread>) {
        self.idle.call_once(|| thread);
    }

    pub(crate) fn idle(&self) -> &Arc<Thread> {
        self.idle.get().expect("cpu: idle thread not set")
    }

    pub(crate) fn is_idling(&self) -> bool {
        self.idling.load(Ordering::Relaxed)
    }

    pub(crate) fn hangman_actor(&self) -> &Actor {
        &self.actor
    }

    /// Waits for an IPI or the poll interval, whichever is first. Called
    /// only by this CPU's idle thread with its run queue empty.
    pub(crate) fn idle_wait(&self) {
        self.idling.store(true, Ordering::Relaxed);
        let guard = self.kick_lock.lock().unwrap_or_else(|e| e.into_inner());
        if !self.ipi_pending.swap(false, Ordering::Relaxed) {
            let _ = self
                .kick_cond
                .wait_timeout(guard, IDLE_POLL)
                .unwrap_or_else(|e| e.into_inner());
        }
        self.idling.store(false, Ordering::Relaxed);
        self.ipi_pending.store(false, Ordering::Relaxed);
    }

    /// Sends this CPU an IPI so its idle loop rescans the run queue.
    pub(crate) fn kick(&self) {
        let _guard = self.kick_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.ipi_pending.store(true, Ordering::Relaxed);
        self.kick_cond.notify_one();
    }
}
