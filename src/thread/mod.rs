//! Threads and the context switch.

use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;

use crate::arch::SwitchFrame;
use crate::cpu::Cpu;
use crate::intr::{self, Ipl};
use crate::kernel::Kernel;
use crate::lock::RawSpinLock;
use crate::proc::Proc;
use crate::thread::current::{current, set_current, Current};

pub(crate) mod current;
pub mod wait_channel;

pub use wait_channel::WaitChannel;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Threadstate {
    /// Running on its CPU; on no list.
    Run,
    /// On its CPU's run queue.
    Ready,
    /// On exactly one wait channel.
    Sleep,
    /// On its CPU's zombie list, awaiting reaping.
    Zombie,
}

impl Threadstate {
    fn from_raw(raw: u8) -> Threadstate {
        match raw {
            0 => Threadstate::Run,
            1 => Threadstate::Ready,
            2 => Threadstate::Sleep,
            _ => Threadstate::Zombie,
        }
    }
}

/// A kernel-schedulable flow of control, backed by one host thread.
pub struct Thread {
    name: Box<str>,
    tid: u64,
    kernel: Weak<Kernel>,

    /// Index of the CPU this thread runs on. Threads do not migrate.
    cpu: u32,

    /// Owning process-like container; opaque to the substrate.
    proc: Option<Arc<Proc>>,

    state: AtomicU8,

    /// Outstanding IPL raises made by this thread; travels with it across
    /// context switches.
    iplhigh: AtomicU32,
    base_spl: AtomicU8,

    frame: SwitchFrame,

    handle: Mutex<Option<JoinHandle<()>>>,

    is_idle: bool,
}

impl Thread {
    fn new(
        name: &str,
        tid: u64,
        kernel: Weak<Kernel>,
        cpu: u32,
        proc: Option<Arc<Proc>>,
    ) -> Self {
        Self {
            name: name.into(),
            tid,
            kernel,
            cpu,
            proc,
            state: AtomicU8::new(Threadstate::Ready as u8),
            // Primed as if mid-switch: one raise for the splhigh of the
            // switch that will schedule it, one for the run-queue lock the
            // trampoline releases. The trampoline's spl0 settles both.
            iplhigh: AtomicU32::new(2),
            base_spl: AtomicU8::new(Ipl::High as u8),
            frame: SwitchFrame::new(),
            handle: Mutex::new(None),
            is_idle: false,
        }
    }

    fn new_idle(name: &str, tid: u64, kernel: Weak<Kernel>, cpu: u32) -> Self {
        Self {
            name: name.into(),
            tid,
            kernel,
            cpu,
            proc: None,
            state: AtomicU8::new(Threadstate::Run as u8),
            iplhigh: AtomicU32::new(0),
            base_spl: AtomicU8::new(Ipl::None as u8),
            frame: SwitchFrame::new(),
            handle: Mutex::new(None),
            is_idle: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tid(&self) -> u64 {
        self.tid
    }

    pub fn proc(&self) -> Option<&Arc<Proc>> {
        self.proc.as_ref()
    }

    pub fn state(&self) -> Threadstate {
        Threadstate::from_raw(self.state.load(Ordering::Relaxed))
    }

    pub(crate) fn set_state(&self, state: Threadstate) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub(crate) fn cpu_index(&self) -> u32 {
        self.cpu
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.is_idle
    }

    pub(crate) fn kernel(&self) -> Arc<Kernel> {
        self.kernel.upgrade().expect("thread outlived its kernel")
    }

    pub(crate) fn frame(&self) -> &SwitchFrame {
        &self.frame
    }

    pub(crate) fn iplhigh(&self) -> u32 {
        self.iplhigh.load(Ordering::Relaxed)
    }

    pub(crate) fn iplhigh_inc(&self) -> u32 {
        self.iplhigh.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn iplhigh_dec(&self) -> u32 {
        let prev = self.iplhigh.fetch_sub(1, Ordering::Relaxed);
        assert!(prev > 0, "thread {}: IPL lowered below zero", self.name);
        prev
    }

    pub(crate) fn base_spl(&self) -> Ipl {
        Ipl::from_raw(self.base_spl.load(Ordering::Relaxed))
    }

    pub(crate) fn set_base_spl(&self, spl: Ipl) {
        self.base_spl.store(spl as u8, Ordering::Relaxed);
    }

    fn set_handle(&self, handle: JoinHandle<()>) {
        *self.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    fn take_handle(&self) -> Option<JoinHandle<()>> {
        self.handle.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

/// Why `fork` can fail: the host refused to give us a stack.
#[derive(Debug)]
pub enum ForkError {
    Spawn(io::Error),
}

impl fmt::Display for ForkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForkError::Spawn(e) => write!(f, "could not spawn backing thread: {}", e),
        }
    }
}

impl std::error::Error for ForkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ForkError::Spawn(e) => Some(e),
        }
    }
}

/// Creates a new thread running `entry`, READY on a kernel-chosen CPU.
pub fn fork(
    kernel: &Arc<Kernel>,
    name: &str,
    proc: Option<Arc<Proc>>,
    entry: impl FnOnce() + Send + 'static,
) -> Result<(), ForkError> {
    let cpu = kernel.pick_cpu();
    let thread = Arc::new(Thread::new(
        name,
        kernel.alloc_tid(),
        Arc::downgrade(kernel),
        cpu,
        proc,
    ));

    let k = kernel.clone();
    let t = thread.clone();
    let entry: Box<dyn FnOnce() + Send> = Box::new(entry);
    let handle = std::thread::Builder::new()
        .name(name.to_string())
        .stack_size(kernel.stack_size())
        .spawn(move || thread_main(k, t, entry))
        .map_err(ForkError::Spawn)?;
    thread.set_handle(handle);

    kernel.thread_forked();
    log::trace!("forked thread {} onto cpu{}", thread.name(), cpu);
    make_runnable(thread);
    Ok(())
}

/// Gives up the CPU for one scheduling round.
pub fn yield_now() {
    switch(NewState::Ready);
}

/// Terminates the current thread. The rest of the entry function does not
/// run; cleanup happens by unwinding.
pub fn exit() -> ! {
    // Bypasses the panic hook; the trampoline recognizes the payload.
    panic::resume_unwind(Box::new(ThreadExit));
}

struct ThreadExit;

/// What the current thread becomes when it switches away.
pub(crate) enum NewState<'a> {
    Ready,
    Sleep {
        wchan: &'a WaitChannel,
        lock: &'a RawSpinLock,
    },
    Zombie,
}

/// Suspends the current thread and runs the next one on this CPU.
///
/// Entered at splhigh with nothing but (for SLEEP) the wait channel's spin
/// lock held. The run-queue lock is held across the handoff: the outgoing
/// thread acquires it, the incoming thread releases it once it is back on
/// its own stack. For SLEEP the channel lock is dropped only after the
/// thread is on the channel queue and the run-queue lock is held, so a
/// wakeup issued after the sleep decision cannot be lost.
pub(crate) fn switch(new_state: NewState<'_>) {
    let (cur, cpu) = current(|c| (c.thread.clone(), c.cpu.clone()));
    let old = intr::splx(Ipl::High);

    cpu.run_queue.raw_lock().acquire();
    // SAFETY: the run-queue lock is held.
    let queue = unsafe { &mut *cpu.run_queue.get_mut_raw() };

    let exiting = matches!(&new_state, NewState::Zombie);
    match new_state {
        NewState::Ready => {
            cur.set_state(Threadstate::Ready);
            // The idle thread is resurrected whenever the queue runs dry;
            // it is never queued.
            if !cur.is_idle() {
                queue.push_back(cur.clone());
            }
        }
        NewState::Sleep { wchan, lock } => {
            assert!(
                !cur.is_idle(),
                "cpu{}: idle thread tried to sleep",
                cpu.id()
            );
            wchan.enqueue(cur.clone());
            cur.set_state(Threadstate::Sleep);
            lock.release();
        }
        NewState::Zombie => {
            cur.set_state(Threadstate::Zombie);
            cpu.zombies.lock().push_back(cur.clone());
        }
    }

    let next = queue.pop_front().unwrap_or_else(|| cpu.idle().clone());

    if Arc::ptr_eq(&next, &cur) {
        cur.set_state(Threadstate::Run);
        // SAFETY: acquired above; never handed over.
        unsafe { cpu.run_queue.unlock() };
        intr::splx(old);
        return;
    }

    assert_eq!(
        cpu.spinlocks_held(),
        1,
        "cpu{}: thread {} context-switching with spin locks held",
        cpu.id(),
        cur.name()
    );

    cpu.set_curthread(&next);
    next.frame().grant();

    if exiting {
        // Never resumed. The run-queue lock travels to `next`; the backing
        // host thread unwinds out of the trampoline after this returns.
        return;
    }

    cur.frame().wait();

    // Back on our CPU, possibly much later. Whoever switched to us acquired
    // the run-queue lock; it is ours to release.
    debug_assert!(std::ptr::eq(cpu.curthread(), Arc::as_ptr(&cur)));
    cur.set_state(Threadstate::Run);
    // SAFETY: held by this CPU since the switch that resumed us.
    unsafe { cpu.run_queue.unlock() };
    intr::splx(old);
}

/// Makes `thread` runnable on its home CPU.
pub(crate) fn make_runnable(thread: Arc<Thread>) {
    let kernel = thread.kernel();
    let cpu = kernel.cpu(thread.cpu_index()).clone();
    {
        let mut queue = cpu.run_queue.lock();
        thread.set_state(Threadstate::Ready);
        queue.push_back(thread);
    }
    if cpu.is_idling() {
        cpu.kick();
    }
}

/// Reaps this CPU's zombies. A thread never reaps itself: it is on the
/// zombie list only after its final switch away.
pub(crate) fn exorcise(cpu: &Cpu) {
    loop {
        let dead = cpu.zombies.lock().pop_front();
        let dead = match dead {
            Some(t) => t,
            None => break,
        };
        debug_assert_eq!(dead.state(), Threadstate::Zombie);
        if let Some(handle) = dead.take_handle() {
            // Past its final switch; the join completes as soon as the
            // backing thread unwinds off its stack.
            let _ = handle.join();
        }
        log::trace!("cpu{}: reaped thread {}", cpu.id(), dead.name());
    }
}

/// Body of every forked thread's backing host thread.
fn thread_main(kernel: Arc<Kernel>, thread: Arc<Thread>, entry: Box<dyn FnOnce() + Send>) {
    let cpu = kernel.cpu(thread.cpu_index()).clone();
    set_current(Current {
        kernel: kernel.clone(),
        thread: thread.clone(),
        cpu: cpu.clone(),
    });

    // Park until scheduled for the first time.
    thread.frame().wait();

    // To the switch that picked us, this looks exactly like a return from
    // `switch`: mark ourselves running and release the run-queue lock it
    // acquired. Interrupts are still masked from that switch; enable them
    // only after the lock is gone.
    debug_assert!(std::ptr::eq(cpu.curthread(), Arc::as_ptr(&thread)));
    thread.set_state(Threadstate::Run);
    // SAFETY: acquired by the switch that scheduled us.
    unsafe { cpu.run_queue.unlock() };
    exorcise(&cpu);
    intr::spl0();

    let result = panic::catch_unwind(AssertUnwindSafe(entry));
    if let Err(payload) = result {
        if !payload.is::<ThreadExit>() {
            kernel.record_fatal(format!(
                "thread {}: {}",
                thread.name(),
                panic_message(&payload)
            ));
            // A fatal is a machine halt. The thread may have died holding
            // locks, so scheduling anything else on this CPU would only
            // corrupt things further; wedge here and let the client observe
            // the verdict through `Kernel::fatal`.
            loop {
                std::thread::park();
            }
        }
    }

    log::trace!("thread {} exiting", thread.name());
    kernel.thread_exited();
    switch(NewState::Zombie);
    // Not reached as a thread: the switch never resumes us. The host thread
    // simply returns and is joined by exorcise().
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Creates a CPU's idle thread and installs it in the CPU record.
pub(crate) fn make_idle(kernel: &Arc<Kernel>, cpu: &Arc<Cpu>) -> Arc<Thread> {
    let thread = Arc::new(Thread::new_idle(
        &format!("idle/{}", cpu.id()),
        kernel.alloc_tid(),
        Arc::downgrade(kernel),
        cpu.id(),
    ));
    cpu.set_idle(thread.clone());
    thread
}

pub(crate) fn idle_loop(kernel: &Arc<Kernel>, cpu: &Arc<Cpu>, thread: &Arc<Thread>) {
    set_current(Current {
        kernel: kernel.clone(),
        thread: thread.clone(),
        cpu: cpu.clone(),
    });
    cpu.set_curthread(thread);
    log::trace!("cpu{}: idle thread running", cpu.id());

    loop {
        exorcise(cpu);

        if kernel.is_shutting_down()
            && kernel.thread_count() == 0
            && cpu.run_queue.lock().is_empty()
        {
            break;
        }

        // Idle is already as yielded as it gets.
        cpu.take_preempt();

        let has_work = !cpu.run_queue.lock().is_empty();
        if has_work {
            yield_now();
        } else {
            cpu.idle_wait();
        }
    }

    exorcise(cpu);
    log::trace!("cpu{}: idle thread stopping", cpu.id());
}
