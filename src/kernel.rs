//! The kernel context.
//!
//! All per-machine state hangs off one `Kernel` value instead of file-scope
//! statics, so several kernels can coexist in a process (each test boots
//! its own).

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::clock;
use crate::cpu::Cpu;
use crate::hangman::Hangman;
use crate::param;
use crate::proc::Proc;
use crate::thread::{self, ForkError};

pub struct KernelBuilder {
    ncpus: usize,
    stack_size: usize,
    tick: Option<Duration>,
    detect_deadlocks: bool,
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self {
            ncpus: param::NCPU,
            stack_size: param::STACKSIZE,
            tick: Some(Duration::from_millis(param::TICK_MS)),
            detect_deadlocks: false,
        }
    }

    pub fn cpus(mut self, ncpus: usize) -> Self {
        assert!(
            ncpus >= 1 && ncpus <= param::MAXCPUS,
            "kernel: {} cpus out of range",
            ncpus
        );
        self.ncpus = ncpus;
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    /// Timer tick period; `None` disables preemption.
    pub fn tick(mut self, period: Option<Duration>) -> Self {
        self.tick = period;
        self
    }

    /// Enables the hangman deadlock detector.
    pub fn detect_deadlocks(mut self, enabled: bool) -> Self {
        self.detect_deadlocks = enabled;
        self
    }

    /// Brings the machine up: one idle thread per CPU, plus the ticker when
    /// a tick period is configured.
    pub fn boot(self) -> Arc<Kernel> {
        let cpus: Box<[Arc<Cpu>]> = (0..self.ncpus)
            .map(|i| Arc::new(Cpu::new(i as u32)))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let kernel = Arc::new(Kernel {
            cpus,
            stack_size: self.stack_size,
            hangman: Hangman::new(self.detect_deadlocks),
            threads: AtomicUsize::new(0),
            next_tid: AtomicU64::new(1),
            fork_rr: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
            fatal: Mutex::new(None),
            ticker: Mutex::new(None),
            idle_handles: Mutex::new(Vec::new()),
        });

        for cpu in kernel.cpus.iter() {
            let idle = thread::make_idle(&kernel, cpu);
            let k = kernel.clone();
            let c = cpu.clone();
            let handle = std::thread::Builder::new()
                .name(idle.name().to_string())
                .stack_size(self.stack_size)
                .spawn(move || thread::idle_loop(&k, &c, &idle))
                .expect("boot: could not spawn idle thread");
            kernel
                .idle_handles
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(handle);
        }

        if let Some(period) = self.tick {
            let ticker = clock::start_ticker(&kernel, period);
            *kernel.ticker.lock().unwrap_or_else(|e| e.into_inner()) = Some(ticker);
        }

        log::debug!(
            "kernel booted: {} cpus, tick {:?}, hangman {}",
            self.ncpus,
            self.tick,
            if self.detect_deadlocks { "on" } else { "off" }
        );
        kernel
    }
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Kernel {
    cpus: Box<[Arc<Cpu>]>,
    stack_size: usize,
    hangman: Hangman,

    /// Live kernel threads, idle threads excluded.
    threads: AtomicUsize,
    next_tid: AtomicU64,
    fork_rr: AtomicUsize,

    shutting_down: AtomicBool,

    /// First unrecoverable error, if any. A wedged kernel is abandoned, not
    /// shut down; tests observe this instead.
    fatal: Mutex<Option<String>>,

    ticker: Mutex<Option<JoinHandle<()>>>,
    idle_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Kernel {
    /// Boots a kernel with default parameters.
    pub fn boot() -> Arc<Kernel> {
        KernelBuilder::new().boot()
    }

    pub fn cpus(&self) -> &[Arc<Cpu>] {
        &self.cpus
    }

    pub fn cpu(&self, id: u32) -> &Arc<Cpu> {
        &self.cpus[id as usize]
    }

    /// Live kernel threads, idle threads excluded.
    pub fn thread_count(&self) -> usize {
        self.threads.load(Ordering::Relaxed)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    /// The first unrecoverable error recorded by a dying thread, if any.
    pub fn fatal(&self) -> Option<String> {
        self.fatal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Creates a new thread running `entry` on a kernel-chosen CPU.
    pub fn fork(
        self: &Arc<Self>,
        name: &str,
        proc: Option<Arc<Proc>>,
        entry: impl FnOnce() + Send + 'static,
    ) -> Result<(), ForkError> {
        thread::fork(self, name, proc, entry)
    }

    /// Runs `f` inside the scheduling domain and returns its value. This is
    /// how host code (tests, a shell) gets onto the machine.
    pub fn enter<T: Send + 'static>(
        self: &Arc<Self>,
        name: &str,
        f: impl FnOnce() -> T + Send + 'static,
    ) -> T {
        let (tx, rx) = mpsc::channel();
        thread::fork(self, name, None, move || {
            let _ = tx.send(f());
        })
        .expect("enter: fork failed");
        match rx.recv() {
            Ok(value) => value,
            Err(_) => panic!(
                "kernel: thread {} died before returning: {:?}",
                name,
                self.fatal()
            ),
        }
    }

    /// Waits for every kernel thread to finish, then stops the idle threads
    /// and the ticker and joins them all.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);

        for cpu in self.cpus.iter() {
            cpu.kick();
        }
        let handles: Vec<JoinHandle<()>> = self
            .idle_handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.join();
        }

        // The ticker stops itself once the machine is quiet.
        let ticker = self
            .ticker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(ticker) = ticker {
            let _ = ticker.join();
        }
        log::debug!("kernel shut down");
    }

    pub(crate) fn hangman(&self) -> &Hangman {
        &self.hangman
    }

    pub(crate) fn stack_size(&self) -> usize {
        self.stack_size
    }

    pub(crate) fn alloc_tid(&self) -> u64 {
        self.next_tid.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn pick_cpu(&self) -> u32 {
        (self.fork_rr.fetch_add(1, Ordering::Relaxed) % self.cpus.len()) as u32
    }

    pub(crate) fn thread_forked(&self) {
        self.threads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn thread_exited(&self) {
        self.threads.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fatal(&self, message: String) {
        log::error!("kernel fatal: {}", message);
        let mut fatal = self.fatal.lock().unwrap_or_else(|e| e.into_inner());
        if fatal.is_none() {
            *fatal = Some(message);
        }
    }
}
