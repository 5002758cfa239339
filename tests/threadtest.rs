//! Thread lifecycle and scheduling.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use threadcore::{KernelBuilder, RawSpinLock, Semaphore};

fn wait_for(mut cond: impl FnMut() -> bool, what: &str) {
    let deadline = Instant::now() + Duration::from_secs(60);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn sem01_child_posts_parent_waits() {
    let kernel = KernelBuilder::new().cpus(2).boot();
    let k = kernel.clone();
    kernel.enter("sem01", move || {
        let done = Arc::new(Semaphore::new("done", 0));
        let d = done.clone();
        k.fork("child", None, move || d.v()).unwrap();
        done.p();

        // Once the child has fully exited, the parent is the only thread.
        let mut spins = 0u64;
        while k.thread_count() != 1 {
            threadcore::thread::yield_now();
            spins += 1;
            assert!(spins < 10_000_000, "child never exited");
        }
    });
    kernel.shutdown();
}

#[test]
fn fork_and_join_fifty_children() {
    let kernel = KernelBuilder::new().boot();
    let k = kernel.clone();
    let total = kernel.enter("parent", move || {
        let done = Arc::new(Semaphore::new("done", 0));
        let count = Arc::new(AtomicU64::new(0));
        for i in 0..50 {
            let d = done.clone();
            let c = count.clone();
            k.fork(&format!("child{}", i), None, move || {
                c.fetch_add(1, Ordering::Relaxed);
                d.v();
            })
            .unwrap();
        }
        for _ in 0..50 {
            done.p();
        }
        count.load(Ordering::Relaxed)
    });
    assert_eq!(total, 50);
    kernel.shutdown();
}

#[test]
fn yield_storm() {
    let kernel = KernelBuilder::new().cpus(2).boot();
    let k = kernel.clone();
    kernel.enter("storm", move || {
        let done = Arc::new(Semaphore::new("done", 0));
        for i in 0..8 {
            let d = done.clone();
            k.fork(&format!("spinner{}", i), None, move || {
                for _ in 0..1000 {
                    threadcore::thread::yield_now();
                }
                d.v();
            })
            .unwrap();
        }
        for _ in 0..8 {
            done.p();
        }
    });
    kernel.shutdown();
}

#[test]
fn exit_cuts_the_entry_function_short() {
    let kernel = KernelBuilder::new().cpus(2).boot();
    let k = kernel.clone();
    kernel.enter("exit", move || {
        let done = Arc::new(Semaphore::new("done", 0));
        let d = done.clone();
        k.fork("quitter", None, move || {
            d.v();
            threadcore::thread::exit();
            #[allow(unreachable_code)]
            {
                unreachable!("exit returned");
            }
        })
        .unwrap();
        done.p();
    });
    // An explicit exit is a normal death, not a fatal.
    assert!(kernel.fatal().is_none());
    kernel.shutdown();
}

#[test]
fn forked_threads_carry_their_proc() {
    let kernel = KernelBuilder::new().cpus(2).boot();
    let k = kernel.clone();
    kernel.enter("proc", move || {
        let proc = threadcore::Proc::new("init");
        let done = Arc::new(Semaphore::new("done", 0));
        let d = done.clone();
        k.fork("child", Some(proc), move || d.v()).unwrap();
        done.p();
    });
    kernel.shutdown();
}

/// Raises and lowers nest; the mask comes off only when the last of them
/// is undone.
#[test]
fn ipl_nests_and_restores() {
    let kernel = KernelBuilder::new().cpus(1).tick(None).boot();
    let k = kernel.clone();
    kernel.enter("ipl", move || {
        let cpu = k.cpu(0).clone();
        assert!(cpu.interrupts_enabled());

        let old = threadcore::intr::splhigh();
        assert_eq!(old, threadcore::intr::Ipl::None);
        assert!(!cpu.interrupts_enabled());

        // A spin lock inside the raised section must not re-enable on its
        // way out.
        let lock = RawSpinLock::new("nested");
        lock.acquire();
        lock.release();
        assert!(!cpu.interrupts_enabled());
        assert_eq!(cpu.spinlocks_held(), 0);

        let old = threadcore::intr::splx(threadcore::intr::Ipl::None);
        assert_eq!(old, threadcore::intr::Ipl::High);
        assert!(cpu.interrupts_enabled());
    });
    kernel.shutdown();
}

/// Two spinners pinned to the one CPU can only alternate if the timer tick
/// preempts whoever is running; each spin-lock release is an enable edge
/// where a pending tick is taken.
#[test]
fn tick_preempts_spinners_on_one_cpu() {
    let kernel = KernelBuilder::new()
        .cpus(1)
        .tick(Some(Duration::from_millis(1)))
        .boot();

    let stop = Arc::new(AtomicBool::new(false));
    let counts = Arc::new([AtomicU64::new(0), AtomicU64::new(0)]);
    let done = Arc::new(Semaphore::new("done", 0));

    for i in 0..2 {
        let stop = stop.clone();
        let counts = counts.clone();
        let done = done.clone();
        kernel
            .fork(&format!("spinner{}", i), None, move || {
                let beat = RawSpinLock::new("beat");
                while !stop.load(Ordering::Relaxed) {
                    beat.acquire();
                    beat.release();
                    counts[i].fetch_add(1, Ordering::Relaxed);
                }
                done.v();
            })
            .unwrap();
    }

    wait_for(
        || counts[0].load(Ordering::Relaxed) > 0 && counts[1].load(Ordering::Relaxed) > 0,
        "both spinners to make progress",
    );
    stop.store(true, Ordering::Relaxed);

    let d = done.clone();
    kernel.enter("join", move || {
        d.p();
        d.p();
    });
    kernel.shutdown();
}
