//! Semaphore, sleeplock, condition variable and wait channel behavior.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use threadcore::{Condvar, KernelBuilder, RawSpinLock, Semaphore, Sleeplock, SpinLock, WaitChannel};

fn wait_for(mut cond: impl FnMut() -> bool, what: &str) {
    let deadline = Instant::now() + Duration::from_secs(60);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn lock01_two_threads_count_to_200000() {
    let kernel = KernelBuilder::new().cpus(2).boot();
    let k = kernel.clone();
    let total = kernel.enter("lock01", move || {
        let counter = Arc::new(Sleeplock::new("counter", 0u64));
        let done = Arc::new(Semaphore::new("done", 0));
        for i in 0..2 {
            let c = counter.clone();
            let d = done.clone();
            k.fork(&format!("adder{}", i), None, move || {
                for _ in 0..100_000 {
                    *c.lock() += 1;
                }
                d.v();
            })
            .unwrap();
        }
        done.p();
        done.p();
        let total = *counter.lock();
        total
    });
    assert_eq!(total, 200_000);
    kernel.shutdown();
}

#[test]
fn cv01_waiter_sees_value_with_lock_held() {
    let kernel = KernelBuilder::new().cpus(2).boot();
    let k = kernel.clone();
    let observed = kernel.enter("cv01", move || {
        let x = Arc::new(Sleeplock::new("x", 0i32));
        let cond = Arc::new(Condvar::new("x-changed"));
        let out = Arc::new(Semaphore::new("out", 0));
        let seen = Arc::new(AtomicU64::new(0));

        {
            let (x, cond, out, seen) = (x.clone(), cond.clone(), out.clone(), seen.clone());
            k.fork("waiter", None, move || {
                let mut guard = x.lock();
                while *guard < 5 {
                    cond.wait(&mut guard);
                }
                // Back from wait() the lock is ours again.
                assert!(x.holding());
                seen.store(*guard as u64, Ordering::Relaxed);
                drop(guard);
                out.v();
            })
            .unwrap();
        }
        {
            let (x, cond) = (x.clone(), cond.clone());
            k.fork("setter", None, move || {
                let mut guard = x.lock();
                *guard = 5;
                cond.broadcast();
            })
            .unwrap();
        }

        out.p();
        seen.load(Ordering::Relaxed)
    });
    assert_eq!(observed, 5);
    kernel.shutdown();
}

/// k posts then k waits leave the count at zero without anyone blocking.
#[test]
fn semaphore_counts_and_drains() {
    let kernel = KernelBuilder::new().cpus(2).boot();
    kernel.enter("semcount", move || {
        let sem = Semaphore::new("k", 0);
        for _ in 0..1000 {
            sem.v();
        }
        assert_eq!(sem.count(), 1000);
        for _ in 0..1000 {
            sem.p();
        }
        assert_eq!(sem.count(), 0);
    });
    kernel.shutdown();
}

struct FifoState {
    parked: usize,
    order: Vec<usize>,
}

/// Sleepers admitted one at a time are woken strictly in sleep order.
#[test]
fn wait_channel_wakes_in_fifo_order() {
    let kernel = KernelBuilder::new().cpus(2).boot();
    let k = kernel.clone();
    let order = kernel.enter("fifo", move || {
        let state = Arc::new(SpinLock::new(
            "fifo",
            FifoState {
                parked: 0,
                order: Vec::new(),
            },
        ));
        let wchan = Arc::new(WaitChannel::new("fifo"));
        let done = Arc::new(Semaphore::new("done", 0));

        for i in 0..5 {
            let (s, w, d) = (state.clone(), wchan.clone(), done.clone());
            k.fork(&format!("sleeper{}", i), None, move || {
                let mut guard = s.lock();
                guard.parked += 1;
                w.sleep(&mut guard);
                guard.order.push(i);
                drop(guard);
                d.v();
            })
            .unwrap();

            // The lock is released only once the sleeper is on the channel,
            // so seeing the count means it is queued; admit the next one.
            while state.lock().parked != i + 1 {
                threadcore::thread::yield_now();
            }
        }

        for n in 0..5 {
            {
                let guard = state.lock();
                wchan.wake_one(&guard);
            }
            // Let the woken sleeper record itself before the next wake.
            while state.lock().order.len() != n + 1 {
                threadcore::thread::yield_now();
            }
        }

        for _ in 0..5 {
            done.p();
        }
        let guard = state.lock();
        assert!(wchan.is_empty(&guard));
        guard.order.clone()
    });
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
    kernel.shutdown();
}

#[test]
fn wake_on_empty_channel_is_a_noop() {
    let kernel = KernelBuilder::new().cpus(1).boot();
    kernel.enter("empty-wake", move || {
        let lock = SpinLock::new("guard", ());
        let wchan = WaitChannel::new("nobody");
        let guard = lock.lock();
        wchan.wake_one(&guard);
        wchan.wake_all(&guard);
        assert!(wchan.is_empty(&guard));
    });
    kernel.shutdown();
}

#[test]
fn reacquiring_a_sleeplock_is_fatal() {
    let kernel = KernelBuilder::new().cpus(1).tick(None).boot();
    let lock = Arc::new(Sleeplock::new("once", ()));
    let l = lock.clone();
    kernel
        .fork("offender", None, move || {
            let _guard = l.lock();
            let _second = l.lock();
        })
        .unwrap();

    wait_for(|| kernel.fatal().is_some(), "the verdict");
    assert!(kernel.fatal().unwrap().contains("already holds"));
    // The machine halts on a fatal; abandon it without shutdown.
}

#[test]
fn releasing_an_unheld_spinlock_is_fatal() {
    let kernel = KernelBuilder::new().cpus(1).tick(None).boot();
    kernel
        .fork("offender", None, move || {
            let stray = RawSpinLock::new("stray");
            stray.release();
        })
        .unwrap();

    wait_for(|| kernel.fatal().is_some(), "the verdict");
    assert!(kernel.fatal().unwrap().contains("does not hold"));
}
