//! ABBA spin-lock ordering under the hangman.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use threadcore::{KernelBuilder, RawSpinLock};

/// Thread A takes X then Y; thread B takes Y then X. The hangman must rule
/// before the machine hangs silently.
#[test]
fn abba_spinlock_order_is_reported() {
    let kernel = KernelBuilder::new()
        .cpus(2)
        .tick(None)
        .detect_deadlocks(true)
        .boot();

    let x = Arc::new(RawSpinLock::new("lock-x"));
    let y = Arc::new(RawSpinLock::new("lock-y"));
    let a_has_x = Arc::new(AtomicBool::new(false));
    let b_has_y = Arc::new(AtomicBool::new(false));

    {
        let (x, y) = (x.clone(), y.clone());
        let (mine, theirs) = (a_has_x.clone(), b_has_y.clone());
        kernel
            .fork("thread-a", None, move || {
                x.acquire();
                mine.store(true, Ordering::Relaxed);
                while !theirs.load(Ordering::Relaxed) {
                    std::hint::spin_loop();
                }
                y.acquire();
                // Unreachable: the detector rules first.
                y.release();
                x.release();
            })
            .unwrap();
    }
    {
        let (x, y) = (x.clone(), y.clone());
        let (mine, theirs) = (b_has_y.clone(), a_has_x.clone());
        kernel
            .fork("thread-b", None, move || {
                y.acquire();
                mine.store(true, Ordering::Relaxed);
                while !theirs.load(Ordering::Relaxed) {
                    std::hint::spin_loop();
                }
                x.acquire();
                x.release();
                y.release();
            })
            .unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(30);
    let verdict = loop {
        if let Some(verdict) = kernel.fatal() {
            break verdict;
        }
        assert!(Instant::now() < deadline, "hangman never ruled");
        std::thread::sleep(Duration::from_millis(5));
    };
    assert!(verdict.contains("hangman"), "{}", verdict);
    assert!(
        verdict.contains("lock-x") && verdict.contains("lock-y"),
        "{}",
        verdict
    );

    // The machine halts on a fatal; abandon it without shutdown. Both locks
    // are still marked held by the wedged CPUs, so they must be leaked, not
    // destroyed.
    std::mem::forget(x);
    std::mem::forget(y);
}
