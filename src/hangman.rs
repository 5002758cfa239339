//! Deadlock detection.
//!
//! Models spin-lock acquisition as a directed graph: actors (CPUs) wait for
//! lockables (spin locks), lockables are held by actors. Before an actor
//! spins on a lockable, the detector records the edge and walks
//! holder/waiting links; finding itself on the path means the machine is
//! about to hang, so it reports the cycle instead. Opt-in per kernel.
//!
//! All three operations serialize on one private test-and-set word. The
//! detector cannot use a spin lock for this: it runs inside spin-lock
//! acquire itself.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use arrayvec::ArrayVec;
use itertools::Itertools;

use crate::arch::{spin_wait, LockWord};
use crate::param::HANGMAN_PATH_MAX;

/// A CPU, from the detector's point of view.
pub(crate) struct Actor {
    name: Box<str>,
    /// The lockable this actor is currently spinning on, or null.
    waiting: AtomicPtr<Lockable>,
}

impl Actor {
    pub fn new(name: String) -> Self {
        Self {
            name: name.into_boxed_str(),
            waiting: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

/// A spin lock, from the detector's point of view.
pub(crate) struct Lockable {
    name: &'static str,
    /// The actor currently holding this lockable, or null.
    holder: AtomicPtr<Actor>,
}

impl Lockable {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            holder: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

pub(crate) struct Hangman {
    enabled: bool,
    word: LockWord,
}

impl Hangman {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            word: LockWord::new(),
        }
    }

    fn serialize(&self) {
        while self.word.get() || self.word.test_and_set() {
            spin_wait();
        }
    }

    /// Records that `actor` is about to spin on `lockable`, and panics with
    /// the cycle trace if that wait can never end.
    pub fn wait(&self, actor: &Actor, lockable: &Lockable) {
        if !self.enabled {
            return;
        }
        self.serialize();
        actor
            .waiting
            .store(lockable as *const _ as *mut _, Ordering::Relaxed);

        // Walk holder/waiting links starting from the lockable we want.
        // The path alternates lockables and actors and is bounded by the
        // number of CPUs, so it fits in `trace`.
        let mut trace: ArrayVec<&str, HANGMAN_PATH_MAX> = ArrayVec::new();
        trace.push(lockable.name);
        let mut cycle = false;
        let mut l = lockable as *const Lockable;
        loop {
            // SAFETY: a lockable on the path is held or waited for, so the
            // spin lock containing it cannot have been destroyed.
            let holder = unsafe { (*l).holder.load(Ordering::Relaxed) };
            if holder.is_null() {
                break;
            }
            if ptr::eq(holder, actor) {
                cycle = true;
                break;
            }
            // SAFETY: as above; actors live in CPU records owned by the
            // kernel for its whole lifetime.
            let (holder_name, next): (&str, _) = unsafe {
                (&*(*holder).name, (*holder).waiting.load(Ordering::Relaxed))
            };
            if trace.try_push(holder_name).is_err() {
                // A stale edge left behind by an earlier verdict; the cycle
                // it closed was already reported.
                break;
            }
            if next.is_null() {
                break;
            }
            // SAFETY: as above.
            if trace.try_push(unsafe { (*next).name }).is_err() {
                break;
            }
            l = next;
        }
        self.word.clear();

        if cycle {
            let path = trace.iter().join(" -> ");
            log::error!(
                "hangman: {} waiting for {} completes a cycle: {}",
                actor.name,
                lockable.name,
                path
            );
            panic!(
                "hangman: deadlock: {} waits for {}; cycle: {} -> {}",
                actor.name, lockable.name, path, actor.name
            );
        }
    }

    /// Records that `actor` got `lockable`.
    pub fn acquire(&self, actor: &Actor, lockable: &Lockable) {
        if !self.enabled {
            return;
        }
        self.serialize();
        actor.waiting.store(ptr::null_mut(), Ordering::Relaxed);
        lockable
            .holder
            .store(actor as *const _ as *mut _, Ordering::Relaxed);
        self.word.clear();
    }

    /// Records that `lockable` was released.
    pub fn release(&self, lockable: &Lockable) {
        if !self.enabled {
            return;
        }
        self.serialize();
        lockable.holder.store(ptr::null_mut(), Ordering::Relaxed);
        self.word.clear();
    }
}
