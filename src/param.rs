//! Tunable constants.

use static_assertions::const_assert;

/// Hard upper bound on the number of CPUs a kernel may be booted with.
/// Bounds the hangman's wait-for walk.
pub const MAXCPUS: usize = 64;

/// Default number of CPUs for `KernelBuilder::new()`.
pub const NCPU: usize = 4;

/// Default stack size for kernel threads.
pub const STACKSIZE: usize = 256 * 1024;

/// Default timer tick period, in milliseconds.
pub const TICK_MS: u64 = 1;

/// Longest wait-for path the hangman can ever see: one actor and one
/// lockable per CPU.
pub(crate) const HANGMAN_PATH_MAX: usize = 2 * MAXCPUS;

const_assert!(MAXCPUS >= 1);
const_assert!(NCPU >= 1 && NCPU <= MAXCPUS);
const_assert!(STACKSIZE >= 64 * 1024);
