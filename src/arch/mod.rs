//! The machine layer.
//!
//! Everything the core needs from the platform lives here: a one-word
//! test-and-set, a saved-context handoff, a spin-wait hint, and the fence
//! instruction behind `membar`. The rest of the crate never touches the host
//! directly.

mod hosted;

pub use hosted::{spin_wait, LockWord, SwitchFrame};
