//! The process container.
//!
//! Threads carry a reference to an owning `Proc`; the substrate stores it
//! and hands it back but never interprets it. Process semantics live with
//! the client.

use std::sync::Arc;

pub struct Proc {
    name: Box<str>,
}

impl Proc {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self { name: name.into() })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
