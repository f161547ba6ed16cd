use crate::{Attributes, Decision, Engine};
use parking_lot::RwLock;
use std::sync::Arc;

/// Holds the currently active [`Engine`].
///
/// Handles are cheap to clone and all clones observe the same engine. Readers take a snapshot
/// with [`Authorizer::get`], which only holds the lock long enough to clone an `Arc`; a
/// concurrent [`Authorizer::set`] never affects a snapshot that was already taken.
#[derive(Debug)]
pub struct Authorizer<E>(Arc<RwLock<Arc<E>>>);

// === impl Authorizer ===

impl<E> Clone for Authorizer<E> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<E: Engine> Authorizer<E> {
    pub fn new(engine: E) -> Self {
        Self(Arc::new(RwLock::new(Arc::new(engine))))
    }

    /// Returns the latest published engine.
    pub fn get(&self) -> Arc<E> {
        self.0.read().clone()
    }

    /// Publishes a new engine for all subsequent reads.
    pub fn set(&self, engine: E) {
        let engine = Arc::new(engine);
        *self.0.write() = engine;
    }

    /// Decides a request against a single snapshot of the current engine.
    pub fn decide(&self, attrs: &Attributes) -> Decision {
        self.get().decide(attrs)
    }
}
