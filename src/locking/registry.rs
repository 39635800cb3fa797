use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use parking_lot::ReentrantMutex;
use tracing::trace;

/// Process-wide lock registry.
///
/// Every controller owns one reentrant "giant" lock covering its whole
/// registry; bulk operations and nested calls on the same thread re-enter it
/// freely. Fine-grained per-entity locks serialize mutations of a single
/// record without stalling readers of the rest of the registry.
///
/// The registry hands out `Arc` handles, so a lock stays valid while any
/// holder keeps it, even after `forget_entity`.
#[derive(Debug, Default)]
pub struct LockRegistry {
    giants: DashMap<&'static str, Arc<ReentrantMutex<()>>>,
    entities: DashMap<(&'static str, String), Arc<Mutex<()>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Giant lock for one controller, created on first use.
    pub fn giant(
        &self,
        controller: &'static str,
    ) -> Arc<ReentrantMutex<()>> {
        self.giants
            .entry(controller)
            .or_insert_with(|| {
                trace!(%controller, "creating giant lock");
                Arc::new(ReentrantMutex::new(()))
            })
            .clone()
    }

    /// Per-entity lock, created on first use.
    pub fn entity(
        &self,
        controller: &'static str,
        key: &str,
    ) -> Arc<Mutex<()>> {
        self.entities
            .entry((controller, key.to_owned()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the registry's handle on a per-entity lock, typically after the
    /// entity itself was deleted. Live holders keep their `Arc`.
    pub fn forget_entity(
        &self,
        controller: &'static str,
        key: &str,
    ) {
        self.entities.remove(&(controller, key.to_owned()));
    }

    /// Non-blocking probe: is this controller's giant currently held?
    ///
    /// Because the giant is reentrant, the probe reports `false` when the
    /// calling thread itself is the holder. That matches the intended use,
    /// "can I take it right now without blocking".
    pub fn is_locked(
        &self,
        controller: &'static str,
    ) -> bool {
        let giant = self.giant(controller);
        let probe = giant.try_lock();
        probe.is_none()
    }

    #[cfg(test)]
    pub(crate) fn entity_count(&self) -> usize {
        self.entities.len()
    }
}
