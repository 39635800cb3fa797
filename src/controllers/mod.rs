//! Controllers: in-memory registries over the backends.
//!
//! Each controller owns every record of one kind, indexed by primary key
//! and by name, guarded by its giant lock from the shared [`LockRegistry`].
//! Mutations go through the controller; it stamps ownership, persists
//! through the stores and emits the lifecycle event.

mod groups;
mod keywords;
mod machines;
mod privileges;
mod users;

#[cfg(test)]
mod controllers_test;

pub use groups::*;
pub use keywords::*;
pub use machines::*;
pub use privileges::*;
pub use users::*;

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use parking_lot::ReentrantMutex;
use parking_lot::ReentrantMutexGuard;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::backends::Loaded;
use crate::backends::Store;
use crate::errors::Result;
use crate::errors::StorageError;
use crate::events::Event;
use crate::events::EventDispatcher;
use crate::locking::LockRegistry;
use crate::records::Record;

pub(crate) struct ControllerState<R: Record> {
    by_key: BTreeMap<R::Key, R>,
    by_name: HashMap<String, R::Key>,
}

impl<R: Record> ControllerState<R> {
    fn new() -> Self {
        Self {
            by_key: BTreeMap::new(),
            by_name: HashMap::new(),
        }
    }

    pub(crate) fn insert(
        &mut self,
        record: R,
    ) {
        self.by_name
            .insert(record.index_name().to_owned(), record.key());
        self.by_key.insert(record.key(), record);
    }

    pub(crate) fn remove(
        &mut self,
        key: &R::Key,
    ) -> Option<R> {
        let record = self.by_key.remove(key)?;
        self.by_name.remove(record.index_name());
        Some(record)
    }

    pub(crate) fn get(
        &self,
        key: &R::Key,
    ) -> Option<&R> {
        self.by_key.get(key)
    }

    pub(crate) fn get_mut(
        &mut self,
        key: &R::Key,
    ) -> Option<&mut R> {
        self.by_key.get_mut(key)
    }

    pub(crate) fn key_of(
        &self,
        name: &str,
    ) -> Option<&R::Key> {
        self.by_name.get(name)
    }

    pub(crate) fn contains_key(
        &self,
        key: &R::Key,
    ) -> bool {
        self.by_key.contains_key(key)
    }

    pub(crate) fn contains_name(
        &self,
        name: &str,
    ) -> bool {
        self.by_name.contains_key(name)
    }

    pub(crate) fn records(&self) -> Vec<R> {
        self.by_key.values().cloned().collect()
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &R::Key> {
        self.by_key.keys()
    }
}

/// Generic registry core shared by the typed controllers.
pub struct CoreController<R: Record> {
    name: &'static str,
    giant: Arc<ReentrantMutex<()>>,
    stores: Vec<Arc<dyn Store<R>>>,
    state: Mutex<ControllerState<R>>,
    events: Arc<EventDispatcher>,
}

impl<R: Record> CoreController<R> {
    pub fn new(
        locks: &LockRegistry,
        stores: Vec<Arc<dyn Store<R>>>,
        events: Arc<EventDispatcher>,
    ) -> Self {
        let name = R::KIND.controller_name();
        Self {
            name,
            giant: locks.giant(name),
            stores,
            state: Mutex::new(ControllerState::new()),
            events,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Take the giant lock explicitly. Reentrant, so nested controller
    /// calls on the same thread do not deadlock.
    pub fn acquire(&self) -> ReentrantMutexGuard<'_, ()> {
        self.giant.lock()
    }

    /// Non-blocking probe: would `acquire` block right now?
    pub fn is_locked(&self) -> bool {
        self.giant.try_lock().is_none()
    }

    /// Load (or reload) the whole registry from every enabled store.
    ///
    /// Stores fail independently: one broken backend logs an error and
    /// contributes nothing, the others still populate the registry. A store
    /// that healed data during parsing gets one synchronous persist, unless
    /// we lack the permissions, which is the normal client-mode situation
    /// and stays silent.
    pub fn load(&self) -> Result<()> {
        let _giant = self.acquire();
        let mut state = ControllerState::new();

        for store in &self.stores {
            if !store.is_enabled() {
                continue;
            }
            let Loaded {
                records,
                needs_rewrite,
            } = match store.load() {
                Ok(loaded) => loaded,
                Err(err) => {
                    error!(
                        controller = self.name,
                        backend = store.name(),
                        error = %err,
                        "store failed to load, skipping"
                    );
                    continue;
                }
            };

            for record in &records {
                if state.contains_key(&record.key()) {
                    warn!(
                        controller = self.name,
                        backend = store.name(),
                        key = %record.key(),
                        "duplicate key across stores, first one wins"
                    );
                    continue;
                }
                state.insert(record.clone());
            }

            if needs_rewrite {
                if let Err(err) = store.save(&records) {
                    if err.is_permission_denied() {
                        debug!(
                            controller = self.name,
                            backend = store.name(),
                            "healed data not persisted, no write access"
                        );
                    } else {
                        error!(
                            controller = self.name,
                            backend = store.name(),
                            error = %err,
                            "failed to persist healed data"
                        );
                    }
                } else {
                    info!(
                        controller = self.name,
                        backend = store.name(),
                        "healed data persisted"
                    );
                }
            }
        }

        let count = state.by_key.len();
        *self.state.lock() = state;
        info!(controller = self.name, count, "registry loaded");
        Ok(())
    }

    pub fn reload(&self) -> Result<()> {
        debug!(controller = self.name, "reload requested");
        self.load()
    }

    /// Elect the backend new records are written to.
    ///
    /// First enabled store without a priority concept wins outright.
    /// Otherwise the highest priority wins, first registered on ties.
    pub fn find_preferred_backend(&self) -> Result<Arc<dyn Store<R>>> {
        let mut champion: Option<Arc<dyn Store<R>>> = None;
        for store in &self.stores {
            if !store.is_enabled() {
                continue;
            }
            match &champion {
                None => {
                    if store.priority().is_none() {
                        return Ok(Arc::clone(store));
                    }
                    champion = Some(Arc::clone(store));
                }
                Some(current) => {
                    if let (Some(priority), Some(best)) = (store.priority(), current.priority()) {
                        if priority > best {
                            champion = Some(Arc::clone(store));
                        }
                    }
                }
            }
        }
        champion.ok_or_else(|| {
            StorageError::NoWritableBackend {
                controller: self.name,
            }
            .into()
        })
    }

    pub fn get(
        &self,
        key: &R::Key,
    ) -> Option<R> {
        let _giant = self.acquire();
        self.state.lock().get(key).cloned()
    }

    pub fn get_by_name(
        &self,
        name: &str,
    ) -> Option<R> {
        let _giant = self.acquire();
        let state = self.state.lock();
        let key = state.key_of(name)?.clone();
        state.get(&key).cloned()
    }

    pub fn exists(
        &self,
        key: &R::Key,
    ) -> bool {
        let _giant = self.acquire();
        self.state.lock().contains_key(key)
    }

    pub fn exists_name(
        &self,
        name: &str,
    ) -> bool {
        let _giant = self.acquire();
        self.state.lock().contains_name(name)
    }

    /// All records, ordered by key.
    pub fn all(&self) -> Vec<R> {
        let _giant = self.acquire();
        self.state.lock().records()
    }

    pub fn len(&self) -> usize {
        let _giant = self.acquire();
        self.state.lock().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run a mutation under the giant lock, persist the result through
    /// every enabled store, then emit `event` (when given) asynchronously.
    ///
    /// The mutation sees the live state; if it fails nothing is persisted
    /// and nothing is emitted.
    pub(crate) fn mutate<T>(
        &self,
        event: Option<Event>,
        op: impl FnOnce(&mut ControllerState<R>) -> Result<T>,
    ) -> Result<T> {
        let _giant = self.acquire();
        self.mutate_entity(event, op)
    }

    /// Attribute-level mutation without the giant. The caller holds a
    /// per-entity lock from the registry; the state mutex alone keeps the
    /// mutation and its persist atomic. Structural changes (insert, remove)
    /// go through [`Self::mutate`].
    pub(crate) fn mutate_entity<T>(
        &self,
        event: Option<Event>,
        op: impl FnOnce(&mut ControllerState<R>) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.lock();
        let outcome = op(&mut state)?;

        let records = state.records();
        for store in &self.stores {
            if store.is_enabled() {
                store.save(&records)?;
            }
        }
        drop(state);

        if let Some(event) = event {
            self.events.dispatch(event);
        }
        Ok(outcome)
    }

    /// Look a store up by backend name, for operations that must go to the
    /// backend already owning a record.
    pub fn store_named(
        &self,
        name: &str,
    ) -> Option<Arc<dyn Store<R>>> {
        self.stores
            .iter()
            .find(|store| store.name() == name)
            .map(Arc::clone)
    }

    pub(crate) fn events(&self) -> &Arc<EventDispatcher> {
        &self.events
    }
}
