//! Privileges whitelist controller.
//!
//! A privilege is a group name ordinary administrators are allowed to hand
//! out without being root. The whitelist is consulted, never enforced,
//! by the core itself.

use std::sync::Arc;

use tracing::info;

use super::CoreController;
use crate::backends::Store;
use crate::errors::Error;
use crate::errors::Result;
use crate::events::Event;
use crate::events::EventDispatcher;
use crate::locking::LockRegistry;
use crate::records::Kind;
use crate::records::Privilege;

pub struct PrivilegesController {
    core: CoreController<Privilege>,
}

impl PrivilegesController {
    pub fn new(
        locks: &LockRegistry,
        stores: Vec<Arc<dyn Store<Privilege>>>,
        events: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            core: CoreController::new(locks, stores, events),
        }
    }

    pub fn core(&self) -> &CoreController<Privilege> {
        &self.core
    }

    pub fn is_whitelisted(
        &self,
        name: &str,
    ) -> bool {
        self.core.exists_name(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.core
            .all()
            .into_iter()
            .map(|privilege| privilege.name)
            .collect()
    }

    pub fn add_privilege(
        &self,
        name: &str,
    ) -> Result<Privilege> {
        if name.is_empty() || name.contains(|c: char| c.is_whitespace()) {
            return Err(Error::invalid_name(
                Kind::Privileges,
                name,
                "must be a single bare group name",
            ));
        }
        let preferred = self.core.find_preferred_backend()?;

        let event = Event::new("privilege_added")
            .with_kind(Kind::Privileges)
            .with_subject(name);

        let privilege = self.core.mutate(Some(event), |state| {
            if state.contains_name(name) {
                return Err(Error::already_exists(Kind::Privileges, name));
            }
            let privilege = Privilege {
                name: name.to_owned(),
                backend: preferred.name().to_owned(),
            };
            state.insert(privilege.clone());
            Ok(privilege)
        })?;

        info!(privilege = name, "privilege whitelisted");
        Ok(privilege)
    }

    pub fn delete_privilege(
        &self,
        name: &str,
    ) -> Result<Privilege> {
        let event = Event::new("privilege_deleted")
            .with_kind(Kind::Privileges)
            .with_subject(name);

        let privilege = self.core.mutate(Some(event), |state| {
            let key = match state.key_of(name) {
                Some(key) => key.clone(),
                None => return Err(Error::does_not_exist(Kind::Privileges, name)),
            };
            state
                .remove(&key)
                .ok_or_else(|| Error::does_not_exist(Kind::Privileges, name))
        })?;

        info!(privilege = name, "privilege removed from whitelist");
        Ok(privilege)
    }
}
