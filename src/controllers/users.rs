//! User account controller.

use std::sync::Arc;

use tracing::info;

use super::CoreController;
use crate::backends::days_since_epoch;
use crate::backends::Store;
use crate::constants::STANDARD_ID_FLOOR;
use crate::constants::SYSTEM_ID_FLOOR;
use crate::errors::Error;
use crate::errors::Result;
use crate::events::Event;
use crate::events::EventDispatcher;
use crate::locking::LockRegistry;
use crate::records::Kind;
use crate::records::User;

/// Parameters for account creation. Unset fields get the distribution
/// defaults.
#[derive(Debug, Clone, Default)]
pub struct AddUser {
    pub login: String,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub gecos: String,
    pub home: Option<String>,
    pub shell: Option<String>,
    pub password: Option<String>,
    pub system: bool,
}

pub struct UsersController {
    core: CoreController<User>,
}

impl UsersController {
    pub fn new(
        locks: &LockRegistry,
        stores: Vec<Arc<dyn Store<User>>>,
        events: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            core: CoreController::new(locks, stores, events),
        }
    }

    /// Generic registry access: load, locking, lookups.
    pub fn core(&self) -> &CoreController<User> {
        &self.core
    }

    pub fn by_login(
        &self,
        login: &str,
    ) -> Option<User> {
        self.core.get_by_name(login)
    }

    pub fn by_uid(
        &self,
        uid: u32,
    ) -> Option<User> {
        self.core.get(&uid)
    }

    pub fn add_user(
        &self,
        request: AddUser,
    ) -> Result<User> {
        validate_login(&request.login)?;

        // Hash outside the lock; a failed mutation discards it.
        let preferred = self.core.find_preferred_backend()?;
        let password = match &request.password {
            Some(cleartext) => preferred.compute_password(cleartext, None)?,
            None => "!".to_owned(),
        };

        let event = Event::new("user_added")
            .with_kind(Kind::Users)
            .with_subject(&request.login);

        let user = self.core.mutate(Some(event), |state| {
            if state.contains_name(&request.login) {
                return Err(Error::already_exists(Kind::Users, &request.login));
            }
            let uid = match request.uid {
                Some(uid) => {
                    if state.contains_key(&uid) {
                        return Err(Error::already_exists(Kind::Users, uid));
                    }
                    uid
                }
                None => next_free_id(state.keys(), request.system)?,
            };

            let mut user = User {
                login: request.login.clone(),
                uid,
                gid: request.gid.unwrap_or(uid),
                gecos: request.gecos.clone(),
                home: request
                    .home
                    .clone()
                    .unwrap_or_else(|| format!("/home/{}", request.login)),
                shell: request
                    .shell
                    .clone()
                    .unwrap_or_else(|| "/bin/bash".to_owned()),
                password,
                last_change: None,
                min_days: None,
                max_days: None,
                warn_days: None,
                inactive_days: None,
                expire_date: None,
                flag: None,
                backend: preferred.name().to_owned(),
            }
            .with_default_aging();
            user.last_change = Some(days_since_epoch());

            state.insert(user.clone());
            Ok(user)
        })?;

        info!(login = %user.login, uid = user.uid, "user added");
        Ok(user)
    }

    pub fn delete_user(
        &self,
        login: &str,
    ) -> Result<User> {
        let event = Event::new("user_deleted")
            .with_kind(Kind::Users)
            .with_subject(login);

        let user = self.core.mutate(Some(event), |state| {
            let uid = match state.key_of(login) {
                Some(uid) => *uid,
                None => return Err(Error::does_not_exist(Kind::Users, login)),
            };
            state
                .remove(&uid)
                .ok_or_else(|| Error::does_not_exist(Kind::Users, login))
        })?;

        info!(login = %user.login, uid = user.uid, "user deleted");
        Ok(user)
    }

    pub fn change_gecos(
        &self,
        login: &str,
        gecos: &str,
    ) -> Result<()> {
        self.change_field(login, "user_gecos_changed", |user| {
            user.gecos = gecos.to_owned();
        })
    }

    pub fn change_shell(
        &self,
        login: &str,
        shell: &str,
    ) -> Result<()> {
        self.change_field(login, "user_shell_changed", |user| {
            user.shell = shell.to_owned();
        })
    }

    /// Re-hash and store a new password, bumping the aging stamp.
    pub fn change_password(
        &self,
        login: &str,
        cleartext: &str,
    ) -> Result<()> {
        let store = match self.by_login(login) {
            Some(user) => self
                .core
                .store_named(&user.backend)
                .map(Ok)
                .unwrap_or_else(|| self.core.find_preferred_backend())?,
            None => return Err(Error::does_not_exist(Kind::Users, login)),
        };
        let hashed = store.compute_password(cleartext, None)?;

        self.change_field(login, "user_password_changed", |user| {
            user.password = hashed;
            user.last_change = Some(days_since_epoch());
        })
    }

    /// Lock or unlock an account by prefixing the stored hash.
    pub fn set_locked(
        &self,
        login: &str,
        locked: bool,
    ) -> Result<()> {
        let name = if locked { "user_locked" } else { "user_unlocked" };
        self.change_field(login, name, |user| {
            if locked && !user.password.starts_with('!') {
                user.password.insert(0, '!');
            } else if !locked && user.password.starts_with('!') {
                user.password.remove(0);
            }
        })
    }

    fn change_field(
        &self,
        login: &str,
        event_name: &'static str,
        apply: impl FnOnce(&mut User),
    ) -> Result<()> {
        let event = Event::new(event_name)
            .with_kind(Kind::Users)
            .with_subject(login);

        self.core.mutate(Some(event), |state| {
            let uid = match state.key_of(login) {
                Some(uid) => *uid,
                None => return Err(Error::does_not_exist(Kind::Users, login)),
            };
            if let Some(user) = state.get_mut(&uid) {
                apply(user);
            }
            Ok(())
        })
    }
}

fn validate_login(login: &str) -> Result<()> {
    if login.is_empty() {
        return Err(Error::invalid_name(Kind::Users, login, "empty"));
    }
    if login.contains(':') || login.contains('\n') {
        return Err(Error::invalid_name(
            Kind::Users,
            login,
            "contains a field or line separator",
        ));
    }
    Ok(())
}

/// First free id in the standard or system range.
pub(crate) fn next_free_id<'a>(
    taken: impl Iterator<Item = &'a u32>,
    system: bool,
) -> Result<u32> {
    let taken: std::collections::BTreeSet<u32> = taken.copied().collect();
    let range: Box<dyn Iterator<Item = u32>> = if system {
        Box::new(SYSTEM_ID_FLOOR..STANDARD_ID_FLOOR)
    } else {
        Box::new(STANDARD_ID_FLOOR..=u32::MAX - 1)
    };
    for candidate in range {
        if !taken.contains(&candidate) {
            return Ok(candidate);
        }
    }
    Err(Error::Fatal("id space exhausted".to_owned()))
}
