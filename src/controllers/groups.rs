//! Group controller.

use std::sync::Arc;

use tracing::debug;
use tracing::info;

use super::next_free_id;
use super::CoreController;
use crate::backends::Store;
use crate::errors::Error;
use crate::errors::Result;
use crate::events::Event;
use crate::events::EventDispatcher;
use crate::locking::LockRegistry;
use crate::records::Group;
use crate::records::Kind;

#[derive(Debug, Clone, Default)]
pub struct AddGroup {
    pub name: String,
    pub gid: Option<u32>,
    pub description: String,
    pub skel: String,
    pub members: Vec<String>,
    pub system: bool,
}

pub struct GroupsController {
    core: CoreController<Group>,
}

impl GroupsController {
    pub fn new(
        locks: &LockRegistry,
        stores: Vec<Arc<dyn Store<Group>>>,
        events: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            core: CoreController::new(locks, stores, events),
        }
    }

    pub fn core(&self) -> &CoreController<Group> {
        &self.core
    }

    pub fn by_name(
        &self,
        name: &str,
    ) -> Option<Group> {
        self.core.get_by_name(name)
    }

    pub fn by_gid(
        &self,
        gid: u32,
    ) -> Option<Group> {
        self.core.get(&gid)
    }

    pub fn add_group(
        &self,
        request: AddGroup,
    ) -> Result<Group> {
        validate_group_name(&request.name)?;
        let preferred = self.core.find_preferred_backend()?;

        let event = Event::new("group_added")
            .with_kind(Kind::Groups)
            .with_subject(&request.name);

        let group = self.core.mutate(Some(event), |state| {
            if state.contains_name(&request.name) {
                return Err(Error::already_exists(Kind::Groups, &request.name));
            }
            let gid = match request.gid {
                Some(gid) => {
                    if state.contains_key(&gid) {
                        return Err(Error::already_exists(Kind::Groups, gid));
                    }
                    gid
                }
                None => next_free_id(state.keys(), request.system)?,
            };

            let mut members = request.members.clone();
            members.sort_unstable();
            members.dedup();

            let group = Group {
                name: request.name.clone(),
                gid,
                password: "!".to_owned(),
                members,
                description: request.description.clone(),
                skel: request.skel.clone(),
                backend: preferred.name().to_owned(),
            };
            state.insert(group.clone());
            Ok(group)
        })?;

        info!(group = %group.name, gid = group.gid, "group added");
        Ok(group)
    }

    pub fn delete_group(
        &self,
        name: &str,
    ) -> Result<Group> {
        let event = Event::new("group_deleted")
            .with_kind(Kind::Groups)
            .with_subject(name);

        let group = self.core.mutate(Some(event), |state| {
            let gid = match state.key_of(name) {
                Some(gid) => *gid,
                None => return Err(Error::does_not_exist(Kind::Groups, name)),
            };
            state
                .remove(&gid)
                .ok_or_else(|| Error::does_not_exist(Kind::Groups, name))
        })?;

        info!(group = %group.name, gid = group.gid, "group deleted");
        Ok(group)
    }

    /// Add the given logins to the group. Logins already present are
    /// skipped. Returns the logins actually added.
    pub fn add_users_in_group(
        &self,
        name: &str,
        logins: &[String],
    ) -> Result<Vec<String>> {
        let event = Event::new("group_members_added")
            .with_kind(Kind::Groups)
            .with_subject(name);

        self.core.mutate(Some(event), |state| {
            let gid = match state.key_of(name) {
                Some(gid) => *gid,
                None => return Err(Error::does_not_exist(Kind::Groups, name)),
            };
            let mut added = Vec::new();
            if let Some(group) = state.get_mut(&gid) {
                for login in logins {
                    if group.has_member(login) {
                        debug!(group = name, login = %login, "already a member");
                        continue;
                    }
                    group.members.push(login.clone());
                    added.push(login.clone());
                }
            }
            Ok(added)
        })
    }

    /// Remove the given logins from the group. Logins not present are
    /// skipped. Returns the logins actually removed.
    pub fn delete_users_from_group(
        &self,
        name: &str,
        logins: &[String],
    ) -> Result<Vec<String>> {
        let event = Event::new("group_members_removed")
            .with_kind(Kind::Groups)
            .with_subject(name);

        self.core.mutate(Some(event), |state| {
            let gid = match state.key_of(name) {
                Some(gid) => *gid,
                None => return Err(Error::does_not_exist(Kind::Groups, name)),
            };
            let mut removed = Vec::new();
            if let Some(group) = state.get_mut(&gid) {
                for login in logins {
                    if group.has_member(login) {
                        group.members.retain(|member| member != login);
                        removed.push(login.clone());
                    } else {
                        debug!(group = name, login = %login, "not a member");
                    }
                }
            }
            Ok(removed)
        })
    }

    pub fn change_description(
        &self,
        name: &str,
        description: &str,
    ) -> Result<()> {
        let event = Event::new("group_description_changed")
            .with_kind(Kind::Groups)
            .with_subject(name);

        self.core.mutate(Some(event), |state| {
            let gid = match state.key_of(name) {
                Some(gid) => *gid,
                None => return Err(Error::does_not_exist(Kind::Groups, name)),
            };
            if let Some(group) = state.get_mut(&gid) {
                group.description = description.to_owned();
            }
            Ok(())
        })
    }

    /// Drop a deleted user from every group holding it. Used by the context
    /// to keep membership referentially sound.
    pub fn purge_member(
        &self,
        login: &str,
    ) -> Result<Vec<String>> {
        let event = Event::new("group_members_removed")
            .with_kind(Kind::Groups)
            .with_subject(login);

        self.core.mutate(Some(event), |state| {
            let holding: Vec<u32> = state
                .keys()
                .copied()
                .collect::<Vec<_>>()
                .into_iter()
                .filter(|gid| {
                    state
                        .get(gid)
                        .map(|group| group.has_member(login))
                        .unwrap_or(false)
                })
                .collect();

            let mut purged = Vec::new();
            for gid in holding {
                if let Some(group) = state.get_mut(&gid) {
                    group.members.retain(|member| member != login);
                    purged.push(group.name.clone());
                }
            }
            Ok(purged)
        })
    }
}

fn validate_group_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_name(Kind::Groups, name, "empty"));
    }
    if name.contains(':') || name.contains(',') || name.contains('\n') {
        return Err(Error::invalid_name(
            Kind::Groups,
            name,
            "contains a field or list separator",
        ));
    }
    Ok(())
}
