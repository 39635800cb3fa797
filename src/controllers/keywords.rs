//! Keyword controller.
//!
//! Keywords classify shared content. They form a shallow forest: each
//! keyword names at most one parent. Deleting a keyword reparents its
//! children onto the deleted keyword's own parent, so the forest never
//! dangles.

use std::sync::Arc;

use tracing::info;

use super::CoreController;
use crate::backends::Store;
use crate::errors::Error;
use crate::errors::Result;
use crate::events::Event;
use crate::events::EventDispatcher;
use crate::locking::LockRegistry;
use crate::records::Keyword;
use crate::records::Kind;

pub struct KeywordsController {
    core: CoreController<Keyword>,
}

impl KeywordsController {
    pub fn new(
        locks: &LockRegistry,
        stores: Vec<Arc<dyn Store<Keyword>>>,
        events: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            core: CoreController::new(locks, stores, events),
        }
    }

    pub fn core(&self) -> &CoreController<Keyword> {
        &self.core
    }

    pub fn by_name(
        &self,
        name: &str,
    ) -> Option<Keyword> {
        self.core.get_by_name(name)
    }

    pub fn add_keyword(
        &self,
        name: &str,
        parent: &str,
        description: &str,
    ) -> Result<Keyword> {
        validate_keyword_name(name)?;
        let preferred = self.core.find_preferred_backend()?;

        let event = Event::new("keyword_added")
            .with_kind(Kind::Keywords)
            .with_subject(name);

        let keyword = self.core.mutate(Some(event), |state| {
            if state.contains_name(name) {
                return Err(Error::already_exists(Kind::Keywords, name));
            }
            if !parent.is_empty() && !state.contains_name(parent) {
                return Err(Error::does_not_exist(Kind::Keywords, parent));
            }
            let keyword = Keyword {
                name: name.to_owned(),
                parent: parent.to_owned(),
                description: description.to_owned(),
                backend: preferred.name().to_owned(),
            };
            state.insert(keyword.clone());
            Ok(keyword)
        })?;

        info!(keyword = name, parent, "keyword added");
        Ok(keyword)
    }

    pub fn delete_keyword(
        &self,
        name: &str,
    ) -> Result<Keyword> {
        let event = Event::new("keyword_deleted")
            .with_kind(Kind::Keywords)
            .with_subject(name);

        let keyword = self.core.mutate(Some(event), |state| {
            let key = match state.key_of(name) {
                Some(key) => key.clone(),
                None => return Err(Error::does_not_exist(Kind::Keywords, name)),
            };
            let keyword = state
                .remove(&key)
                .ok_or_else(|| Error::does_not_exist(Kind::Keywords, name))?;

            // Reparent children onto the deleted keyword's parent.
            let orphans: Vec<String> = state
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .into_iter()
                .filter(|child| {
                    state
                        .get(child)
                        .map(|record| record.parent == keyword.name)
                        .unwrap_or(false)
                })
                .collect();
            for child in orphans {
                if let Some(record) = state.get_mut(&child) {
                    record.parent = keyword.parent.clone();
                }
            }
            Ok(keyword)
        })?;

        info!(keyword = name, "keyword deleted");
        Ok(keyword)
    }

    pub fn change_description(
        &self,
        name: &str,
        description: &str,
    ) -> Result<()> {
        let event = Event::new("keyword_description_changed")
            .with_kind(Kind::Keywords)
            .with_subject(name);

        self.core.mutate(Some(event), |state| {
            let key = match state.key_of(name) {
                Some(key) => key.clone(),
                None => return Err(Error::does_not_exist(Kind::Keywords, name)),
            };
            if let Some(keyword) = state.get_mut(&key) {
                keyword.description = description.to_owned();
            }
            Ok(())
        })
    }

    /// Direct children of `name`, or the roots when `name` is empty.
    pub fn children_of(
        &self,
        name: &str,
    ) -> Vec<Keyword> {
        self.core
            .all()
            .into_iter()
            .filter(|keyword| keyword.parent == name)
            .collect()
    }
}

fn validate_keyword_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_name(Kind::Keywords, name, "empty"));
    }
    if name.contains(':') || name.contains('\n') {
        return Err(Error::invalid_name(
            Kind::Keywords,
            name,
            "contains a field or line separator",
        ));
    }
    Ok(())
}
