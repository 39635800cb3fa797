//! JSON document backend.
//!
//! One array document per record kind under a state directory. This is the
//! only backend persisting machines; for users and groups it acts as an
//! alternate store behind the shadow backend, selected only when its
//! configured priority says so.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use super::write_atomically;
use super::Backend;
use super::Loaded;
use super::Store;
use crate::config::JsonBackendConfig;
use crate::config::PathsConfig;
use crate::errors::io_error;
use crate::errors::Result;
use crate::errors::StorageError;
use crate::records::Group;
use crate::records::Kind;
use crate::records::Machine;
use crate::records::Record;
use crate::records::User;
use crate::watcher::ChangeWatcher;
use crate::watcher::ReloadFn;
use crate::watcher::WatchHint;

pub const JSON_BACKEND_NAME: &str = "jsonfile";

const USERS_FILE: &str = "users.json";
const GROUPS_FILE: &str = "groups.json";
const MACHINES_FILE: &str = "machines.json";

pub struct JsonFileBackend {
    enabled: AtomicBool,
    priority: i32,
    dir: PathBuf,
    users_hint: WatchHint,
    groups_hint: WatchHint,
    machines_hint: WatchHint,
}

impl JsonFileBackend {
    pub fn new(
        paths: &PathsConfig,
        config: &JsonBackendConfig,
    ) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            priority: config.priority,
            dir: paths.json_dir.clone(),
            users_hint: WatchHint::new(),
            groups_hint: WatchHint::new(),
            machines_hint: WatchHint::new(),
        }
    }

    pub fn install_watches(
        &self,
        watcher: &ChangeWatcher,
        users_reload: ReloadFn,
        groups_reload: ReloadFn,
        machines_reload: ReloadFn,
    ) -> Result<()> {
        watcher.watch(
            &self.dir.join(USERS_FILE),
            self.users_hint.clone(),
            users_reload,
        )?;
        watcher.watch(
            &self.dir.join(GROUPS_FILE),
            self.groups_hint.clone(),
            groups_reload,
        )?;
        watcher.watch(
            &self.dir.join(MACHINES_FILE),
            self.machines_hint.clone(),
            machines_reload,
        )?;
        Ok(())
    }

    fn load_kind<R>(
        &self,
        file: &str,
    ) -> Result<Loaded<R>>
    where
        R: Record + DeserializeOwned,
    {
        let path = self.dir.join(file);
        let records = match fs::read_to_string(&path) {
            Ok(raw) => {
                let mut records: Vec<R> = serde_json::from_str(&raw).map_err(|err| {
                    StorageError::CorruptData {
                        path: path.clone(),
                        record: file.to_owned(),
                        reason: err.to_string(),
                    }
                })?;
                for record in &mut records {
                    record.set_backend(JSON_BACKEND_NAME);
                }
                records
            }
            // Created lazily on first save.
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(io_error(&path, err)),
        };

        debug!(count = records.len(), file, "json backend loaded");
        Ok(Loaded {
            records,
            needs_rewrite: false,
        })
    }

    fn save_kind<R>(
        &self,
        file: &str,
        records: &[R],
        hint: &WatchHint,
    ) -> Result<()>
    where
        R: Record + Serialize,
    {
        let mut mine: Vec<&R> = records
            .iter()
            .filter(|r| r.backend().is_empty() || r.backend() == JSON_BACKEND_NAME)
            .collect();
        mine.sort_by_key(|r| r.key());

        let contents = serde_json::to_string_pretty(&mine).map_err(|err| {
            StorageError::CorruptData {
                path: self.dir.join(file),
                record: file.to_owned(),
                reason: err.to_string(),
            }
        })?;

        write_atomically(&self.dir.join(file), &contents, 0o600, Some(hint))?;
        debug!(count = mine.len(), file, "json backend saved");
        Ok(())
    }
}

impl Backend for JsonFileBackend {
    fn name(&self) -> &'static str {
        JSON_BACKEND_NAME
    }

    fn initialize(&self) -> Result<bool> {
        match fs::create_dir_all(&self.dir) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                warn!(
                    dir = %self.dir.display(),
                    "json backend unavailable, cannot create state directory"
                );
                self.enabled.store(false, Ordering::SeqCst);
                Ok(false)
            }
            Err(err) => Err(io_error(&self.dir, err)),
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(
        &self,
        enabled: bool,
    ) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn priority(&self) -> Option<i32> {
        Some(self.priority)
    }

    fn compat(&self) -> &'static [Kind] {
        &[Kind::Users, Kind::Groups, Kind::Machines]
    }
}

impl Store<User> for JsonFileBackend {
    fn load(&self) -> Result<Loaded<User>> {
        self.load_kind(USERS_FILE)
    }

    fn save(
        &self,
        records: &[User],
    ) -> Result<()> {
        self.save_kind(USERS_FILE, records, &self.users_hint)
    }
}

impl Store<Group> for JsonFileBackend {
    fn load(&self) -> Result<Loaded<Group>> {
        self.load_kind(GROUPS_FILE)
    }

    fn save(
        &self,
        records: &[Group],
    ) -> Result<()> {
        self.save_kind(GROUPS_FILE, records, &self.groups_hint)
    }
}

impl Store<Machine> for JsonFileBackend {
    fn load(&self) -> Result<Loaded<Machine>> {
        self.load_kind(MACHINES_FILE)
    }

    fn save(
        &self,
        records: &[Machine],
    ) -> Result<()> {
        self.save_kind(MACHINES_FILE, records, &self.machines_hint)
    }
}
