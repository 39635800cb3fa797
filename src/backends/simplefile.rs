//! Flat-file backend for the privileges whitelist and the keyword tree.
//!
//! Privileges are one group name per line, `#` comments allowed. Keywords
//! are `name:parent:description` lines. This backend has no priority
//! concept: it is the only store for these kinds, so election stops at it.

use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tracing::debug;

use super::write_atomically;
use super::Backend;
use super::Loaded;
use super::Store;
use crate::config::PathsConfig;
use crate::errors::io_error;
use crate::errors::Result;
use crate::errors::StorageError;
use crate::records::Keyword;
use crate::records::Kind;
use crate::records::Privilege;
use crate::watcher::ChangeWatcher;
use crate::watcher::ReloadFn;
use crate::watcher::WatchHint;

pub const SIMPLE_BACKEND_NAME: &str = "simplefile";

pub struct SimpleFileBackend {
    enabled: AtomicBool,
    privileges_path: PathBuf,
    keywords_path: PathBuf,
    privileges_hint: WatchHint,
    keywords_hint: WatchHint,
}

impl SimpleFileBackend {
    pub fn new(paths: &PathsConfig) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            privileges_path: paths.privileges.clone(),
            keywords_path: paths.keywords.clone(),
            privileges_hint: WatchHint::new(),
            keywords_hint: WatchHint::new(),
        }
    }

    pub fn install_watches(
        &self,
        watcher: &ChangeWatcher,
        privileges_reload: ReloadFn,
        keywords_reload: ReloadFn,
    ) -> Result<()> {
        watcher.watch(
            &self.privileges_path,
            self.privileges_hint.clone(),
            privileges_reload,
        )?;
        watcher.watch(&self.keywords_path, self.keywords_hint.clone(), keywords_reload)?;
        Ok(())
    }
}

impl Backend for SimpleFileBackend {
    fn name(&self) -> &'static str {
        SIMPLE_BACKEND_NAME
    }

    fn initialize(&self) -> Result<bool> {
        // Data files are created on first save; only the directory must be
        // reachable.
        for path in [&self.privileges_path, &self.keywords_path] {
            if let Some(parent) = path.parent() {
                if let Err(err) = fs::create_dir_all(parent) {
                    if err.kind() != io::ErrorKind::PermissionDenied {
                        return Err(io_error(parent, err));
                    }
                }
            }
        }
        Ok(true)
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
        None
    }

    fn compat(&self) -> &'static [Kind] {
        &[Kind::Privileges, Kind::Keywords]
    }
}

impl Store<Privilege> for SimpleFileBackend {
    fn load(&self) -> Result<Loaded<Privilege>> {
        let records = match fs::read_to_string(&self.privileges_path) {
            Ok(raw) => raw
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(|line| Privilege {
                    name: line.to_owned(),
                    backend: SIMPLE_BACKEND_NAME.to_owned(),
                })
                .collect(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(io_error(&self.privileges_path, err)),
        };

        debug!(count = records.len(), "loaded privileges whitelist");
        Ok(Loaded {
            records,
            needs_rewrite: false,
        })
    }

    fn save(
        &self,
        records: &[Privilege],
    ) -> Result<()> {
        let mut names: Vec<&str> = records.iter().map(|p| p.name.as_str()).collect();
        names.sort_unstable();

        let mut contents = String::new();
        for name in names {
            contents.push_str(name);
            contents.push('\n');
        }
        write_atomically(
            &self.privileges_path,
            &contents,
            0o644,
            Some(&self.privileges_hint),
        )
    }
}

impl Store<Keyword> for SimpleFileBackend {
    fn load(&self) -> Result<Loaded<Keyword>> {
        let raw = match fs::read_to_string(&self.keywords_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(io_error(&self.keywords_path, err)),
        };

        let mut records = Vec::new();
        for line in raw.lines().filter(|line| !line.trim().is_empty()) {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() != 3 {
                return Err(corrupt_keyword(&self.keywords_path, line));
            }
            records.push(Keyword {
                name: fields[0].to_owned(),
                parent: fields[1].to_owned(),
                description: fields[2].to_owned(),
                backend: SIMPLE_BACKEND_NAME.to_owned(),
            });
        }

        debug!(count = records.len(), "loaded keywords");
        Ok(Loaded {
            records,
            needs_rewrite: false,
        })
    }

    fn save(
        &self,
        records: &[Keyword],
    ) -> Result<()> {
        let mut sorted: Vec<&Keyword> = records.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));

        let mut contents = String::new();
        for keyword in sorted {
            contents.push_str(&format!(
                "{}:{}:{}\n",
                keyword.name, keyword.parent, keyword.description
            ));
        }
        write_atomically(&self.keywords_path, &contents, 0o644, Some(&self.keywords_hint))
    }
}

fn corrupt_keyword(
    path: &Path,
    record: &str,
) -> crate::errors::Error {
    StorageError::CorruptData {
        path: path.to_path_buf(),
        record: record.to_owned(),
        reason: "expected name:parent:description".to_owned(),
    }
    .into()
}
