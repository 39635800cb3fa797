//! Shadow file family backend.
//!
//! Serves users out of `passwd(5)` + `shadow(5)` and groups out of
//! `group(5)` + `gshadow(5)` plus an extended metadata file
//! (`name:description:skeleton`). Secondary files self-heal: a primary
//! record with no counterpart line gets one synthesized, and the load is
//! flagged so the owning controller can persist the repair.
//!
//! Every rewrite goes through the temp-file + rename path with the watch
//! hint pre-charged, so the daemon's own writes never bounce back as
//! reloads.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tracing::debug;
use tracing::info;
use tracing::warn;

use super::days_since_epoch;
use super::write_atomically;
use super::Backend;
use super::Loaded;
use super::Store;
use crate::config::PathsConfig;
use crate::errors::io_error;
use crate::errors::Result;
use crate::errors::StorageError;
use crate::records::Group;
use crate::records::Kind;
use crate::records::Record;
use crate::records::User;
use crate::watcher::ChangeWatcher;
use crate::watcher::ReloadFn;
use crate::watcher::WatchHint;

pub const SHADOW_BACKEND_NAME: &str = "shadow";

const MODE_PUBLIC: u32 = 0o644;
const MODE_SECRET: u32 = 0o600;

pub struct ShadowBackend {
    enabled: AtomicBool,
    passwd_path: PathBuf,
    shadow_path: PathBuf,
    group_path: PathBuf,
    gshadow_path: PathBuf,
    group_ext_path: PathBuf,
    passwd_hint: WatchHint,
    shadow_hint: WatchHint,
    group_hint: WatchHint,
    gshadow_hint: WatchHint,
    group_ext_hint: WatchHint,
}

impl ShadowBackend {
    pub fn new(paths: &PathsConfig) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            passwd_path: paths.passwd.clone(),
            shadow_path: paths.shadow.clone(),
            group_path: paths.group.clone(),
            gshadow_path: paths.gshadow.clone(),
            group_ext_path: paths.group_ext.clone(),
            passwd_hint: WatchHint::new(),
            shadow_hint: WatchHint::new(),
            group_hint: WatchHint::new(),
            gshadow_hint: WatchHint::new(),
            group_ext_hint: WatchHint::new(),
        }
    }

    /// Register the whole file family with the watcher. The user files
    /// share one reload callback, the group files another.
    pub fn install_watches(
        &self,
        watcher: &ChangeWatcher,
        users_reload: ReloadFn,
        groups_reload: ReloadFn,
    ) -> Result<()> {
        watcher.watch(
            &self.passwd_path,
            self.passwd_hint.clone(),
            users_reload.clone(),
        )?;
        watcher.watch(&self.shadow_path, self.shadow_hint.clone(), users_reload)?;
        watcher.watch(
            &self.group_path,
            self.group_hint.clone(),
            groups_reload.clone(),
        )?;
        watcher.watch(
            &self.gshadow_path,
            self.gshadow_hint.clone(),
            groups_reload.clone(),
        )?;
        watcher.watch(
            &self.group_ext_path,
            self.group_ext_hint.clone(),
            groups_reload,
        )?;
        Ok(())
    }

    fn owns<R: Record>(
        &self,
        record: &R,
    ) -> bool {
        record.backend().is_empty() || record.backend() == SHADOW_BACKEND_NAME
    }
}

impl Backend for ShadowBackend {
    fn name(&self) -> &'static str {
        SHADOW_BACKEND_NAME
    }

    fn initialize(&self) -> Result<bool> {
        // The extended metadata file lives in our own directory, which may
        // not exist on a fresh install.
        if let Some(parent) = self.group_ext_path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                if err.kind() != io::ErrorKind::PermissionDenied {
                    return Err(io_error(parent, err));
                }
            }
        }

        let available = self.passwd_path.exists() && self.group_path.exists();
        if !available {
            warn!(
                passwd = %self.passwd_path.display(),
                group = %self.group_path.display(),
                "shadow backend unavailable, primary files missing"
            );
            self.enabled.store(false, Ordering::SeqCst);
        }
        Ok(available)
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
        Some(1)
    }

    fn compat(&self) -> &'static [Kind] {
        &[Kind::Users, Kind::Groups]
    }
}

impl Store<User> for ShadowBackend {
    fn load(&self) -> Result<Loaded<User>> {
        let passwd_raw = read_required(&self.passwd_path)?;
        let shadow_raw = read_secondary(&self.shadow_path)?;
        let shadow_readable = shadow_raw.is_readable();
        let mut needs_rewrite = shadow_raw.is_missing();

        let mut aging: HashMap<String, ShadowLine> = HashMap::new();
        if let Secondary::Present(raw) = &shadow_raw {
            for line in data_lines(raw) {
                match ShadowLine::parse(line) {
                    Ok(parsed) => {
                        aging.insert(parsed.login.clone(), parsed);
                    }
                    Err(reason) => {
                        warn!(
                            path = %self.shadow_path.display(),
                            line,
                            reason,
                            "dropping corrupt shadow line"
                        );
                        needs_rewrite = true;
                    }
                }
            }
        }

        let mut records = Vec::new();
        for line in data_lines(&passwd_raw) {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() != 7 {
                return Err(corrupt(&self.passwd_path, line, "expected 7 fields"));
            }
            let uid = parse_id(&self.passwd_path, line, fields[2])?;
            let gid = parse_id(&self.passwd_path, line, fields[3])?;

            let mut user = User {
                login: fields[0].to_owned(),
                uid,
                gid,
                gecos: fields[4].to_owned(),
                home: fields[5].to_owned(),
                shell: fields[6].to_owned(),
                password: String::new(),
                last_change: None,
                min_days: None,
                max_days: None,
                warn_days: None,
                inactive_days: None,
                expire_date: None,
                flag: None,
                backend: SHADOW_BACKEND_NAME.to_owned(),
            };

            match aging.remove(&user.login) {
                Some(entry) => {
                    user.password = entry.password;
                    user.last_change = entry.last_change;
                    user.min_days = entry.min_days;
                    user.max_days = entry.max_days;
                    user.warn_days = entry.warn_days;
                    user.inactive_days = entry.inactive_days;
                    user.expire_date = entry.expire_date;
                    user.flag = entry.flag;
                }
                None if shadow_readable => {
                    info!(login = %user.login, "synthesizing missing shadow entry");
                    user.password = "!".to_owned();
                    user = user.with_default_aging();
                    user.last_change = Some(days_since_epoch());
                    needs_rewrite = true;
                }
                // The entry exists but is hidden from us; never a heal.
                None => {
                    user.password = "!".to_owned();
                }
            }
            records.push(user);
        }

        // Leftover shadow lines with no passwd counterpart are dropped on
        // the next rewrite.
        if !aging.is_empty() {
            warn!(
                orphans = aging.len(),
                path = %self.shadow_path.display(),
                "shadow entries without passwd counterpart"
            );
            needs_rewrite = true;
        }

        debug!(count = records.len(), "shadow backend loaded users");
        Ok(Loaded {
            records,
            needs_rewrite,
        })
    }

    fn save(
        &self,
        records: &[User],
    ) -> Result<()> {
        let mut mine: Vec<&User> = records.iter().filter(|u| self.owns(*u)).collect();
        mine.sort_by_key(|u| u.uid);

        let mut passwd_lines = Vec::with_capacity(mine.len());
        let mut shadow_lines = Vec::with_capacity(mine.len());
        for user in &mine {
            passwd_lines.push(format!(
                "{}:x:{}:{}:{}:{}:{}",
                user.login, user.uid, user.gid, user.gecos, user.home, user.shell
            ));
            shadow_lines.push(format!(
                "{}:{}:{}:{}:{}:{}:{}:{}:{}",
                user.login,
                user.password,
                fmt_opt(user.last_change),
                fmt_opt(user.min_days),
                fmt_opt(user.max_days),
                fmt_opt(user.warn_days),
                fmt_opt(user.inactive_days),
                fmt_opt(user.expire_date),
                fmt_opt(user.flag),
            ));
        }

        write_atomically(
            &self.passwd_path,
            &join_lines(&passwd_lines),
            MODE_PUBLIC,
            Some(&self.passwd_hint),
        )?;
        write_atomically(
            &self.shadow_path,
            &join_lines(&shadow_lines),
            MODE_SECRET,
            Some(&self.shadow_hint),
        )?;
        debug!(count = mine.len(), "shadow backend saved users");
        Ok(())
    }
}

impl Store<Group> for ShadowBackend {
    fn load(&self) -> Result<Loaded<Group>> {
        let group_raw = read_required(&self.group_path)?;
        let gshadow_raw = read_secondary(&self.gshadow_path)?;
        let ext_raw = read_secondary(&self.group_ext_path)?;
        let gshadow_readable = gshadow_raw.is_readable();
        let mut needs_rewrite = gshadow_raw.is_missing() || ext_raw.is_missing();

        let mut passwords: HashMap<String, String> = HashMap::new();
        if let Secondary::Present(raw) = &gshadow_raw {
            for line in data_lines(raw) {
                let fields: Vec<&str> = line.split(':').collect();
                if fields.len() != 4 {
                    warn!(
                        path = %self.gshadow_path.display(),
                        line,
                        "dropping corrupt gshadow line"
                    );
                    needs_rewrite = true;
                    continue;
                }
                passwords.insert(fields[0].to_owned(), fields[1].to_owned());
            }
        }

        let mut extended: HashMap<String, (String, String)> = HashMap::new();
        if let Secondary::Present(raw) = &ext_raw {
            for line in data_lines(raw) {
                let fields: Vec<&str> = line.split(':').collect();
                if fields.len() != 3 {
                    warn!(
                        path = %self.group_ext_path.display(),
                        line,
                        "dropping corrupt extended group line"
                    );
                    needs_rewrite = true;
                    continue;
                }
                extended.insert(fields[0].to_owned(), (fields[1].to_owned(), fields[2].to_owned()));
            }
        }

        let mut records = Vec::new();
        for line in data_lines(&group_raw) {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() != 4 {
                return Err(corrupt(&self.group_path, line, "expected 4 fields"));
            }
            let gid = parse_id(&self.group_path, line, fields[2])?;
            let members = if fields[3].is_empty() {
                Vec::new()
            } else {
                fields[3].split(',').map(str::to_owned).collect()
            };
            let name = fields[0].to_owned();

            let password = match passwords.remove(&name) {
                Some(password) => password,
                None if gshadow_readable => {
                    info!(group = %name, "synthesizing missing gshadow entry");
                    needs_rewrite = true;
                    "!".to_owned()
                }
                None => "!".to_owned(),
            };
            let (description, skel) = extended.remove(&name).unwrap_or_default();

            records.push(Group {
                name,
                gid,
                password,
                members,
                description,
                skel,
                backend: SHADOW_BACKEND_NAME.to_owned(),
            });
        }

        debug!(count = records.len(), "shadow backend loaded groups");
        Ok(Loaded {
            records,
            needs_rewrite,
        })
    }

    fn save(
        &self,
        records: &[Group],
    ) -> Result<()> {
        let mut mine: Vec<&Group> = records.iter().filter(|g| self.owns(*g)).collect();
        mine.sort_by_key(|g| g.gid);

        let mut group_lines = Vec::with_capacity(mine.len());
        let mut gshadow_lines = Vec::with_capacity(mine.len());
        let mut ext_lines = Vec::with_capacity(mine.len());
        for group in &mine {
            let members = group.members.join(",");
            group_lines.push(format!("{}:x:{}:{}", group.name, group.gid, members));
            gshadow_lines.push(format!("{}:{}::{}", group.name, group.password, members));
            ext_lines.push(format!("{}:{}:{}", group.name, group.description, group.skel));
        }

        write_atomically(
            &self.group_path,
            &join_lines(&group_lines),
            MODE_PUBLIC,
            Some(&self.group_hint),
        )?;
        write_atomically(
            &self.gshadow_path,
            &join_lines(&gshadow_lines),
            MODE_SECRET,
            Some(&self.gshadow_hint),
        )?;
        write_atomically(
            &self.group_ext_path,
            &join_lines(&ext_lines),
            MODE_PUBLIC,
            Some(&self.group_ext_hint),
        )?;
        debug!(count = mine.len(), "shadow backend saved groups");
        Ok(())
    }
}

struct ShadowLine {
    login: String,
    password: String,
    last_change: Option<i64>,
    min_days: Option<i64>,
    max_days: Option<i64>,
    warn_days: Option<i64>,
    inactive_days: Option<i64>,
    expire_date: Option<i64>,
    flag: Option<i64>,
}

impl ShadowLine {
    fn parse(line: &str) -> std::result::Result<Self, &'static str> {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() != 9 {
            return Err("expected 9 fields");
        }
        Ok(Self {
            login: fields[0].to_owned(),
            password: fields[1].to_owned(),
            last_change: parse_opt(fields[2])?,
            min_days: parse_opt(fields[3])?,
            max_days: parse_opt(fields[4])?,
            warn_days: parse_opt(fields[5])?,
            inactive_days: parse_opt(fields[6])?,
            expire_date: parse_opt(fields[7])?,
            flag: parse_opt(fields[8])?,
        })
    }
}

fn parse_opt(field: &str) -> std::result::Result<Option<i64>, &'static str> {
    if field.is_empty() {
        return Ok(None);
    }
    field
        .parse::<i64>()
        .map(Some)
        .map_err(|_| "non-numeric aging field")
}

fn fmt_opt(value: Option<i64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => String::new(),
    }
}

fn data_lines(raw: &str) -> impl Iterator<Item = &str> {
    raw.lines().filter(|line| !line.trim().is_empty())
}

fn join_lines(lines: &[String]) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

fn parse_id(
    path: &Path,
    line: &str,
    field: &str,
) -> Result<u32> {
    field
        .parse::<u32>()
        .map_err(|_| corrupt(path, line, "non-numeric id"))
}

fn corrupt(
    path: &Path,
    record: &str,
    reason: &str,
) -> crate::errors::Error {
    StorageError::CorruptData {
        path: path.to_path_buf(),
        record: record.to_owned(),
        reason: reason.to_owned(),
    }
    .into()
}

fn read_required(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|err| io_error(path, err))
}

/// Outcome of reading a secondary (healable) file. Missing and unreadable
/// are different conditions: a missing file is rebuilt on the next persist,
/// an unreadable one is left alone entirely.
enum Secondary {
    Present(String),
    Missing,
    Unreadable,
}

impl Secondary {
    fn is_readable(&self) -> bool {
        !matches!(self, Secondary::Unreadable)
    }

    fn is_missing(&self) -> bool {
        matches!(self, Secondary::Missing)
    }
}

fn read_secondary(path: &Path) -> Result<Secondary> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Secondary::Present(raw)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            info!(path = %path.display(), "secondary file missing, will rebuild");
            Ok(Secondary::Missing)
        }
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            debug!(path = %path.display(), "secondary file unreadable at this privilege level");
            Ok(Secondary::Unreadable)
        }
        Err(err) => Err(io_error(path, err)),
    }
}
