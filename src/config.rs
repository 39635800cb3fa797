//! Configuration for the directory core.
//!
//! Loading order, lowest to highest priority:
//! 1. Hardcoded defaults
//! 2. Optional TOML file passed by the daemon
//! 3. Environment variables (`SYSDIR__` prefix, `__` separator)
//!
//! The core consumes these directives; it does not own them. File paths are
//! configurable so tests and client-mode tools can point the backends away
//! from the live `/etc` files.

use std::path::PathBuf;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;

use crate::constants::DEFAULT_DISPATCHER_WORKERS;
use crate::constants::DEFAULT_SETTLE_DELAY_MS;
use crate::errors::Error;
use crate::errors::Result;

/// Role of the calling process. Only a server runs the watcher and the
/// dispatcher worker pool; clients just read and mutate through the
/// controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Client,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_role")]
    pub role: Role,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub backends: BackendsConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

/// Backing file locations. Defaults match the traditional shadow suite.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_passwd")]
    pub passwd: PathBuf,

    #[serde(default = "default_shadow")]
    pub shadow: PathBuf,

    #[serde(default = "default_group")]
    pub group: PathBuf,

    #[serde(default = "default_gshadow")]
    pub gshadow: PathBuf,

    /// Extended group metadata (`name:description:skeleton`).
    #[serde(default = "default_group_ext")]
    pub group_ext: PathBuf,

    /// Privileges whitelist, one group name per line.
    #[serde(default = "default_privileges")]
    pub privileges: PathBuf,

    /// Keywords data file (`name:parent:description`).
    #[serde(default = "default_keywords")]
    pub keywords: PathBuf,

    /// Directory holding the JSON backend's data files.
    #[serde(default = "default_json_dir")]
    pub json_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendsConfig {
    #[serde(default)]
    pub jsonfile: JsonBackendConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonBackendConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Selection priority relative to the shadow backend (which runs at 1).
    #[serde(default = "default_json_priority")]
    pub priority: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    /// Milliseconds a hint-triggered reload is deferred, coalescing the
    /// event burst a single logical write produces.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Settings {
    /// Load settings, merging the optional config file with environment
    /// overrides (highest priority).
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("SYSDIR")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dispatcher.workers == 0 {
            return Err(Error::Fatal(
                "dispatcher.workers must be at least 1".to_owned(),
            ));
        }
        if self.watcher.settle_delay_ms > 60_000 {
            return Err(Error::Fatal(format!(
                "watcher.settle_delay_ms = {} is not sane (max 60000)",
                self.watcher.settle_delay_ms
            )));
        }
        Ok(())
    }

    pub fn is_server(&self) -> bool {
        self.role == Role::Server
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            role: default_role(),
            paths: PathsConfig::default(),
            backends: BackendsConfig::default(),
            watcher: WatcherConfig::default(),
            dispatcher: DispatcherConfig::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            passwd: default_passwd(),
            shadow: default_shadow(),
            group: default_group(),
            gshadow: default_gshadow(),
            group_ext: default_group_ext(),
            privileges: default_privileges(),
            keywords: default_keywords(),
            json_dir: default_json_dir(),
        }
    }
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            jsonfile: JsonBackendConfig::default(),
        }
    }
}

impl Default for JsonBackendConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: default_json_priority(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_role() -> Role {
    Role::Server
}

fn default_passwd() -> PathBuf {
    PathBuf::from("/etc/passwd")
}

fn default_shadow() -> PathBuf {
    PathBuf::from("/etc/shadow")
}

fn default_group() -> PathBuf {
    PathBuf::from("/etc/group")
}

fn default_gshadow() -> PathBuf {
    PathBuf::from("/etc/gshadow")
}

fn default_group_ext() -> PathBuf {
    PathBuf::from("/etc/sysdir/group")
}

fn default_privileges() -> PathBuf {
    PathBuf::from("/etc/sysdir/privileges-whitelist.conf")
}

fn default_keywords() -> PathBuf {
    PathBuf::from("/etc/sysdir/keywords.conf")
}

fn default_json_dir() -> PathBuf {
    PathBuf::from("/var/lib/sysdir")
}

fn default_true() -> bool {
    true
}

fn default_json_priority() -> i32 {
    0
}

fn default_settle_delay_ms() -> u64 {
    DEFAULT_SETTLE_DELAY_MS
}

fn default_workers() -> usize {
    DEFAULT_DISPATCHER_WORKERS
}
