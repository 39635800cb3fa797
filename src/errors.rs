//! Error hierarchy for the directory core.
//!
//! Errors are grouped by concern: entity-level conditions a caller can
//! recover from (duplicate key, missing key), and storage-level failures
//! raised by the backends. Backends never abort the process; only
//! `Error::Fatal` marks conditions the daemon cannot start from.

use std::io;
use std::path::PathBuf;

use crate::records::Kind;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Recoverable conditions on a single entity (caller decides)
    #[error(transparent)]
    Entity(#[from] EntityError),

    /// Backend and filesystem failures
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Configuration loading/validation failures
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    /// The key (or secondary name) is already taken in this controller
    #[error("{kind} \"{key}\" already exists")]
    AlreadyExists { kind: Kind, key: String },

    /// The referenced entity is not present in this controller
    #[error("{kind} \"{key}\" does not exist")]
    DoesNotExist { kind: Kind, key: String },

    /// The proposed name cannot be stored in the backing format
    #[error("invalid {kind} name \"{name}\": {reason}")]
    InvalidName {
        kind: Kind,
        name: String,
        reason: &'static str,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A write was attempted without write access to the store. The message
    /// names the path the caller needs access to.
    #[error("insufficient permissions to write {path}: re-run as root or as a member of the group owning the file")]
    InsufficientPermissions { path: PathBuf },

    /// No compatible, enabled backend accepts writes for this controller
    #[error("no writable backend for controller \"{controller}\"")]
    NoWritableBackend { controller: &'static str },

    /// A physical record does not match the expected shape
    #[error("corrupt record in {path}: \"{record}\" ({reason})")]
    CorruptData {
        path: PathBuf,
        record: String,
        reason: String,
    },

    /// Underlying storage failure with path context
    #[error("I/O failure on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The advisory `.lock` file of an external tool never went away
    #[error("advisory lock {path} still present after {waited}s, cannot acquire lock")]
    LockTimeout { path: PathBuf, waited: u64 },

    /// Credential computation failures
    #[error("password hashing failed: {0}")]
    PasswordHash(String),
}

impl Error {
    pub fn already_exists(
        kind: Kind,
        key: impl ToString,
    ) -> Self {
        EntityError::AlreadyExists {
            kind,
            key: key.to_string(),
        }
        .into()
    }

    pub fn does_not_exist(
        kind: Kind,
        key: impl ToString,
    ) -> Self {
        EntityError::DoesNotExist {
            kind,
            key: key.to_string(),
        }
        .into()
    }

    pub fn invalid_name(
        kind: Kind,
        name: impl ToString,
        reason: &'static str,
    ) -> Self {
        EntityError::InvalidName {
            kind,
            name: name.to_string(),
            reason,
        }
        .into()
    }

    /// True when the error is the recoverable "duplicate key" condition.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::Entity(EntityError::AlreadyExists { .. }))
    }

    /// True when the error only means "you may not write here". Used to
    /// decide whether a self-healing rewrite can be skipped silently.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Error::Storage(StorageError::InsufficientPermissions { .. }) => true,
            Error::Storage(StorageError::NoWritableBackend { .. }) => true,
            Error::Storage(StorageError::Io { source, .. }) => {
                source.kind() == io::ErrorKind::PermissionDenied
            }
            _ => false,
        }
    }
}

/// Wrap an [`io::Error`] with the path it occurred on, translating
/// permission denials into the typed variant callers match on.
pub fn io_error(
    path: impl Into<PathBuf>,
    source: io::Error,
) -> Error {
    let path = path.into();
    if source.kind() == io::ErrorKind::PermissionDenied {
        StorageError::InsufficientPermissions { path }.into()
    } else {
        StorageError::Io { path, source }.into()
    }
}
