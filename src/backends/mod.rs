//! Storage backends.
//!
//! A backend owns the serialized form of one or more record kinds. The
//! shadow backend maps onto the classic `/etc` file family, the JSON backend
//! onto per-kind documents under a state directory, the simple-file backend
//! onto the flat privilege and keyword lists. Controllers never touch files
//! themselves; they go through the [`Store`] trait.

mod jsonfile;
mod shadow;
mod simplefile;

pub use jsonfile::*;
pub use shadow::*;
pub use simplefile::*;

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::errors::io_error;
use crate::errors::Error;
use crate::errors::Result;
use crate::errors::StorageError;
use crate::locking::FileLock;
use crate::records::Kind;
use crate::records::Record;
use crate::watcher::WatchHint;

/// Result of one backend load. `needs_rewrite` flags that the backend
/// synthesized or repaired data while parsing and wants its files rewritten
/// to match what it handed out.
#[derive(Debug)]
pub struct Loaded<R> {
    pub records: Vec<R>,
    pub needs_rewrite: bool,
}

/// Static snapshot of one backend's capabilities, for enumeration surfaces.
#[derive(Debug, Clone)]
pub struct BackendDescriptor {
    pub name: &'static str,
    pub enabled: bool,
    pub priority: Option<i32>,
    pub kinds: &'static [Kind],
}

/// Capabilities and lifecycle shared by every backend, independent of the
/// record kinds it stores.
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Probe the environment once at startup. Returns whether the backend
    /// can operate here at all (its files or directory exist or can be
    /// created). An unavailable backend stays registered but disabled.
    fn initialize(&self) -> Result<bool>;

    fn is_enabled(&self) -> bool;

    fn set_enabled(
        &self,
        enabled: bool,
    );

    /// Selection priority. `None` means the backend has no priority concept;
    /// during preferred-backend election the first such enabled candidate
    /// wins outright.
    fn priority(&self) -> Option<i32>;

    /// Record kinds this backend can store.
    fn compat(&self) -> &'static [Kind];

    fn handles(
        &self,
        kind: Kind,
    ) -> bool {
        self.compat().contains(&kind)
    }

    fn descriptor(&self) -> BackendDescriptor {
        BackendDescriptor {
            name: self.name(),
            enabled: self.is_enabled(),
            priority: self.priority(),
            kinds: self.compat(),
        }
    }

    /// Hash a clear-text password into the on-disk form. A caller-supplied
    /// salt makes the result reproducible.
    fn compute_password(
        &self,
        cleartext: &str,
        salt: Option<&str>,
    ) -> Result<String> {
        hash_password(cleartext, salt)
    }
}

/// Typed persistence for one record kind on top of [`Backend`].
pub trait Store<R: Record>: Backend {
    fn load(&self) -> Result<Loaded<R>>;

    /// Persist the given records, skipping any that belong to another
    /// backend.
    fn save(
        &self,
        records: &[R],
    ) -> Result<()>;

    /// Remove one record. The flat-file backends have no per-record delete,
    /// rewriting the remaining set is the delete.
    fn delete(
        &self,
        remaining: &[R],
        key: &R::Key,
    ) -> Result<()> {
        debug!(backend = self.name(), kind = %R::KIND, %key, "delete via rewrite");
        self.save(remaining)
    }
}

/// All registered backends, in registration order.
#[derive(Default)]
pub struct BackendRegistry {
    backends: Vec<Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        backend: Arc<dyn Backend>,
    ) {
        self.backends.push(backend);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Backend>> {
        self.backends.iter()
    }

    /// Backends able to serve `kind`, enabled or not, in registration order.
    pub fn find_compatibles(
        &self,
        kind: Kind,
    ) -> Vec<Arc<dyn Backend>> {
        self.backends
            .iter()
            .filter(|backend| backend.handles(kind))
            .cloned()
            .collect()
    }

    pub fn find(
        &self,
        name: &str,
    ) -> Option<Arc<dyn Backend>> {
        self.backends
            .iter()
            .find(|b| b.name() == name)
            .cloned()
    }

    pub fn set_enabled(
        &self,
        name: &str,
        enabled: bool,
    ) -> Result<()> {
        match self.find(name) {
            Some(backend) => {
                backend.set_enabled(enabled);
                Ok(())
            }
            None => Err(Error::Fatal(format!("no such backend: {name}"))),
        }
    }
}

/// Days since the unix epoch, the unit of the shadow aging fields.
pub fn days_since_epoch() -> i64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(elapsed) => (elapsed.as_secs() / 86_400) as i64,
        Err(_) => 0,
    }
}

/// Hash a clear-text password with SHA-512 crypt (the `$6$` scheme). The
/// salt is generated per call unless supplied.
pub fn hash_password(
    cleartext: &str,
    salt: Option<&str>,
) -> Result<String> {
    let params = sha_crypt::Sha512Params::default();
    match salt {
        None => sha_crypt::sha512_simple(cleartext, &params)
            .map_err(|err| StorageError::PasswordHash(format!("{err:?}")).into()),
        Some(salt) => {
            sha_crypt::sha512_crypt_b64(cleartext.as_bytes(), salt.as_bytes(), &params)
                .map(|hash| format!("$6${salt}${hash}"))
                .map_err(|err| StorageError::PasswordHash(format!("{err:?}")).into())
        }
    }
}

/// Check a clear-text password against a stored `$6$` hash. A malformed
/// hash never matches.
pub fn verify_password(
    cleartext: &str,
    hashed: &str,
) -> Result<bool> {
    Ok(sha_crypt::sha512_check(cleartext, hashed).is_ok())
}

/// Rewrite `path` atomically: write a temp file in the same directory, fsync
/// it, pre-charge the watch hint, then rename over the target.
///
/// The advisory lock keeps cooperating processes from interleaving rewrites.
/// The pre-charge MUST happen before the rename: after the rename the kernel
/// event may already be in flight.
pub(crate) fn write_atomically(
    path: &Path,
    contents: &str,
    mode: u32,
    hint: Option<&WatchHint>,
) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Fatal(format!("path has no parent: {}", path.display())))?;

    let _lock = FileLock::acquire(path)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|err| io_error(dir, err))?;
    tmp.write_all(contents.as_bytes())
        .map_err(|err| io_error(path, err))?;
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(mode))
        .map_err(|err| io_error(path, err))?;
    tmp.as_file()
        .sync_all()
        .map_err(|err| io_error(path, err))?;

    if let Some(hint) = hint {
        hint.precharge();
    }

    tmp.persist(path).map_err(|err| io_error(path, err.error))?;
    debug!(path = %path.display(), "file rewritten atomically");
    Ok(())
}

#[cfg(test)]
mod jsonfile_test;
#[cfg(test)]
mod simplefile_test;
