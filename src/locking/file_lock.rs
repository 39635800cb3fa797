use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use tracing::debug;
use tracing::warn;

use crate::constants::FILE_LOCK_WAIT_MAX_SECS;
use crate::errors::io_error;
use crate::errors::Result;
use crate::errors::StorageError;

/// Advisory lock over one backing file, held as a sibling `<file>.lock`.
///
/// Created exclusively, so two cooperating processes cannot both hold it.
/// When the lock is busy we retry once per second up to a bounded wait, then
/// give up with `LockTimeout` instead of stalling the caller forever.
///
/// The lock file is removed on drop. A stale lock left by a crashed process
/// must be cleared by hand, which is the standard failure mode of the
/// shadow suite's own `.lock` files.
#[derive(Debug)]
pub struct FileLock {
    lock_path: PathBuf,
}

impl FileLock {
    /// Take the advisory lock for `target`, waiting up to
    /// `FILE_LOCK_WAIT_MAX_SECS` seconds.
    pub fn acquire(target: &Path) -> Result<Self> {
        let lock_path = Self::lock_path_for(target);
        let mut waited = 0u64;

        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(mut file) => {
                    // Record the holder for post-mortem inspection.
                    let _ = write!(file, "{}", std::process::id());
                    debug!(lock = %lock_path.display(), "file lock acquired");
                    return Ok(Self { lock_path });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if waited >= FILE_LOCK_WAIT_MAX_SECS {
                        return Err(StorageError::LockTimeout {
                            path: lock_path,
                            waited,
                        }
                        .into());
                    }
                    debug!(
                        lock = %lock_path.display(),
                        waited,
                        "file lock busy, waiting"
                    );
                    thread::sleep(Duration::from_secs(1));
                    waited += 1;
                }
                Err(err) => return Err(io_error(&lock_path, err)),
            }
        }
    }

    fn lock_path_for(target: &Path) -> PathBuf {
        let mut name = target.file_name().unwrap_or_default().to_os_string();
        name.push(".lock");
        target.with_file_name(name)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.lock_path) {
            warn!(
                lock = %self.lock_path.display(),
                error = %err,
                "failed to remove lock file"
            );
        }
    }
}
