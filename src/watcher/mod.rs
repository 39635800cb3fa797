//! Backing-file change watcher.
//!
//! One kernel-level watch per backend file, with a shared [`WatchHint`]
//! counter deciding whether an event burst came from our own atomic rewrite
//! (ignore it) or from an external editor like `vipw` (reload the owning
//! controller). Reloads are additionally deferred by a short settle delay so
//! an editor that writes, truncates and writes again produces one reload,
//! not three.

mod hint;

pub use hint::WatchHint;

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use crossbeam_channel::select;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use dashmap::DashMap;
use notify::event::AccessKind;
use notify::event::AccessMode;
use notify::event::ModifyKind;
use notify::event::RenameMode;
use notify::EventKind;
use notify::RecommendedWatcher;
use notify::RecursiveMode;
use notify::Watcher;
use parking_lot::Mutex;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::constants::WATCH_BULK_LOG_THRESHOLD;
use crate::errors::Error;
use crate::errors::Result;

/// The four kernel event shapes the debounce protocol distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    /// In-place data write. Consumes one hint, never decides.
    DataChanged,
    /// File (re)created under the watched directory. Consumes one hint.
    Created,
    /// File renamed into place, the tail of an atomic rewrite. Consumes one
    /// hint, then decides.
    MovedInto,
    /// Writable descriptor closed. Decides without consuming.
    CloseWrite,
}

/// Callback run on the watcher thread once an external change settles.
pub type ReloadFn = Arc<dyn Fn() + Send + Sync>;

struct WatchEntry {
    hint: WatchHint,
    reload: ReloadFn,
}

enum LoopMsg {
    Change { path: PathBuf, change: FileChange },
    Stop,
}

/// Watches backend files and drives debounced reloads.
///
/// Watches are installed on parent directories (renames replace the inode,
/// so a file-level watch would go stale after the first rewrite) and events
/// are matched back to registered paths.
pub struct ChangeWatcher {
    entries: Arc<DashMap<PathBuf, WatchEntry>>,
    dir_refs: Mutex<HashMap<PathBuf, usize>>,
    fs_watcher: Mutex<RecommendedWatcher>,
    loop_tx: Sender<LoopMsg>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ChangeWatcher {
    pub fn new(settle_delay: Duration) -> Result<Self> {
        let (loop_tx, loop_rx) = crossbeam_channel::unbounded();
        let entries: Arc<DashMap<PathBuf, WatchEntry>> = Arc::new(DashMap::new());

        let event_tx = loop_tx.clone();
        let fs_watcher =
            notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
                match result {
                    Ok(event) => {
                        if let Some(change) = normalize(&event.kind) {
                            for path in event.paths {
                                let _ = event_tx.send(LoopMsg::Change { path, change });
                            }
                        }
                    }
                    Err(err) => error!(error = %err, "filesystem watch stream error"),
                }
            })
            .map_err(|err| Error::Fatal(format!("failed to start file watcher: {err}")))?;

        let loop_entries = Arc::clone(&entries);
        let handle = thread::Builder::new()
            .name("sysdir-watcher".to_owned())
            .spawn(move || run_loop(loop_rx, loop_entries, settle_delay))
            .map_err(|err| Error::Fatal(format!("failed to spawn watcher thread: {err}")))?;

        Ok(Self {
            entries,
            dir_refs: Mutex::new(HashMap::new()),
            fs_watcher: Mutex::new(fs_watcher),
            loop_tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Register `path` for change tracking. The `hint` handle is shared with
    /// the backend that rewrites the file; `reload` runs on the watcher
    /// thread when an external change settles.
    pub fn watch(
        &self,
        path: &Path,
        hint: WatchHint,
        reload: ReloadFn,
    ) -> Result<()> {
        let dir = parent_dir(path)?;

        // Re-registering a path replaces its entry; the directory already
        // carries a reference for it.
        let replaced = self
            .entries
            .insert(
                path.to_path_buf(),
                WatchEntry {
                    hint,
                    reload,
                },
            )
            .is_some();

        if !replaced {
            let mut refs = self.dir_refs.lock();
            let count = refs.entry(dir.clone()).or_insert(0);
            if *count == 0 {
                self.fs_watcher
                    .lock()
                    .watch(&dir, RecursiveMode::NonRecursive)
                    .map_err(|err| {
                        Error::Fatal(format!("cannot watch {}: {err}", dir.display()))
                    })?;
                debug!(dir = %dir.display(), "directory watch installed");
            }
            *count += 1;
        }

        let total = self.entries.len();
        if total > WATCH_BULK_LOG_THRESHOLD {
            warn!(total, "unusually many file watches registered");
        }
        Ok(())
    }

    /// Forget `path`. The directory watch is torn down with its last user.
    pub fn unwatch(
        &self,
        path: &Path,
    ) -> Result<()> {
        if self.entries.remove(path).is_none() {
            return Ok(());
        }
        let dir = parent_dir(path)?;

        let mut refs = self.dir_refs.lock();
        if let Some(count) = refs.get_mut(&dir) {
            *count -= 1;
            if *count == 0 {
                refs.remove(&dir);
                if let Err(err) = self.fs_watcher.lock().unwatch(&dir) {
                    warn!(dir = %dir.display(), error = %err, "unwatch failed");
                }
            }
        }
        Ok(())
    }

    /// Stop the watcher thread and drop every registration. Pending
    /// reloads are dropped with it.
    pub fn stop(&self) {
        let _ = self.loop_tx.send(LoopMsg::Stop);
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!("watcher thread panicked");
            }
        }

        let total = self.entries.len();
        if total > WATCH_BULK_LOG_THRESHOLD {
            info!(total, "removing file watches in bulk");
        }
        self.entries.clear();
        let mut refs = self.dir_refs.lock();
        let mut fs_watcher = self.fs_watcher.lock();
        for (dir, _) in refs.drain() {
            let _ = fs_watcher.unwatch(&dir);
        }
        info!("change watcher stopped");
    }

    #[cfg(test)]
    pub(crate) fn inject(
        &self,
        path: PathBuf,
        change: FileChange,
    ) {
        let _ = self.loop_tx.send(LoopMsg::Change { path, change });
    }

    #[cfg(test)]
    pub(crate) fn dir_ref_count(
        &self,
        dir: &Path,
    ) -> usize {
        self.dir_refs.lock().get(dir).copied().unwrap_or(0)
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        let _ = self.loop_tx.send(LoopMsg::Stop);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Map a raw kernel event onto the debounce protocol, dropping everything
/// the protocol does not care about (metadata touches, reads, removals).
fn normalize(kind: &EventKind) -> Option<FileChange> {
    match kind {
        EventKind::Modify(ModifyKind::Data(_)) => Some(FileChange::DataChanged),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(FileChange::MovedInto),
        EventKind::Create(_) => Some(FileChange::Created),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => Some(FileChange::CloseWrite),
        _ => None,
    }
}

fn parent_dir(path: &Path) -> Result<PathBuf> {
    path.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| Error::Fatal(format!("path has no parent: {}", path.display())))
}

/// Event loop: apply the hint protocol, defer decided reloads by the settle
/// delay, and coalesce repeat decisions for the same path.
fn run_loop(
    rx: Receiver<LoopMsg>,
    entries: Arc<DashMap<PathBuf, WatchEntry>>,
    settle_delay: Duration,
) {
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();

    loop {
        let timeout = pending
            .values()
            .min()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_secs(1));

        select! {
            recv(rx) -> msg => match msg {
                Ok(LoopMsg::Stop) | Err(_) => break,
                Ok(LoopMsg::Change { path, change }) => {
                    let Some(entry) = entries.get(&path) else { continue };

                    let fire = match change {
                        FileChange::DataChanged | FileChange::Created => {
                            entry.hint.consume();
                            false
                        }
                        FileChange::MovedInto => entry.hint.consume_and_check(),
                        FileChange::CloseWrite => entry.hint.check(),
                    };
                    drop(entry);

                    if fire {
                        debug!(path = %path.display(), "external change detected");
                        pending.insert(path, Instant::now() + settle_delay);
                    }
                }
            },
            default(timeout) => {}
        }

        let now = Instant::now();
        let due: Vec<PathBuf> = pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        for path in due {
            pending.remove(&path);
            if let Some(entry) = entries.get(&path) {
                info!(path = %path.display(), "reloading after external change");
                (entry.reload)();
            }
        }
    }
}

#[cfg(test)]
mod watcher_test;
