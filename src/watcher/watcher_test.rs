use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::normalize;
use super::ChangeWatcher;
use super::FileChange;
use super::WatchHint;

const SETTLE: Duration = Duration::from_millis(50);

fn watched_path(
    watcher: &ChangeWatcher,
    hint: &WatchHint,
) -> (PathBuf, Arc<AtomicUsize>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("passwd");
    std::fs::write(&path, "").expect("seed file");

    let reloads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reloads);
    watcher
        .watch(
            &path,
            hint.clone(),
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .expect("watch");

    (path, reloads, dir)
}

fn settle() {
    thread::sleep(SETTLE * 4);
}

#[test]
fn external_edit_fires_one_reload() {
    let watcher = ChangeWatcher::new(SETTLE).expect("watcher");
    let hint = WatchHint::new();
    let (path, reloads, _dir) = watched_path(&watcher, &hint);

    // An editor writes in place and closes: the data event spends the
    // baseline hint, close-write decides.
    watcher.inject(path.clone(), FileChange::DataChanged);
    watcher.inject(path, FileChange::CloseWrite);
    settle();

    assert_eq!(reloads.load(Ordering::SeqCst), 1);
    assert_eq!(hint.value(), 1);
    watcher.stop();
}

#[test]
fn own_rewrite_is_ignored() {
    let watcher = ChangeWatcher::new(SETTLE).expect("watcher");
    let hint = WatchHint::new();
    let (path, reloads, _dir) = watched_path(&watcher, &hint);

    // Backend rewrite: pre-charge, then the kernel reports the temp file
    // being renamed over ours.
    hint.precharge();
    watcher.inject(path, FileChange::MovedInto);
    settle();

    assert_eq!(reloads.load(Ordering::SeqCst), 0);
    assert_eq!(hint.value(), 1);
    watcher.stop();
}

#[test]
fn external_rename_into_place_fires() {
    let watcher = ChangeWatcher::new(SETTLE).expect("watcher");
    let hint = WatchHint::new();
    let (path, reloads, _dir) = watched_path(&watcher, &hint);

    // vipw-style replace with no pre-charge.
    watcher.inject(path, FileChange::MovedInto);
    settle();

    assert_eq!(reloads.load(Ordering::SeqCst), 1);
    watcher.stop();
}

#[test]
fn event_bursts_coalesce_into_one_reload() {
    let watcher = ChangeWatcher::new(SETTLE).expect("watcher");
    let hint = WatchHint::new();
    let (path, reloads, _dir) = watched_path(&watcher, &hint);

    watcher.inject(path.clone(), FileChange::MovedInto);
    watcher.inject(path.clone(), FileChange::DataChanged);
    watcher.inject(path, FileChange::CloseWrite);
    settle();

    // Both decisions land inside one settle window.
    assert_eq!(reloads.load(Ordering::SeqCst), 1);
    watcher.stop();
}

#[test]
fn unwatched_paths_are_silent() {
    let watcher = ChangeWatcher::new(SETTLE).expect("watcher");
    let hint = WatchHint::new();
    let (path, reloads, _dir) = watched_path(&watcher, &hint);

    watcher.unwatch(&path).expect("unwatch");
    watcher.inject(path, FileChange::MovedInto);
    settle();

    assert_eq!(reloads.load(Ordering::SeqCst), 0);
    watcher.stop();
}

#[test]
fn rewatching_a_path_does_not_leak_the_directory_reference() {
    let watcher = ChangeWatcher::new(SETTLE).expect("watcher");
    let hint = WatchHint::new();
    let (path, _reloads, dir) = watched_path(&watcher, &hint);
    assert_eq!(watcher.dir_ref_count(dir.path()), 1);

    // Same path, fresh callback: the entry is replaced, not counted twice.
    watcher
        .watch(&path, hint.clone(), Arc::new(|| {}))
        .expect("rewatch");
    assert_eq!(watcher.dir_ref_count(dir.path()), 1);

    watcher.unwatch(&path).expect("unwatch");
    assert_eq!(watcher.dir_ref_count(dir.path()), 0);
    watcher.stop();
}

#[test]
fn normalization_drops_uninteresting_kinds() {
    use notify::event::AccessKind;
    use notify::event::AccessMode;
    use notify::event::CreateKind;
    use notify::event::DataChange;
    use notify::event::MetadataKind;
    use notify::event::ModifyKind;
    use notify::event::RenameMode;
    use notify::EventKind;

    assert_eq!(
        normalize(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
        Some(FileChange::DataChanged)
    );
    assert_eq!(
        normalize(&EventKind::Modify(ModifyKind::Name(RenameMode::To))),
        Some(FileChange::MovedInto)
    );
    assert_eq!(
        normalize(&EventKind::Create(CreateKind::File)),
        Some(FileChange::Created)
    );
    assert_eq!(
        normalize(&EventKind::Access(AccessKind::Close(AccessMode::Write))),
        Some(FileChange::CloseWrite)
    );
    assert_eq!(
        normalize(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any))),
        None
    );
    assert_eq!(
        normalize(&EventKind::Modify(ModifyKind::Name(RenameMode::From))),
        None
    );
    assert_eq!(normalize(&EventKind::Remove(notify::event::RemoveKind::File)), None);
}
