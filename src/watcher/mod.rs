pub mod event;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc as tokio_mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;
use crate::walker::{IgnoreMatcher, collect_files, relative_to};
use event::{RawChangeEvent, RawKind};

/// Capacity of the channel between the OS watcher bridge and the scheduler.
const RAW_EVENT_CAPACITY: usize = 1024;

/// Handle to a running OS watcher. Dropping it also stops watching, but [`WatcherHandle::stop`]
/// additionally waits for the bridge task, so the raw event stream is known to have ended.
pub struct WatcherHandle {
    watcher: Option<RecommendedWatcher>,
    bridge_task: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    /// Release the OS handles and wait until the event stream has closed.
    pub async fn stop(mut self) {
        // Dropping the watcher drops the notify callback and with it the std sender,
        // which ends the bridge loop.
        drop(self.watcher.take());
        if let Some(task) = self.bridge_task.take()
            && let Err(err) = task.await
        {
            warn!(error = %err, "watcher bridge task failed");
        }
    }
}

/// Start a recursive OS watcher on `root` (an absolute, canonical directory).
///
/// Returns a `WatcherHandle` (must be kept alive) and a tokio mpsc receiver yielding
/// root-relative [`RawChangeEvent`]s with ignored paths already filtered out. Must be
/// called from within a tokio runtime.
pub fn start_watcher(
    root: &Path,
    matcher: Arc<IgnoreMatcher>,
) -> Result<(WatcherHandle, tokio_mpsc::Receiver<RawChangeEvent>)> {
    let (std_tx, std_rx) = std::sync::mpsc::channel::<notify::Result<notify::Event>>();

    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = std_tx.send(res);
    })?;
    watcher.watch(root, RecursiveMode::Recursive)?;

    let (tokio_tx, tokio_rx) = tokio_mpsc::channel::<RawChangeEvent>(RAW_EVENT_CAPACITY);

    // Bridge: receive from the std channel on a blocking thread, translate, forward to tokio.
    let root = root.to_path_buf();
    let bridge_task = tokio::task::spawn_blocking(move || {
        while let Ok(result) = std_rx.recv() {
            match result {
                Ok(event) => {
                    for raw in translate_event(&event, &root, &matcher) {
                        if tokio_tx.blocking_send(raw).is_err() {
                            return; // receiver dropped, shutdown
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "watcher backend error");
                }
            }
        }
        debug!("watcher bridge stopped");
    });

    Ok((
        WatcherHandle {
            watcher: Some(watcher),
            bridge_task: Some(bridge_task),
        },
        tokio_rx,
    ))
}

/// Translate one notify event into zero or more raw change events.
///
/// - Access and unclassifiable events are dropped.
/// - Renames become a removal of the old path and an addition of the new one.
/// - A created directory expands into an addition per file inside it.
/// - Modifications of directories are dropped (only files are tracked).
/// - Ignored paths never leave this function.
/// - A rescan request (the OS queue overflowed) yields a [`RawKind::Rescan`] marker plus a
///   `modified` event per file currently on disk, so both lost removals and lost additions
///   are recovered downstream.
pub fn translate_event(
    event: &notify::Event,
    root: &Path,
    matcher: &Arc<IgnoreMatcher>,
) -> Vec<RawChangeEvent> {
    if event.need_rescan() {
        warn!(root = %root.display(), "watcher events were dropped, rescanning");
        let mut out = vec![RawChangeEvent::rescan()];
        out.extend(
            collect_files(root, root, matcher)
                .into_iter()
                .map(|p| RawChangeEvent::new(p, RawKind::Modified)),
        );
        return out;
    }

    let mut tagged: Vec<(&PathBuf, RawKind)> = Vec::new();
    match event.kind {
        EventKind::Create(_) => tagged.extend(event.paths.iter().map(|p| (p, RawKind::Added))),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            tagged.extend(event.paths.iter().map(|p| (p, RawKind::Removed)))
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            tagged.extend(event.paths.iter().map(|p| (p, RawKind::Added)))
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let [from, to] = event.paths.as_slice() {
                tagged.push((from, RawKind::Removed));
                tagged.push((to, RawKind::Added));
            }
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            // Direction unknown: let existence decide.
            tagged.extend(event.paths.iter().map(|p| {
                let kind = if p.exists() {
                    RawKind::Added
                } else {
                    RawKind::Removed
                };
                (p, kind)
            }))
        }
        EventKind::Modify(_) | EventKind::Any => {
            tagged.extend(event.paths.iter().map(|p| (p, RawKind::Modified)))
        }
        EventKind::Remove(_) => tagged.extend(event.paths.iter().map(|p| (p, RawKind::Removed))),
        EventKind::Access(_) | EventKind::Other => {}
    }

    let mut out = Vec::new();
    for (path, kind) in tagged {
        let Some(rel) = relative_to(root, path) else {
            continue;
        };
        let is_dir = kind != RawKind::Removed && path.is_dir();
        if matcher.is_ignored(&rel, is_dir) {
            continue;
        }

        match (kind, is_dir) {
            (RawKind::Added, true) => {
                out.extend(
                    collect_files(root, path, matcher)
                        .into_iter()
                        .map(|p| RawChangeEvent::new(p, RawKind::Added)),
                );
            }
            (RawKind::Modified, true) => {}
            _ => out.push(RawChangeEvent::new(rel, kind)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, Flag, RemoveKind};
    use std::fs;

    fn event(kind: EventKind, paths: Vec<PathBuf>) -> notify::Event {
        let mut ev = notify::Event::new(kind);
        ev.paths = paths;
        ev
    }

    fn kinds(events: &[RawChangeEvent]) -> Vec<(PathBuf, RawKind)> {
        events.iter().map(|e| (e.path.clone(), e.kind)).collect()
    }

    #[test]
    fn test_translate_basic_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("a.css"), "a {}").unwrap();
        let m = Arc::new(IgnoreMatcher::empty());

        let modified = translate_event(
            &event(
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                vec![root.join("a.css")],
            ),
            root,
            &m,
        );
        assert_eq!(kinds(&modified), vec![(PathBuf::from("a.css"), RawKind::Modified)]);

        let removed = translate_event(
            &event(EventKind::Remove(RemoveKind::File), vec![root.join("gone.css")]),
            root,
            &m,
        );
        assert_eq!(kinds(&removed), vec![(PathBuf::from("gone.css"), RawKind::Removed)]);

        let accessed = translate_event(
            &event(
                EventKind::Access(notify::event::AccessKind::Read),
                vec![root.join("a.css")],
            ),
            root,
            &m,
        );
        assert!(accessed.is_empty());
    }

    #[test]
    fn test_translate_rename_both() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("new.md"), "x").unwrap();
        let m = Arc::new(IgnoreMatcher::empty());

        let out = translate_event(
            &event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                vec![root.join("old.md"), root.join("new.md")],
            ),
            root,
            &m,
        );
        assert_eq!(
            kinds(&out),
            vec![
                (PathBuf::from("old.md"), RawKind::Removed),
                (PathBuf::from("new.md"), RawKind::Added),
            ]
        );
    }

    #[test]
    fn test_translate_created_directory_expands_to_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("img/sub")).unwrap();
        fs::write(root.join("img/a.png"), [1u8]).unwrap();
        fs::write(root.join("img/sub/b.png"), [2u8]).unwrap();
        let m = Arc::new(IgnoreMatcher::empty());

        let out = translate_event(
            &event(EventKind::Create(CreateKind::Folder), vec![root.join("img")]),
            root,
            &m,
        );
        assert_eq!(
            kinds(&out),
            vec![
                (PathBuf::from("img/a.png"), RawKind::Added),
                (PathBuf::from("img/sub/b.png"), RawKind::Added),
            ]
        );
    }

    #[test]
    fn test_translate_filters_ignored_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let m = Arc::new(IgnoreMatcher::new(root, &["*.swp".to_string()]).unwrap());

        let out = translate_event(
            &event(
                EventKind::Create(CreateKind::File),
                vec![
                    root.join(".a.css.swp"),
                    root.join("node_modules/x/y.css"),
                    root.join("b.css"),
                ],
            ),
            root,
            &m,
        );
        assert_eq!(kinds(&out), vec![(PathBuf::from("b.css"), RawKind::Added)]);
    }

    #[test]
    fn test_translate_rescan_reports_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("img")).unwrap();
        fs::write(root.join("a.css"), "a {}").unwrap();
        fs::write(root.join("img/p.png"), [1u8]).unwrap();
        let m = Arc::new(IgnoreMatcher::empty());

        let overflow = notify::Event::new(EventKind::Other).set_flag(Flag::Rescan);
        let out = translate_event(&overflow, root, &m);
        assert_eq!(
            kinds(&out),
            vec![
                (PathBuf::new(), RawKind::Rescan),
                (PathBuf::from("a.css"), RawKind::Modified),
                (PathBuf::from("img/p.png"), RawKind::Modified),
            ]
        );
    }

    #[tokio::test]
    async fn test_start_watcher_on_missing_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let result = start_watcher(&missing, Arc::new(IgnoreMatcher::empty()));
        assert!(result.is_err());
    }
}
