use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use globset::{Glob, GlobMatcher};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Quiet period before a burst of writes to one path is reported.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);
pub const EVENT_CAPACITY: usize = 100;
pub const ERROR_CAPACITY: usize = 10;
const RAW_CAPACITY: usize = 1024;

/// Errors from the directory watcher.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("file watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error("invalid glob pattern: {0}")]
    InvalidPattern(#[from] globset::Error),
}

/// Coarse change kind reported for a watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOp {
    Created,
    Written,
    Removed,
}

impl std::fmt::Display for FileOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileOp::Created => write!(f, "created"),
            FileOp::Written => write!(f, "written"),
            FileOp::Removed => write!(f, "removed"),
        }
    }
}

/// A change to a file whose name matches the watcher's pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEvent {
    pub path: PathBuf,
    pub operation: FileOp,
    pub timestamp: DateTime<Utc>,
}

impl FileEvent {
    fn now(path: PathBuf, operation: FileOp) -> Self {
        Self {
            path,
            operation,
            timestamp: Utc::now(),
        }
    }
}

struct PendingWrite {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Shared {
    matcher: GlobMatcher,
    debounce: Duration,
    watcher: Mutex<Option<RecommendedWatcher>>,
    timers: Mutex<HashMap<PathBuf, PendingWrite>>,
    next_generation: AtomicU64,
    events_tx: Mutex<Option<mpsc::Sender<FileEvent>>>,
    errors_tx: Mutex<Option<mpsc::Sender<WatchError>>>,
    shutdown: CancellationToken,
}

/// Watches a directory tree and reports changes to files matching a glob.
///
/// Both output channels are lossy: when a consumer falls behind, new items are
/// dropped instead of blocking the watcher. Writes are debounced per path so a
/// burst of appends produces a single [`FileOp::Written`].
///
/// Must be created inside a tokio runtime.
pub struct DirectoryWatcher {
    root: PathBuf,
    shared: Arc<Shared>,
    events_rx: mpsc::Receiver<FileEvent>,
    errors_rx: mpsc::Receiver<WatchError>,
    closed: AtomicBool,
}

impl DirectoryWatcher {
    /// Watch `root` recursively for files whose name matches `pattern`.
    pub fn new(root: impl Into<PathBuf>, pattern: &str) -> Result<Self, WatchError> {
        Self::with_debounce(root, pattern, DEFAULT_DEBOUNCE)
    }

    /// Like [`DirectoryWatcher::new`] with a custom write debounce.
    pub fn with_debounce(
        root: impl Into<PathBuf>,
        pattern: &str,
        debounce: Duration,
    ) -> Result<Self, WatchError> {
        let root = root.into();
        let matcher = Glob::new(pattern)?.compile_matcher();

        let (raw_tx, raw_rx) = mpsc::channel(RAW_CAPACITY);
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if raw_tx.try_send(res).is_err() {
                tracing::debug!("raw watcher queue full, dropping notification");
            }
        })?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_CAPACITY);

        let shared = Arc::new(Shared {
            matcher,
            debounce,
            watcher: Mutex::new(Some(watcher)),
            timers: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            events_tx: Mutex::new(Some(events_tx)),
            errors_tx: Mutex::new(Some(errors_tx)),
            shutdown: CancellationToken::new(),
        });

        // Files present at startup are not reported.
        shared.watch_tree(&root, &mut Vec::new())?;
        tracing::info!(root = %root.display(), pattern, "watching session directory");

        tokio::spawn(run(Arc::clone(&shared), raw_rx));

        Ok(Self {
            root,
            shared,
            events_rx,
            errors_rx,
            closed: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stream of file changes. Ends after [`DirectoryWatcher::close`].
    pub fn events(&mut self) -> &mut mpsc::Receiver<FileEvent> {
        &mut self.events_rx
    }

    /// Advisory stream of watcher errors; the watcher keeps running regardless.
    pub fn errors(&mut self) -> &mut mpsc::Receiver<WatchError> {
        &mut self.errors_rx
    }

    /// Both streams at once, for consumers that select over them.
    pub fn streams(
        &mut self,
    ) -> (
        &mut mpsc::Receiver<FileEvent>,
        &mut mpsc::Receiver<WatchError>,
    ) {
        (&mut self.events_rx, &mut self.errors_rx)
    }

    /// Stop watching. Cancels pending debounce timers, stops the background
    /// loop and releases the OS watch handle. Safe to call more than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.shared.shutdown.cancel();

        let pending: Vec<PendingWrite> = match self.shared.timers.lock() {
            Ok(mut timers) => timers.drain().map(|(_, p)| p).collect(),
            Err(_) => Vec::new(),
        };
        for p in pending {
            p.handle.abort();
        }

        let watcher = self.shared.watcher.lock().ok().and_then(|mut w| w.take());
        drop(watcher);

        if let Ok(mut tx) = self.shared.events_tx.lock() {
            tx.take();
        }
        if let Ok(mut tx) = self.shared.errors_tx.lock() {
            tx.take();
        }

        tracing::debug!(root = %self.root.display(), "directory watcher closed");
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run(shared: Arc<Shared>, mut raw_rx: mpsc::Receiver<notify::Result<notify::Event>>) {
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            raw = raw_rx.recv() => match raw {
                Some(Ok(event)) => shared.handle_event(event),
                Some(Err(e)) => shared.report(WatchError::Notify(e)),
                None => break,
            },
        }
    }
    tracing::debug!("directory watcher loop stopped");
}

impl Shared {
    fn handle_event(self: &Arc<Self>, event: notify::Event) {
        for (path, op) in classify(event) {
            if op == FileOp::Created && path.is_dir() {
                self.adopt_dir(&path);
                continue;
            }
            if !self.matches(&path) {
                continue;
            }
            match op {
                FileOp::Written => self.schedule_write(path),
                FileOp::Created | FileOp::Removed => self.emit(FileEvent::now(path, op)),
            }
        }
    }

    /// Watch a directory that appeared after startup. Files written into it
    /// before its watch was registered produced no notification, so they are
    /// reported as created here.
    fn adopt_dir(&self, dir: &Path) {
        let mut found = Vec::new();
        if let Err(e) = self.watch_tree(dir, &mut found) {
            self.report(e);
        }
        found.sort();
        for path in found {
            self.emit(FileEvent::now(path, FileOp::Created));
        }
    }

    fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| self.matcher.is_match(Path::new(name)))
    }

    /// Register a non-recursive watch on `dir` and every directory below it,
    /// collecting the matching files found on the way into `found`.
    /// Missing or unreadable directories are skipped.
    fn watch_tree(&self, dir: &Path, found: &mut Vec<PathBuf>) -> Result<(), WatchError> {
        {
            let mut guard = match self.watcher.lock() {
                Ok(g) => g,
                Err(_) => return Ok(()),
            };
            let Some(watcher) = guard.as_mut() else {
                return Ok(());
            };
            match watcher.watch(dir, RecursiveMode::NonRecursive) {
                Ok(()) => {}
                Err(e) if is_missing_or_denied(&e) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                self.watch_tree(&path, found)?;
            } else if self.matches(&path) {
                found.push(path);
            }
        }
        Ok(())
    }

    /// Restart the per-path timer; only the last write of a burst fires.
    fn schedule_write(self: &Arc<Self>, path: PathBuf) {
        if self.shutdown.is_cancelled() {
            return;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let Ok(mut timers) = self.timers.lock() else {
            return;
        };

        let shared = Arc::clone(self);
        let key = path.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(shared.debounce).await;
            let fire = match shared.timers.lock() {
                Ok(mut timers) => match timers.get(&key) {
                    Some(p) if p.generation == generation => {
                        timers.remove(&key);
                        true
                    }
                    _ => false,
                },
                Err(_) => false,
            };
            if fire {
                shared.emit(FileEvent::now(key, FileOp::Written));
            }
        });

        if let Some(prev) = timers.insert(path, PendingWrite { generation, handle }) {
            prev.handle.abort();
        }
    }

    fn emit(&self, event: FileEvent) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let tx = self.events_tx.lock().ok().and_then(|g| g.clone());
        if let Some(tx) = tx {
            if let Err(TrySendError::Full(dropped)) = tx.try_send(event) {
                tracing::debug!(path = %dropped.path.display(), "event channel full, dropping event");
            }
        }
    }

    fn report(&self, err: WatchError) {
        let tx = self.errors_tx.lock().ok().and_then(|g| g.clone());
        if let Some(tx) = tx {
            if let Err(TrySendError::Full(dropped)) = tx.try_send(err) {
                tracing::debug!(error = %dropped, "error channel full, dropping error");
            }
        }
    }
}

/// Split a raw notification into per-path changes.
fn classify(event: notify::Event) -> Vec<(PathBuf, FileOp)> {
    match event.kind {
        EventKind::Create(_) => tagged(event.paths, FileOp::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => tagged(event.paths, FileOp::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => tagged(event.paths, FileOp::Created),
        // Paths are [old, new].
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = event.paths.into_iter();
            let from = paths.next().map(|p| (p, FileOp::Removed));
            from.into_iter()
                .chain(paths.map(|p| (p, FileOp::Created)))
                .collect()
        }
        // Unpaired rename of unknown direction: ask the filesystem.
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .into_iter()
            .map(|p| {
                let op = if p.exists() {
                    FileOp::Created
                } else {
                    FileOp::Removed
                };
                (p, op)
            })
            .collect(),
        EventKind::Modify(_) => tagged(event.paths, FileOp::Written),
        EventKind::Remove(_) => tagged(event.paths, FileOp::Removed),
        _ => Vec::new(),
    }
}

fn tagged(paths: Vec<PathBuf>, op: FileOp) -> Vec<(PathBuf, FileOp)> {
    paths.into_iter().map(|p| (p, op)).collect()
}

fn is_missing_or_denied(err: &notify::Error) -> bool {
    match &err.kind {
        notify::ErrorKind::PathNotFound => true,
        notify::ErrorKind::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use tempfile::TempDir;

    fn ops(kind: EventKind, paths: &[&str]) -> Vec<(PathBuf, FileOp)> {
        let event = paths
            .iter()
            .fold(notify::Event::new(kind), |e, p| e.add_path(PathBuf::from(p)));
        classify(event)
    }

    fn one(path: &str, op: FileOp) -> Vec<(PathBuf, FileOp)> {
        vec![(PathBuf::from(path), op)]
    }

    #[test]
    fn test_classify_maps_raw_kinds() {
        assert_eq!(
            ops(EventKind::Create(CreateKind::File), &["/a.jsonl"]),
            one("/a.jsonl", FileOp::Created)
        );
        assert_eq!(
            ops(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &["/a.jsonl"]),
            one("/a.jsonl", FileOp::Written)
        );
        assert_eq!(
            ops(EventKind::Remove(RemoveKind::File), &["/a.jsonl"]),
            one("/a.jsonl", FileOp::Removed)
        );
        assert!(ops(EventKind::Any, &["/a.jsonl"]).is_empty());
    }

    #[test]
    fn test_classify_rename_halves() {
        assert_eq!(
            ops(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["/old.jsonl"]),
            one("/old.jsonl", FileOp::Removed)
        );
        assert_eq!(
            ops(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["/new.jsonl"]),
            one("/new.jsonl", FileOp::Created)
        );
        assert_eq!(
            ops(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["/old.jsonl.tmp", "/new.jsonl"]
            ),
            vec![
                (PathBuf::from("/old.jsonl.tmp"), FileOp::Removed),
                (PathBuf::from("/new.jsonl"), FileOp::Created),
            ]
        );
    }

    #[test]
    fn test_classify_unpaired_rename_checks_filesystem() {
        let dir = TempDir::new().unwrap();
        let present = dir.path().join("here.jsonl");
        std::fs::write(&present, "").unwrap();
        let absent = dir.path().join("gone.jsonl");

        let event = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Any)))
            .add_path(present.clone())
            .add_path(absent.clone());
        assert_eq!(
            classify(event),
            vec![(present, FileOp::Created), (absent, FileOp::Removed)]
        );
    }

    #[test]
    fn test_missing_path_is_skipped() {
        assert!(is_missing_or_denied(&notify::Error::path_not_found()));
        assert!(is_missing_or_denied(&notify::Error::io(io::Error::from(
            io::ErrorKind::PermissionDenied
        ))));
        assert!(!is_missing_or_denied(&notify::Error::generic("boom")));
    }

    #[tokio::test]
    async fn test_invalid_pattern_is_fatal() {
        let dir = TempDir::new().unwrap();
        let result = DirectoryWatcher::new(dir.path(), "[unclosed");
        assert!(matches!(result, Err(WatchError::InvalidPattern(_))));
    }

    #[tokio::test]
    async fn test_full_event_channel_keeps_oldest() {
        let dir = TempDir::new().unwrap();
        let mut watcher = DirectoryWatcher::new(dir.path(), "*.jsonl").unwrap();
        let name = |i: usize| dir.path().join(format!("{:03}.jsonl", i));

        // emit is synchronous; with an idle receiver it must return every time.
        for i in 0..EVENT_CAPACITY + 50 {
            watcher.shared.emit(FileEvent::now(name(i), FileOp::Created));
        }

        let mut received = Vec::new();
        while let Ok(event) = watcher.events().try_recv() {
            received.push(event.path);
        }
        let expected: Vec<PathBuf> = (0..EVENT_CAPACITY).map(name).collect();
        assert_eq!(received, expected);

        // Room again after draining
        watcher.shared.emit(FileEvent::now(name(999), FileOp::Created));
        assert_eq!(watcher.events().try_recv().unwrap().path, name(999));
    }

    #[tokio::test]
    async fn test_adopted_directory_reports_existing_files() {
        let root = TempDir::new().unwrap();
        let watcher = DirectoryWatcher::new(root.path(), "*.jsonl").unwrap();
        let fresh = root.path().join("fresh");
        std::fs::create_dir_all(fresh.join("deep")).unwrap();
        std::fs::write(fresh.join("b.jsonl"), "").unwrap();
        std::fs::write(fresh.join("deep").join("c.jsonl"), "").unwrap();
        std::fs::write(fresh.join("notes.txt"), "").unwrap();

        let mut found = Vec::new();
        watcher.shared.watch_tree(&fresh, &mut found).unwrap();
        found.sort();
        assert_eq!(
            found,
            vec![fresh.join("b.jsonl"), fresh.join("deep").join("c.jsonl")]
        );
    }
}
