use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use globset::{Glob, GlobMatcher};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::correlate::{resolve_agent_type, UNKNOWN_AGENT};
use crate::parser::{session_id_from_path, JsonlParser, LineParser};
use crate::types::{Event, SessionStartEvent};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const TAIL_CAPACITY: usize = 1000;
pub const SESSION_PATTERN: &str = "*.jsonl";

#[derive(Error, Debug)]
pub enum TailError {
    #[error("invalid glob pattern: {0}")]
    InvalidPattern(#[from] globset::Error),

    #[error("tailer already started")]
    AlreadyStarted,
}

/// An event read from a session file.
#[derive(Debug, Clone, Serialize)]
pub struct TailEvent {
    pub path: PathBuf,
    pub session_id: String,
    pub event: Event,
}

#[derive(Debug, Default)]
struct TailState {
    offsets: HashMap<PathBuf, u64>,
    seen: HashSet<PathBuf>,
    /// Bytes after the last newline of the previous read.
    partial: HashMap<PathBuf, Vec<u8>>,
}

/// Poll-driven reader that follows every session file under a root.
///
/// The first poll is the initial scan: files that already exist are skipped
/// to their current end, so history is never replayed. Files discovered after
/// that are read from the start and announced with a synthetic
/// `session_start` carrying the resolved agent type.
///
/// Filesystem work runs on the blocking pool; the poll loop only waits on it.
pub struct Tailer {
    scope: Arc<Scope>,
    poll_interval: Duration,
    parser: Arc<dyn LineParser>,
    state: Arc<RwLock<TailState>>,
    initial_scan_done: AtomicBool,
    tx: Mutex<Option<mpsc::Sender<TailEvent>>>,
    rx: Mutex<Option<mpsc::Receiver<TailEvent>>>,
}

/// Which files the tailer follows.
struct Scope {
    root: PathBuf,
    project: Option<String>,
    matcher: GlobMatcher,
}

impl Tailer {
    pub fn new(root: impl Into<PathBuf>, project: Option<String>) -> Result<Self, TailError> {
        let (tx, rx) = mpsc::channel(TAIL_CAPACITY);
        Ok(Self {
            scope: Arc::new(Scope {
                root: root.into(),
                project: project.filter(|p| !p.is_empty()),
                matcher: Glob::new(SESSION_PATTERN)?.compile_matcher(),
            }),
            poll_interval: DEFAULT_POLL_INTERVAL,
            parser: Arc::new(JsonlParser),
            state: Arc::new(RwLock::new(TailState::default())),
            initial_scan_done: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_parser(mut self, parser: impl LineParser + 'static) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    pub fn root(&self) -> &Path {
        &self.scope.root
    }

    /// Take the receiving end of the event channel. Returns `None` after the
    /// first call.
    pub fn take_events(&self) -> Option<mpsc::Receiver<TailEvent>> {
        self.rx.lock().ok().and_then(|mut rx| rx.take())
    }

    pub fn is_initial_scan_done(&self) -> bool {
        self.initial_scan_done.load(Ordering::SeqCst)
    }

    /// Current byte offset for every tracked file.
    pub fn positions(&self) -> HashMap<PathBuf, u64> {
        self.state
            .read()
            .map(|s| s.offsets.clone())
            .unwrap_or_default()
    }

    /// Every file seen so far, sorted.
    pub fn seen_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .state
            .read()
            .map(|s| s.seen.iter().cloned().collect())
            .unwrap_or_default();
        files.sort();
        files
    }

    /// Poll until `cancel` fires, then close the event channel.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), TailError> {
        let tx = self
            .tx
            .lock()
            .ok()
            .and_then(|mut tx| tx.take())
            .ok_or(TailError::AlreadyStarted)?;

        tracing::info!(
            root = %self.root().display(),
            project = self.scope.project.as_deref().unwrap_or("*"),
            "tailing session logs"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !self.poll(&tx, &cancel).await {
                        break;
                    }
                }
            }
        }

        tracing::debug!(root = %self.root().display(), "tailer stopped");
        Ok(())
    }

    /// One tick. Returns false when the loop should stop.
    async fn poll(&self, tx: &mpsc::Sender<TailEvent>, cancel: &CancellationToken) -> bool {
        let initial = !self.is_initial_scan_done();

        let scope = Arc::clone(&self.scope);
        let files = match tokio::task::spawn_blocking(move || scope.stat_all()).await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(error = %e, "session scan task failed");
                return true;
            }
        };

        for (path, size) in &files {
            if cancel.is_cancelled() {
                return false;
            }

            let start_offset = if initial { *size } else { 0 };
            if self.mark_seen(path, start_offset) && !initial {
                let start = self.synthetic_start(path).await;
                if !send(tx, cancel, start).await {
                    return false;
                }
            }

            let chunk = match self.read_delta(path, *size).await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to read session file");
                    continue;
                }
            };

            let session_id = session_id_from_path(path);
            for event in self.parser.parse(&chunk) {
                let event = TailEvent {
                    path: path.clone(),
                    session_id: session_id.clone(),
                    event,
                };
                if !send(tx, cancel, event).await {
                    return false;
                }
            }
        }

        if initial {
            self.initial_scan_done.store(true, Ordering::SeqCst);
            tracing::info!(files = files.len(), "initial scan complete");
        }
        true
    }

    /// Returns true if the path was not seen before.
    fn mark_seen(&self, path: &Path, offset: u64) -> bool {
        let Ok(mut state) = self.state.write() else {
            return false;
        };
        if !state.seen.insert(path.to_path_buf()) {
            return false;
        }
        state.offsets.insert(path.to_path_buf(), offset);
        true
    }

    async fn synthetic_start(&self, path: &Path) -> TailEvent {
        let agent_type = {
            let path = path.to_path_buf();
            match tokio::task::spawn_blocking(move || resolve_agent_type(&path)).await {
                Ok(agent_type) => agent_type,
                Err(e) => {
                    tracing::warn!(error = %e, "agent type lookup failed");
                    UNKNOWN_AGENT.to_string()
                }
            }
        };
        let session_id = session_id_from_path(path);
        tracing::info!(path = %path.display(), agent_type = %agent_type, "new session discovered");

        TailEvent {
            path: path.to_path_buf(),
            session_id: session_id.clone(),
            event: Event::SessionStart(SessionStartEvent {
                id: session_id,
                project: self.scope.project_of(path).unwrap_or_default(),
                timestamp: Some(Utc::now()),
                status: "active".to_string(),
                agent_name: agent_type.clone(),
                agent_type: Some(agent_type),
                ..Default::default()
            }),
        }
    }

    async fn read_delta(&self, path: &Path, size: u64) -> io::Result<Option<String>> {
        let state = Arc::clone(&self.state);
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || read_new_lines(&state, &path, size))
            .await
            .map_err(io::Error::other)?
    }
}

/// Read everything between the tracked offset and `size`. Only complete
/// lines are returned; a trailing fragment is kept for the next read.
///
/// When the file did not grow since the last read and the kept fragment is a
/// whole JSON record, it is the final record of a file written without a
/// trailing newline and is returned on its own.
fn read_new_lines(state: &RwLock<TailState>, path: &Path, size: u64) -> io::Result<Option<String>> {
    let offset = match state.read() {
        Ok(state) => state.offsets.get(path).copied().unwrap_or(0),
        Err(_) => return Ok(None),
    };
    if size <= offset {
        return Ok(flush_settled(state, path));
    }

    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity((size - offset) as usize);
    let read = file.take(size - offset).read_to_end(&mut buf)? as u64;

    let Ok(mut state) = state.write() else {
        return Ok(None);
    };
    let tracked = state.offsets.entry(path.to_path_buf()).or_insert(0);
    *tracked = (*tracked).max(offset + read);

    let mut chunk = state.partial.remove(path).unwrap_or_default();
    chunk.extend_from_slice(&buf);
    let complete = match chunk.iter().rposition(|&b| b == b'\n') {
        Some(end) => {
            let rest = chunk.split_off(end + 1);
            if !rest.is_empty() {
                state.partial.insert(path.to_path_buf(), rest);
            }
            chunk
        }
        None => {
            state.partial.insert(path.to_path_buf(), chunk);
            return Ok(None);
        }
    };
    drop(state);

    Ok(Some(String::from_utf8_lossy(&complete).into_owned()))
}

fn flush_settled(state: &RwLock<TailState>, path: &Path) -> Option<String> {
    let mut state = state.write().ok()?;
    let settled = state.partial.get(path).is_some_and(|rest| {
        serde_json::from_slice::<serde_json::Value>(rest).is_ok_and(|v| v.is_object())
    });
    if !settled {
        return None;
    }
    let rest = state.partial.remove(path)?;
    tracing::debug!(path = %path.display(), "flushing final record without newline");
    Some(String::from_utf8_lossy(&rest).into_owned())
}

impl Scope {
    /// Every matching file under the root with its current size, sorted.
    fn stat_all(&self) -> Vec<(PathBuf, u64)> {
        self.discover()
            .into_iter()
            .filter_map(|path| match std::fs::metadata(&path) {
                Ok(meta) => Some((path, meta.len())),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to stat session file");
                    None
                }
            })
            .collect()
    }

    /// All matching files under the root, sorted.
    fn discover(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        if let Err(e) = self.walk(&self.root, &mut files) {
            tracing::debug!(root = %self.root.display(), error = %e, "cannot scan session root");
        }
        files.retain(|p| self.matches_project(p));
        files.sort();
        files
    }

    fn walk(&self, dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                if let Err(e) = self.walk(&path, out) {
                    tracing::debug!(path = %path.display(), error = %e, "skipping unreadable directory");
                }
            } else if path
                .file_name()
                .is_some_and(|name| self.matcher.is_match(Path::new(name)))
            {
                out.push(path);
            }
        }
        Ok(())
    }

    /// Name of the first directory below the root, which is the project.
    fn project_of(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let mut components = relative.components();
        let first = components.next()?;
        // A file directly in the root has no project folder.
        components.next()?;
        match first {
            Component::Normal(name) => name.to_str().map(str::to_string),
            _ => None,
        }
    }

    fn matches_project(&self, path: &Path) -> bool {
        match &self.project {
            None => true,
            Some(wanted) => self
                .project_of(path)
                .is_some_and(|project| project.contains(wanted.as_str())),
        }
    }
}

/// Blocking send that gives up when `cancel` fires or the receiver is gone.
async fn send(
    tx: &mpsc::Sender<TailEvent>,
    cancel: &CancellationToken,
    event: TailEvent,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        res = tx.send(event) => res.is_ok(),
    }
}
