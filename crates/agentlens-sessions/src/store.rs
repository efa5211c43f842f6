use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::parser::parse_session;
use crate::types::{ParsedSession, SessionFilter};

/// Provides access to session log files on disk.
pub struct SessionStore {
    sessions_dir: PathBuf,
}

impl SessionStore {
    /// Create a new SessionStore using the default sessions directory
    /// (`~/.claude/projects`).
    pub fn new() -> Result<Self> {
        Ok(Self {
            sessions_dir: default_sessions_dir()?,
        })
    }

    /// Create a SessionStore with a custom directory (useful for testing).
    pub fn with_dir(sessions_dir: PathBuf) -> Self {
        Self { sessions_dir }
    }

    /// Return the sessions directory path.
    pub fn sessions_dir(&self) -> &PathBuf {
        &self.sessions_dir
    }

    /// Load every session matching the filter, oldest first.
    ///
    /// Files that cannot be read or whose header is invalid are logged and
    /// skipped.
    pub fn list(&self, filter: &SessionFilter) -> Result<Vec<ParsedSession>> {
        if !self.sessions_dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        collect_jsonl(&self.sessions_dir, &mut paths)
            .with_context(|| format!("Failed to read sessions dir: {:?}", self.sessions_dir))?;
        paths.sort();

        let mut sessions = Vec::new();
        for path in paths {
            match parse_session(&path) {
                Ok(parsed) => {
                    if matches_filter(&parsed, filter) {
                        sessions.push(parsed);
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to load session");
                }
            }
        }

        // Stable: equal timestamps keep path order
        sessions.sort_by_key(|s| s.session.timestamp);

        Ok(sessions)
    }

    /// Get a session by id, looking for `<id>.jsonl` or `agent-<id>.jsonl`.
    pub fn get(&self, id: &str) -> Result<ParsedSession> {
        let mut paths = Vec::new();
        collect_jsonl(&self.sessions_dir, &mut paths)?;
        let wanted = [format!("{}.jsonl", id), format!("agent-{}.jsonl", id)];
        let path = paths
            .into_iter()
            .find(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| wanted.iter().any(|w| w == n))
            })
            .with_context(|| format!("Session not found: {}", id))?;
        parse_session(&path)
    }
}

/// `~/.claude/projects`, where coding agents write their session logs.
pub fn default_sessions_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().with_context(|| "Could not determine home directory")?;
    Ok(home.join(".claude").join("projects"))
}

fn collect_jsonl(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            if let Err(e) = collect_jsonl(&path, out) {
                tracing::debug!(path = %path.display(), error = %e, "skipping unreadable directory");
            }
        } else if path.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            out.push(path);
        }
    }
    Ok(())
}

fn matches_filter(parsed: &ParsedSession, filter: &SessionFilter) -> bool {
    if let Some(ref project) = filter.project {
        if parsed.session.project != *project {
            return false;
        }
    }

    if let Some(ref agent) = filter.agent {
        if parsed.session.agent_name != *agent {
            return false;
        }
    }

    true
}
