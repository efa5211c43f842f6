use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::types::{Event, ParsedSession, Session};

/// Turns a chunk of JSONL text into typed events.
///
/// The tailer hands every delta it reads to a `LineParser`; swap the
/// implementation with [`crate::Tailer::with_parser`].
pub trait LineParser: Send + Sync {
    fn parse(&self, chunk: &str) -> Vec<Event>;
}

/// Default parser for the agent session wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonlParser;

impl LineParser for JsonlParser {
    fn parse(&self, chunk: &str) -> Vec<Event> {
        parse_lines(chunk)
    }
}

/// Parse a single JSON line. Returns `None` for blank lines, malformed JSON,
/// unrecognized record types and records with mistyped fields.
pub fn parse_line(line: &str) -> Option<Event> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "skipping malformed session line");
            return None;
        }
    };

    let kind = value.get("type").and_then(Value::as_str)?.to_string();
    match kind.as_str() {
        "session_start" | "session_metadata" => decode(value).map(Event::SessionStart),
        "tool_call" => decode(value).map(Event::ToolCall),
        "bash_command" => decode(value).map(Event::BashCommand),
        "file_operation" => decode(value).map(Event::FileOperation),
        "token_usage" => decode(value).map(Event::TokenUsage),
        _ => None,
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::debug!(error = %e, "skipping session line with invalid fields");
            None
        }
    }
}

/// Parse every line of a chunk, dropping the ones that do not decode.
pub fn parse_lines(chunk: &str) -> Vec<Event> {
    chunk.lines().filter_map(parse_line).collect()
}

/// Derive a session id from a file name: `<id>.jsonl` or `agent-<id>.jsonl`.
pub fn session_id_from_path(path: &Path) -> String {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown");
    let stem = name.strip_suffix(".jsonl").unwrap_or(name);
    stem.strip_prefix("agent-").unwrap_or(stem).to_string()
}

/// Parse a whole session file. The first `session_start` record becomes the
/// header, which must pass validation.
pub fn parse_session(path: &Path) -> Result<ParsedSession> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read session file: {:?}", path))?;

    let events = parse_lines(&content);

    let start = events
        .iter()
        .find_map(|e| match e {
            Event::SessionStart(s) => Some(s),
            _ => None,
        })
        .with_context(|| format!("Session file has no session_start record: {:?}", path))?;

    let session = Session::from(start);
    session
        .validate()
        .with_context(|| format!("Invalid session header in {:?}", path))?;

    Ok(ParsedSession {
        path: path.to_path_buf(),
        session,
        events,
    })
}
