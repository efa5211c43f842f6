//! Best-effort resolution of the agent type behind a session log.
//!
//! Sub-agent logs do not always say what kind of agent produced them. When
//! the first record has no `agentType`, the parent session's log is scanned
//! for the `Task` tool call that spawned this agent and its declared
//! `subagent_type` is used instead.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::parser::session_id_from_path;

pub const UNKNOWN_AGENT: &str = "unknown";
pub const HEADLESS_AGENT: &str = "headless";

/// How much of a file is read to find its first record.
pub const SNIFF_BYTES: usize = 8 * 1024;
/// Lines longer than this end a parent-log scan.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Resolve the agent type for a session file. Never fails: every miss
/// resolves to [`UNKNOWN_AGENT`].
pub fn resolve_agent_type(path: &Path) -> String {
    match try_resolve(path) {
        Some(agent_type) => agent_type,
        None => {
            tracing::debug!(path = %path.display(), "could not resolve agent type");
            UNKNOWN_AGENT.to_string()
        }
    }
}

fn try_resolve(path: &Path) -> Option<String> {
    let first = read_first_record(path)?;

    if let Some(agent_type) = first.get("agentType").and_then(Value::as_str) {
        if !agent_type.is_empty() {
            return Some(agent_type.to_string());
        }
    }

    if first.get("type").and_then(Value::as_str) == Some("queue-operation") {
        return Some(HEADLESS_AGENT.to_string());
    }

    let parent_id = first.get("sessionId").and_then(Value::as_str)?;
    let agent_id = session_id_from_path(path);
    if parent_id.is_empty() || parent_id == agent_id {
        return None;
    }

    let parent = find_parent_log(path, parent_id)?;
    let tool_use_id = find_spawning_tool_use(&parent, &agent_id)?;
    find_subagent_type(&parent, &tool_use_id)
}

/// Parse the first line within the sniff window.
fn read_first_record(path: &Path) -> Option<Value> {
    let file = File::open(path).ok()?;
    let mut buf = Vec::with_capacity(SNIFF_BYTES);
    file.take(SNIFF_BYTES as u64).read_to_end(&mut buf).ok()?;

    let line = match buf.iter().position(|&b| b == b'\n') {
        Some(end) => &buf[..end],
        None => &buf[..],
    };
    serde_json::from_slice(line).ok()
}

/// The parent log lives next to the agent log, or a level or two above it
/// when sub-agent logs are kept in a per-session folder.
fn find_parent_log(path: &Path, parent_id: &str) -> Option<PathBuf> {
    let name = format!("{}.jsonl", parent_id);
    path.ancestors()
        .skip(1)
        .take(3)
        .map(|dir| dir.join(&name))
        .find(|candidate| candidate.is_file())
}

/// Find the tool result that references `agent_id` and return the id of the
/// tool call it answers.
fn find_spawning_tool_use(parent: &Path, agent_id: &str) -> Option<String> {
    let mut found = None;
    scan_lines(parent, |line| {
        if !contains(line, agent_id.as_bytes()) {
            return ControlFlow::Continue(());
        }
        let Ok(record) = serde_json::from_slice::<Value>(line) else {
            return ControlFlow::Continue(());
        };
        let Some(result) = record.get("toolUseResult") else {
            return ControlFlow::Continue(());
        };
        if result.get("agentId").and_then(Value::as_str) != Some(agent_id) {
            return ControlFlow::Continue(());
        }

        found = result
            .get("tool_use_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| content_items(&record).find_map(tool_result_id));
        if found.is_some() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;
    found
}

/// Find the `Task` tool call with the given id and read its sub-agent type.
fn find_subagent_type(parent: &Path, tool_use_id: &str) -> Option<String> {
    let mut found = None;
    scan_lines(parent, |line| {
        if !contains(line, tool_use_id.as_bytes()) {
            return ControlFlow::Continue(());
        }
        let Ok(record) = serde_json::from_slice::<Value>(line) else {
            return ControlFlow::Continue(());
        };
        found = content_items(&record)
            .filter(|item| item.get("id").and_then(Value::as_str) == Some(tool_use_id))
            .filter(|item| item.get("name").and_then(Value::as_str) == Some("Task"))
            .find_map(|item| {
                item.pointer("/input/subagent_type")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            });
        if found.is_some() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;
    found
}

fn content_items(record: &Value) -> impl Iterator<Item = &Value> {
    record
        .pointer("/message/content")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn tool_result_id(item: &Value) -> Option<String> {
    if item.get("type").and_then(Value::as_str) != Some("tool_result") {
        return None;
    }
    item.get("tool_use_id")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

/// Feed each line of `path` to `visit` until it breaks. Returns `None` when
/// the file cannot be read or a line exceeds [`MAX_LINE_BYTES`].
fn scan_lines<F>(path: &Path, mut visit: F) -> Option<()>
where
    F: FnMut(&[u8]) -> ControlFlow<()>,
{
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = reader
            .by_ref()
            .take(MAX_LINE_BYTES as u64 + 1)
            .read_until(b'\n', &mut line)
            .ok()?;
        if n == 0 {
            return Some(());
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        } else if line.len() > MAX_LINE_BYTES {
            tracing::debug!(path = %path.display(), "line too long, stopping scan");
            return None;
        }
        if visit(&line).is_break() {
            return Some(());
        }
    }
}
