use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// One typed record from a session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    #[serde(alias = "session_metadata")]
    SessionStart(SessionStartEvent),
    ToolCall(ToolCallEvent),
    BashCommand(BashCommandEvent),
    FileOperation(FileOperationEvent),
    TokenUsage(TokenUsageEvent),
}

impl Event {
    /// Wire discriminator for this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::SessionStart(_) => "session_start",
            Event::ToolCall(_) => "tool_call",
            Event::BashCommand(_) => "bash_command",
            Event::FileOperation(_) => "file_operation",
            Event::TokenUsage(_) => "token_usage",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionStartEvent {
    pub id: String,
    pub project: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub status: String,
    pub agent_name: String,
    /// Session duration in milliseconds.
    pub duration: u64,
    pub success: bool,
    pub error_count: u64,
    /// Resolved sub-agent type, set on starts synthesized by the tailer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolCallEvent {
    pub tool_name: String,
    pub success: bool,
    pub duration: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BashCommandEvent {
    pub command: String,
    pub exit_code: i32,
    pub output_length: u64,
    pub duration: u64,
    pub success: bool,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileOperationEvent {
    pub operation: String,
    pub path: String,
    pub size_bytes: u64,
    pub success: bool,
    pub timestamp: Option<DateTime<Utc>>,
    pub duration: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsageEvent {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub model_name: String,
}

/// Errors raised when a record does not satisfy its invariants.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("session is missing required field: {0}")]
    MissingField(&'static str),

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

/// Session header built from a `session_start` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub project: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub status: String,
    pub agent_name: String,
    pub duration_ms: u64,
    pub success: bool,
    pub error_count: u64,
}

impl Session {
    /// Check that id, project and timestamp are present.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::MissingField("id"));
        }
        if self.project.trim().is_empty() {
            return Err(ValidationError::MissingField("project"));
        }
        match self.timestamp {
            Some(ts) if ts.timestamp() != 0 => Ok(()),
            _ => Err(ValidationError::MissingField("timestamp")),
        }
    }
}

impl From<&SessionStartEvent> for Session {
    fn from(start: &SessionStartEvent) -> Self {
        Self {
            id: start.id.clone(),
            project: start.project.clone(),
            timestamp: start.timestamp,
            status: start.status.clone(),
            agent_name: start.agent_name.clone(),
            duration_ms: start.duration,
            success: start.success,
            error_count: start.error_count,
        }
    }
}

/// A session file loaded from disk: its header plus every event in order.
#[derive(Debug, Clone)]
pub struct ParsedSession {
    pub path: PathBuf,
    pub session: Session,
    pub events: Vec<Event>,
}

/// Filter parameters for listing sessions.
#[derive(Debug, Default)]
pub struct SessionFilter {
    pub project: Option<String>,
    pub agent: Option<String>,
}
