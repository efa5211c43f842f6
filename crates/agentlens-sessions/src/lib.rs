//! # agentlens-sessions
//!
//! Reading coding-agent session logs: the JSONL wire types and parser, a
//! store for loading whole sessions, a debounced directory watcher and a
//! poll-driven tailer that follows logs as they grow.

pub mod correlate;
pub mod parser;
pub mod store;
pub mod tailer;
pub mod types;
pub mod watcher;

pub use correlate::{resolve_agent_type, HEADLESS_AGENT, UNKNOWN_AGENT};
pub use parser::{parse_line, parse_lines, parse_session, session_id_from_path, JsonlParser, LineParser};
pub use store::{default_sessions_dir, SessionStore};
pub use tailer::{TailError, TailEvent, Tailer, DEFAULT_POLL_INTERVAL};
pub use types::{
    BashCommandEvent, Event, FileOperationEvent, ParsedSession, Session, SessionFilter,
    SessionStartEvent, TokenUsageEvent, ToolCallEvent, ValidationError,
};
pub use watcher::{DirectoryWatcher, FileEvent, FileOp, WatchError, DEFAULT_DEBOUNCE};
