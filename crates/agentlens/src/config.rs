//! Configuration file support for agentlens.
//!
//! Loads `agentlens.toml` from the working directory, or from an explicit
//! `--config` path. Command-line flags take priority over file values.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use agentlens_metrics::{ModelPrice, PriceTable, ScoreWeights};
use agentlens_sessions::{
    default_sessions_dir, SessionStore, DEFAULT_DEBOUNCE, DEFAULT_POLL_INTERVAL,
};
use anyhow::{Context, Result};
use serde::Deserialize;

/// The config file name
pub const CONFIG_FILE_NAME: &str = "agentlens.toml";

/// Default file name glob for session logs
pub const DEFAULT_PATTERN: &str = "*.jsonl";

/// Settings loaded from `agentlens.toml`
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Root of the session log tree
    pub sessions_dir: Option<PathBuf>,
    /// File name glob for the watcher
    pub pattern: Option<String>,
    /// Tailer poll interval, e.g. `"500ms"`
    #[serde(default, with = "humantime_serde")]
    pub poll_interval: Option<Duration>,
    /// Watcher write debounce, e.g. `"100ms"`
    #[serde(default, with = "humantime_serde")]
    pub debounce: Option<Duration>,
    /// Composite score weights; renormalized before use
    pub weights: Option<ScoreWeights>,
    /// Per-model prices merged over the built-in table
    #[serde(default)]
    pub pricing: BTreeMap<String, ModelPrice>,
}

impl Config {
    /// Load configuration from the working directory.
    ///
    /// Returns:
    /// - `Ok(Some(config))` if file exists and parses successfully
    /// - `Ok(None)` if file does not exist
    /// - `Err(...)` if file exists but fails to parse (hard error)
    pub fn load(working_dir: &Path) -> Result<Option<Self>> {
        let config_path = working_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(None);
        }

        Self::load_from(&config_path).map(Some)
    }

    /// Load an explicitly named file. A missing file is an error here.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Priority: flag > file > `~/.claude/projects`
    pub fn sessions_dir(&self, flag: Option<PathBuf>) -> Result<PathBuf> {
        match flag.or_else(|| self.sessions_dir.clone()) {
            Some(dir) => Ok(dir),
            None => default_sessions_dir(),
        }
    }

    /// Store over the flag or file directory, else the default location.
    pub fn store(&self, flag: Option<PathBuf>) -> Result<SessionStore> {
        match flag.or_else(|| self.sessions_dir.clone()) {
            Some(dir) => Ok(SessionStore::with_dir(dir)),
            None => SessionStore::new(),
        }
    }

    /// Priority: flag > file > `*.jsonl`
    pub fn pattern(&self, flag: Option<String>) -> String {
        flag.or_else(|| self.pattern.clone())
            .unwrap_or_else(|| DEFAULT_PATTERN.to_string())
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    /// Priority: flag (milliseconds) > file > 100ms
    pub fn debounce(&self, flag_ms: Option<u64>) -> Duration {
        flag_ms
            .map(Duration::from_millis)
            .or(self.debounce)
            .unwrap_or(DEFAULT_DEBOUNCE)
    }

    pub fn price_table(&self) -> PriceTable {
        PriceTable::default().with_overrides(self.pricing.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(Config::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_full_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"
sessions_dir = "/var/log/agents"
pattern = "agent-*.jsonl"
poll_interval = "250ms"
debounce = "1s"

[weights]
success = 2.0
cost = 1.0

[pricing.local-llm]
input_per_million = 0.0
output_per_million = 0.0
"#,
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap().unwrap();
        assert_eq!(config.sessions_dir(None).unwrap(), PathBuf::from("/var/log/agents"));
        assert_eq!(config.pattern(None), "agent-*.jsonl");
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.debounce(None), Duration::from_secs(1));

        // Missing weight keys keep their defaults
        let weights = config.weights.unwrap();
        assert_eq!(weights.success, 2.0);
        assert_eq!(weights.cost, 1.0);
        assert_eq!(weights.speed, 0.2);

        assert_eq!(config.price_table().cost("local-llm", 1_000_000, 1_000_000), 0.0);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "poll = \"1s\"\n").unwrap();
        let err = Config::load(dir.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse"));
    }

    #[test]
    fn test_flags_override_file() {
        let config = Config {
            sessions_dir: Some(PathBuf::from("/from/file")),
            pattern: Some("*.log".to_string()),
            debounce: Some(Duration::from_millis(300)),
            ..Default::default()
        };
        assert_eq!(
            config.sessions_dir(Some(PathBuf::from("/from/flag"))).unwrap(),
            PathBuf::from("/from/flag")
        );
        assert_eq!(
            config.store(None).unwrap().sessions_dir(),
            &PathBuf::from("/from/file")
        );
        assert_eq!(
            config.store(Some(PathBuf::from("/from/flag"))).unwrap().sessions_dir(),
            &PathBuf::from("/from/flag")
        );
        assert_eq!(config.pattern(Some("*.jsonl".to_string())), "*.jsonl");
        assert_eq!(config.debounce(Some(50)), Duration::from_millis(50));
        assert_eq!(config.debounce(None), Duration::from_millis(300));
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.pattern(None), DEFAULT_PATTERN);
        assert_eq!(config.poll_interval(), DEFAULT_POLL_INTERVAL);
        assert_eq!(config.debounce(None), DEFAULT_DEBOUNCE);
        assert_eq!(config.price_table(), PriceTable::default());
    }
}
