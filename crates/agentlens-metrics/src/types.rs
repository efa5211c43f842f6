use std::collections::BTreeMap;

use agentlens_sessions::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Behavioral metrics folded from one or more sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BehavioralMetrics {
    pub total_sessions: u64,
    pub success_rate: f64,
    /// Milliseconds.
    pub average_duration: f64,
    pub total_cost: f64,
    pub tool_executions: Vec<ToolExecution>,
    pub bash_commands: Vec<BashCommand>,
    pub file_operations: Vec<FileOperation>,
    pub token_usage: TokenUsage,
    pub error_rate: f64,
    pub total_errors: u64,
    /// Agent name to number of successful sessions.
    pub agent_performance: BTreeMap<String, u64>,
}

impl BehavioralMetrics {
    /// Check the range invariants downstream consumers rely on.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_unit("success_rate", self.success_rate)?;
        check_unit("error_rate", self.error_rate)?;
        if self.total_cost.is_nan() || self.total_cost < 0.0 {
            return Err(ValidationError::OutOfRange {
                field: "total_cost",
                value: self.total_cost,
            });
        }
        for tool in &self.tool_executions {
            check_unit("tool success_rate", tool.success_rate)?;
            check_unit("tool error_rate", tool.error_rate)?;
        }
        Ok(())
    }
}

fn check_unit(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange { field, value })
    }
}

/// Per-tool execution summary. Rates are derived from the counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub name: String,
    pub count: u64,
    pub success_rate: f64,
    pub error_rate: f64,
    /// Milliseconds, maintained as a running mean.
    pub avg_duration: f64,
    pub total_success: u64,
    pub total_errors: u64,
}

impl ToolExecution {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Fold one call into the summary.
    pub fn record(&mut self, success: bool, duration_ms: f64) {
        self.count += 1;
        if success {
            self.total_success += 1;
        } else {
            self.total_errors += 1;
        }
        let n = self.count as f64;
        self.avg_duration = (self.avg_duration * (n - 1.0) + duration_ms) / n;
        self.success_rate = self.total_success as f64 / n;
        self.error_rate = self.total_errors as f64 / n;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BashCommand {
    pub command: String,
    pub exit_code: i32,
    pub output_length: u64,
    pub duration_ms: u64,
    pub success: bool,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileOperation {
    pub operation: String,
    pub path: String,
    pub size_bytes: u64,
    pub success: bool,
    pub timestamp: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub model_name: String,
}

/// Normalized scores for one agent. Component scores and the composite are
/// in [0, 1]; `rank` is 0 until the agent is ranked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentScore {
    pub agent_name: String,
    pub success_score: f64,
    pub cost_eff_score: f64,
    pub speed_score: f64,
    pub error_recov_score: f64,
    pub composite_score: f64,
    pub sample_size: u64,
    pub rank: usize,
}

/// Weights for the composite score, always summing to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScoreWeights {
    pub success: f64,
    pub cost: f64,
    pub speed: f64,
    pub recovery: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            success: 0.4,
            cost: 0.2,
            speed: 0.2,
            recovery: 0.2,
        }
    }
}

impl ScoreWeights {
    /// Renormalize to sum to 1.0. Negative weights count as zero; returns
    /// `None` when nothing is left to normalize.
    pub fn normalized(success: f64, cost: f64, speed: f64, recovery: f64) -> Option<Self> {
        let clamp = |w: f64| if w.is_finite() && w > 0.0 { w } else { 0.0 };
        let (success, cost, speed, recovery) =
            (clamp(success), clamp(cost), clamp(speed), clamp(recovery));
        let total = success + cost + speed + recovery;
        if total <= 0.0 {
            return None;
        }
        Some(Self {
            success: success / total,
            cost: cost / total,
            speed: speed / total,
            recovery: recovery / total,
        })
    }
}

/// Tool totals across many metrics batches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolStatSummary {
    pub name: String,
    pub count: u64,
    pub total_success: u64,
    pub total_errors: u64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub avg_duration: f64,
}

/// Cross-session summary produced by [`crate::StatsAggregator`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub total_sessions: u64,
    pub total_agents: usize,
    pub total_cost: f64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub average_duration: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub agent_breakdown: BTreeMap<String, u64>,
    /// Sorted by count, descending.
    pub top_tools: Vec<ToolStatSummary>,
}

impl AggregateStats {
    /// The `n` most used tools; `0` means all of them.
    pub fn top_tools(&self, n: usize) -> &[ToolStatSummary] {
        if n == 0 {
            return &self.top_tools;
        }
        &self.top_tools[..n.min(self.top_tools.len())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_mean_matches_arithmetic_mean() {
        let mut tool = ToolExecution::new("Read");
        for d in [100.0, 200.0, 50.0] {
            tool.record(true, d);
        }
        assert_eq!(tool.count, 3);
        assert!((tool.avg_duration - 350.0 / 3.0).abs() < 1e-9);
        assert!((tool.avg_duration - 116.67).abs() < 0.01);
    }

    #[test]
    fn test_record_derives_rates() {
        let mut tool = ToolExecution::new("Edit");
        tool.record(true, 10.0);
        tool.record(false, 10.0);
        tool.record(true, 10.0);
        tool.record(true, 10.0);
        assert_eq!(tool.total_success, 3);
        assert_eq!(tool.total_errors, 1);
        assert_eq!(tool.success_rate, 0.75);
        assert_eq!(tool.error_rate, 0.25);
    }

    #[test]
    fn test_normalized_weights() {
        let w = ScoreWeights::normalized(2.0, 1.0, 1.0, 0.0).unwrap();
        assert_eq!(w.success, 0.5);
        assert_eq!(w.cost, 0.25);
        assert_eq!(w.speed, 0.25);
        assert_eq!(w.recovery, 0.0);

        assert!(ScoreWeights::normalized(0.0, 0.0, 0.0, 0.0).is_none());
        assert!(ScoreWeights::normalized(-1.0, 0.0, 0.0, 0.0).is_none());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut m = BehavioralMetrics {
            success_rate: 1.0,
            ..Default::default()
        };
        assert!(m.validate().is_ok());

        m.error_rate = 1.5;
        assert!(m.validate().is_err());

        m.error_rate = 0.0;
        m.total_cost = -0.01;
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_top_tools_clamps() {
        let stats = AggregateStats {
            top_tools: vec![
                ToolStatSummary {
                    name: "A".to_string(),
                    count: 3,
                    ..Default::default()
                },
                ToolStatSummary {
                    name: "B".to_string(),
                    count: 1,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        assert_eq!(stats.top_tools(0).len(), 2);
        assert_eq!(stats.top_tools(1)[0].name, "A");
        assert_eq!(stats.top_tools(10).len(), 2);
    }
}
