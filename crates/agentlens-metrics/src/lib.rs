//! # agentlens-metrics
//!
//! Turns parsed sessions into numbers: per-session behavioral metrics,
//! cross-session statistics and a composite ranking of agents.

pub mod aggregator;
pub mod pricing;
pub mod scorer;
pub mod stats;
pub mod types;

pub use aggregator::MetricsAggregator;
pub use pricing::{ModelPrice, PriceTable, DEFAULT_MODEL};
pub use scorer::{infer_domain, shrink, Domain, PerformanceScorer, SHRINKAGE_SCALE};
pub use stats::StatsAggregator;
pub use types::{
    AgentScore, AggregateStats, BashCommand, BehavioralMetrics, FileOperation, ScoreWeights,
    TokenUsage, ToolExecution, ToolStatSummary,
};
