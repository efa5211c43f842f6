use agentlens_sessions::{Event, ParsedSession, Session};

use crate::pricing::PriceTable;
use crate::types::{BashCommand, BehavioralMetrics, FileOperation, TokenUsage, ToolExecution};

/// Folds one session's event stream into [`BehavioralMetrics`].
#[derive(Debug, Clone, Default)]
pub struct MetricsAggregator {
    prices: PriceTable,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prices(prices: PriceTable) -> Self {
        Self { prices }
    }

    pub fn aggregate_parsed(&self, parsed: &ParsedSession) -> BehavioralMetrics {
        self.aggregate(&parsed.session, &parsed.events)
    }

    /// Build metrics for a single session. Events that carry nothing usable
    /// are skipped.
    pub fn aggregate(&self, session: &Session, events: &[Event]) -> BehavioralMetrics {
        let total_sessions = 1u64;
        let mut metrics = BehavioralMetrics {
            total_sessions,
            success_rate: if session.success { 1.0 } else { 0.0 },
            average_duration: session.duration_ms as f64,
            total_errors: session.error_count,
            // Average errors per session, capped so it stays a rate.
            error_rate: (session.error_count as f64 / total_sessions as f64).min(1.0),
            ..Default::default()
        };

        if !session.agent_name.is_empty() {
            metrics
                .agent_performance
                .insert(session.agent_name.clone(), u64::from(session.success));
        }

        let mut supplied_cost = 0.0;
        let mut model_name = String::new();

        for event in events {
            match event {
                Event::ToolCall(call) => {
                    if call.tool_name.is_empty() {
                        continue;
                    }
                    let idx = match metrics
                        .tool_executions
                        .iter()
                        .position(|t| t.name == call.tool_name)
                    {
                        Some(idx) => idx,
                        None => {
                            metrics.tool_executions.push(ToolExecution::new(&call.tool_name));
                            metrics.tool_executions.len() - 1
                        }
                    };
                    metrics.tool_executions[idx].record(call.success, call.duration as f64);
                }
                Event::BashCommand(cmd) => {
                    if cmd.command.is_empty() {
                        continue;
                    }
                    metrics.bash_commands.push(BashCommand {
                        command: cmd.command.clone(),
                        exit_code: cmd.exit_code,
                        output_length: cmd.output_length,
                        duration_ms: cmd.duration,
                        success: cmd.success,
                        timestamp: cmd.timestamp,
                    });
                }
                Event::FileOperation(op) => {
                    if op.operation.is_empty() && op.path.is_empty() {
                        continue;
                    }
                    metrics.file_operations.push(FileOperation {
                        operation: op.operation.clone(),
                        path: op.path.clone(),
                        size_bytes: op.size_bytes,
                        success: op.success,
                        timestamp: op.timestamp,
                        duration_ms: op.duration,
                    });
                }
                Event::TokenUsage(usage) => {
                    metrics.token_usage.input_tokens += usage.input_tokens;
                    metrics.token_usage.output_tokens += usage.output_tokens;
                    if usage.cost_usd.is_finite() && usage.cost_usd > 0.0 {
                        supplied_cost += usage.cost_usd;
                    }
                    if !usage.model_name.is_empty() {
                        model_name = usage.model_name.clone();
                    }
                }
                Event::SessionStart(_) => {}
            }
        }

        let cost = if supplied_cost > 0.0 {
            supplied_cost
        } else {
            self.prices.cost(
                &model_name,
                metrics.token_usage.input_tokens,
                metrics.token_usage.output_tokens,
            )
        };

        metrics.token_usage = TokenUsage {
            cost_usd: cost,
            model_name,
            ..metrics.token_usage
        };
        metrics.total_cost = cost;

        tracing::debug!(
            session = %session.id,
            tools = metrics.tool_executions.len(),
            cost = metrics.total_cost,
            "aggregated session metrics"
        );

        metrics
    }
}
