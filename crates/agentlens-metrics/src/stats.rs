use crate::types::{AggregateStats, BehavioralMetrics, ToolStatSummary};

/// Reduces many [`BehavioralMetrics`] into one [`AggregateStats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsAggregator;

impl StatsAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Rates and the average duration are weighted by each batch's session
    /// count. Tool rates are recomputed from summed counts.
    pub fn aggregate(&self, batches: &[BehavioralMetrics]) -> AggregateStats {
        let mut stats = AggregateStats::default();

        let mut weighted_success = 0.0;
        let mut weighted_errors = 0.0;
        let mut weighted_duration = 0.0;
        let mut tools: Vec<ToolStatSummary> = Vec::new();

        for m in batches {
            let sessions = m.total_sessions as f64;
            stats.total_sessions += m.total_sessions;
            weighted_success += m.success_rate * sessions;
            weighted_errors += m.error_rate * sessions;
            weighted_duration += m.average_duration * sessions;

            stats.total_cost += m.total_cost;
            stats.total_input_tokens += m.token_usage.input_tokens;
            stats.total_output_tokens += m.token_usage.output_tokens;

            for (agent, successes) in &m.agent_performance {
                *stats.agent_breakdown.entry(agent.clone()).or_insert(0) += successes;
            }

            for tool in &m.tool_executions {
                let idx = match tools.iter().position(|t| t.name == tool.name) {
                    Some(idx) => idx,
                    None => {
                        tools.push(ToolStatSummary {
                            name: tool.name.clone(),
                            ..Default::default()
                        });
                        tools.len() - 1
                    }
                };
                let summary = &mut tools[idx];
                // Must run before `count` is bumped.
                summary.avg_duration = weighted_mean(
                    summary.avg_duration,
                    summary.count,
                    tool.avg_duration,
                    tool.count,
                );
                summary.count += tool.count;
                summary.total_success += tool.total_success;
                summary.total_errors += tool.total_errors;
            }
        }

        if stats.total_sessions > 0 {
            let total = stats.total_sessions as f64;
            stats.success_rate = weighted_success / total;
            stats.error_rate = weighted_errors / total;
            stats.average_duration = weighted_duration / total;
        }

        for tool in &mut tools {
            if tool.count > 0 {
                tool.success_rate = tool.total_success as f64 / tool.count as f64;
                tool.error_rate = tool.total_errors as f64 / tool.count as f64;
            }
        }
        // Stable sort keeps first-seen order among equal counts.
        tools.sort_by(|a, b| b.count.cmp(&a.count));

        stats.total_agents = stats.agent_breakdown.len();
        stats.top_tools = tools;
        stats
    }
}

fn weighted_mean(a: f64, a_count: u64, b: f64, b_count: u64) -> f64 {
    let total = a_count + b_count;
    if total == 0 {
        return 0.0;
    }
    (a * a_count as f64 + b * b_count as f64) / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_mean() {
        assert_eq!(weighted_mean(0.0, 0, 0.0, 0), 0.0);
        assert_eq!(weighted_mean(10.0, 1, 40.0, 3), 32.5);
    }

    #[test]
    fn test_empty_input_is_all_zero() {
        let stats = StatsAggregator::new().aggregate(&[]);
        assert_eq!(stats, AggregateStats::default());
    }
}
