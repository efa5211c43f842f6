use std::collections::BTreeMap;

use agentlens_metrics::{AgentScore, AggregateStats, Domain};
use agentlens_sessions::{Event, FileEvent, FileOp, TailEvent};
use colored::Colorize;

/// A number shown to the user, tagged with how it should be formatted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Count(u64),
    /// Fraction in [0, 1], shown as a percentage
    Rate(f64),
    /// USD
    Cost(f64),
    /// Milliseconds
    Duration(f64),
    Tokens(u64),
    /// Score in [0, 1]
    Score(f64),
}

impl MetricValue {
    pub fn format(&self) -> String {
        match *self {
            MetricValue::Count(n) => n.to_string(),
            MetricValue::Rate(r) => format!("{:.1}%", r * 100.0),
            MetricValue::Cost(c) => format!("${:.4}", c),
            MetricValue::Duration(ms) => format_duration(ms),
            MetricValue::Tokens(t) => format_tokens(t),
            MetricValue::Score(s) => format!("{:.3}", s),
        }
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format())
    }
}

fn format_duration(ms: f64) -> String {
    let secs = ms / 1000.0;
    if ms < 1000.0 {
        format!("{:.0}ms", ms)
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        let mins = (secs / 60.0).floor() as u64;
        let remaining_secs = (secs % 60.0) as u64;
        format!("{}m {}s", mins, remaining_secs)
    }
}

fn format_tokens(tokens: u64) -> String {
    if tokens < 1_000 {
        tokens.to_string()
    } else if tokens < 1_000_000 {
        format!("{:.1}k", tokens as f64 / 1_000.0)
    } else {
        format!("{:.1}M", tokens as f64 / 1_000_000.0)
    }
}

fn row(label: &str, value: MetricValue) {
    println!("{}  {}", format!("{}:", label).dimmed(), value);
}

pub fn print_stats(stats: &AggregateStats, top: usize) {
    println!("{}", "=== Session Statistics ===".bright_blue().bold());
    row("Total Sessions", MetricValue::Count(stats.total_sessions));
    row("Agents", MetricValue::Count(stats.total_agents as u64));
    row("Success Rate", MetricValue::Rate(stats.success_rate));
    row("Error Rate", MetricValue::Rate(stats.error_rate));
    row("Avg Duration", MetricValue::Duration(stats.average_duration));
    row("Total Cost", MetricValue::Cost(stats.total_cost));
    row("Input Tokens", MetricValue::Tokens(stats.total_input_tokens));
    row("Output Tokens", MetricValue::Tokens(stats.total_output_tokens));

    if !stats.agent_breakdown.is_empty() {
        println!();
        println!("{}", "Successful Sessions By Agent:".dimmed());
        for (agent, successes) in &stats.agent_breakdown {
            println!("  {:<24} {}", agent, MetricValue::Count(*successes));
        }
    }

    let tools = stats.top_tools(top);
    if !tools.is_empty() {
        println!();
        println!(
            "  {:<20} {:>8} {:>8} {:>10}",
            "TOOL".dimmed(),
            "CALLS".dimmed(),
            "SUCCESS".dimmed(),
            "AVG".dimmed(),
        );
        for t in tools {
            println!(
                "  {:<20} {:>8} {:>8} {:>10}",
                t.name,
                MetricValue::Count(t.count).to_string(),
                MetricValue::Rate(t.success_rate).to_string(),
                MetricValue::Duration(t.avg_duration).to_string(),
            );
        }
    }
}

pub fn print_ranking(scores: &[AgentScore]) {
    println!(
        "{:<5} {:<24} {:>9} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "RANK".dimmed(),
        "AGENT".dimmed(),
        "COMPOSITE".dimmed(),
        "SUCCESS".dimmed(),
        "COST".dimmed(),
        "SPEED".dimmed(),
        "RECOVERY".dimmed(),
        "SESSIONS".dimmed(),
    );
    for s in scores {
        let composite = MetricValue::Score(s.composite_score).to_string();
        let composite = if s.composite_score >= 0.6 {
            composite.bright_green()
        } else if s.composite_score >= 0.4 {
            composite.bright_yellow()
        } else {
            composite.bright_red()
        };
        println!(
            "{:<5} {:<24} {:>9} {:>8} {:>8} {:>8} {:>8} {:>8}",
            s.rank,
            s.agent_name,
            composite,
            MetricValue::Score(s.success_score).to_string(),
            MetricValue::Score(s.cost_eff_score).to_string(),
            MetricValue::Score(s.speed_score).to_string(),
            MetricValue::Score(s.error_recov_score).to_string(),
            MetricValue::Count(s.sample_size).to_string(),
        );
    }
}

pub fn print_domains(groups: &BTreeMap<Domain, Vec<AgentScore>>) {
    for (i, (domain, scores)) in groups.iter().enumerate() {
        if i > 0 {
            println!();
        }
        println!("{}", format!("=== {} ===", domain).bright_blue().bold());
        print_ranking(scores);
    }
}

pub fn print_file_event(event: &FileEvent) {
    let op = event.operation.to_string();
    let op = match event.operation {
        FileOp::Created => op.bright_green(),
        FileOp::Written => op.bright_cyan(),
        FileOp::Removed => op.bright_red(),
    };
    println!(
        "{} {:<8} {}",
        event.timestamp.format("%H:%M:%S%.3f").to_string().dimmed(),
        op,
        event.path.display()
    );
}

pub fn print_tail_event(event: &TailEvent) {
    println!(
        "{} {:<15} {}",
        format!("[{}]", event.session_id).bright_blue(),
        event.event.kind().dimmed(),
        describe(&event.event)
    );
}

fn describe(event: &Event) -> String {
    match event {
        Event::SessionStart(start) => {
            let agent = start
                .agent_type
                .as_deref()
                .filter(|a| !a.is_empty())
                .unwrap_or(start.agent_name.as_str());
            format!("{} ({})", agent, start.status)
        }
        Event::ToolCall(call) => format!(
            "{} {} {}",
            call.tool_name,
            status(call.success),
            MetricValue::Duration(call.duration as f64)
        ),
        Event::BashCommand(cmd) => {
            format!("{} (exit {}) {}", cmd.command, cmd.exit_code, status(cmd.success))
        }
        Event::FileOperation(op) => format!("{} {} {}", op.operation, op.path, status(op.success)),
        Event::TokenUsage(usage) => format!(
            "{} in / {} out {}",
            MetricValue::Tokens(usage.input_tokens),
            MetricValue::Tokens(usage.output_tokens),
            usage.model_name
        ),
    }
}

fn status(success: bool) -> String {
    if success {
        "OK".bright_green().to_string()
    } else {
        "ERR".bright_red().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_per_variant() {
        assert_eq!(MetricValue::Count(42).format(), "42");
        assert_eq!(MetricValue::Rate(0.875).format(), "87.5%");
        assert_eq!(MetricValue::Cost(0.105).format(), "$0.1050");
        assert_eq!(MetricValue::Tokens(950).format(), "950");
        assert_eq!(MetricValue::Tokens(12_345).format(), "12.3k");
        assert_eq!(MetricValue::Tokens(2_500_000).format(), "2.5M");
        assert_eq!(MetricValue::Score(0.64172).format(), "0.642");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(MetricValue::Duration(350.0).format(), "350ms");
        assert_eq!(MetricValue::Duration(1500.0).format(), "1.5s");
        assert_eq!(MetricValue::Duration(125_000.0).format(), "2m 5s");
    }

    #[test]
    fn test_describe_prefers_resolved_agent_type() {
        let start = Event::SessionStart(agentlens_sessions::SessionStartEvent {
            agent_name: "general-purpose".to_string(),
            agent_type: Some("code-reviewer".to_string()),
            status: "active".to_string(),
            ..Default::default()
        });
        assert_eq!(describe(&start), "code-reviewer (active)");
    }
}
