use std::cmp::Ordering;
use std::collections::BTreeMap;

use agentlens_sessions::Session;
use serde::{Deserialize, Serialize};

use crate::types::{AgentScore, BehavioralMetrics, ScoreWeights};

/// Sample size at which about 63% of the distance between the raw score and
/// the 0.5 midpoint is kept.
pub const SHRINKAGE_SCALE: f64 = 3.0;

/// Pull a raw composite toward 0.5 when it rests on few sessions.
///
/// One session keeps about 28% of the raw deviation, twenty keep more than
/// 99%. With no sessions there is no score at all.
pub fn shrink(raw: f64, sample_size: u64) -> f64 {
    if sample_size == 0 {
        return 0.0;
    }
    let confidence = 1.0 - (-(sample_size as f64) / SHRINKAGE_SCALE).exp();
    (0.5 + (raw - 0.5) * confidence).clamp(0.0, 1.0)
}

/// Coarse functional area of an agent, inferred from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Backend,
    Frontend,
    Devops,
    Testing,
    Security,
    General,
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Domain::Backend => write!(f, "backend"),
            Domain::Frontend => write!(f, "frontend"),
            Domain::Devops => write!(f, "devops"),
            Domain::Testing => write!(f, "testing"),
            Domain::Security => write!(f, "security"),
            Domain::General => write!(f, "general"),
        }
    }
}

// Checked in order; the first keyword contained in the name wins.
const DOMAIN_KEYWORDS: [(&str, Domain); 5] = [
    ("backend", Domain::Backend),
    ("frontend", Domain::Frontend),
    ("devops", Domain::Devops),
    ("test", Domain::Testing),
    ("security", Domain::Security),
];

pub fn infer_domain(agent_name: &str) -> Domain {
    let name = agent_name.to_lowercase();
    DOMAIN_KEYWORDS
        .iter()
        .find(|(keyword, _)| name.contains(keyword))
        .map(|(_, domain)| *domain)
        .unwrap_or(Domain::General)
}

#[derive(Debug, Default)]
struct AgentStats {
    total_sessions: u64,
    success_count: u64,
    total_duration: f64,
    error_sessions: u64,
    recovered_sessions: u64,
}

/// Ranks agents by a weighted, small-sample-corrected composite score.
pub struct PerformanceScorer {
    sessions: Vec<Session>,
    metrics: Vec<BehavioralMetrics>,
    weights: ScoreWeights,
    global_cost_per_session: f64,
    global_avg_duration: f64,
}

impl PerformanceScorer {
    pub fn new(sessions: Vec<Session>, metrics: Vec<BehavioralMetrics>) -> Self {
        let total_metric_sessions: u64 = metrics.iter().map(|m| m.total_sessions).sum();
        let total_cost: f64 = metrics.iter().map(|m| m.total_cost).sum();
        let global_cost_per_session = if total_metric_sessions > 0 {
            total_cost / total_metric_sessions as f64
        } else {
            0.0
        };

        let global_avg_duration = if sessions.is_empty() {
            0.0
        } else {
            sessions.iter().map(|s| s.duration_ms as f64).sum::<f64>() / sessions.len() as f64
        };

        Self {
            sessions,
            metrics,
            weights: ScoreWeights::default(),
            global_cost_per_session,
            global_avg_duration,
        }
    }

    pub fn weights(&self) -> ScoreWeights {
        self.weights
    }

    /// Replace the weights, renormalized to sum to 1.0. All-zero input
    /// leaves the current weights in place.
    pub fn set_weights(&mut self, success: f64, cost: f64, speed: f64, recovery: f64) {
        match ScoreWeights::normalized(success, cost, speed, recovery) {
            Some(weights) => self.weights = weights,
            None => tracing::debug!("ignoring all-zero score weights"),
        }
    }

    /// Score one agent. The returned score is unranked (`rank == 0`).
    pub fn score_agent(&self, agent_name: &str) -> AgentScore {
        let stats = self.agent_stats(agent_name);
        if stats.total_sessions == 0 {
            return AgentScore {
                agent_name: agent_name.to_string(),
                ..Default::default()
            };
        }

        let sessions = stats.total_sessions as f64;
        let success_score = stats.success_count as f64 / sessions;
        let cost_eff_score = relative_score(self.agent_cost_per_session(agent_name), self.global_cost_per_session);
        let speed_score = relative_score(stats.total_duration / sessions, self.global_avg_duration);
        let error_recov_score = if stats.error_sessions > 0 {
            stats.recovered_sessions as f64 / stats.error_sessions as f64
        } else {
            0.0
        };

        let w = &self.weights;
        let raw = w.success * success_score
            + w.cost * cost_eff_score
            + w.speed * speed_score
            + w.recovery * error_recov_score;

        AgentScore {
            agent_name: agent_name.to_string(),
            success_score: success_score.clamp(0.0, 1.0),
            cost_eff_score,
            speed_score,
            error_recov_score: error_recov_score.clamp(0.0, 1.0),
            composite_score: shrink(raw, stats.total_sessions),
            sample_size: stats.total_sessions,
            rank: 0,
        }
    }

    /// Score every agent seen in the sessions, best first. Ties keep the
    /// order in which agents first appear.
    pub fn rank_agents(&self) -> Vec<AgentScore> {
        let mut scores: Vec<AgentScore> = self
            .agent_names()
            .iter()
            .map(|name| self.score_agent(name))
            .collect();
        sort_and_rank(&mut scores);
        scores
    }

    /// The ranking split by inferred domain, re-ranked from 1 within each.
    pub fn compare_within_domain(&self) -> BTreeMap<Domain, Vec<AgentScore>> {
        let mut groups: BTreeMap<Domain, Vec<AgentScore>> = BTreeMap::new();
        for score in self.rank_agents() {
            groups
                .entry(infer_domain(&score.agent_name))
                .or_default()
                .push(score);
        }
        for scores in groups.values_mut() {
            sort_and_rank(scores);
        }
        groups
    }

    fn agent_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for s in &self.sessions {
            if !s.agent_name.is_empty() && !names.contains(&s.agent_name) {
                names.push(s.agent_name.clone());
            }
        }
        names
    }

    fn agent_stats(&self, agent_name: &str) -> AgentStats {
        let mut stats = AgentStats::default();
        for s in self.sessions.iter().filter(|s| s.agent_name == agent_name) {
            stats.total_sessions += 1;
            stats.total_duration += s.duration_ms as f64;
            if s.success {
                stats.success_count += 1;
            }
            if s.error_count > 0 {
                stats.error_sessions += 1;
                if s.success {
                    stats.recovered_sessions += 1;
                }
            }
        }
        stats
    }

    /// Cost per session over the metrics that credit this agent.
    fn agent_cost_per_session(&self, agent_name: &str) -> f64 {
        let (cost, sessions) = self
            .metrics
            .iter()
            .filter(|m| m.agent_performance.contains_key(agent_name))
            .fold((0.0, 0u64), |(cost, sessions), m| {
                (cost + m.total_cost, sessions + m.total_sessions)
            });
        if sessions == 0 {
            self.global_cost_per_session
        } else {
            cost / sessions as f64
        }
    }
}

/// Lower is better: `baseline / (baseline + value)`, so matching the baseline
/// scores 0.5, zero scores 1.0 and the score falls toward 0 as value grows.
fn relative_score(value: f64, baseline: f64) -> f64 {
    let total = baseline + value;
    if !total.is_finite() || total <= 0.0 {
        return 0.5;
    }
    (baseline / total).clamp(0.0, 1.0)
}

fn sort_and_rank(scores: &mut [AgentScore]) {
    scores.sort_by(|a, b| {
        b.composite_score
            .partial_cmp(&a.composite_score)
            .unwrap_or(Ordering::Equal)
    });
    for (i, score) in scores.iter_mut().enumerate() {
        score.rank = i + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shrink_bounds() {
        let one = shrink(1.0, 1);
        assert!((0.5..=0.7).contains(&one), "got {}", one);

        for raw in [0.0, 0.3, 0.8, 1.0] {
            let twenty = shrink(raw, 20);
            assert!((twenty - raw).abs() <= 0.01, "raw {} got {}", raw, twenty);
        }

        assert_eq!(shrink(1.0, 0), 0.0);
        assert_eq!(shrink(0.5, 3), 0.5);
    }

    #[test]
    fn test_shrink_is_monotonic_in_sample_size() {
        let mut last = 0.5;
        for n in 1..30 {
            let s = shrink(0.9, n);
            assert!(s > last);
            last = s;
        }
    }

    #[test]
    fn test_infer_domain() {
        assert_eq!(infer_domain("backend-api"), Domain::Backend);
        assert_eq!(infer_domain("frontend-react"), Domain::Frontend);
        assert_eq!(infer_domain("DevOps-Pipeline"), Domain::Devops);
        assert_eq!(infer_domain("unit-tester"), Domain::Testing);
        assert_eq!(infer_domain("security-auditor"), Domain::Security);
        assert_eq!(infer_domain("code-reviewer"), Domain::General);
        // First keyword in order wins
        assert_eq!(infer_domain("frontend-backend-bridge"), Domain::Backend);
    }

    #[test]
    fn test_relative_score() {
        assert_eq!(relative_score(1.0, 1.0), 0.5);
        assert_eq!(relative_score(0.0, 2.0), 1.0);
        assert_eq!(relative_score(3.0, 1.0), 0.25);
        assert_eq!(relative_score(0.0, 0.0), 0.5);
        assert_eq!(relative_score(5.0, 0.0), 0.0);
    }
}
