// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Assignment scoring: match idle agents to ranked work items.
//!
//! Each (agent, item) pair gets a total score built from the triage base
//! score, an agent-type fit bonus, a critical-path bonus, and penalties
//! for file-reservation load and context-window pressure. Selection is
//! greedy by total score with a deterministic tie-break: pairs are
//! generated in recommendation order (the triage ranking) with agents
//! nested, and the stable sort preserves that order among equal scores.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::agent::{AgentSnapshot, AgentType};
use crate::triage::{RecKind, RecStatus, Recommendation};

/// Scoring knobs.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Context usage percentage above which the context penalty applies.
    pub context_threshold_pct: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self { context_threshold_pct: 80.0 }
    }
}

/// Score components for one pairing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreParts {
    pub base: f64,
    pub agent_type_bonus: f64,
    pub critical_path_bonus: f64,
    pub file_overlap_penalty: f64,
    pub context_penalty: f64,
}

impl ScoreParts {
    pub fn total(&self) -> f64 {
        self.base + self.agent_type_bonus + self.critical_path_bonus
            - self.file_overlap_penalty
            - self.context_penalty
    }
}

/// One selected pairing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredAssignment {
    pub agent: AgentSnapshot,
    pub recommendation: Recommendation,
    pub total_score: f64,
    pub breakdown: ScoreParts,
}

/// Estimated task complexity in `[0, 1]`, derived from the item's shape.
pub fn estimate_complexity(rec: &Recommendation) -> f64 {
    let mut complexity: f64 = 0.5;
    complexity += match rec.kind {
        RecKind::Epic => 0.3,
        RecKind::Feature => 0.2,
        RecKind::Bug => 0.0,
        RecKind::Task => -0.1,
        RecKind::Chore => -0.2,
    };
    match rec.priority {
        0 => complexity -= 0.1,
        3.. => complexity += 0.1,
        _ => {}
    }
    let unblocks = rec.unblocks_ids.len();
    if unblocks >= 5 {
        complexity += 0.15;
    } else if unblocks >= 3 {
        complexity += 0.1;
    }
    complexity.clamp(0.0, 1.0)
}

/// Fit bonus for pairing an agent type with a task of this complexity.
///
/// Claude-class agents are favored for complex work, codex-class for
/// simple work, gemini-class for the middle band.
pub fn agent_type_bonus(agent_type: AgentType, complexity: f64) -> f64 {
    match agent_type {
        AgentType::Claude => {
            if complexity >= 0.7 {
                0.15
            } else if complexity <= 0.3 {
                -0.05
            } else {
                0.0
            }
        }
        AgentType::Codex => {
            if complexity <= 0.3 {
                0.15
            } else if complexity >= 0.7 {
                -0.05
            } else {
                0.0
            }
        }
        AgentType::Gemini => {
            if (0.4..=0.6).contains(&complexity) {
                0.05
            } else {
                0.0
            }
        }
        AgentType::Unknown => 0.0,
    }
}

/// Bonus for items sitting on the task graph's critical path.
pub fn critical_path_bonus(rec: &Recommendation) -> f64 {
    let Some(b) = rec.breakdown else {
        return 0.0;
    };
    let pagerank_part = (b.pagerank * 2.0).min(0.15);
    let impact_part = if b.time_to_impact > 0.04 { 0.05 } else { 0.0 };
    pagerank_part + b.blocker_ratio * 1.5 + impact_part
}

/// Penalty stepped on how many reservations the agent already holds.
pub fn file_overlap_penalty(reservation_count: usize) -> f64 {
    match reservation_count {
        0 => 0.0,
        1..=2 => 0.05,
        3..=5 => 0.10,
        _ => 0.20,
    }
}

/// Penalty for assigning into a nearly-full context window.
pub fn context_penalty(context_usage_pct: u8, threshold_pct: f64) -> f64 {
    (f64::from(context_usage_pct) - threshold_pct).max(0.0) * 0.5
}

/// Score a single pairing.
pub fn score_pair(
    agent: &AgentSnapshot,
    rec: &Recommendation,
    reservation_count: usize,
    config: &ScoringConfig,
) -> ScoreParts {
    let complexity = estimate_complexity(rec);
    ScoreParts {
        base: rec.base_score,
        agent_type_bonus: agent_type_bonus(agent.agent_type, complexity),
        critical_path_bonus: critical_path_bonus(rec),
        file_overlap_penalty: file_overlap_penalty(reservation_count),
        context_penalty: context_penalty(agent.context_usage_pct, config.context_threshold_pct),
    }
}

/// Produce non-conflicting pairings: at most one assignment per agent and
/// per recommendation, greedy by total score, only positive totals.
///
/// Blocked items never pair. `reservation_counts` is keyed by agent name
/// (see [`AgentSnapshot::name`]).
pub fn select_assignments(
    agents: &[AgentSnapshot],
    recommendations: &[Recommendation],
    reservation_counts: &HashMap<String, usize>,
    config: &ScoringConfig,
) -> Vec<ScoredAssignment> {
    struct Candidate {
        agent_idx: usize,
        rec_idx: usize,
        parts: ScoreParts,
        total: f64,
    }

    let mut candidates: Vec<Candidate> = vec![];
    for (rec_idx, rec) in recommendations.iter().enumerate() {
        if rec.status == RecStatus::Blocked {
            continue;
        }
        for (agent_idx, agent) in agents.iter().enumerate() {
            let count = reservation_counts.get(agent.name()).copied().unwrap_or(0);
            let parts = score_pair(agent, rec, count, config);
            let total = parts.total();
            if total > 0.0 {
                candidates.push(Candidate { agent_idx, rec_idx, parts, total });
            }
        }
    }

    // Stable sort: equal totals keep generation order, so the triage
    // ranking is the outer tiebreaker and agent order the inner one.
    candidates.sort_by(|a, b| b.total.total_cmp(&a.total));

    let mut agent_taken = vec![false; agents.len()];
    let mut rec_taken = vec![false; recommendations.len()];
    let mut selected = vec![];
    for c in candidates {
        if agent_taken[c.agent_idx] || rec_taken[c.rec_idx] {
            continue;
        }
        agent_taken[c.agent_idx] = true;
        rec_taken[c.rec_idx] = true;
        selected.push(ScoredAssignment {
            agent: agents[c.agent_idx].clone(),
            recommendation: recommendations[c.rec_idx].clone(),
            total_score: c.total,
            breakdown: c.parts,
        });
    }
    selected
}

#[cfg(test)]
#[path = "score_tests.rs"]
mod tests;
