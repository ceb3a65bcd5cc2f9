// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordinator: the work-assignment tick loop.
//!
//! Each tick pairs healthy idle agents with the freshest triage snapshot
//! through the scorer, delivers an assignment message to each paired
//! agent, and only then announces `work.assigned` — downstream observers
//! see an assignment once the agent has been notified (or the delivery
//! failure has been recorded on the result).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{AgentRegistry, AgentStatus};
use crate::error::OpResult;
use crate::event;
use crate::hub::EventBus;
use crate::mail::MailSender;
use crate::reservation::ReservationRegistry;
use crate::score::{select_assignments, ScoredAssignment, ScoringConfig};
use crate::triage::RecommendationCache;

/// Coordinator knobs.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub tick_interval: Duration,
    pub scoring: ScoringConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self { tick_interval: Duration::from_secs(30), scoring: ScoringConfig::default() }
    }
}

/// One accepted assignment and whether the agent was actually notified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentResult {
    #[serde(flatten)]
    pub assignment: ScoredAssignment,
    pub message_sent: bool,
}

pub struct Coordinator {
    agents: Arc<AgentRegistry>,
    reservations: Arc<ReservationRegistry>,
    cache: Arc<RecommendationCache>,
    mail: Arc<dyn MailSender>,
    bus: Arc<EventBus>,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(
        agents: Arc<AgentRegistry>,
        reservations: Arc<ReservationRegistry>,
        cache: Arc<RecommendationCache>,
        mail: Arc<dyn MailSender>,
        bus: Arc<EventBus>,
        config: CoordinatorConfig,
    ) -> Self {
        Self { agents, reservations, cache, mail, bus, config }
    }

    /// Run one assignment pass.
    pub async fn tick(&self) -> OpResult<Vec<AssignmentResult>> {
        let idle = self.agents.idle().await;
        if idle.is_empty() {
            return Ok(vec![]);
        }

        let recommendations = self.cache.get().await?;
        if recommendations.is_empty() {
            return Ok(vec![]);
        }

        let reservation_counts: HashMap<String, usize> = idle
            .iter()
            .map(|a| (a.name().to_owned(), self.reservations.count_for(a.name())))
            .collect();

        let selected =
            select_assignments(&idle, &recommendations, &reservation_counts, &self.config.scoring);

        let mut results = Vec::with_capacity(selected.len());
        for assignment in selected {
            results.push(self.deliver(assignment).await);
        }
        Ok(results)
    }

    /// Deliver one assignment: mail first, then the event emission, then
    /// the status flip that takes the agent out of the idle pool.
    async fn deliver(&self, assignment: ScoredAssignment) -> AssignmentResult {
        let agent = &assignment.agent;
        let rec = &assignment.recommendation;

        let subject = format!("work assignment: {}", rec.id);
        let body = format!(
            "{}\npriority {} · score {:.2}",
            rec.title, rec.priority, assignment.total_score
        );
        let message_sent = match self.mail.send(agent, &subject, &body).await {
            Ok(()) => true,
            Err(e) => {
                warn!(agent = agent.name(), rec = %rec.id, "assignment mail failed: {e}");
                false
            }
        };

        self.bus.emit(
            event::session_topic(&agent.session),
            event::WORK_ASSIGNED,
            serde_json::json!({
                "agent": agent.name(),
                "pane_id": agent.pane_id,
                "recommendation_id": rec.id,
                "title": rec.title,
                "total_score": assignment.total_score,
                "breakdown": assignment.breakdown,
                "message_sent": message_sent,
            }),
        );

        self.agents.set_status(&agent.pane_id, AgentStatus::Working).await;
        info!(
            agent = agent.name(),
            rec = %rec.id,
            score = assignment.total_score,
            message_sent,
            "work assigned"
        );
        AssignmentResult { assignment, message_sent }
    }

    /// Run the tick loop until shutdown. Failures are logged and the loop
    /// continues — a broken triage source must not unwind the process.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("coordinator started");
        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("coordinator shutting down");
                    return;
                }
                _ = tick.tick() => {
                    match self.tick().await {
                        Ok(results) if !results.is_empty() => {
                            debug!(count = results.len(), "assignment tick complete");
                        }
                        Ok(_) => {}
                        Err(e) => warn!("assignment tick failed: {e}"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
