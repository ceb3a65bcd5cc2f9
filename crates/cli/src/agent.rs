// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent registry.
//!
//! One record per supervised agent, keyed by pane id. Agents (or their
//! pane monitors) report status and context usage over the API; a
//! background groomer marks agents unhealthy when they stop reporting.
//! The coordinator only ever sees immutable snapshots.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Known agent types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Claude,
    Codex,
    Gemini,
    Unknown,
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Claude => f.write_str("claude"),
            Self::Codex => f.write_str("codex"),
            Self::Gemini => f.write_str("gemini"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

impl std::str::FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "codex" => Ok(Self::Codex),
            "gemini" => Ok(Self::Gemini),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("invalid agent type: {other}")),
        }
    }
}

/// Reported working state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Working,
    Blocked,
    Error,
}

/// One registered agent.
#[derive(Debug, Clone)]
struct AgentRecord {
    pane_id: String,
    pane_index: u32,
    session: String,
    agent_type: AgentType,
    mail_name: Option<String>,
    status: AgentStatus,
    context_usage_pct: u8,
    healthy: bool,
    last_seen: Instant,
}

/// Serializable point-in-time view of an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub pane_id: String,
    pub pane_index: u32,
    pub session: String,
    pub agent_type: AgentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mail_name: Option<String>,
    pub status: AgentStatus,
    pub context_usage_pct: u8,
    pub healthy: bool,
    pub last_seen_secs_ago: u64,
}

impl AgentSnapshot {
    /// The name the agent is addressed by for mail and reservations:
    /// its mail name when set, the pane id otherwise.
    pub fn name(&self) -> &str {
        self.mail_name.as_deref().unwrap_or(&self.pane_id)
    }
}

/// Registration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAgent {
    pub pane_id: String,
    pub pane_index: u32,
    pub session: String,
    pub agent_type: AgentType,
    #[serde(default)]
    pub mail_name: Option<String>,
}

/// Status update request. Absent fields leave the current value in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentUpdate {
    #[serde(default)]
    pub status: Option<AgentStatus>,
    #[serde(default)]
    pub context_usage_pct: Option<u8>,
}

/// Agent registry — tracks every agent the orchestrator supervises.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, AgentRecord>>,
    /// An agent that has not reported within this window is unhealthy.
    liveness_window: Duration,
}

impl AgentRegistry {
    pub fn new(liveness_window: Duration) -> Self {
        Self { agents: RwLock::new(HashMap::new()), liveness_window }
    }

    /// Register or re-register an agent. Returns true for a new record.
    pub async fn register(&self, req: RegisterAgent) -> bool {
        let mut agents = self.agents.write().await;
        let is_new = !agents.contains_key(&req.pane_id);
        agents.insert(
            req.pane_id.clone(),
            AgentRecord {
                pane_id: req.pane_id,
                pane_index: req.pane_index,
                session: req.session,
                agent_type: req.agent_type,
                mail_name: req.mail_name,
                status: AgentStatus::Idle,
                context_usage_pct: 0,
                healthy: true,
                last_seen: Instant::now(),
            },
        );
        is_new
    }

    /// Remove an agent by pane id.
    pub async fn deregister(&self, pane_id: &str) -> bool {
        self.agents.write().await.remove(pane_id).is_some()
    }

    /// Apply a status update. Any update counts as a liveness report.
    /// Returns false if the agent is unknown.
    pub async fn update(&self, pane_id: &str, update: AgentUpdate) -> bool {
        let mut agents = self.agents.write().await;
        let Some(record) = agents.get_mut(pane_id) else {
            return false;
        };
        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(pct) = update.context_usage_pct {
            record.context_usage_pct = pct.min(100);
        }
        record.healthy = true;
        record.last_seen = Instant::now();
        true
    }

    /// Snapshot one agent.
    pub async fn get(&self, pane_id: &str) -> Option<AgentSnapshot> {
        let agents = self.agents.read().await;
        agents.get(pane_id).map(|r| snapshot(r, Instant::now()))
    }

    /// Snapshot every agent.
    pub async fn list(&self) -> Vec<AgentSnapshot> {
        let agents = self.agents.read().await;
        let now = Instant::now();
        let mut all: Vec<AgentSnapshot> = agents.values().map(|r| snapshot(r, now)).collect();
        all.sort_by(|a, b| (&a.session, a.pane_index).cmp(&(&b.session, b.pane_index)));
        all
    }

    /// Healthy idle agents — the coordinator's candidate pool.
    pub async fn idle(&self) -> Vec<AgentSnapshot> {
        self.list()
            .await
            .into_iter()
            .filter(|a| a.healthy && a.status == AgentStatus::Idle)
            .collect()
    }

    /// Mark an agent's status directly (used by the coordinator after an
    /// assignment is delivered).
    pub async fn set_status(&self, pane_id: &str, status: AgentStatus) -> bool {
        self.update(pane_id, AgentUpdate { status: Some(status), context_usage_pct: None }).await
    }

    /// Run the liveness groomer until shutdown: agents that have not
    /// reported within the liveness window are marked unhealthy (they are
    /// not removed — a late report revives them).
    pub async fn run_groomer(&self, interval: Duration, shutdown: CancellationToken) {
        info!("agent liveness groomer started");
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("agent liveness groomer shutting down");
                    return;
                }
                _ = tick.tick() => {
                    let mut agents = self.agents.write().await;
                    for record in agents.values_mut() {
                        if record.healthy && record.last_seen.elapsed() > self.liveness_window {
                            debug!(pane = %record.pane_id, "agent went quiet, marking unhealthy");
                            record.healthy = false;
                        }
                    }
                }
            }
        }
    }
}

fn snapshot(record: &AgentRecord, now: Instant) -> AgentSnapshot {
    AgentSnapshot {
        pane_id: record.pane_id.clone(),
        pane_index: record.pane_index,
        session: record.session.clone(),
        agent_type: record.agent_type,
        mail_name: record.mail_name.clone(),
        status: record.status,
        context_usage_pct: record.context_usage_pct,
        healthy: record.healthy,
        last_seen_secs_ago: now.duration_since(record.last_seen).as_secs(),
    }
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
