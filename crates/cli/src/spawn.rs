// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent spawn: headroom gate, pane creation, registration, streaming.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::agent::{AgentRegistry, AgentSnapshot, AgentType, RegisterAgent};
use crate::error::{OpError, OpResult};
use crate::event;
use crate::headroom::{HeadroomGuard, SpawnDecision};
use crate::hub::EventBus;
use crate::mux::Multiplexer;
use crate::streamer::StreamManager;

/// Spawn request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub session: String,
    pub agent_type: AgentType,
    /// Command launched in the new pane (the agent CLI). The pane holds a
    /// plain shell when absent.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub mail_name: Option<String>,
}

/// Spawn outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnResult {
    pub agent: AgentSnapshot,
    pub session_created: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Spawn one agent into a session pane.
///
/// The headroom guard runs first: a blocked host refuses before the
/// multiplexer is touched. A missing session is created on the fly (its
/// first pane hosts the agent); otherwise the agent gets a new split.
pub async fn spawn_agent(
    guard: &Arc<HeadroomGuard>,
    mux: &Arc<dyn Multiplexer>,
    agents: &AgentRegistry,
    streams: &StreamManager,
    bus: &EventBus,
    working_dir: &Path,
    request: SpawnRequest,
) -> OpResult<SpawnResult> {
    let mut warning = None;
    match guard.check_spawn().await? {
        SpawnDecision::Allow => {}
        SpawnDecision::Warn { message } => warning = Some(message),
        SpawnDecision::Block { reason, remediation } => {
            return Err(OpError::unavailable(reason).with_hint(remediation));
        }
    }

    let command = request.command.as_deref();
    let session_created = !mux.session_exists(&request.session).await?;
    let pane = if session_created {
        mux.create_session(&request.session, working_dir, command).await?;
        bus.emit(
            event::session_topic(&request.session),
            event::SESSION_CREATED,
            serde_json::json!({ "session": request.session }),
        );
        mux.list_panes(&request.session)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| OpError::internal("new session reported no panes"))?
    } else {
        mux.split_window(&request.session, working_dir, command).await?
    };

    agents
        .register(RegisterAgent {
            pane_id: pane.id.clone(),
            pane_index: pane.index,
            session: request.session.clone(),
            agent_type: request.agent_type,
            mail_name: request.mail_name,
        })
        .await;
    streams.start_stream(&request.session, &pane).await?;

    bus.emit(
        event::session_topic(&request.session),
        event::AGENT_SPAWNED,
        serde_json::json!({
            "session": request.session,
            "pane_id": pane.id,
            "pane_index": pane.index,
            "agent_type": request.agent_type,
        }),
    );

    let agent = agents
        .get(&pane.id)
        .await
        .ok_or_else(|| OpError::internal("agent vanished after registration"))?;
    info!(
        session = %request.session,
        pane = %pane.id,
        agent_type = %request.agent_type,
        "agent spawned"
    );
    Ok(SpawnResult { agent, session_created, warning })
}

#[cfg(test)]
#[path = "spawn_tests.rs"]
mod tests;
