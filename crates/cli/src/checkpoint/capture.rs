// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Checkpoint capture: snapshot a live session into the store.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::agent::{AgentRegistry, AgentType};
use crate::error::{OpError, OpResult};
use crate::mux::Multiplexer;

use super::{vcs, write_manifest, CheckpointMeta, CheckpointStore, PaneMeta};

/// Capture knobs.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub name: String,
    pub description: String,
    /// How far back scrollback capture reaches, in lines.
    pub scrollback_lines: u32,
    /// Capture a patch of uncommitted changes alongside the VCS state.
    pub include_patch: bool,
}

impl CaptureOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            scrollback_lines: 2000,
            include_patch: true,
        }
    }
}

/// Capture a session into a new immutable checkpoint.
///
/// Captures are totally ordered per session: the store's session lock is
/// held for the duration, so concurrent capture/restore of the same
/// session serialize.
pub async fn capture_checkpoint(
    mux: &Arc<dyn Multiplexer>,
    agents: &AgentRegistry,
    store: &CheckpointStore,
    session: &str,
    working_dir: &Path,
    options: CaptureOptions,
) -> OpResult<CheckpointMeta> {
    let lock = store.session_lock(session);
    let _guard = lock.lock().await;

    if !mux.session_exists(session).await? {
        return Err(OpError::not_found(format!("no such session: {session}")));
    }

    let panes = mux.list_panes(session).await?;
    if panes.is_empty() {
        return Err(OpError::unavailable(format!("session {session} has no panes")));
    }
    let layout = mux.current_layout(session).await.unwrap_or_default();
    let active_pane_index =
        panes.iter().find(|p| p.active).map(|p| p.index).unwrap_or(0);

    let id = uuid::Uuid::new_v4().to_string();
    let dir = store.dir(&id);
    std::fs::create_dir_all(dir.join("panes"))?;

    // Scrollback per pane. A pane that fails to capture aborts: a partial
    // checkpoint must never be left on disk looking complete.
    let mut pane_metas = Vec::with_capacity(panes.len());
    for pane in &panes {
        let scrollback = match mux.capture_pane(&pane.id, options.scrollback_lines).await {
            Ok(text) => text,
            Err(e) => {
                let _ = std::fs::remove_dir_all(&dir);
                return Err(e);
            }
        };
        let rel = format!("panes/pane-{}.txt", pane.index);
        std::fs::write(dir.join(&rel), scrollback)?;
        pane_metas.push(PaneMeta {
            id: pane.id.clone(),
            index: pane.index,
            title: pane.title.clone(),
            agent_type: agent_type_for(agents, &pane.id).await,
            scrollback_file: rel,
            width: pane.width,
            height: pane.height,
        });
    }

    // VCS state and optional patch of uncommitted work.
    let mut vcs_state = vcs::snapshot(working_dir).await?;
    if let Some(ref mut state) = vcs_state {
        if options.include_patch && state.dirty {
            let patch = vcs::uncommitted_patch(working_dir).await?;
            if !patch.is_empty() {
                std::fs::write(dir.join("patch.diff"), patch)?;
                state.patch_file = Some("patch.diff".to_owned());
            }
        }
    }

    let meta = CheckpointMeta {
        id: id.clone(),
        name: options.name,
        description: options.description,
        session_name: session.to_owned(),
        working_dir: working_dir.to_path_buf(),
        created_at: Utc::now(),
        pane_count: pane_metas.len(),
        panes: pane_metas,
        layout,
        active_pane_index,
        vcs: vcs_state,
    };

    let meta_json = serde_json::to_vec_pretty(&meta)
        .map_err(|e| OpError::internal(format!("metadata serialization failed: {e}")))?;
    std::fs::write(dir.join("metadata.json"), meta_json)?;
    write_manifest(&dir)?;

    info!(checkpoint = %id, session, panes = meta.pane_count, "checkpoint captured");
    Ok(meta)
}

async fn agent_type_for(agents: &AgentRegistry, pane_id: &str) -> AgentType {
    match agents.get(pane_id).await {
        Some(snapshot) => snapshot.agent_type,
        None => {
            debug!(pane = pane_id, "no registered agent for pane, recording unknown");
            AgentType::Unknown
        }
    }
}

#[cfg(test)]
#[path = "capture_tests.rs"]
mod tests;
