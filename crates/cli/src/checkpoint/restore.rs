// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Checkpoint restore and VCS rollback.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ErrorCode, OpError, OpResult};
use crate::mux::Multiplexer;

use super::{vcs, CheckpointMeta, CheckpointStore, WORKDIR_PLACEHOLDER};

/// Restore knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreOptions {
    /// Kill an existing session with the checkpoint's name.
    #[serde(default)]
    pub force: bool,
    /// Validate everything but touch nothing.
    #[serde(default)]
    pub dry_run: bool,
    /// Verify manifest checksums before restoring (default true).
    #[serde(default = "default_true")]
    pub verify_checksums: bool,
    /// Restore into this directory instead of the stored one.
    #[serde(default)]
    pub custom_directory: Option<PathBuf>,
    /// Warn when the current branch or commit differs from the stored one.
    #[serde(default = "default_true")]
    pub check_vcs_drift: bool,
    /// Send each restored pane its tail of scrollback as one message.
    #[serde(default)]
    pub inject_context: bool,
    /// How many scrollback lines the injection keeps.
    #[serde(default = "default_context_lines")]
    pub context_lines: usize,
}

fn default_true() -> bool {
    true
}

fn default_context_lines() -> usize {
    50
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            force: false,
            dry_run: false,
            verify_checksums: true,
            custom_directory: None,
            check_vcs_drift: true,
            inject_context: false,
            context_lines: default_context_lines(),
        }
    }
}

/// What a restore did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreResult {
    pub checkpoint_id: String,
    pub session_name: String,
    pub panes_restored: usize,
    pub context_injected: bool,
    pub warnings: Vec<String>,
    pub dry_run: bool,
}

/// Delay between killing a colliding session and recreating it, giving
/// the multiplexer time to settle.
const KILL_SETTLE: Duration = Duration::from_millis(300);

/// Restore a checkpoint into a live session.
pub async fn restore_checkpoint(
    mux: &Arc<dyn Multiplexer>,
    store: &CheckpointStore,
    id_or_name: &str,
    options: RestoreOptions,
) -> OpResult<RestoreResult> {
    let meta = store.load(id_or_name)?;
    let lock = store.session_lock(&meta.session_name);
    let _guard = lock.lock().await;

    let mut warnings = vec![];

    // 1. Integrity first: nothing on the live system is touched until the
    //    stored files check out.
    if options.verify_checksums {
        let bad = store.verify(&meta.id)?;
        if !bad.is_empty() {
            return Err(OpError::new(
                ErrorCode::BadRequest,
                format!("checkpoint {} failed checksum verification: {}", meta.id, bad.join(", ")),
            ));
        }
    }

    // 2. Resolve the working directory.
    let working_dir = resolve_working_dir(&meta, options.custom_directory.as_deref());
    if !working_dir.is_dir() {
        if !options.dry_run {
            return Err(OpError::not_found(format!(
                "working directory missing: {} (pass custom_directory to relocate)",
                working_dir.display()
            )));
        }
        warnings.push(format!("working directory missing: {}", working_dir.display()));
    }

    // 3. Session collision.
    let exists = mux.session_exists(&meta.session_name).await?;
    if exists && !options.force {
        return Err(OpError::conflict(format!(
            "session already exists: {} (pass force to replace it)",
            meta.session_name
        )));
    }

    // 4. VCS drift.
    if options.check_vcs_drift {
        if let Some(ref stored) = meta.vcs {
            if let Ok(Some(current)) = vcs::snapshot(&working_dir).await {
                if current.branch != stored.branch {
                    warnings.push(format!(
                        "branch drift: checkpoint has {}, working tree has {}",
                        stored.branch, current.branch
                    ));
                }
                if current.commit != stored.commit {
                    warnings.push(format!(
                        "commit drift: checkpoint has {}, working tree has {}",
                        &stored.commit[..stored.commit.len().min(12)],
                        &current.commit[..current.commit.len().min(12)]
                    ));
                }
            }
        }
    }

    if options.dry_run {
        return Ok(RestoreResult {
            checkpoint_id: meta.id,
            session_name: meta.session_name,
            panes_restored: 0,
            context_injected: false,
            warnings,
            dry_run: true,
        });
    }

    if exists {
        mux.kill_session(&meta.session_name).await?;
        tokio::time::sleep(KILL_SETTLE).await;
    }

    // 5. Recreate the topology: the first pane comes with the session,
    //    the rest are splits.
    mux.create_session(&meta.session_name, &working_dir, None).await?;
    for _ in 1..meta.pane_count {
        mux.split_window(&meta.session_name, &working_dir, None).await?;
    }
    if !meta.layout.is_empty() {
        if let Err(e) = mux.select_layout(&meta.session_name, &meta.layout).await {
            warnings.push(format!("layout not applied: {e}"));
        }
    }

    let live_panes = mux.list_panes(&meta.session_name).await?;
    if live_panes.len() != meta.pane_count {
        warnings.push(format!(
            "expected {} panes, session has {}",
            meta.pane_count,
            live_panes.len()
        ));
    }

    // 6. Optional context injection: one message per pane.
    let mut context_injected = false;
    if options.inject_context {
        context_injected =
            inject_context(mux, store, &meta, &live_panes, options.context_lines, &mut warnings)
                .await;
    }

    // 7. Put the stored active pane back in focus, best effort.
    if let Some(active) = live_panes.iter().find(|p| p.index == meta.active_pane_index) {
        if let Err(e) = mux.select_pane(&active.id).await {
            warnings.push(format!("active pane not selected: {e}"));
        }
    }

    info!(
        checkpoint = %meta.id,
        session = %meta.session_name,
        panes = live_panes.len(),
        "checkpoint restored"
    );
    Ok(RestoreResult {
        checkpoint_id: meta.id,
        session_name: meta.session_name,
        panes_restored: live_panes.len(),
        context_injected,
        warnings,
        dry_run: false,
    })
}

/// Re-apply only the VCS state of a checkpoint; panes are untouched.
pub async fn rollback_checkpoint(
    store: &CheckpointStore,
    id_or_name: &str,
    stash_first: bool,
    custom_directory: Option<&Path>,
) -> OpResult<RestoreResult> {
    let meta = store.load(id_or_name)?;
    let Some(ref state) = meta.vcs else {
        return Err(OpError::bad_request(format!(
            "checkpoint {} has no VCS state to roll back to",
            meta.id
        )));
    };
    let working_dir = resolve_working_dir(&meta, custom_directory);
    if !working_dir.is_dir() {
        return Err(OpError::not_found(format!(
            "working directory missing: {}",
            working_dir.display()
        )));
    }

    let mut warnings = vec![];
    if stash_first {
        match vcs::snapshot(&working_dir).await? {
            Some(ref current) if current.dirty => {
                vcs::stash(&working_dir, &format!("pre-rollback to {}", meta.name)).await?;
                warnings.push("working tree stashed before rollback".to_owned());
            }
            _ => {}
        }
    }
    warnings.extend(vcs::apply(&working_dir, state).await?);

    info!(checkpoint = %meta.id, branch = %state.branch, "vcs state rolled back");
    Ok(RestoreResult {
        checkpoint_id: meta.id,
        session_name: meta.session_name,
        panes_restored: 0,
        context_injected: false,
        warnings,
        dry_run: false,
    })
}

fn resolve_working_dir(meta: &CheckpointMeta, custom: Option<&Path>) -> PathBuf {
    if let Some(dir) = custom {
        return dir.to_path_buf();
    }
    // Imported archives may still carry the relocatable placeholder when
    // no rewrite target was known at import time.
    if meta.working_dir.to_string_lossy() == WORKDIR_PLACEHOLDER {
        return std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    }
    meta.working_dir.clone()
}

/// Send each restored pane its scrollback tail as a single message.
/// Failures are warnings, never fatal — a half-injected restore is still
/// a restore.
async fn inject_context(
    mux: &Arc<dyn Multiplexer>,
    store: &CheckpointStore,
    meta: &CheckpointMeta,
    live_panes: &[crate::mux::PaneInfo],
    context_lines: usize,
    warnings: &mut Vec<String>,
) -> bool {
    let dir = store.dir(&meta.id);
    let mut injected_any = false;
    for pane_meta in &meta.panes {
        let Some(live) = live_panes.iter().find(|p| p.index == pane_meta.index) else {
            warnings.push(format!("pane {} not present after restore", pane_meta.index));
            continue;
        };
        let scrollback = match std::fs::read_to_string(dir.join(&pane_meta.scrollback_file)) {
            Ok(text) => text,
            Err(e) => {
                warnings.push(format!(
                    "scrollback missing for pane {}: {e}",
                    pane_meta.index
                ));
                continue;
            }
        };
        let tail: Vec<&str> = {
            let lines: Vec<&str> = scrollback.lines().collect();
            let start = lines.len().saturating_sub(context_lines);
            lines[start..].to_vec()
        };
        let message = format!(
            "[restored from checkpoint {} · pane {}]\n{}",
            meta.name,
            pane_meta.index,
            tail.join("\n")
        );
        match mux.send_keys(&live.id, &message, true).await {
            Ok(()) => injected_any = true,
            Err(e) => {
                warn!(pane = %live.id, "context injection failed: {e}");
                warnings.push(format!("context not injected into pane {}: {e}", pane_meta.index));
            }
        }
    }
    injected_any
}

#[cfg(test)]
#[path = "restore_tests.rs"]
mod tests;
