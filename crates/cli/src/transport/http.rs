// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP request/response types and axum handler implementations.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::agent::{AgentSnapshot, AgentUpdate, RegisterAgent};
use crate::checkpoint::{
    capture_checkpoint, export_checkpoint, import_checkpoint, restore_checkpoint,
    rollback_checkpoint, ArchiveFormat, CaptureOptions, RestoreOptions,
};
use crate::checkpoint::archive::ExportOptions;
use crate::error::{ErrorCode, OpError, OpResult};
use crate::event;
use crate::reservation::{ClaimError, Conflict, Reservation};
use crate::spawn::{spawn_agent, SpawnRequest, SpawnResult};
use crate::transport::envelope::{error_with, ok};
use crate::transport::state::Store;

// -- Health & status ----------------------------------------------------------

#[derive(Serialize)]
pub struct HealthPayload {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub agents: usize,
    pub ws_clients: i32,
}

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<Store>>) -> impl IntoResponse {
    ok(HealthPayload {
        status: "running",
        uptime_secs: s.config.started_at.elapsed().as_secs(),
        agents: s.agents.list().await.len(),
        ws_clients: s.lifecycle.ws_client_count.load(Ordering::Relaxed),
    })
}

#[derive(Serialize)]
pub struct StatusPayload {
    pub agents: Vec<AgentSnapshot>,
    pub reservations: Vec<Reservation>,
    pub headroom: crate::headroom::HeadroomStatus,
    pub current_seq: u64,
    pub subscribers: usize,
}

/// `GET /api/v1/status` — one page of everything the orchestrator knows.
pub async fn status(State(s): State<Arc<Store>>) -> impl IntoResponse {
    ok(StatusPayload {
        agents: s.agents.list().await,
        reservations: s.reservations.list(),
        headroom: s.guard.status().await,
        current_seq: s.bus.store().current_seq(),
        subscribers: s.bus.hub().stats().await.len(),
    })
}

/// `POST /api/v1/shutdown` — initiate graceful shutdown.
pub async fn shutdown(State(s): State<Arc<Store>>) -> impl IntoResponse {
    s.lifecycle.shutdown.cancel();
    ok(serde_json::json!({ "accepted": true }))
}

// -- Agents -------------------------------------------------------------------

#[derive(Serialize)]
pub struct AgentsPayload {
    pub agents: Vec<AgentSnapshot>,
}

/// `GET /api/v1/agents`
pub async fn list_agents(State(s): State<Arc<Store>>) -> impl IntoResponse {
    ok(AgentsPayload { agents: s.agents.list().await })
}

/// `POST /api/v1/agents` — register an externally-created agent pane.
pub async fn register_agent(
    State(s): State<Arc<Store>>,
    axum::Json(req): axum::Json<RegisterAgent>,
) -> impl IntoResponse {
    let is_new = s.agents.register(req.clone()).await;
    ok(serde_json::json!({ "registered": true, "new": is_new, "pane_id": req.pane_id }))
}

/// `POST /api/v1/agents/spawn` — headroom-gated spawn into a pane.
pub async fn spawn(
    State(s): State<Arc<Store>>,
    axum::Json(req): axum::Json<SpawnRequest>,
) -> OpResult<axum::Json<crate::transport::envelope::ApiOk<SpawnResult>>> {
    let result = spawn_agent(
        &s.guard,
        &s.mux,
        &s.agents,
        &s.streams,
        &s.bus,
        &s.config.working_dir,
        req,
    )
    .await?;
    Ok(ok(result))
}

/// `POST /api/v1/agents/{pane_id}/status`
pub async fn update_agent(
    State(s): State<Arc<Store>>,
    Path(pane_id): Path<String>,
    axum::Json(update): axum::Json<AgentUpdate>,
) -> OpResult<impl IntoResponse> {
    if !s.agents.update(&pane_id, update).await {
        return Err(OpError::not_found(format!("no such agent: {pane_id}")));
    }
    Ok(ok(serde_json::json!({ "updated": true })))
}

/// `DELETE /api/v1/agents/{pane_id}` — deregister and stop its stream.
pub async fn deregister_agent(
    State(s): State<Arc<Store>>,
    Path(pane_id): Path<String>,
) -> OpResult<impl IntoResponse> {
    if !s.agents.deregister(&pane_id).await {
        return Err(OpError::not_found(format!("no such agent: {pane_id}")));
    }
    s.streams.stop_stream(&pane_id).await?;
    Ok(ok(serde_json::json!({ "deregistered": true })))
}

// -- Assignments & recommendations --------------------------------------------

#[derive(Serialize)]
pub struct TickPayload {
    pub assignments: Vec<crate::coordinator::AssignmentResult>,
}

/// `POST /api/v1/assignments/tick` — run one assignment pass now.
pub async fn assignment_tick(State(s): State<Arc<Store>>) -> OpResult<impl IntoResponse> {
    let assignments = s.coordinator.tick().await?;
    Ok(ok(TickPayload { assignments }))
}

#[derive(Serialize)]
pub struct RecommendationsPayload {
    pub recommendations: Vec<crate::triage::Recommendation>,
}

/// `GET /api/v1/recommendations` — the cached triage snapshot.
pub async fn recommendations(State(s): State<Arc<Store>>) -> OpResult<impl IntoResponse> {
    let recs = s.recommendations.get().await?;
    Ok(ok(RecommendationsPayload { recommendations: recs.as_ref().clone() }))
}

// -- Reservations -------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    pub agent: String,
    pub paths: Vec<String>,
    #[serde(default = "default_exclusive")]
    pub exclusive: bool,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default)]
    pub reason: Option<String>,
}

fn default_exclusive() -> bool {
    true
}

fn default_ttl_secs() -> u64 {
    900
}

#[derive(Serialize)]
struct ConflictPayload {
    granted: Vec<String>,
    conflicts: Vec<Conflict>,
}

/// `POST /api/v1/reservations` — all-or-nothing path claim.
pub async fn reserve(
    State(s): State<Arc<Store>>,
    axum::Json(req): axum::Json<ReserveRequest>,
) -> Response {
    if req.paths.is_empty() {
        return OpError::bad_request("paths must not be empty").into_response();
    }
    let outcome = s.reservations.reserve(
        &req.agent,
        req.paths,
        req.exclusive,
        Duration::from_secs(req.ttl_secs),
        req.reason,
    );
    match outcome.reservation {
        Some(ref reservation) => {
            s.bus.emit(
                event::reservation_topic(&req.agent),
                event::RESERVATION_GRANTED,
                serde_json::json!({
                    "reservation_id": reservation.id,
                    "paths": outcome.granted,
                    "exclusive": reservation.exclusive,
                }),
            );
            ok(outcome).into_response()
        }
        None => {
            s.bus.emit(
                event::reservation_topic(&req.agent),
                event::RESERVATION_CONFLICT,
                serde_json::json!({ "conflicts": outcome.conflicts }),
            );
            error_with(
                &OpError::new(ErrorCode::ReservationFailed, "paths are contested"),
                ConflictPayload { granted: vec![], conflicts: outcome.conflicts },
            )
        }
    }
}

#[derive(Serialize)]
pub struct ReservationsPayload {
    pub reservations: Vec<Reservation>,
}

/// `GET /api/v1/reservations`
pub async fn list_reservations(State(s): State<Arc<Store>>) -> impl IntoResponse {
    ok(ReservationsPayload { reservations: s.reservations.list() })
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub agent: String,
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default)]
    pub paths: Vec<String>,
}

/// `POST /api/v1/reservations/release` — by id or by path, owner only.
pub async fn release(
    State(s): State<Arc<Store>>,
    axum::Json(req): axum::Json<ReleaseRequest>,
) -> OpResult<impl IntoResponse> {
    if req.ids.is_empty() && req.paths.is_empty() {
        return Err(OpError::bad_request("provide ids or paths to release"));
    }
    let mut released = vec![];
    for id in &req.ids {
        released.push(s.reservations.release(&req.agent, id).map_err(|e| claim_error(e, id))?);
    }
    released.extend(s.reservations.release_paths(&req.agent, &req.paths));
    for reservation in &released {
        s.bus.emit(
            event::reservation_topic(&req.agent),
            event::RESERVATION_RELEASED,
            serde_json::json!({
                "reservation_id": reservation.id,
                "paths": reservation.paths,
                "cause": "released",
            }),
        );
    }
    Ok(ok(serde_json::json!({ "released": released.len() })))
}

#[derive(Debug, Deserialize)]
pub struct RenewRequest {
    pub agent: String,
    pub extend_secs: u64,
}

/// `POST /api/v1/reservations/{id}/renew`
pub async fn renew(
    State(s): State<Arc<Store>>,
    Path(id): Path<String>,
    axum::Json(req): axum::Json<RenewRequest>,
) -> OpResult<impl IntoResponse> {
    let renewed = s
        .reservations
        .renew(&req.agent, &id, Duration::from_secs(req.extend_secs))
        .map_err(|e| claim_error(e, &id))?;
    s.bus.emit(
        event::reservation_topic(&req.agent),
        event::RESERVATION_RENEWED,
        serde_json::json!({ "reservation_id": renewed.id, "expires_at": renewed.expires_at }),
    );
    Ok(ok(serde_json::json!({ "renewed": true, "expires_at": renewed.expires_at })))
}

#[derive(Debug, Deserialize)]
pub struct ForceReleaseRequest {
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub notify_previous: bool,
}

/// `POST /api/v1/reservations/{id}/force-release` — admin only; may
/// notify the previous owner that its claim was revoked.
pub async fn force_release(
    State(s): State<Arc<Store>>,
    Path(id): Path<String>,
    axum::Json(req): axum::Json<ForceReleaseRequest>,
) -> OpResult<impl IntoResponse> {
    if !req.admin {
        return Err(OpError::new(
            ErrorCode::ApprovalRequired,
            "force-release is administrative; set admin=true to confirm",
        ));
    }
    let revoked = s.reservations.force_release(&id).map_err(|e| claim_error(e, &id))?;
    s.bus.emit(
        event::reservation_topic(&revoked.agent_name),
        event::RESERVATION_RELEASED,
        serde_json::json!({
            "reservation_id": revoked.id,
            "paths": revoked.paths,
            "cause": "force_released",
        }),
    );
    if req.notify_previous {
        if let Some(agent) = snapshot_by_name(&s, &revoked.agent_name).await {
            let body = format!("your reservation on {} was revoked", revoked.paths.join(", "));
            if let Err(e) = deliver_mail(&s, &agent, "reservation revoked", &body).await {
                tracing::warn!(agent = %revoked.agent_name, "revocation notice failed: {e}");
            }
        }
    }
    Ok(ok(serde_json::json!({ "released": true, "previous_owner": revoked.agent_name })))
}

#[derive(Debug, Deserialize)]
pub struct ConflictsQuery {
    /// Comma-separated path list.
    pub paths: String,
}

/// `GET /api/v1/reservations/conflicts?paths=a,b`
pub async fn conflicts(
    State(s): State<Arc<Store>>,
    Query(q): Query<ConflictsQuery>,
) -> impl IntoResponse {
    let paths: Vec<String> =
        q.paths.split(',').filter(|p| !p.is_empty()).map(str::to_owned).collect();
    ok(serde_json::json!({ "conflicts": s.reservations.conflicts(&paths) }))
}

fn claim_error(e: ClaimError, id: &str) -> OpError {
    match e {
        ClaimError::NotFound => OpError::not_found(format!("no such reservation: {id}")),
        ClaimError::NotOwner => {
            OpError::new(ErrorCode::Forbidden, format!("reservation {id} is owned by another agent"))
        }
        ClaimError::Expired => OpError::conflict(format!("reservation {id} already expired")),
    }
}

async fn snapshot_by_name(s: &Store, name: &str) -> Option<AgentSnapshot> {
    s.agents.list().await.into_iter().find(|a| a.name() == name)
}

async fn deliver_mail(
    s: &Store,
    to: &AgentSnapshot,
    subject: &str,
    body: &str,
) -> OpResult<()> {
    let message = format!("[{}] {subject}\n{body}", to.name());
    s.mux.send_keys(&to.pane_id, &message, true).await?;
    s.bus.emit(
        event::mail_topic(to.name()),
        event::MAIL_RECEIVED,
        serde_json::json!({ "to": to.name(), "subject": subject }),
    );
    Ok(())
}

// -- Headroom -----------------------------------------------------------------

/// `GET /api/v1/headroom`
pub async fn headroom(State(s): State<Arc<Store>>) -> impl IntoResponse {
    ok(s.guard.status().await)
}

// -- Events -------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CatchupQuery {
    #[serde(default)]
    pub cursor: u64,
    /// Comma-separated topic patterns; empty matches everything.
    #[serde(default)]
    pub topics: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct CatchupPayload {
    pub events: Vec<crate::event::Event>,
    pub needs_reset: bool,
    pub current_seq: u64,
}

/// `GET /api/v1/events/catchup` — the HTTP mirror of the WS resume path.
pub async fn catchup(
    State(s): State<Arc<Store>>,
    Query(q): Query<CatchupQuery>,
) -> impl IntoResponse {
    let topics: Vec<String> =
        q.topics.split(',').filter(|t| !t.is_empty()).map(str::to_owned).collect();
    let limit = q.limit.unwrap_or(s.config.catchup_limit).min(s.config.catchup_limit);
    let catchup = s.bus.store().get_since(q.cursor, &topics, limit);
    ok(CatchupPayload {
        events: catchup.events,
        needs_reset: catchup.needs_reset,
        current_seq: s.bus.store().current_seq(),
    })
}

// -- Sessions -----------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub name: String,
}

/// `POST /api/v1/sessions`
pub async fn create_session(
    State(s): State<Arc<Store>>,
    axum::Json(req): axum::Json<CreateSessionRequest>,
) -> OpResult<impl IntoResponse> {
    if s.mux.session_exists(&req.name).await? {
        return Err(OpError::conflict(format!("session already exists: {}", req.name)));
    }
    s.mux.create_session(&req.name, &s.config.working_dir, None).await?;
    s.bus.emit(
        event::session_topic(&req.name),
        event::SESSION_CREATED,
        serde_json::json!({ "session": req.name }),
    );
    Ok(ok(serde_json::json!({ "created": true, "session": req.name })))
}

/// `DELETE /api/v1/sessions/{name}`
pub async fn kill_session(
    State(s): State<Arc<Store>>,
    Path(name): Path<String>,
) -> OpResult<impl IntoResponse> {
    if !s.mux.session_exists(&name).await? {
        return Err(OpError::not_found(format!("no such session: {name}")));
    }
    // Streams and registrations for the session's panes go with it.
    for pane in s.mux.list_panes(&name).await.unwrap_or_default() {
        s.streams.stop_stream(&pane.id).await?;
        s.agents.deregister(&pane.id).await;
    }
    s.mux.kill_session(&name).await?;
    s.bus.emit(
        event::session_topic(&name),
        event::SESSION_KILLED,
        serde_json::json!({ "session": name }),
    );
    Ok(ok(serde_json::json!({ "killed": true })))
}

/// `GET /api/v1/sessions/{name}/panes`
pub async fn session_panes(
    State(s): State<Arc<Store>>,
    Path(name): Path<String>,
) -> OpResult<impl IntoResponse> {
    if !s.mux.session_exists(&name).await? {
        return Err(OpError::not_found(format!("no such session: {name}")));
    }
    let panes = s.mux.list_panes(&name).await?;
    Ok(ok(serde_json::json!({ "panes": panes })))
}

// -- Checkpoints --------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateCheckpointRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub session: String,
    #[serde(default)]
    pub scrollback_lines: Option<u32>,
    #[serde(default = "default_true")]
    pub include_patch: bool,
}

fn default_true() -> bool {
    true
}

/// `POST /api/v1/checkpoints`
pub async fn create_checkpoint(
    State(s): State<Arc<Store>>,
    axum::Json(req): axum::Json<CreateCheckpointRequest>,
) -> OpResult<impl IntoResponse> {
    let mut options = CaptureOptions::new(req.name);
    options.description = req.description;
    options.include_patch = req.include_patch;
    if let Some(lines) = req.scrollback_lines {
        options.scrollback_lines = lines;
    }
    let meta = capture_checkpoint(
        &s.mux,
        &s.agents,
        &s.checkpoints,
        &req.session,
        &s.config.working_dir,
        options,
    )
    .await?;
    s.bus.emit(
        event::session_topic(&req.session),
        event::CHECKPOINT_CREATED,
        serde_json::json!({ "checkpoint_id": meta.id, "name": meta.name }),
    );
    Ok(ok(meta))
}

/// `GET /api/v1/checkpoints`
pub async fn list_checkpoints(State(s): State<Arc<Store>>) -> OpResult<impl IntoResponse> {
    let checkpoints = s.checkpoints.list()?;
    Ok(ok(serde_json::json!({ "checkpoints": checkpoints })))
}

/// `GET /api/v1/checkpoints/{id}`
pub async fn get_checkpoint(
    State(s): State<Arc<Store>>,
    Path(id): Path<String>,
) -> OpResult<impl IntoResponse> {
    Ok(ok(s.checkpoints.load(&id)?))
}

/// `DELETE /api/v1/checkpoints/{id}`
pub async fn delete_checkpoint(
    State(s): State<Arc<Store>>,
    Path(id): Path<String>,
) -> OpResult<impl IntoResponse> {
    s.checkpoints.delete(&id)?;
    Ok(ok(serde_json::json!({ "deleted": true })))
}

/// `POST /api/v1/checkpoints/{id}/restore`
pub async fn restore(
    State(s): State<Arc<Store>>,
    Path(id): Path<String>,
    axum::Json(options): axum::Json<RestoreOptions>,
) -> OpResult<impl IntoResponse> {
    let result = restore_checkpoint(&s.mux, &s.checkpoints, &id, options).await?;
    s.bus.emit(
        event::session_topic(&result.session_name),
        event::CHECKPOINT_RESTORED,
        serde_json::json!({
            "checkpoint_id": result.checkpoint_id,
            "panes_restored": result.panes_restored,
            "dry_run": result.dry_run,
        }),
    );
    Ok(ok(result))
}

#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    #[serde(default)]
    pub stash: bool,
    #[serde(default)]
    pub custom_directory: Option<PathBuf>,
}

/// `POST /api/v1/checkpoints/{id}/rollback` — VCS state only.
pub async fn rollback(
    State(s): State<Arc<Store>>,
    Path(id): Path<String>,
    axum::Json(req): axum::Json<RollbackRequest>,
) -> OpResult<impl IntoResponse> {
    let result =
        rollback_checkpoint(&s.checkpoints, &id, req.stash, req.custom_directory.as_deref())
            .await?;
    Ok(ok(result))
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub path: PathBuf,
    #[serde(default)]
    pub format: Option<ArchiveFormat>,
    #[serde(default = "default_true")]
    pub redact: bool,
}

/// `POST /api/v1/checkpoints/{id}/export`
pub async fn export(
    State(s): State<Arc<Store>>,
    Path(id): Path<String>,
    axum::Json(req): axum::Json<ExportRequest>,
) -> OpResult<impl IntoResponse> {
    let format = match req.format {
        Some(format) => format,
        None => ArchiveFormat::from_path(&req.path).unwrap_or(ArchiveFormat::TarGz),
    };
    let summary = export_checkpoint(
        &s.checkpoints,
        &id,
        &req.path,
        ExportOptions { format, redact: req.redact },
    )
    .await?;
    Ok(ok(summary))
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub path: PathBuf,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

/// `POST /api/v1/checkpoints/import`
pub async fn import(
    State(s): State<Arc<Store>>,
    axum::Json(req): axum::Json<ImportRequest>,
) -> OpResult<impl IntoResponse> {
    let meta =
        import_checkpoint(&s.checkpoints, &req.path, req.working_dir.as_deref()).await?;
    Ok(ok(meta))
}

// -- Streams ------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StreamRequest {
    pub session: String,
}

/// `POST /api/v1/streams/start` — stream every pane of a session.
pub async fn start_streams(
    State(s): State<Arc<Store>>,
    axum::Json(req): axum::Json<StreamRequest>,
) -> OpResult<impl IntoResponse> {
    if !s.mux.session_exists(&req.session).await? {
        return Err(OpError::not_found(format!("no such session: {}", req.session)));
    }
    let panes = s.mux.list_panes(&req.session).await?;
    for pane in &panes {
        s.streams.start_stream(&req.session, pane).await?;
    }
    Ok(ok(serde_json::json!({ "streaming": panes.len() })))
}

/// `POST /api/v1/streams/stop`
pub async fn stop_streams(
    State(s): State<Arc<Store>>,
    axum::Json(req): axum::Json<StreamRequest>,
) -> OpResult<impl IntoResponse> {
    let panes = s.mux.list_panes(&req.session).await.unwrap_or_default();
    for pane in &panes {
        s.streams.stop_stream(&pane.id).await?;
    }
    Ok(ok(serde_json::json!({ "stopped": panes.len() })))
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
