// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! API contract types and server implementation for HTTP and WebSocket.

pub mod auth;
pub mod envelope;
pub mod http;
pub mod state;
pub mod ws;

pub use state::Store;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

/// Build the axum `Router` with all HTTP and WebSocket routes.
pub fn build_router(state: Arc<Store>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::health))
        .route("/api/v1/status", get(http::status))
        .route("/api/v1/shutdown", post(http::shutdown))
        .route("/api/v1/agents", get(http::list_agents).post(http::register_agent))
        .route("/api/v1/agents/spawn", post(http::spawn))
        .route("/api/v1/agents/{pane_id}/status", post(http::update_agent))
        .route("/api/v1/agents/{pane_id}", delete(http::deregister_agent))
        .route("/api/v1/assignments/tick", post(http::assignment_tick))
        .route("/api/v1/recommendations", get(http::recommendations))
        .route("/api/v1/reservations", get(http::list_reservations).post(http::reserve))
        .route("/api/v1/reservations/release", post(http::release))
        .route("/api/v1/reservations/conflicts", get(http::conflicts))
        .route("/api/v1/reservations/{id}/renew", post(http::renew))
        .route("/api/v1/reservations/{id}/force-release", post(http::force_release))
        .route("/api/v1/headroom", get(http::headroom))
        .route("/api/v1/events/catchup", get(http::catchup))
        .route("/api/v1/sessions", post(http::create_session))
        .route("/api/v1/sessions/{name}", delete(http::kill_session))
        .route("/api/v1/sessions/{name}/panes", get(http::session_panes))
        .route("/api/v1/checkpoints", get(http::list_checkpoints).post(http::create_checkpoint))
        .route("/api/v1/checkpoints/import", post(http::import))
        .route(
            "/api/v1/checkpoints/{id}",
            get(http::get_checkpoint).delete(http::delete_checkpoint),
        )
        .route("/api/v1/checkpoints/{id}/restore", post(http::restore))
        .route("/api/v1/checkpoints/{id}/rollback", post(http::rollback))
        .route("/api/v1/checkpoints/{id}/export", post(http::export))
        .route("/api/v1/streams/start", post(http::start_streams))
        .route("/api/v1/streams/stop", post(http::stop_streams))
        .route("/ws", get(ws::ws_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Minimal health-only router (for `--port-health`).
pub fn build_health_router(state: Arc<Store>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::health))
        .with_state(state)
}
