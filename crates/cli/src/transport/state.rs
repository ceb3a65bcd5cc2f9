// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::sync::atomic::AtomicI32;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::agent::AgentRegistry;
use crate::checkpoint::CheckpointStore;
use crate::coordinator::Coordinator;
use crate::headroom::HeadroomGuard;
use crate::hub::EventBus;
use crate::mux::Multiplexer;
use crate::reservation::ReservationRegistry;
use crate::streamer::StreamManager;
use crate::triage::RecommendationCache;

/// Shared application state passed to every handler via axum `State`.
///
/// Subsystems are owned here as `Arc`s; handlers only ever call their
/// public operations — no handler reaches into subsystem internals.
pub struct Store {
    pub bus: Arc<EventBus>,
    pub agents: Arc<AgentRegistry>,
    pub reservations: Arc<ReservationRegistry>,
    pub guard: Arc<HeadroomGuard>,
    pub streams: Arc<StreamManager>,
    pub checkpoints: Arc<CheckpointStore>,
    pub mux: Arc<dyn Multiplexer>,
    pub coordinator: Arc<Coordinator>,
    pub recommendations: Arc<RecommendationCache>,
    pub config: ServerSettings,
    pub lifecycle: LifecycleState,
}

/// Static server configuration (immutable after construction).
pub struct ServerSettings {
    pub started_at: Instant,
    pub auth_token: Option<String>,
    /// Working directory new sessions and checkpoints use by default.
    pub working_dir: PathBuf,
    /// Max events one catchup response returns.
    pub catchup_limit: usize,
}

/// Runtime lifecycle primitives.
pub struct LifecycleState {
    pub shutdown: CancellationToken,
    pub ws_client_count: AtomicI32,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("auth_token", &self.config.auth_token.is_some())
            .field("working_dir", &self.config.working_dir)
            .finish()
    }
}
