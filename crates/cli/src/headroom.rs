// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pre-spawn headroom guard.
//!
//! Before an agent spawn touches the multiplexer, the guard compares
//! process usage against the effective OS limit. Spawns are blocked above
//! the block threshold or when too few free slots remain; a warning band
//! sits just under the block line. On the transition into blocked the
//! guard arms a periodic re-check, and the first recovered probe fires
//! the unblock callback exactly once and disarms.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::OpResult;
use crate::event;
use crate::hub::EventBus;
use crate::probe::{ResourceProbe, ResourceSnapshot};

/// Guard thresholds and timing.
#[derive(Debug, Clone)]
pub struct HeadroomConfig {
    pub enabled: bool,
    /// Usage fraction at which spawns are blocked.
    pub block_pct: f64,
    /// Usage fraction at which spawns warn.
    pub warn_pct: f64,
    /// Minimum absolute free slots below which spawns are blocked.
    pub min_free: u64,
    /// How long a probe result is reused before re-probing.
    pub cache_ttl: Duration,
    /// Re-check cadence while blocked.
    pub recheck_interval: Duration,
}

impl Default for HeadroomConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            block_pct: 0.75,
            warn_pct: 0.70,
            min_free: 50,
            cache_ttl: Duration::from_secs(3),
            recheck_interval: Duration::from_secs(30),
        }
    }
}

/// Outcome of a spawn gate check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum SpawnDecision {
    Allow,
    Warn { message: String },
    Block { reason: String, remediation: String },
}

impl SpawnDecision {
    pub fn allows(&self) -> bool {
        !matches!(self, Self::Block { .. })
    }
}

/// Instantaneous pressure band, derived from a fresh evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeadroomState {
    Ok,
    Warning,
    Blocked,
}

/// Current guard state for the status surface.
///
/// `state` is the band the latest probe falls in; `blocked` is the sticky
/// gate flag, which outlives the block band until usage drops below the
/// warn threshold. `remediation` names the fix for the binding limit
/// whenever the state is not ok.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadroomStatus {
    pub enabled: bool,
    pub state: HeadroomState,
    pub blocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<ResourceSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_pct: Option<f64>,
}

struct CachedProbe {
    snapshot: ResourceSnapshot,
    probed_at: Instant,
}

struct BlockState {
    blocked: bool,
    recheck_cancel: Option<CancellationToken>,
}

type UnblockCallback = Box<dyn Fn() + Send + Sync>;

pub struct HeadroomGuard {
    probe: Arc<dyn ResourceProbe>,
    config: HeadroomConfig,
    cache: Mutex<Option<CachedProbe>>,
    block: Mutex<BlockState>,
    on_unblock: Mutex<Option<UnblockCallback>>,
    bus: Mutex<Option<Arc<EventBus>>>,
    shutdown: CancellationToken,
}

impl HeadroomGuard {
    pub fn new(
        probe: Arc<dyn ResourceProbe>,
        config: HeadroomConfig,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            probe,
            config,
            cache: Mutex::new(None),
            block: Mutex::new(BlockState { blocked: false, recheck_cancel: None }),
            on_unblock: Mutex::new(None),
            bus: Mutex::new(None),
            shutdown,
        })
    }

    /// Wire the event bus for `headroom.blocked` / `headroom.unblocked`.
    pub fn attach_bus(&self, bus: Arc<EventBus>) {
        *self.bus.lock() = Some(bus);
    }

    /// Called once on the blocked → unblocked transition.
    pub fn set_unblock_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.on_unblock.lock() = Some(Box::new(callback));
    }

    pub fn is_blocked(&self) -> bool {
        self.block.lock().blocked
    }

    /// Gate one spawn request.
    pub async fn check_spawn(self: &Arc<Self>) -> OpResult<SpawnDecision> {
        if !self.config.enabled {
            return Ok(SpawnDecision::Allow);
        }
        let snapshot = self.snapshot(false).await?;
        let decision = self.evaluate(&snapshot);
        self.apply_transition(&decision);
        Ok(decision)
    }

    /// Status surface: a fresh evaluation of the last (or new) snapshot
    /// plus the sticky block flag.
    pub async fn status(self: &Arc<Self>) -> HeadroomStatus {
        let snapshot = if self.config.enabled {
            self.snapshot(false).await.ok()
        } else {
            None
        };
        let effective = snapshot.and_then(|s| s.limits.effective());
        let (state, message) = match snapshot.as_ref().map(|s| self.evaluate(s)) {
            Some(SpawnDecision::Block { reason, .. }) => (HeadroomState::Blocked, Some(reason)),
            Some(SpawnDecision::Warn { message }) => (HeadroomState::Warning, Some(message)),
            Some(SpawnDecision::Allow) | None => (HeadroomState::Ok, None),
        };
        let remediation = match state {
            HeadroomState::Ok => None,
            _ => effective.map(|(_, source)| source.remediation().to_owned()),
        };
        HeadroomStatus {
            enabled: self.config.enabled,
            state,
            blocked: self.is_blocked(),
            message,
            remediation,
            snapshot,
            effective_limit: effective.map(|(v, _)| v),
            usage_pct: snapshot.zip(effective).map(|(s, (limit, _))| {
                s.usage.current as f64 / limit as f64
            }),
        }
    }

    async fn snapshot(&self, force: bool) -> OpResult<ResourceSnapshot> {
        if !force {
            let cache = self.cache.lock();
            if let Some(ref cached) = *cache {
                if cached.probed_at.elapsed() < self.config.cache_ttl {
                    return Ok(cached.snapshot);
                }
            }
        }
        let snapshot = self.probe.probe().await?;
        *self.cache.lock() = Some(CachedProbe { snapshot, probed_at: Instant::now() });
        Ok(snapshot)
    }

    fn evaluate(&self, snapshot: &ResourceSnapshot) -> SpawnDecision {
        let Some((limit, source)) = snapshot.limits.effective() else {
            // No detectable limit: nothing to guard against.
            return SpawnDecision::Allow;
        };
        let usage = snapshot.usage.current;
        let pct = usage as f64 / limit as f64;

        if pct >= self.config.block_pct {
            return SpawnDecision::Block {
                reason: format!(
                    "headroom exhausted: {usage}/{limit} processes ({:.0}% ≥ {:.0}%)",
                    pct * 100.0,
                    self.config.block_pct * 100.0
                ),
                remediation: source.remediation().to_owned(),
            };
        }
        let free = limit.saturating_sub(usage);
        if free < self.config.min_free {
            return SpawnDecision::Block {
                reason: format!(
                    "insufficient free slots: {free} < {} (usage {usage}/{limit})",
                    self.config.min_free
                ),
                remediation: source.remediation().to_owned(),
            };
        }
        if pct >= self.config.warn_pct {
            return SpawnDecision::Warn {
                message: format!(
                    "headroom warning: {usage}/{limit} processes ({:.0}%)",
                    pct * 100.0
                ),
            };
        }
        SpawnDecision::Allow
    }

    fn apply_transition(self: &Arc<Self>, decision: &SpawnDecision) {
        match decision {
            SpawnDecision::Block { reason, remediation } => {
                let mut block = self.block.lock();
                if !block.blocked {
                    block.blocked = true;
                    warn!("agent spawns blocked: {reason}");
                    self.emit(
                        event::HEADROOM_BLOCKED,
                        serde_json::json!({ "reason": reason, "remediation": remediation }),
                    );
                    let cancel = CancellationToken::new();
                    block.recheck_cancel = Some(cancel.clone());
                    drop(block);
                    let guard = Arc::clone(self);
                    tokio::spawn(async move { guard.run_recheck(cancel).await });
                }
            }
            // A warning is not recovery: a prior block stays armed until
            // usage falls below the warn threshold.
            SpawnDecision::Warn { .. } => {}
            SpawnDecision::Allow => {
                self.clear_block();
            }
        }
    }

    fn clear_block(&self) {
        let mut block = self.block.lock();
        if block.blocked {
            block.blocked = false;
            if let Some(cancel) = block.recheck_cancel.take() {
                cancel.cancel();
            }
            info!("agent spawns unblocked");
            self.emit(event::HEADROOM_UNBLOCKED, serde_json::Value::Null);
            drop(block);
            if let Some(ref callback) = *self.on_unblock.lock() {
                callback();
            }
        }
    }

    /// Periodic re-probe while blocked. Exits on recovery (after firing
    /// the unblock path once), on its own cancel token, or on shutdown.
    /// Recovery means a clean allow — the warning band keeps the block
    /// armed.
    async fn run_recheck(self: Arc<Self>, cancel: CancellationToken) {
        debug!("headroom re-check armed");
        let mut tick = tokio::time::interval(self.config.recheck_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tick.tick().await; // the immediate first tick
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = self.shutdown.cancelled() => return,
                _ = tick.tick() => {
                    let snapshot = match self.snapshot(true).await {
                        Ok(s) => s,
                        Err(e) => {
                            warn!("headroom re-check probe failed: {e}");
                            continue;
                        }
                    };
                    if matches!(self.evaluate(&snapshot), SpawnDecision::Allow) {
                        self.clear_block();
                        return;
                    }
                }
            }
        }
    }

    fn emit(&self, event_type: &str, data: serde_json::Value) {
        if let Some(ref bus) = *self.bus.lock() {
            bus.emit(event::SCHEDULER_TOPIC, event_type, data);
        }
    }
}

#[cfg(test)]
#[path = "headroom_tests.rs"]
mod tests;
