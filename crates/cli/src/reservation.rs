// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File reservations: mutual-exclusion claims on path sets.
//!
//! Agents claim paths before touching them so two agents never edit the
//! same file concurrently. Claims carry a TTL; a background sweeper
//! releases expired claims and announces them. Two live reservations
//! conflict when their path sets intersect and at least one is exclusive.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::event;
use crate::hub::EventBus;

/// One live claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    pub agent_name: String,
    pub paths: Vec<String>,
    pub exclusive: bool,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Reservation {
    fn live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// A contested path and who holds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub path: String,
    pub held_by: String,
    pub reservation_id: String,
    pub exclusive: bool,
}

/// Result of a reserve call: either everything was granted (and
/// `reservation` is set) or nothing was, with the contested paths listed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveOutcome {
    pub granted: Vec<String>,
    pub conflicts: Vec<Conflict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation: Option<Reservation>,
}

/// Why a release/renew call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimError {
    NotFound,
    NotOwner,
    Expired,
}

pub struct ReservationRegistry {
    inner: Mutex<HashMap<String, Reservation>>,
}

impl Default for ReservationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ReservationRegistry {
    pub fn new() -> Self {
        Self { inner: Mutex::new(HashMap::new()) }
    }

    /// Claim a set of paths. Atomic: if any path is contested the whole
    /// request is refused and the contested subset is returned — the
    /// caller decides whether to retry, back off, or escalate.
    pub fn reserve(
        &self,
        agent: &str,
        paths: Vec<String>,
        exclusive: bool,
        ttl: Duration,
        reason: Option<String>,
    ) -> ReserveOutcome {
        let now = Utc::now();
        let mut inner = self.inner.lock();

        let mut conflicts = vec![];
        for held in inner.values() {
            if !held.live_at(now) || held.agent_name == agent {
                continue;
            }
            if !(held.exclusive || exclusive) {
                continue;
            }
            for path in &paths {
                if held.paths.contains(path) {
                    conflicts.push(Conflict {
                        path: path.clone(),
                        held_by: held.agent_name.clone(),
                        reservation_id: held.id.clone(),
                        exclusive: held.exclusive,
                    });
                }
            }
        }

        if !conflicts.is_empty() {
            conflicts.sort_by(|a, b| a.path.cmp(&b.path));
            conflicts.dedup_by(|a, b| a.path == b.path);
            return ReserveOutcome { granted: vec![], conflicts, reservation: None };
        }

        let reservation = Reservation {
            id: uuid::Uuid::new_v4().to_string(),
            agent_name: agent.to_owned(),
            paths: paths.clone(),
            exclusive,
            acquired_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()),
            reason,
        };
        inner.insert(reservation.id.clone(), reservation.clone());
        ReserveOutcome { granted: paths, conflicts: vec![], reservation: Some(reservation) }
    }

    /// Release one claim by id. Only the owner may release it.
    pub fn release(&self, agent: &str, id: &str) -> Result<Reservation, ClaimError> {
        let mut inner = self.inner.lock();
        match inner.get(id) {
            None => Err(ClaimError::NotFound),
            Some(held) if held.agent_name != agent => Err(ClaimError::NotOwner),
            Some(_) => inner.remove(id).ok_or(ClaimError::NotFound),
        }
    }

    /// Release every claim the agent holds on any of the given paths.
    /// Returns the fully or partially released reservations.
    pub fn release_paths(&self, agent: &str, paths: &[String]) -> Vec<Reservation> {
        let mut inner = self.inner.lock();
        let ids: Vec<String> = inner
            .values()
            .filter(|r| r.agent_name == agent && r.paths.iter().any(|p| paths.contains(p)))
            .map(|r| r.id.clone())
            .collect();
        ids.iter().filter_map(|id| inner.remove(id)).collect()
    }

    /// Extend a claim's TTL. Expired claims cannot be renewed — the sweep
    /// may already have announced their release.
    pub fn renew(
        &self,
        agent: &str,
        id: &str,
        extend: Duration,
    ) -> Result<Reservation, ClaimError> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let held = inner.get_mut(id).ok_or(ClaimError::NotFound)?;
        if held.agent_name != agent {
            return Err(ClaimError::NotOwner);
        }
        if !held.live_at(now) {
            return Err(ClaimError::Expired);
        }
        held.expires_at += chrono::Duration::from_std(extend).unwrap_or(chrono::Duration::zero());
        Ok(held.clone())
    }

    /// Administratively revoke a claim regardless of owner. Returns the
    /// revoked reservation so the caller can notify the previous holder.
    pub fn force_release(&self, id: &str) -> Result<Reservation, ClaimError> {
        self.inner.lock().remove(id).ok_or(ClaimError::NotFound)
    }

    /// Query-only conflict check: which of these paths are contested for
    /// an exclusive claim right now, and by whom.
    pub fn conflicts(&self, paths: &[String]) -> Vec<Conflict> {
        let now = Utc::now();
        let inner = self.inner.lock();
        let mut out = vec![];
        for held in inner.values() {
            if !held.live_at(now) {
                continue;
            }
            for path in paths {
                if held.paths.contains(path) {
                    out.push(Conflict {
                        path: path.clone(),
                        held_by: held.agent_name.clone(),
                        reservation_id: held.id.clone(),
                        exclusive: held.exclusive,
                    });
                }
            }
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }

    /// Live reservations, oldest first.
    pub fn list(&self) -> Vec<Reservation> {
        let now = Utc::now();
        let inner = self.inner.lock();
        let mut all: Vec<Reservation> =
            inner.values().filter(|r| r.live_at(now)).cloned().collect();
        all.sort_by(|a, b| a.acquired_at.cmp(&b.acquired_at));
        all
    }

    /// How many live reservations an agent holds (scoring input).
    pub fn count_for(&self, agent: &str) -> usize {
        let now = Utc::now();
        let inner = self.inner.lock();
        inner.values().filter(|r| r.live_at(now) && r.agent_name == agent).count()
    }

    /// Remove expired claims and return them.
    pub fn sweep_expired(&self) -> Vec<Reservation> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .values()
            .filter(|r| !r.live_at(now))
            .map(|r| r.id.clone())
            .collect();
        expired.iter().filter_map(|id| inner.remove(id)).collect()
    }

    /// Run the TTL sweeper until shutdown, announcing each expiry.
    pub async fn run_sweeper(
        &self,
        bus: &EventBus,
        interval: Duration,
        shutdown: CancellationToken,
    ) {
        info!("reservation sweeper started");
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("reservation sweeper shutting down");
                    return;
                }
                _ = tick.tick() => {
                    for expired in self.sweep_expired() {
                        bus.emit(
                            event::reservation_topic(&expired.agent_name),
                            event::RESERVATION_RELEASED,
                            serde_json::json!({
                                "reservation_id": expired.id,
                                "paths": expired.paths,
                                "cause": "expired",
                            }),
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "reservation_tests.rs"]
mod tests;
