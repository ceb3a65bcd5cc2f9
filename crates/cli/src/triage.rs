// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Triage recommendations: the ranked work items the coordinator assigns.
//!
//! The ranking itself is computed by an external triage engine and
//! consumed read-only. The CLI source shells out to the configured command
//! and parses its JSON output; the cache keeps a TTL'd copy-on-write
//! snapshot so assignment ticks never block on (or re-run) the engine.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{OpError, OpResult};

/// Work item category, as ranked by the triage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecKind {
    Epic,
    Feature,
    Bug,
    Task,
    Chore,
}

/// Work item status. Blocked items are never assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecStatus {
    Open,
    InProgress,
    Blocked,
    Done,
    #[serde(other)]
    Unknown,
}

/// Graph-centrality detail attached by the triage engine.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CentralityBreakdown {
    #[serde(default)]
    pub pagerank: f64,
    #[serde(default)]
    pub betweenness: f64,
    #[serde(default)]
    pub blocker_ratio: f64,
    #[serde(default)]
    pub time_to_impact: f64,
}

/// One ranked work item. Read-only input from the triage engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: RecKind,
    pub status: RecStatus,
    /// 0 is the most urgent, 3 is backlog.
    pub priority: u8,
    #[serde(default)]
    pub base_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<CentralityBreakdown>,
    #[serde(default)]
    pub unblocks_ids: Vec<String>,
    #[serde(default)]
    pub blocked_by: Vec<String>,
}

/// Boxed future shorthand for the object-safe source trait.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = OpResult<T>> + Send + 'a>>;

/// Where ranked recommendations come from.
///
/// Object-safe for use as `Arc<dyn RecommendationSource>`.
pub trait RecommendationSource: Send + Sync + 'static {
    fn fetch(&self, limit: usize) -> SourceFuture<'_, Vec<Recommendation>>;
}

/// Subprocess-backed source: runs the configured triage command and parses
/// its JSON output. Accepts either a bare array or an object with a
/// `recommendations` array.
pub struct TriageCli {
    command: Vec<String>,
}

impl TriageCli {
    /// `command` is the full argv, e.g. `["bv", "triage", "--json"]`.
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl RecommendationSource for TriageCli {
    fn fetch(&self, limit: usize) -> SourceFuture<'_, Vec<Recommendation>> {
        Box::pin(async move {
            let Some((binary, args)) = self.command.split_first() else {
                return Err(OpError::bad_request("triage command is not configured"));
            };
            let output =
                tokio::process::Command::new(binary).args(args).output().await.map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        OpError::dependency_missing(
                            format!("triage command not found: {binary}"),
                            format!("install the triage CLI or adjust --triage-command ({binary})"),
                        )
                    } else {
                        OpError::internal(format!("failed to run triage command: {e}"))
                    }
                })?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(OpError::unavailable(format!(
                    "triage command failed: {}",
                    stderr.trim()
                )));
            }
            let mut recs = parse_output(&output.stdout)?;
            recs.truncate(limit);
            Ok(recs)
        })
    }
}

fn parse_output(stdout: &[u8]) -> OpResult<Vec<Recommendation>> {
    let value: serde_json::Value = serde_json::from_slice(stdout)
        .map_err(|e| OpError::internal(format!("triage output is not JSON: {e}")))?;
    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("recommendations") {
            Some(serde_json::Value::Array(items)) => items,
            _ => {
                return Err(OpError::internal(
                    "triage output has no recommendations array",
                ))
            }
        },
        _ => return Err(OpError::internal("unexpected triage output shape")),
    };
    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<Recommendation>(item).ok())
        .collect())
}

struct CacheSlot {
    recs: Arc<Vec<Recommendation>>,
    fetched_at: Instant,
}

/// TTL'd recommendation cache with copy-on-write snapshots.
///
/// Readers clone an `Arc` under a short mutex and never wait on a refresh;
/// the refresh runs without the lock and swaps the slot when done. A failed
/// refresh falls back to the stale snapshot when one exists.
pub struct RecommendationCache {
    source: Arc<dyn RecommendationSource>,
    ttl: Duration,
    limit: usize,
    slot: Mutex<Option<CacheSlot>>,
}

impl RecommendationCache {
    pub fn new(source: Arc<dyn RecommendationSource>, ttl: Duration, limit: usize) -> Self {
        Self { source, ttl, limit, slot: Mutex::new(None) }
    }

    /// Current snapshot, refreshing through the source when stale.
    pub async fn get(&self) -> OpResult<Arc<Vec<Recommendation>>> {
        if let Some(fresh) = self.fresh_snapshot() {
            return Ok(fresh);
        }

        match self.source.fetch(self.limit).await {
            Ok(recs) => {
                let recs = Arc::new(recs);
                *self.slot.lock() =
                    Some(CacheSlot { recs: Arc::clone(&recs), fetched_at: Instant::now() });
                debug!(count = recs.len(), "recommendation cache refreshed");
                Ok(recs)
            }
            Err(e) => {
                let stale = self.slot.lock().as_ref().map(|s| Arc::clone(&s.recs));
                match stale {
                    Some(recs) => {
                        warn!("triage refresh failed, serving stale snapshot: {e}");
                        Ok(recs)
                    }
                    None => Err(e),
                }
            }
        }
    }

    /// Drop the cached snapshot so the next `get` refreshes.
    pub fn invalidate(&self) {
        *self.slot.lock() = None;
    }

    fn fresh_snapshot(&self) -> Option<Arc<Vec<Recommendation>>> {
        let slot = self.slot.lock();
        slot.as_ref()
            .filter(|s| s.fetched_at.elapsed() < self.ttl)
            .map(|s| Arc::clone(&s.recs))
    }
}

#[cfg(test)]
#[path = "triage_tests.rs"]
mod tests;
