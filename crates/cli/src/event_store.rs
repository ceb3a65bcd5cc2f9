// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ordered event retention: in-memory ring plus optional durable JSONL log.
//!
//! The store assigns globally monotonic sequence numbers and keeps events
//! for cursor-based catchup. Sequence allocation, the ring append, and the
//! durable append happen under a single critical section so the ring never
//! trails the log. When the ring wraps, older events are only reachable
//! through the durable log (if configured) within its retention window.

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::event::Event;

/// How many drop audit records are retained in memory.
const DROP_AUDIT_CAPACITY: usize = 1024;

/// Durable log settings: where the JSONL file lives and how long entries
/// are retained by the background cleaner.
#[derive(Debug, Clone)]
pub struct DurableConfig {
    pub path: PathBuf,
    pub retention: Duration,
}

/// Audit record for deliveries a subscriber failed to receive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropRecord {
    pub subscriber_id: String,
    pub topic: String,
    pub reason: String,
    pub first_seq: u64,
    pub last_seq: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Result of a cursor read.
#[derive(Debug, Clone)]
pub struct Catchup {
    pub events: Vec<Event>,
    /// True when the cursor points below the oldest retained event; the
    /// caller should restart from `current_seq` and treat prior state as
    /// lost.
    pub needs_reset: bool,
}

pub struct EventStore {
    inner: RwLock<Inner>,
}

struct Inner {
    next_seq: u64,
    ring: VecDeque<Event>,
    capacity: usize,
    durable: Option<DurableConfig>,
    drops: VecDeque<DropRecord>,
}

impl EventStore {
    /// Create a store with the given ring capacity and optional durable log.
    ///
    /// If the durable log file already exists, sequence allocation resumes
    /// after the highest sequence found in it, so a restart never reuses
    /// sequence numbers that clients may hold as cursors.
    pub fn new(ring_capacity: usize, durable: Option<DurableConfig>) -> Self {
        let next_seq = durable
            .as_ref()
            .and_then(|d| last_durable_seq(&d.path))
            .map(|s| s + 1)
            .unwrap_or(1);
        Self {
            inner: RwLock::new(Inner {
                next_seq,
                ring: VecDeque::with_capacity(ring_capacity.min(4096)),
                capacity: ring_capacity.max(1),
                durable,
                drops: VecDeque::new(),
            }),
        }
    }

    /// Append an event: allocate the next sequence, push to the ring, and
    /// (if configured) append to the durable log.
    ///
    /// A durable-log I/O failure is surfaced to the caller but the event is
    /// still kept in the ring — loss is a retention concern, not a delivery
    /// concern, within the ring window.
    pub fn store(
        &self,
        topic: impl Into<String>,
        event_type: impl Into<String>,
        data: serde_json::Value,
    ) -> (Event, Option<std::io::Error>) {
        let mut inner = self.inner.write();
        let event = Event {
            seq: inner.next_seq,
            topic: topic.into(),
            event_type: event_type.into(),
            data,
            created_at: Utc::now(),
        };
        inner.next_seq += 1;

        let durable_error = match inner.durable {
            Some(ref d) => append_line(&d.path, &event).err(),
            None => None,
        };

        if inner.ring.len() == inner.capacity {
            inner.ring.pop_front();
        }
        inner.ring.push_back(event.clone());

        (event, durable_error)
    }

    /// The most recently assigned sequence number (0 if nothing stored).
    pub fn current_seq(&self) -> u64 {
        self.inner.read().next_seq - 1
    }

    /// Oldest sequence still reachable, through the ring or the durable log.
    pub fn oldest_available(&self) -> Option<u64> {
        let inner = self.inner.read();
        let ring_oldest = inner.ring.front().map(|e| e.seq);
        let durable_oldest = inner.durable.as_ref().and_then(|d| {
            read_durable(&d.path, d.retention).first().map(|e| e.seq)
        });
        match (durable_oldest, ring_oldest) {
            (Some(d), Some(r)) => Some(d.min(r)),
            (Some(d), None) => Some(d),
            (None, r) => r,
        }
    }

    /// Read events with `seq > cursor` matching the topic filter, up to
    /// `limit`. An empty filter matches every topic.
    ///
    /// When the cursor is older than the oldest available event the read
    /// reports `needs_reset` and returns nothing: the gap cannot be
    /// reconstructed and the subscriber must restart from `current_seq`.
    pub fn get_since(&self, cursor: u64, topic_filter: &[String], limit: usize) -> Catchup {
        let inner = self.inner.read();
        let latest = inner.next_seq - 1;
        if cursor >= latest {
            return Catchup { events: vec![], needs_reset: false };
        }

        let ring_oldest = inner.ring.front().map(|e| e.seq);
        let serve_from_ring = ring_oldest.is_some_and(|o| cursor + 1 >= o);

        if serve_from_ring {
            let events = inner
                .ring
                .iter()
                .filter(|e| e.seq > cursor)
                .filter(|e| matches_filter(topic_filter, &e.topic))
                .take(limit)
                .cloned()
                .collect();
            return Catchup { events, needs_reset: false };
        }

        // Ring has evicted past the cursor; fall back to the durable log.
        if let Some(ref d) = inner.durable {
            let entries = read_durable(&d.path, d.retention);
            let covered = entries.first().is_some_and(|e| cursor + 1 >= e.seq);
            if covered {
                let events = entries
                    .into_iter()
                    .filter(|e| e.seq > cursor)
                    .filter(|e| matches_filter(topic_filter, &e.topic))
                    .take(limit)
                    .collect();
                return Catchup { events, needs_reset: false };
            }
        }

        Catchup { events: vec![], needs_reset: true }
    }

    /// Record a delivery the hub had to drop. Kept as a bounded in-memory
    /// audit trail and mirrored to `<log>.drops` when a durable log is
    /// configured.
    pub fn record_dropped(
        &self,
        subscriber_id: &str,
        topic: &str,
        reason: &str,
        first_seq: u64,
        last_seq: u64,
    ) {
        let record = DropRecord {
            subscriber_id: subscriber_id.to_owned(),
            topic: topic.to_owned(),
            reason: reason.to_owned(),
            first_seq,
            last_seq,
            recorded_at: Utc::now(),
        };
        warn!(
            subscriber = subscriber_id,
            topic,
            reason,
            first_seq,
            last_seq,
            "events dropped"
        );
        let mut inner = self.inner.write();
        if inner.drops.len() == DROP_AUDIT_CAPACITY {
            inner.drops.pop_front();
        }
        inner.drops.push_back(record.clone());
        if let Some(ref d) = inner.durable {
            let mirror = d.path.with_extension("drops");
            if let Err(e) = append_line(&mirror, &record) {
                debug!("drop audit mirror write failed: {e}");
            }
        }
    }

    /// Snapshot of the drop audit trail (newest last).
    pub fn dropped_records(&self) -> Vec<DropRecord> {
        self.inner.read().drops.iter().cloned().collect()
    }

    /// Purge durable log entries older than the retention window.
    ///
    /// Rewrites the file keeping only retained lines; called periodically
    /// by [`EventStore::run_cleaner`] and directly from tests.
    pub fn purge_expired(&self) -> std::io::Result<usize> {
        // Hold the write lock across read-and-rewrite so a concurrent
        // store() cannot append between the read and the replace.
        let inner = self.inner.write();
        let (path, retention) = match inner.durable {
            Some(ref d) => (d.path.clone(), d.retention),
            None => return Ok(0),
        };
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or_default();
        let mut kept = String::new();
        let mut purged = 0usize;
        for line in contents.lines() {
            match serde_json::from_str::<Event>(line) {
                Ok(e) if e.created_at < cutoff => purged += 1,
                _ => {
                    kept.push_str(line);
                    kept.push('\n');
                }
            }
        }
        if purged > 0 {
            let tmp = path.with_extension("tmp");
            std::fs::write(&tmp, &kept)?;
            std::fs::rename(&tmp, &path)?;
            debug!(purged, "durable event log purged");
        }
        drop(inner);
        Ok(purged)
    }

    /// Background cleaner: purge the durable log at a fixed interval until
    /// shutdown.
    pub async fn run_cleaner(&self, interval: Duration, shutdown: CancellationToken) {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tick.tick() => {
                    if let Err(e) = self.purge_expired() {
                        warn!("durable log purge failed: {e}");
                    }
                }
            }
        }
    }
}

fn matches_filter(filter: &[String], topic: &str) -> bool {
    filter.is_empty() || crate::event::any_topic_matches(filter, topic)
}

fn append_line<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut line = serde_json::to_string(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    line.push('\n');
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())
}

/// Read retained durable entries in file (= sequence) order.
fn read_durable(path: &Path, retention: Duration) -> Vec<Event> {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return vec![];
    };
    let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or_default();
    contents
        .lines()
        .filter_map(|line| serde_json::from_str::<Event>(line).ok())
        .filter(|e| e.created_at >= cutoff)
        .collect()
}

/// Highest sequence in an existing durable log, if any.
fn last_durable_seq(path: &Path) -> Option<u64> {
    let contents = std::fs::read_to_string(path).ok()?;
    contents
        .lines()
        .rev()
        .find_map(|line| serde_json::from_str::<Event>(line).ok())
        .map(|e| e.seq)
}

#[cfg(test)]
#[path = "event_store_tests.rs"]
mod tests;
