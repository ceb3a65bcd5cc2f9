// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event model and topic routing.
//!
//! Topics are colon-delimited hierarchical keys (`panes:dev:2`,
//! `mail:worker-1`). Subscription patterns support exact match and a
//! terminal wildcard: `panes:*` matches `panes:dev` and `panes:dev:2`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single ordered event as stored and fanned out.
///
/// `seq` is globally monotonic, assigned atomically by the event store.
/// Once assigned it is never reused or reordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub topic: String,
    pub event_type: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// Event type names, grouped by topic family.
pub const PANE_OUTPUT: &str = "pane.output";
pub const PANE_OUTPUT_DROPPED: &str = "pane.output.dropped";
pub const STREAM_RESET: &str = "stream.reset";
pub const SESSION_CREATED: &str = "session.created";
pub const SESSION_KILLED: &str = "session.killed";
pub const AGENT_SPAWNED: &str = "agent.spawned";
pub const WORK_ASSIGNED: &str = "work.assigned";
pub const MAIL_RECEIVED: &str = "mail.received";
pub const RESERVATION_GRANTED: &str = "reservation.granted";
pub const RESERVATION_CONFLICT: &str = "reservation.conflict";
pub const RESERVATION_RELEASED: &str = "reservation.released";
pub const RESERVATION_RENEWED: &str = "reservation.renewed";
pub const HEADROOM_BLOCKED: &str = "headroom.blocked";
pub const HEADROOM_UNBLOCKED: &str = "headroom.unblocked";
pub const CHECKPOINT_CREATED: &str = "checkpoint.created";
pub const CHECKPOINT_RESTORED: &str = "checkpoint.restored";

/// Topic for one pane's output stream.
pub fn pane_topic(session: &str, pane_index: u32) -> String {
    format!("panes:{session}:{pane_index}")
}

/// Topic for session lifecycle events.
pub fn session_topic(session: &str) -> String {
    format!("sessions:{session}")
}

/// Topic for one agent's mailbox.
pub fn mail_topic(agent: &str) -> String {
    format!("mail:{agent}")
}

/// Topic for one agent's reservation lifecycle.
pub fn reservation_topic(agent: &str) -> String {
    format!("reservations:{agent}")
}

/// Topic for scheduler/headroom events.
pub const SCHEDULER_TOPIC: &str = "scheduler";

/// Match a topic against a subscription pattern.
///
/// Exact patterns match exactly. A pattern ending in `:*` matches any
/// topic whose colon-split segments start with the pattern's prefix
/// segments: `a:*` matches `a:x` and `a:x:y` but not `ab:x` or `a`.
/// The bare pattern `*` matches everything.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix(":*") {
        None => pattern == topic,
        Some(prefix) => {
            let mut want = prefix.split(':');
            let mut have = topic.split(':');
            loop {
                match (want.next(), have.next()) {
                    (None, Some(_)) => return true,
                    (None, None) => return false,
                    (Some(_), None) => return false,
                    (Some(w), Some(h)) if w == h => continue,
                    _ => return false,
                }
            }
        }
    }
}

/// True if any pattern in the set matches the topic.
pub fn any_topic_matches(patterns: &[String], topic: &str) -> bool {
    patterns.iter().any(|p| topic_matches(p, topic))
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
