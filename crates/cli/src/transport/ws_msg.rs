// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket wire types.
//!
//! Clients send bare JSON objects distinguished by their fields:
//! `{"subscribe": [patterns]}` to add live subscriptions, and
//! `{"cursor": N, "topics": [patterns]}` to resume after a reconnect.
//! The server pushes one frame per event and a `stream.reset` frame when
//! a cursor falls outside retention.

use serde::{Deserialize, Serialize};

use crate::event::Event;

/// Client → server messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    /// Resume from a cursor, subscribing to the given topics.
    Resume {
        cursor: u64,
        #[serde(default)]
        topics: Vec<String>,
    },
    /// Subscribe to additional topic patterns.
    Subscribe { subscribe: Vec<String> },
    /// Liveness probe.
    Ping { ping: bool },
}

/// One event as pushed to a subscriber.
#[derive(Debug, Clone, Serialize)]
pub struct EventFrame<'a> {
    pub topic: &'a str,
    pub event_type: &'a str,
    pub seq: u64,
    pub ts: chrono::DateTime<chrono::Utc>,
    pub data: &'a serde_json::Value,
}

impl<'a> From<&'a Event> for EventFrame<'a> {
    fn from(event: &'a Event) -> Self {
        Self {
            topic: &event.topic,
            event_type: &event.event_type,
            seq: event.seq,
            ts: event.created_at,
            data: &event.data,
        }
    }
}

/// Told to a client whose cursor points below retention: start over from
/// `current_seq` and treat prior state as lost.
#[derive(Debug, Clone, Serialize)]
pub struct ResetFrame {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub reason: String,
    pub current_seq: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_avail: Option<u64>,
}

impl ResetFrame {
    pub fn new(reason: impl Into<String>, current_seq: u64, oldest_avail: Option<u64>) -> Self {
        Self { frame_type: "stream.reset", reason: reason.into(), current_seq, oldest_avail }
    }
}

/// Ping reply.
#[derive(Debug, Clone, Serialize)]
pub struct PongFrame {
    pub pong: bool,
}

/// Error frame for unparseable client messages.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorFrame {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub error: String,
    pub error_code: String,
}

impl ErrorFrame {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            frame_type: "error",
            error: message.into(),
            error_code: crate::error::ErrorCode::BadRequest.as_str().to_owned(),
        }
    }
}

#[cfg(test)]
#[path = "ws_msg_tests.rs"]
mod tests;
