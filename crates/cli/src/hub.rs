// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Streaming hub: routes stored events to subscribers by topic pattern.
//!
//! A single dispatcher task owns the subscriber set; everything else talks
//! to it over an internal command channel. Per-subscriber bounded queues
//! are the only cross-task hand-off, so a slow consumer can never block the
//! publisher or its peers — its events are dropped, accounted, and made
//! visible to the client as a synthetic gap event.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::event::{self, Event};
use crate::event_store::EventStore;

/// Hub tuning knobs.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Per-subscriber send queue capacity.
    pub queue_capacity: usize,
    /// Consecutive failed deliveries after which a subscriber is
    /// force-unregistered with disconnect reason `overflow`.
    pub overflow_window: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self { queue_capacity: 256, overflow_window: 64 }
    }
}

/// Commands handled by the dispatcher task.
enum HubCommand {
    Register { id: String, patterns: Vec<String>, tx: mpsc::Sender<Event> },
    Unregister { id: String },
    Subscribe { id: String, patterns: Vec<String> },
    Publish { event: Event },
    Stats { reply: oneshot::Sender<Vec<SubscriberStats>> },
}

/// Per-subscriber accounting exposed for status and tests.
#[derive(Debug, Clone)]
pub struct SubscriberStats {
    pub id: String,
    pub patterns: Vec<String>,
    pub dropped: u64,
    pub last_sent_seq: u64,
}

/// Cloneable handle to the dispatcher.
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::UnboundedSender<HubCommand>,
    queue_capacity: usize,
}

impl Hub {
    /// Build a hub and its dispatcher. The caller spawns
    /// [`Dispatcher::run`] on the runtime.
    pub fn new(config: HubConfig) -> (Self, Dispatcher) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Self { tx, queue_capacity: config.queue_capacity };
        (hub, Dispatcher { rx, config, subscribers: HashMap::new() })
    }

    /// Register a subscriber with its initial patterns; returns the
    /// receiving end of its send queue.
    pub fn register(&self, id: &str, patterns: Vec<String>) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let _ = self.tx.send(HubCommand::Register { id: id.to_owned(), patterns, tx });
        rx
    }

    /// Remove a subscriber. Events already queued remain readable; no
    /// further events are delivered once the dispatcher processes this.
    pub fn unregister(&self, id: &str) {
        let _ = self.tx.send(HubCommand::Unregister { id: id.to_owned() });
    }

    /// Add patterns to an existing subscriber. Delivery starts with the
    /// next published event; historical replay goes through
    /// [`EventStore::get_since`].
    pub fn subscribe(&self, id: &str, patterns: Vec<String>) {
        let _ = self.tx.send(HubCommand::Subscribe { id: id.to_owned(), patterns });
    }

    /// Hand an event to the dispatcher. Never blocks the publisher.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(HubCommand::Publish { event });
    }

    /// Snapshot per-subscriber stats.
    pub async fn stats(&self) -> Vec<SubscriberStats> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(HubCommand::Stats { reply }).is_err() {
            return vec![];
        }
        rx.await.unwrap_or_default()
    }
}

/// The store-and-fan-out front door.
///
/// `emit` allocates the sequence and publishes under one lock so the
/// dispatcher receives events in sequence order — the per-subscriber
/// strictly-increasing delivery guarantee depends on it.
pub struct EventBus {
    store: Arc<EventStore>,
    hub: Hub,
    order: Mutex<()>,
}

impl EventBus {
    pub fn new(store: Arc<EventStore>, hub: Hub) -> Self {
        Self { store, hub, order: Mutex::new(()) }
    }

    /// Store an event and fan it out. Durable-log failures are logged and
    /// swallowed here; within the ring window the event is still delivered.
    pub fn emit(
        &self,
        topic: impl Into<String>,
        event_type: impl Into<String>,
        data: serde_json::Value,
    ) -> Event {
        let guard = self.order.lock();
        let (event, durable_error) = self.store.store(topic, event_type, data);
        self.hub.publish(event.clone());
        drop(guard);
        if let Some(e) = durable_error {
            tracing::warn!(seq = event.seq, "durable event log write failed: {e}");
        }
        event
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }
}

struct SubscriberEntry {
    patterns: Vec<String>,
    tx: mpsc::Sender<Event>,
    last_sent_seq: u64,
    dropped: u64,
    consecutive_failures: u32,
    /// Seq range (and topic) of deliveries dropped since the last
    /// successful send; flushed as a synthetic gap event.
    pending_gap: Option<Gap>,
}

struct Gap {
    topic: String,
    first_seq: u64,
    last_seq: u64,
}

/// Single-owner dispatch task.
pub struct Dispatcher {
    rx: mpsc::UnboundedReceiver<HubCommand>,
    config: HubConfig,
    subscribers: HashMap<String, SubscriberEntry>,
}

impl Dispatcher {
    /// Run until shutdown. Membership changes and publishes are serialized
    /// through the command channel, so a subscriber that unregisters
    /// mid-stream never receives further events.
    pub async fn run(mut self, store: Arc<EventStore>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("hub dispatcher shutting down");
                    return;
                }
                cmd = self.rx.recv() => {
                    let Some(cmd) = cmd else { return };
                    self.handle(cmd, &store);
                }
            }
        }
    }

    fn handle(&mut self, cmd: HubCommand, store: &EventStore) {
        match cmd {
            HubCommand::Register { id, patterns, tx } => {
                debug!(subscriber = %id, ?patterns, "subscriber registered");
                self.subscribers.insert(
                    id,
                    SubscriberEntry {
                        patterns,
                        tx,
                        last_sent_seq: 0,
                        dropped: 0,
                        consecutive_failures: 0,
                        pending_gap: None,
                    },
                );
            }
            HubCommand::Unregister { id } => {
                if self.subscribers.remove(&id).is_some() {
                    debug!(subscriber = %id, "subscriber unregistered");
                }
            }
            HubCommand::Subscribe { id, patterns } => {
                if let Some(entry) = self.subscribers.get_mut(&id) {
                    for p in patterns {
                        if !entry.patterns.contains(&p) {
                            entry.patterns.push(p);
                        }
                    }
                }
            }
            HubCommand::Publish { event } => self.dispatch(&event, store),
            HubCommand::Stats { reply } => {
                let stats = self
                    .subscribers
                    .iter()
                    .map(|(id, e)| SubscriberStats {
                        id: id.clone(),
                        patterns: e.patterns.clone(),
                        dropped: e.dropped,
                        last_sent_seq: e.last_sent_seq,
                    })
                    .collect();
                let _ = reply.send(stats);
            }
        }
    }

    fn dispatch(&mut self, event: &Event, store: &EventStore) {
        let mut lost: Vec<String> = vec![];
        for (id, entry) in &mut self.subscribers {
            if !event::any_topic_matches(&entry.patterns, &event.topic) {
                continue;
            }

            // A pending gap must reach the client before any newer event,
            // otherwise the seq discontinuity would be silent.
            if let Some(gap) = entry.pending_gap.take() {
                let synthetic = gap_event(&gap);
                match entry.tx.try_send(synthetic) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        entry.pending_gap = Some(extend_gap(gap, event));
                        entry.dropped += 1;
                        entry.consecutive_failures += 1;
                        store.record_dropped(
                            id,
                            &event.topic,
                            "slow_consumer",
                            event.seq,
                            event.seq,
                        );
                        if entry.consecutive_failures >= self.config.overflow_window {
                            lost.push(id.clone());
                        }
                        continue;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        lost.push(id.clone());
                        continue;
                    }
                }
            }

            match entry.tx.try_send(event.clone()) {
                Ok(()) => {
                    entry.last_sent_seq = event.seq;
                    entry.consecutive_failures = 0;
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    entry.dropped += 1;
                    entry.consecutive_failures += 1;
                    entry.pending_gap = Some(Gap {
                        topic: event.topic.clone(),
                        first_seq: event.seq,
                        last_seq: event.seq,
                    });
                    store.record_dropped(id, &event.topic, "buffer_full", event.seq, event.seq);
                    if entry.consecutive_failures >= self.config.overflow_window {
                        lost.push(id.clone());
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    lost.push(id.clone());
                }
            }
        }

        for id in lost {
            if let Some(entry) = self.subscribers.remove(&id) {
                info!(subscriber = %id, dropped = entry.dropped, "subscriber lost: overflow");
                store.record_dropped(
                    &id,
                    entry.pending_gap.as_ref().map(|g| g.topic.as_str()).unwrap_or(""),
                    "overflow",
                    entry.pending_gap.as_ref().map(|g| g.first_seq).unwrap_or(0),
                    entry.last_sent_seq.max(event.seq),
                );
                // Dropping the sender closes the subscriber's queue; its
                // connection task observes the close and tears down.
            }
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Synchronously process every queued command (tests only).
    #[cfg(test)]
    fn drain(&mut self, store: &EventStore) {
        while let Ok(cmd) = self.rx.try_recv() {
            self.handle(cmd, store);
        }
    }
}

/// Synthetic event that makes a delivery gap explicit to one subscriber.
/// It is not stored; its seq is the first dropped seq so client-side seq
/// tracking stays strictly increasing.
fn gap_event(gap: &Gap) -> Event {
    Event {
        seq: gap.first_seq,
        topic: gap.topic.clone(),
        event_type: event::PANE_OUTPUT_DROPPED.to_owned(),
        data: serde_json::json!({
            "first_seq": gap.first_seq,
            "last_seq": gap.last_seq,
            "reason": "slow_consumer",
        }),
        created_at: chrono::Utc::now(),
    }
}

fn extend_gap(mut gap: Gap, event: &Event) -> Gap {
    gap.last_seq = event.seq;
    gap
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
