// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: fakes for the external capabilities and a
//! ready-wired event bus.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentRegistry, AgentSnapshot};
use crate::checkpoint::CheckpointStore;
use crate::coordinator::{Coordinator, CoordinatorConfig};
use crate::error::OpError;
use crate::event_store::EventStore;
use crate::headroom::{HeadroomConfig, HeadroomGuard};
use crate::hub::{EventBus, Hub, HubConfig};
use crate::mail::{MailFuture, MailSender};
use crate::mux::{Multiplexer, MuxFuture, PaneInfo};
use crate::probe::ProcProbe;
use crate::reservation::ReservationRegistry;
use crate::streamer::{StreamManager, StreamerConfig};
use crate::transport::state::{LifecycleState, ServerSettings, Store};
use crate::triage::{Recommendation, RecommendationCache, RecommendationSource, SourceFuture};

/// Build an event bus with a live dispatcher. The returned token stops the
/// dispatcher; tests that don't care may simply drop it.
pub fn live_bus(ring_capacity: usize) -> (Arc<EventBus>, CancellationToken) {
    let store = Arc::new(EventStore::new(ring_capacity, None));
    let (hub, dispatcher) = Hub::new(HubConfig::default());
    let shutdown = CancellationToken::new();
    tokio::spawn(dispatcher.run(Arc::clone(&store), shutdown.clone()));
    (Arc::new(EventBus::new(store, hub)), shutdown)
}

struct FakeSession {
    panes: Vec<PaneInfo>,
    layout: String,
}

/// In-memory multiplexer that records every call.
#[derive(Default)]
pub struct FakeMux {
    sessions: Mutex<HashMap<String, FakeSession>>,
    captures: Mutex<HashMap<String, String>>,
    sent: Mutex<Vec<(String, String, bool)>>,
    calls: Mutex<Vec<String>>,
    next_pane: AtomicU32,
    pub fail_send_keys: AtomicBool,
}

impl FakeMux {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    /// Every recorded call, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// `send_keys` deliveries: (target, text, enter).
    pub fn sent(&self) -> Vec<(String, String, bool)> {
        self.sent.lock().clone()
    }

    /// Set the text the next `capture_pane` returns for a target.
    pub fn set_capture(&self, target: &str, text: &str) {
        self.captures.lock().insert(target.to_owned(), text.to_owned());
    }

    pub fn pane_count(&self, session: &str) -> usize {
        self.sessions.lock().get(session).map(|s| s.panes.len()).unwrap_or(0)
    }

    fn new_pane(&self, index: u32) -> PaneInfo {
        let n = self.next_pane.fetch_add(1, Ordering::SeqCst);
        PaneInfo {
            id: format!("%{n}"),
            index,
            title: String::new(),
            width: 200,
            height: 50,
            active: index == 0,
        }
    }
}

impl Multiplexer for FakeMux {
    fn create_session<'a>(
        &'a self,
        name: &'a str,
        _working_dir: &'a Path,
        _command: Option<&'a str>,
    ) -> MuxFuture<'a, ()> {
        Box::pin(async move {
            self.record(format!("create-session {name}"));
            let mut sessions = self.sessions.lock();
            if sessions.contains_key(name) {
                return Err(OpError::conflict(format!("duplicate session: {name}")));
            }
            let pane = self.new_pane(0);
            sessions.insert(
                name.to_owned(),
                FakeSession { panes: vec![pane], layout: "even-horizontal".to_owned() },
            );
            Ok(())
        })
    }

    fn kill_session<'a>(&'a self, name: &'a str) -> MuxFuture<'a, ()> {
        Box::pin(async move {
            self.record(format!("kill-session {name}"));
            match self.sessions.lock().remove(name) {
                Some(_) => Ok(()),
                None => Err(OpError::unavailable(format!("no such session: {name}"))),
            }
        })
    }

    fn session_exists<'a>(&'a self, name: &'a str) -> MuxFuture<'a, bool> {
        Box::pin(async move { Ok(self.sessions.lock().contains_key(name)) })
    }

    fn split_window<'a>(
        &'a self,
        session: &'a str,
        _working_dir: &'a Path,
        _command: Option<&'a str>,
    ) -> MuxFuture<'a, PaneInfo> {
        Box::pin(async move {
            self.record(format!("split-window {session}"));
            let mut sessions = self.sessions.lock();
            let entry = sessions
                .get_mut(session)
                .ok_or_else(|| OpError::unavailable(format!("no such session: {session}")))?;
            let pane = self.new_pane(entry.panes.len() as u32);
            entry.panes.push(pane.clone());
            Ok(pane)
        })
    }

    fn send_keys<'a>(&'a self, target: &'a str, text: &'a str, enter: bool) -> MuxFuture<'a, ()> {
        Box::pin(async move {
            self.record(format!("send-keys {target}"));
            if self.fail_send_keys.load(Ordering::SeqCst) {
                return Err(OpError::unavailable("send-keys failed"));
            }
            self.sent.lock().push((target.to_owned(), text.to_owned(), enter));
            Ok(())
        })
    }

    fn capture_pane<'a>(&'a self, target: &'a str, _scrollback_lines: u32) -> MuxFuture<'a, String> {
        Box::pin(async move {
            self.record(format!("capture-pane {target}"));
            Ok(self.captures.lock().get(target).cloned().unwrap_or_default())
        })
    }

    fn pipe_pane<'a>(&'a self, target: &'a str, command: Option<&'a str>) -> MuxFuture<'a, ()> {
        Box::pin(async move {
            match command {
                Some(_) => self.record(format!("pipe-pane {target}")),
                None => self.record(format!("pipe-pane-stop {target}")),
            }
            Ok(())
        })
    }

    fn select_layout<'a>(&'a self, session: &'a str, layout: &'a str) -> MuxFuture<'a, ()> {
        Box::pin(async move {
            self.record(format!("select-layout {session} {layout}"));
            if let Some(entry) = self.sessions.lock().get_mut(session) {
                entry.layout = layout.to_owned();
            }
            Ok(())
        })
    }

    fn current_layout<'a>(&'a self, session: &'a str) -> MuxFuture<'a, String> {
        Box::pin(async move {
            Ok(self
                .sessions
                .lock()
                .get(session)
                .map(|s| s.layout.clone())
                .unwrap_or_default())
        })
    }

    fn list_panes<'a>(&'a self, session: &'a str) -> MuxFuture<'a, Vec<PaneInfo>> {
        Box::pin(async move {
            let sessions = self.sessions.lock();
            sessions
                .get(session)
                .map(|s| s.panes.clone())
                .ok_or_else(|| OpError::unavailable(format!("no such session: {session}")))
        })
    }

    fn select_pane<'a>(&'a self, target: &'a str) -> MuxFuture<'a, ()> {
        Box::pin(async move {
            self.record(format!("select-pane {target}"));
            Ok(())
        })
    }
}

/// Records deliveries; can be told to fail.
#[derive(Default)]
pub struct FakeMail {
    deliveries: Mutex<Vec<(String, String, String)>>,
    pub fail: AtomicBool,
}

impl FakeMail {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliveries as (agent name, subject, body).
    pub fn deliveries(&self) -> Vec<(String, String, String)> {
        self.deliveries.lock().clone()
    }
}

impl MailSender for FakeMail {
    fn send<'a>(
        &'a self,
        to: &'a AgentSnapshot,
        subject: &'a str,
        body: &'a str,
    ) -> MailFuture<'a> {
        Box::pin(async move {
            if self.fail.load(Ordering::SeqCst) {
                return Err(OpError::unavailable("mail transport down"));
            }
            self.deliveries.lock().push((
                to.name().to_owned(),
                subject.to_owned(),
                body.to_owned(),
            ));
            Ok(())
        })
    }
}

/// Convert any displayable error into `anyhow::Error` (test ergonomics).
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}

/// A fully-wired [`Store`] over fakes, for transport tests.
pub struct TestStore {
    pub store: Arc<Store>,
    pub mux: Arc<FakeMux>,
    pub mail: Arc<FakeMail>,
    pub data_dir: tempfile::TempDir,
    pub workdir: tempfile::TempDir,
}

/// Build a [`Store`] whose external capabilities are all fakes. Must be
/// called from a tokio runtime (the hub dispatcher is spawned).
pub fn test_store(recs: Vec<Recommendation>, auth_token: Option<String>) -> TestStore {
    // OK to panic in test-only code — infra setup failure is fatal.
    #[allow(clippy::expect_used)]
    let data_dir = tempfile::tempdir().expect("create temp data dir");
    #[allow(clippy::expect_used)]
    let workdir = tempfile::tempdir().expect("create temp workdir");
    let shutdown = CancellationToken::new();

    let event_store = Arc::new(EventStore::new(1024, None));
    let (hub, dispatcher) = Hub::new(HubConfig::default());
    tokio::spawn(dispatcher.run(Arc::clone(&event_store), shutdown.clone()));
    let bus = Arc::new(EventBus::new(event_store, hub));

    let mux = FakeMux::new();
    let dyn_mux: Arc<dyn Multiplexer> = Arc::clone(&mux) as Arc<dyn Multiplexer>;
    let agents = Arc::new(AgentRegistry::new(std::time::Duration::from_secs(60)));
    let reservations = Arc::new(ReservationRegistry::new());
    let guard = HeadroomGuard::new(
        Arc::new(ProcProbe::with_roots(
            data_dir.path().join("proc"),
            data_dir.path().join("cgroup"),
        )),
        HeadroomConfig { enabled: false, ..HeadroomConfig::default() },
        shutdown.clone(),
    );
    let streams = Arc::new(StreamManager::new(
        Arc::clone(&dyn_mux),
        Arc::clone(&bus),
        StreamerConfig {
            data_dir: data_dir.path().to_path_buf(),
            coalesce_window: std::time::Duration::from_millis(5),
            poll_interval: std::time::Duration::from_millis(50),
            prefer_pipe: false,
        },
    ));
    let checkpoints = Arc::new(CheckpointStore::new(data_dir.path()));
    let recommendations = Arc::new(RecommendationCache::new(
        StaticSource::new(recs),
        std::time::Duration::from_secs(60),
        50,
    ));
    let mail = FakeMail::new();
    let coordinator = Arc::new(Coordinator::new(
        Arc::clone(&agents),
        Arc::clone(&reservations),
        Arc::clone(&recommendations),
        Arc::clone(&mail) as Arc<dyn MailSender>,
        Arc::clone(&bus),
        CoordinatorConfig::default(),
    ));

    let store = Arc::new(Store {
        bus,
        agents,
        reservations,
        guard,
        streams,
        checkpoints,
        mux: dyn_mux,
        coordinator,
        recommendations,
        config: ServerSettings {
            started_at: std::time::Instant::now(),
            auth_token,
            working_dir: workdir.path().to_path_buf(),
            catchup_limit: 500,
        },
        lifecycle: LifecycleState {
            shutdown,
            ws_client_count: std::sync::atomic::AtomicI32::new(0),
        },
    });
    TestStore { store, mux, mail, data_dir, workdir }
}

/// Serves a fixed recommendation list.
pub struct StaticSource {
    recs: Vec<Recommendation>,
}

impl StaticSource {
    pub fn new(recs: Vec<Recommendation>) -> Arc<Self> {
        Arc::new(Self { recs })
    }
}

impl RecommendationSource for StaticSource {
    fn fetch(&self, limit: usize) -> SourceFuture<'_, Vec<Recommendation>> {
        let mut recs = self.recs.clone();
        recs.truncate(limit);
        Box::pin(async move { Ok(recs) })
    }
}
