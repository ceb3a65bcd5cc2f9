// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::test_support::{live_bus, FakeMux};

fn lines(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_owned()).collect()
}

#[test]
fn diff_skips_blank_initial_screen() {
    let fresh = diff_captures(&[], &lines(&["$ make test", "", ""]));
    assert_eq!(fresh, lines(&["$ make test"]));
}

#[test]
fn diff_detects_appended_lines() {
    let prev = lines(&["a", "b"]);
    let current = lines(&["a", "b", "c", "d"]);
    assert_eq!(diff_captures(&prev, &current), lines(&["c", "d"]));
}

#[test]
fn diff_handles_scrolled_screen() {
    // Screen scrolled: previous tail overlaps current head.
    let prev = lines(&["line1", "line2", "line3"]);
    let current = lines(&["line2", "line3", "line4"]);
    assert_eq!(diff_captures(&prev, &current), lines(&["line4"]));
}

#[test]
fn diff_identical_captures_are_quiet() {
    let capture = lines(&["same", "screen"]);
    assert!(diff_captures(&capture, &capture).is_empty());
}

#[test]
fn diff_with_no_overlap_emits_everything() {
    let prev = lines(&["old"]);
    let current = lines(&["entirely", "new"]);
    assert_eq!(diff_captures(&prev, &current), current);
}

fn pane(id: &str, index: u32) -> crate::mux::PaneInfo {
    crate::mux::PaneInfo {
        id: id.to_owned(),
        index,
        title: String::new(),
        width: 80,
        height: 24,
        active: false,
    }
}

fn poll_config(dir: &tempfile::TempDir) -> StreamerConfig {
    StreamerConfig {
        data_dir: dir.path().to_path_buf(),
        coalesce_window: Duration::from_millis(10),
        poll_interval: Duration::from_millis(20),
        prefer_pipe: false,
    }
}

#[tokio::test]
async fn poller_publishes_pane_output() {
    let dir = tempfile::tempdir().unwrap();
    let mux = FakeMux::new();
    let (bus, _shutdown) = live_bus(1024);
    let manager = StreamManager::new(
        Arc::clone(&mux) as Arc<dyn crate::mux::Multiplexer>,
        Arc::clone(&bus),
        poll_config(&dir),
    );

    mux.set_capture("%1", "hello from the agent\n");
    manager.start_stream("dev", &pane("%1", 1)).await.unwrap();

    // Wait for the poller to pick up the capture.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let catchup = bus.store().get_since(0, &["panes:dev:1".to_owned()], 10);
        if let Some(event) = catchup.events.first() {
            assert_eq!(event.event_type, "pane.output");
            assert_eq!(event.data["lines"][0], "hello from the agent");
            assert_eq!(event.data["pane_id"], "%1");
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "no pane.output event");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    manager.stop_all().await;
}

#[tokio::test]
async fn start_is_idempotent_and_stop_releases() {
    let dir = tempfile::tempdir().unwrap();
    let mux = FakeMux::new();
    let (bus, _shutdown) = live_bus(64);
    let manager = StreamManager::new(
        Arc::clone(&mux) as Arc<dyn crate::mux::Multiplexer>,
        bus,
        poll_config(&dir),
    );

    let p = pane("%7", 0);
    manager.start_stream("dev", &p).await.unwrap();
    manager.start_stream("dev", &p).await.unwrap();
    assert_eq!(manager.active_panes().await, vec!["%7".to_owned()]);

    manager.stop_stream("%7").await.unwrap();
    assert!(manager.active_panes().await.is_empty());
    // Stopping again is a no-op.
    manager.stop_stream("%7").await.unwrap();
}

#[tokio::test]
async fn stop_all_drains_every_stream() {
    let dir = tempfile::tempdir().unwrap();
    let mux = FakeMux::new();
    let (bus, _shutdown) = live_bus(64);
    let manager = StreamManager::new(
        Arc::clone(&mux) as Arc<dyn crate::mux::Multiplexer>,
        bus,
        poll_config(&dir),
    );

    for (id, idx) in [("%1", 1u32), ("%2", 2), ("%3", 3)] {
        manager.start_stream("dev", &pane(id, idx)).await.unwrap();
    }
    assert_eq!(manager.active_panes().await.len(), 3);

    manager.stop_all().await;
    assert!(manager.active_panes().await.is_empty());
}

#[tokio::test]
async fn dead_pane_poller_can_be_restarted() {
    let dir = tempfile::tempdir().unwrap();
    let mux = FakeMux::new();
    let (bus, _shutdown) = live_bus(64);
    let manager = StreamManager::new(
        Arc::clone(&mux) as Arc<dyn crate::mux::Multiplexer>,
        bus,
        poll_config(&dir),
    );

    // FakeMux returns empty captures (no error), so the task stays alive;
    // simulate a finished task by stopping, then restarting.
    let p = pane("%9", 0);
    manager.start_stream("dev", &p).await.unwrap();
    manager.stop_stream("%9").await.unwrap();
    manager.start_stream("dev", &p).await.unwrap();
    assert_eq!(manager.active_panes().await, vec!["%9".to_owned()]);
    manager.stop_all().await;
}
