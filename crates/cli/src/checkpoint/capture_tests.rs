// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::agent::{AgentRegistry, AgentType, RegisterAgent};
use crate::error::ErrorCode;
use crate::mux::Multiplexer;
use crate::test_support::FakeMux;

struct Fixture {
    _data: tempfile::TempDir,
    workdir: tempfile::TempDir,
    mux: Arc<FakeMux>,
    dyn_mux: Arc<dyn Multiplexer>,
    agents: AgentRegistry,
    store: CheckpointStore,
}

async fn fixture() -> Fixture {
    let data = tempfile::tempdir().unwrap();
    let workdir = tempfile::tempdir().unwrap();
    let mux = FakeMux::new();
    let dyn_mux: Arc<dyn Multiplexer> = Arc::clone(&mux) as Arc<dyn Multiplexer>;
    dyn_mux.create_session("dev", workdir.path(), None).await.unwrap();
    dyn_mux.split_window("dev", workdir.path(), None).await.unwrap();

    let agents = AgentRegistry::new(Duration::from_secs(60));
    agents
        .register(RegisterAgent {
            pane_id: "%0".to_owned(),
            pane_index: 0,
            session: "dev".to_owned(),
            agent_type: AgentType::Claude,
            mail_name: None,
        })
        .await;

    let store = CheckpointStore::new(data.path());
    Fixture { _data: data, workdir, mux, dyn_mux, agents, store }
}

#[tokio::test]
async fn captures_panes_metadata_and_manifest() {
    let f = fixture().await;
    f.mux.set_capture("%0", "agent zero scrollback\n");
    f.mux.set_capture("%1", "agent one scrollback\n");

    let meta = capture_checkpoint(
        &f.dyn_mux,
        &f.agents,
        &f.store,
        "dev",
        f.workdir.path(),
        CaptureOptions::new("nightly"),
    )
    .await
    .unwrap();

    assert_eq!(meta.name, "nightly");
    assert_eq!(meta.session_name, "dev");
    assert_eq!(meta.pane_count, 2);
    assert_eq!(meta.panes[0].agent_type, AgentType::Claude);
    assert_eq!(meta.panes[1].agent_type, AgentType::Unknown); // unregistered pane
    assert_eq!(meta.active_pane_index, 0);

    let dir = f.store.dir(&meta.id);
    let scrollback = std::fs::read_to_string(dir.join("panes/pane-0.txt")).unwrap();
    assert_eq!(scrollback, "agent zero scrollback\n");
    assert!(dir.join("MANIFEST.json").exists());
    assert!(f.store.verify(&meta.id).unwrap().is_empty());

    // Round-trips through the store.
    let loaded = f.store.load(&meta.id).unwrap();
    assert_eq!(loaded.pane_count, 2);
    assert_eq!(loaded.panes[0].scrollback_file, "panes/pane-0.txt");
}

#[tokio::test]
async fn missing_session_is_not_found() {
    let f = fixture().await;
    let err = capture_checkpoint(
        &f.dyn_mux,
        &f.agents,
        &f.store,
        "ghost",
        f.workdir.path(),
        CaptureOptions::new("x"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
    assert!(f.store.list().unwrap().is_empty());
}

#[tokio::test]
async fn non_repo_workdir_has_no_vcs_state() {
    let f = fixture().await;
    let meta = capture_checkpoint(
        &f.dyn_mux,
        &f.agents,
        &f.store,
        "dev",
        f.workdir.path(),
        CaptureOptions::new("no-vcs"),
    )
    .await
    .unwrap();
    assert!(meta.vcs.is_none());
}

#[tokio::test]
async fn dirty_repo_captures_patch() {
    let f = fixture().await;
    // Turn the workdir into a repo with uncommitted changes.
    for args in [
        vec!["git", "init", "-q", "-b", "main"],
        vec!["git", "add", "."],
    ] {
        let mut cmd = std::process::Command::new(args[0]);
        cmd.args(&args[1..]).current_dir(f.workdir.path());
        for (k, v) in [
            ("GIT_AUTHOR_NAME", "spec"),
            ("GIT_AUTHOR_EMAIL", "spec@test"),
            ("GIT_COMMITTER_NAME", "spec"),
            ("GIT_COMMITTER_EMAIL", "spec@test"),
        ] {
            cmd.env(k, v);
        }
        assert!(cmd.status().unwrap().success());
    }
    std::fs::write(f.workdir.path().join("main.rs"), "fn main() {}\n").unwrap();
    let mut commit = std::process::Command::new("git");
    commit
        .args(["commit", "-q", "--allow-empty", "-m", "initial"])
        .current_dir(f.workdir.path())
        .env("GIT_AUTHOR_NAME", "spec")
        .env("GIT_AUTHOR_EMAIL", "spec@test")
        .env("GIT_COMMITTER_NAME", "spec")
        .env("GIT_COMMITTER_EMAIL", "spec@test");
    assert!(commit.status().unwrap().success());
    let mut add = std::process::Command::new("git");
    add.args(["add", "main.rs"]).current_dir(f.workdir.path());
    assert!(add.status().unwrap().success());

    let meta = capture_checkpoint(
        &f.dyn_mux,
        &f.agents,
        &f.store,
        "dev",
        f.workdir.path(),
        CaptureOptions::new("dirty"),
    )
    .await
    .unwrap();

    let vcs = meta.vcs.unwrap();
    assert_eq!(vcs.branch, "main");
    assert!(vcs.dirty);
    assert_eq!(vcs.patch_file.as_deref(), Some("patch.diff"));
    assert!(f.store.dir(&meta.id).join("patch.diff").exists());
}
