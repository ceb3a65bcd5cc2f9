// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;

use crate::agent::AgentType;
use crate::test_support::{test_store, AnyhowExt, TestStore};
use crate::transport::build_router;
use crate::triage::{RecKind, RecStatus, Recommendation};

fn rec(id: &str, status: RecStatus, score: f64) -> Recommendation {
    Recommendation {
        id: id.to_owned(),
        title: format!("item {id}"),
        kind: RecKind::Task,
        status,
        priority: 2,
        base_score: score,
        breakdown: None,
        unblocks_ids: vec![],
        blocked_by: vec![],
    }
}

async fn server(ctx: &TestStore) -> anyhow::Result<axum_test::TestServer> {
    axum_test::TestServer::new(build_router(std::sync::Arc::clone(&ctx.store))).anyhow()
}

#[tokio::test]
async fn health_carries_the_envelope() -> anyhow::Result<()> {
    let ctx = test_store(vec![], None);
    let server = server(&ctx).await?;

    let resp = server.get("/api/v1/health").await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&resp.text())?;
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "running");
    assert!(body["request_id"].is_string());
    assert!(body["timestamp"].is_string());
    Ok(())
}

#[tokio::test]
async fn auth_gates_api_but_not_health() -> anyhow::Result<()> {
    let ctx = test_store(vec![], Some("secret".to_owned()));
    let server = server(&ctx).await?;

    server.get("/api/v1/health").await.assert_status(StatusCode::OK);

    let denied = server.get("/api/v1/agents").await;
    denied.assert_status(StatusCode::FORBIDDEN);
    let body: serde_json::Value = serde_json::from_str(&denied.text())?;
    assert_eq!(body["error_code"], "FORBIDDEN");

    let allowed = server
        .get("/api/v1/agents")
        .add_header(
            axum::http::header::AUTHORIZATION,
            axum::http::HeaderValue::from_static("Bearer secret"),
        )
        .await;
    allowed.assert_status(StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn agent_registration_lifecycle() -> anyhow::Result<()> {
    let ctx = test_store(vec![], None);
    let server = server(&ctx).await?;

    let resp = server
        .post("/api/v1/agents")
        .json(&serde_json::json!({
            "pane_id": "pane-1",
            "pane_index": 1,
            "session": "dev",
            "agent_type": "claude",
        }))
        .await;
    resp.assert_status(StatusCode::OK);

    let listed: serde_json::Value =
        serde_json::from_str(&server.get("/api/v1/agents").await.text())?;
    assert_eq!(listed["agents"][0]["pane_id"], "pane-1");
    assert_eq!(listed["agents"][0]["status"], "idle");

    let update = server
        .post("/api/v1/agents/pane-1/status")
        .json(&serde_json::json!({ "status": "working", "context_usage_pct": 45 }))
        .await;
    update.assert_status(StatusCode::OK);

    let missing = server
        .post("/api/v1/agents/pane-9/status")
        .json(&serde_json::json!({ "status": "idle" }))
        .await;
    missing.assert_status(StatusCode::NOT_FOUND);

    server.delete("/api/v1/agents/pane-1").await.assert_status(StatusCode::OK);
    server.delete("/api/v1/agents/pane-1").await.assert_status(StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn spawn_creates_agent_via_mux() -> anyhow::Result<()> {
    let ctx = test_store(vec![], None);
    let server = server(&ctx).await?;

    let resp = server
        .post("/api/v1/agents/spawn")
        .json(&serde_json::json!({ "session": "dev", "agent_type": "codex" }))
        .await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&resp.text())?;
    assert_eq!(body["session_created"], true);
    assert_eq!(body["agent"]["agent_type"], "codex");
    assert_eq!(ctx.mux.pane_count("dev"), 1);
    ctx.store.streams.stop_all().await;
    Ok(())
}

#[tokio::test]
async fn reservation_conflict_returns_409_with_contested_set() -> anyhow::Result<()> {
    let ctx = test_store(vec![], None);
    let server = server(&ctx).await?;

    let granted = server
        .post("/api/v1/reservations")
        .json(&serde_json::json!({ "agent": "a", "paths": ["p1", "p2"] }))
        .await;
    granted.assert_status(StatusCode::OK);

    let contested = server
        .post("/api/v1/reservations")
        .json(&serde_json::json!({ "agent": "b", "paths": ["p2", "p3"] }))
        .await;
    contested.assert_status(StatusCode::CONFLICT);
    let body: serde_json::Value = serde_json::from_str(&contested.text())?;
    assert_eq!(body["error_code"], "RESERVATION_FAILED");
    assert_eq!(body["conflicts"][0]["path"], "p2");
    assert!(body["granted"].as_array().unwrap().is_empty());

    let retry = server
        .post("/api/v1/reservations")
        .json(&serde_json::json!({ "agent": "b", "paths": ["p3"] }))
        .await;
    retry.assert_status(StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&retry.text())?;
    assert_eq!(body["granted"][0], "p3");
    Ok(())
}

#[tokio::test]
async fn force_release_requires_admin() -> anyhow::Result<()> {
    let ctx = test_store(vec![], None);
    let server = server(&ctx).await?;

    let resp = server
        .post("/api/v1/reservations")
        .json(&serde_json::json!({ "agent": "a", "paths": ["p1"] }))
        .await;
    let body: serde_json::Value = serde_json::from_str(&resp.text())?;
    let id = body["reservation"]["id"].as_str().unwrap_or_default().to_owned();

    let unapproved = server
        .post(&format!("/api/v1/reservations/{id}/force-release"))
        .json(&serde_json::json!({}))
        .await;
    unapproved.assert_status(StatusCode::FORBIDDEN);
    let body: serde_json::Value = serde_json::from_str(&unapproved.text())?;
    assert_eq!(body["error_code"], "APPROVAL_REQUIRED");

    let approved = server
        .post(&format!("/api/v1/reservations/{id}/force-release"))
        .json(&serde_json::json!({ "admin": true }))
        .await;
    approved.assert_status(StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn assignment_tick_runs_the_coordinator() -> anyhow::Result<()> {
    let ctx = test_store(
        vec![rec("R1", RecStatus::Open, 0.8), rec("R2", RecStatus::Blocked, 0.9)],
        None,
    );
    let server = server(&ctx).await?;

    ctx.store
        .agents
        .register(crate::agent::RegisterAgent {
            pane_id: "%0".to_owned(),
            pane_index: 0,
            session: "dev".to_owned(),
            agent_type: AgentType::Claude,
            mail_name: None,
        })
        .await;

    let resp = server.post("/api/v1/assignments/tick").await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&resp.text())?;
    let assignments = body["assignments"].as_array().unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0]["recommendation"]["id"], "R1");
    assert_eq!(assignments[0]["message_sent"], true);
    assert_eq!(ctx.mail.deliveries().len(), 1);
    Ok(())
}

#[tokio::test]
async fn events_catchup_filters_and_reports_reset() -> anyhow::Result<()> {
    let ctx = test_store(vec![], None);
    let server = server(&ctx).await?;

    for i in 0..5 {
        ctx.store.bus.emit("panes:dev:0", "pane.output", serde_json::json!({ "i": i }));
        ctx.store.bus.emit("mail:a", "mail.received", serde_json::Value::Null);
    }

    let resp = server
        .get("/api/v1/events/catchup")
        .add_query_param("cursor", "0")
        .add_query_param("topics", "panes:*")
        .await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&resp.text())?;
    assert_eq!(body["needs_reset"], false);
    assert_eq!(body["events"].as_array().unwrap().len(), 5);
    assert_eq!(body["current_seq"], 10);
    Ok(())
}

#[tokio::test]
async fn session_lifecycle_over_http() -> anyhow::Result<()> {
    let ctx = test_store(vec![], None);
    let server = server(&ctx).await?;

    server
        .post("/api/v1/sessions")
        .json(&serde_json::json!({ "name": "dev" }))
        .await
        .assert_status(StatusCode::OK);
    server
        .post("/api/v1/sessions")
        .json(&serde_json::json!({ "name": "dev" }))
        .await
        .assert_status(StatusCode::CONFLICT);

    let panes: serde_json::Value =
        serde_json::from_str(&server.get("/api/v1/sessions/dev/panes").await.text())?;
    assert_eq!(panes["panes"].as_array().unwrap().len(), 1);

    server.delete("/api/v1/sessions/dev").await.assert_status(StatusCode::OK);
    server.delete("/api/v1/sessions/dev").await.assert_status(StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn checkpoint_surface_end_to_end() -> anyhow::Result<()> {
    let ctx = test_store(vec![], None);
    let server = server(&ctx).await?;

    server
        .post("/api/v1/sessions")
        .json(&serde_json::json!({ "name": "dev" }))
        .await
        .assert_status(StatusCode::OK);
    ctx.mux.set_capture("%0", "scrollback here\n");

    let created = server
        .post("/api/v1/checkpoints")
        .json(&serde_json::json!({ "name": "snap", "session": "dev" }))
        .await;
    created.assert_status(StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&created.text())?;
    let id = body["id"].as_str().unwrap_or_default().to_owned();
    assert_eq!(body["pane_count"], 1);

    let listed: serde_json::Value =
        serde_json::from_str(&server.get("/api/v1/checkpoints").await.text())?;
    assert_eq!(listed["checkpoints"][0]["id"], id.as_str());

    // Restore without force conflicts (session still exists).
    let conflict = server
        .post(&format!("/api/v1/checkpoints/{id}/restore"))
        .json(&serde_json::json!({}))
        .await;
    conflict.assert_status(StatusCode::CONFLICT);

    let forced = server
        .post(&format!("/api/v1/checkpoints/{id}/restore"))
        .json(&serde_json::json!({ "force": true }))
        .await;
    forced.assert_status(StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&forced.text())?;
    assert_eq!(body["panes_restored"], 1);

    server
        .delete(&format!("/api/v1/checkpoints/{id}"))
        .await
        .assert_status(StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn headroom_endpoint_reports_disabled_guard() -> anyhow::Result<()> {
    let ctx = test_store(vec![], None);
    let server = server(&ctx).await?;

    let resp = server.get("/api/v1/headroom").await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&resp.text())?;
    assert_eq!(body["enabled"], false);
    assert_eq!(body["state"], "ok");
    assert_eq!(body["blocked"], false);
    assert!(body.get("remediation").is_none());
    Ok(())
}
