// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `roost` binary and exercise
//! the HTTP and WebSocket surfaces.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use roost_specs::RoostProcess;

const TIMEOUT: Duration = Duration::from_secs(10);

async fn recv_json(
    ws: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
) -> anyhow::Result<serde_json::Value> {
    loop {
        let msg = tokio::time::timeout(TIMEOUT, ws.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("ws stream ended"))??;
        match msg {
            Message::Text(text) => return Ok(serde_json::from_str(&text)?),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => anyhow::bail!("expected text ws message, got: {other:?}"),
        }
    }
}

// -- HTTP ---------------------------------------------------------------------

#[tokio::test]
async fn http_health_envelope() -> anyhow::Result<()> {
    let roost = RoostProcess::start()?;
    roost.wait_healthy(TIMEOUT).await?;

    let resp: serde_json::Value =
        reqwest::get(format!("{}/api/v1/health", roost.base_url())).await?.json().await?;

    assert_eq!(resp["success"], true);
    assert_eq!(resp["status"], "running");
    assert!(resp["request_id"].is_string());
    assert!(resp["timestamp"].is_string());

    Ok(())
}

#[tokio::test]
async fn http_shutdown() -> anyhow::Result<()> {
    let mut roost = RoostProcess::start()?;
    roost.wait_healthy(TIMEOUT).await?;

    let client = reqwest::Client::new();
    let resp: serde_json::Value = client
        .post(format!("{}/api/v1/shutdown", roost.base_url()))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(resp["accepted"], true);

    let _status = roost.wait_exit(TIMEOUT).await?;
    Ok(())
}

#[tokio::test]
async fn http_auth_enforced() -> anyhow::Result<()> {
    let roost = RoostProcess::build().auth("spec-token").spawn()?;
    roost.wait_healthy(TIMEOUT).await?;

    let client = reqwest::Client::new();
    let denied = client.get(format!("{}/api/v1/agents", roost.base_url())).send().await?;
    assert_eq!(denied.status().as_u16(), 403);

    let allowed = client
        .get(format!("{}/api/v1/agents", roost.base_url()))
        .bearer_auth("spec-token")
        .send()
        .await?;
    assert_eq!(allowed.status().as_u16(), 200);
    Ok(())
}

#[tokio::test]
async fn reservation_conflict_flow() -> anyhow::Result<()> {
    let roost = RoostProcess::start()?;
    roost.wait_healthy(TIMEOUT).await?;
    let client = reqwest::Client::new();
    let url = format!("{}/api/v1/reservations", roost.base_url());

    let first: serde_json::Value = client
        .post(&url)
        .json(&serde_json::json!({ "agent": "a", "paths": ["p1", "p2"], "exclusive": true }))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(first["granted"].as_array().map(Vec::len), Some(2));

    let contested = client
        .post(&url)
        .json(&serde_json::json!({ "agent": "b", "paths": ["p2", "p3"], "exclusive": true }))
        .send()
        .await?;
    assert_eq!(contested.status().as_u16(), 409);
    let body: serde_json::Value = contested.json().await?;
    assert_eq!(body["error_code"], "RESERVATION_FAILED");
    assert_eq!(body["conflicts"][0]["path"], "p2");

    let retry: serde_json::Value = client
        .post(&url)
        .json(&serde_json::json!({ "agent": "b", "paths": ["p3"], "exclusive": true }))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(retry["granted"][0], "p3");
    Ok(())
}

// -- WebSocket ----------------------------------------------------------------

#[tokio::test]
async fn ws_ping_pong() -> anyhow::Result<()> {
    let roost = RoostProcess::start()?;
    roost.wait_healthy(TIMEOUT).await?;

    let (mut ws, _) = tokio_tungstenite::connect_async(roost.ws_url()).await?;
    ws.send(Message::Text(r#"{"ping": true}"#.into())).await?;

    let reply = recv_json(&mut ws).await?;
    assert_eq!(reply["pong"], true);
    Ok(())
}

#[tokio::test]
async fn ws_subscribe_receives_matching_events() -> anyhow::Result<()> {
    let roost = RoostProcess::start()?;
    roost.wait_healthy(TIMEOUT).await?;

    let (mut ws, _) = tokio_tungstenite::connect_async(roost.ws_url()).await?;
    ws.send(Message::Text(r#"{"subscribe": ["reservations:*"]}"#.into())).await?;
    // Give the hub a beat to process the subscription.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = reqwest::Client::new();
    client
        .post(format!("{}/api/v1/reservations", roost.base_url()))
        .json(&serde_json::json!({ "agent": "worker-1", "paths": ["src/lib.rs"] }))
        .send()
        .await?;

    let frame = recv_json(&mut ws).await?;
    assert_eq!(frame["topic"], "reservations:worker-1");
    assert_eq!(frame["event_type"], "reservation.granted");
    assert!(frame["seq"].as_u64().is_some());
    assert_eq!(frame["data"]["paths"][0], "src/lib.rs");
    Ok(())
}

#[tokio::test]
async fn ws_cursor_resume_returns_backlog() -> anyhow::Result<()> {
    let roost = RoostProcess::start()?;
    roost.wait_healthy(TIMEOUT).await?;
    let client = reqwest::Client::new();

    // Generate 10 events on the reservations topic.
    for i in 0..10 {
        client
            .post(format!("{}/api/v1/reservations", roost.base_url()))
            .json(&serde_json::json!({ "agent": "w", "paths": [format!("f{i}")] }))
            .send()
            .await?;
    }

    // First client reads everything and remembers the highest seq.
    let (mut ws, _) = tokio_tungstenite::connect_async(roost.ws_url()).await?;
    ws.send(Message::Text(r#"{"cursor": 0, "topics": ["reservations:*"]}"#.into())).await?;
    let mut last_seq = 0;
    for _ in 0..10 {
        let frame = recv_json(&mut ws).await?;
        let seq = frame["seq"].as_u64().unwrap_or(0);
        assert!(seq > last_seq, "seq must be strictly increasing");
        last_seq = seq;
    }
    drop(ws);

    // Five more events while disconnected.
    for i in 10..15 {
        client
            .post(format!("{}/api/v1/reservations", roost.base_url()))
            .json(&serde_json::json!({ "agent": "w", "paths": [format!("f{i}")] }))
            .send()
            .await?;
    }

    // Reconnect with the cursor: exactly the five missed events replay.
    let (mut ws, _) = tokio_tungstenite::connect_async(roost.ws_url()).await?;
    ws.send(Message::Text(format!(
        r#"{{"cursor": {last_seq}, "topics": ["reservations:*"]}}"#
    ).into()))
    .await?;
    for expected in (last_seq + 1)..=(last_seq + 5) {
        let frame = recv_json(&mut ws).await?;
        assert_eq!(frame["seq"], expected);
        assert_eq!(frame["event_type"], "reservation.granted");
    }
    Ok(())
}

#[tokio::test]
async fn ws_stale_cursor_gets_stream_reset() -> anyhow::Result<()> {
    // Tiny ring, no durable log: early events are unrecoverable.
    let roost = RoostProcess::build().ring_capacity(10).no_durable_log().spawn()?;
    roost.wait_healthy(TIMEOUT).await?;
    let client = reqwest::Client::new();

    for i in 0..25 {
        client
            .post(format!("{}/api/v1/reservations", roost.base_url()))
            .json(&serde_json::json!({ "agent": "w", "paths": [format!("f{i}")] }))
            .send()
            .await?;
    }

    let (mut ws, _) = tokio_tungstenite::connect_async(roost.ws_url()).await?;
    ws.send(Message::Text(r#"{"cursor": 1, "topics": ["reservations:*"]}"#.into())).await?;

    let frame = recv_json(&mut ws).await?;
    assert_eq!(frame["type"], "stream.reset");
    assert_eq!(frame["current_seq"], 25);
    assert!(frame["oldest_avail"].as_u64().is_some());
    Ok(())
}

#[tokio::test]
async fn http_catchup_matches_ws_semantics() -> anyhow::Result<()> {
    let roost = RoostProcess::start()?;
    roost.wait_healthy(TIMEOUT).await?;
    let client = reqwest::Client::new();

    for i in 0..5 {
        client
            .post(format!("{}/api/v1/reservations", roost.base_url()))
            .json(&serde_json::json!({ "agent": "w", "paths": [format!("f{i}")] }))
            .send()
            .await?;
    }

    let resp: serde_json::Value = client
        .get(format!(
            "{}/api/v1/events/catchup?cursor=2&topics=reservations:*",
            roost.base_url()
        ))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(resp["needs_reset"], false);
    let events = resp["events"].as_array().map(Vec::len);
    assert_eq!(events, Some(3));
    Ok(())
}
