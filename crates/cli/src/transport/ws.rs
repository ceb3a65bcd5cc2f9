// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket fan-out endpoint.
//!
//! Each connection registers one hub subscriber. Live events flow from
//! the subscriber's bounded queue; catchup and cursor resume go through
//! the event store. When the hub force-unregisters a slow connection the
//! queue closes and the socket is torn down.

#[path = "ws_msg.rs"]
mod msg;
pub use msg::*;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{RawQuery, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tracing::debug;

use crate::transport::auth;
use crate::transport::state::Store;

/// WebSocket upgrade handler. Auth (when configured) comes from the
/// `?token=` query parameter.
pub async fn ws_handler(
    State(state): State<Arc<Store>>,
    RawQuery(query): RawQuery,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let query = query.unwrap_or_default();
    if auth::validate_ws_query(&query, state.config.auth_token.as_deref()).is_err() {
        return axum::http::Response::builder()
            .status(403)
            .body(axum::body::Body::from("forbidden"))
            .unwrap_or_default()
            .into_response();
    }
    ws.on_upgrade(move |socket| handle_connection(state, socket)).into_response()
}

/// Per-connection loop: one hub subscription, one select over the
/// subscriber queue and the client socket.
async fn handle_connection(state: Arc<Store>, socket: WebSocket) {
    let subscriber_id = format!("ws-{}", uuid::Uuid::new_v4());
    state.lifecycle.ws_client_count.fetch_add(1, Ordering::Relaxed);
    debug!(subscriber = %subscriber_id, "ws connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut queue = state.bus.hub().register(&subscriber_id, vec![]);
    let shutdown = state.lifecycle.shutdown.clone();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            event = queue.recv() => {
                match event {
                    Some(ref event) => {
                        if send_json(&mut ws_tx, &EventFrame::from(event)).await.is_err() {
                            break;
                        }
                    }
                    // Queue closed: the hub dropped us (overflow) or shut down.
                    None => break,
                }
            }

            incoming = ws_rx.next() => {
                let message = match incoming {
                    Some(Ok(m)) => m,
                    Some(Err(_)) | None => break,
                };
                match message {
                    Message::Text(text) => {
                        if handle_client_message(&state, &subscriber_id, &text, &mut ws_tx)
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    state.bus.hub().unregister(&subscriber_id);
    state.lifecycle.ws_client_count.fetch_sub(1, Ordering::Relaxed);
    debug!(subscriber = %subscriber_id, "ws disconnected");
}

/// Dispatch one client message. `Err` means the socket is gone.
async fn handle_client_message(
    state: &Store,
    subscriber_id: &str,
    text: &str,
    ws_tx: &mut SplitSink<WebSocket, Message>,
) -> Result<(), ()> {
    let parsed: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(_) => {
            return send_json(ws_tx, &ErrorFrame::bad_request("unrecognized message")).await;
        }
    };

    match parsed {
        ClientMessage::Ping { .. } => send_json(ws_tx, &PongFrame { pong: true }).await,

        ClientMessage::Subscribe { subscribe } => {
            state.bus.hub().subscribe(subscriber_id, subscribe);
            Ok(())
        }

        ClientMessage::Resume { cursor, topics } => {
            // Live subscription first so nothing published during the
            // backlog replay is missed; duplicates are possible and the
            // client's seq tracking drops them.
            state.bus.hub().subscribe(subscriber_id, topics.clone());
            let store = state.bus.store();
            let catchup = store.get_since(cursor, &topics, state.config.catchup_limit);
            if catchup.needs_reset {
                let frame = ResetFrame::new(
                    "cursor is beyond retention",
                    store.current_seq(),
                    store.oldest_available(),
                );
                return send_json(ws_tx, &frame).await;
            }
            for event in &catchup.events {
                send_json(ws_tx, &EventFrame::from(event)).await?;
            }
            Ok(())
        }
    }
}

async fn send_json<T: Serialize>(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    value: &T,
) -> Result<(), ()> {
    let text = serde_json::to_string(value).map_err(|_| ())?;
    ws_tx.send(Message::Text(text.into())).await.map_err(|_| ())
}
