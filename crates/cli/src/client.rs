// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI client for a running roost server.
//!
//! Thin wrappers over the HTTP surface plus a WebSocket event tailer.
//! Output is the raw response envelope, pretty-printed, so scripts can
//! pipe it through jq without a second schema to learn.

use clap::Args;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

/// Connection options shared by every client subcommand.
#[derive(Debug, Args)]
pub struct ClientArgs {
    /// Base URL of the roost server.
    #[arg(long, env = "ROOST_URL", default_value = "http://127.0.0.1:7433")]
    pub url: String,

    /// Bearer token, when the server requires auth.
    #[arg(long, env = "ROOST_AUTH_TOKEN")]
    pub token: Option<String>,
}

impl ClientArgs {
    fn http(&self) -> reqwest::Client {
        reqwest::Client::new()
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// `http(s)://host` → `ws(s)://host/ws`, with the auth token in the
    /// query string the way the server expects it.
    pub fn ws_url(&self) -> String {
        let base = self
            .url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        let base = base.trim_end_matches('/');
        match self.token {
            Some(ref token) => format!("{base}/ws?token={token}"),
            None => format!("{base}/ws"),
        }
    }
}

/// Tail options.
#[derive(Debug, Args)]
pub struct TailArgs {
    #[command(flatten)]
    pub client: ClientArgs,

    /// Topic patterns to follow (default: everything).
    #[arg(long = "topic", default_value = "*")]
    pub topics: Vec<String>,

    /// Resume from this cursor instead of only-live.
    #[arg(long)]
    pub cursor: Option<u64>,
}

async fn get_json(args: &ClientArgs, path: &str) -> anyhow::Result<serde_json::Value> {
    let url = format!("{}{path}", args.url.trim_end_matches('/'));
    let resp = args.request(args.http().get(&url)).send().await?;
    let status = resp.status();
    let body: serde_json::Value = resp.json().await?;
    if !status.is_success() {
        anyhow::bail!(
            "{status}: {} ({})",
            body["error"].as_str().unwrap_or("request failed"),
            body["error_code"].as_str().unwrap_or("UNKNOWN")
        );
    }
    Ok(body)
}

async fn post_json(
    args: &ClientArgs,
    path: &str,
    body: &serde_json::Value,
) -> anyhow::Result<serde_json::Value> {
    let url = format!("{}{path}", args.url.trim_end_matches('/'));
    let resp = args.request(args.http().post(&url)).json(body).send().await?;
    let status = resp.status();
    let body: serde_json::Value = resp.json().await?;
    if !status.is_success() {
        anyhow::bail!(
            "{status}: {} ({})",
            body["error"].as_str().unwrap_or("request failed"),
            body["error_code"].as_str().unwrap_or("UNKNOWN")
        );
    }
    Ok(body)
}

fn print_pretty(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}

/// `roost status`
pub async fn status(args: &ClientArgs) -> anyhow::Result<()> {
    print_pretty(&get_json(args, "/api/v1/status").await?);
    Ok(())
}

/// `roost agents`
pub async fn agents(args: &ClientArgs) -> anyhow::Result<()> {
    print_pretty(&get_json(args, "/api/v1/agents").await?);
    Ok(())
}

/// `roost tick` — force one assignment pass.
pub async fn tick(args: &ClientArgs) -> anyhow::Result<()> {
    print_pretty(&post_json(args, "/api/v1/assignments/tick", &serde_json::json!({})).await?);
    Ok(())
}

/// `roost headroom`
pub async fn headroom(args: &ClientArgs) -> anyhow::Result<()> {
    print_pretty(&get_json(args, "/api/v1/headroom").await?);
    Ok(())
}

/// `roost checkpoints`
pub async fn checkpoints(args: &ClientArgs) -> anyhow::Result<()> {
    print_pretty(&get_json(args, "/api/v1/checkpoints").await?);
    Ok(())
}

/// `roost tail` — stream events to stdout, one JSON frame per line,
/// until the connection drops or the user interrupts.
pub async fn tail(args: &TailArgs) -> anyhow::Result<()> {
    let (mut ws, _) = tokio_tungstenite::connect_async(args.client.ws_url()).await?;

    let subscribe = match args.cursor {
        Some(cursor) => serde_json::json!({ "cursor": cursor, "topics": args.topics }),
        None => serde_json::json!({ "subscribe": args.topics }),
    };
    ws.send(Message::Text(subscribe.to_string().into())).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            message = ws.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => println!("{text}"),
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => anyhow::bail!("stream error: {e}"),
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
