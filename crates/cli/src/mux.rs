// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal multiplexer capability.
//!
//! The orchestrator consumes the multiplexer as a capability set: create a
//! session, split windows, send keys, capture panes, set layouts. The tmux
//! implementation shells out per call; tests use the recording fake in
//! [`crate::test_support`].

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::{OpError, OpResult};

/// Boxed future shorthand for the object-safe trait methods.
pub type MuxFuture<'a, T> = Pin<Box<dyn Future<Output = OpResult<T>> + Send + 'a>>;

/// One pane as reported by the multiplexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaneInfo {
    /// Multiplexer pane id (tmux: `%3`).
    pub id: String,
    /// Zero-based pane index within the session's window.
    pub index: u32,
    pub title: String,
    pub width: u16,
    pub height: u16,
    pub active: bool,
}

/// Capability set consumed from the terminal multiplexer.
///
/// Object-safe for use as `Arc<dyn Multiplexer>`.
pub trait Multiplexer: Send + Sync + 'static {
    /// Create a detached session (its first pane comes with it).
    fn create_session<'a>(
        &'a self,
        name: &'a str,
        working_dir: &'a Path,
        command: Option<&'a str>,
    ) -> MuxFuture<'a, ()>;

    fn kill_session<'a>(&'a self, name: &'a str) -> MuxFuture<'a, ()>;

    fn session_exists<'a>(&'a self, name: &'a str) -> MuxFuture<'a, bool>;

    /// Split a new pane into the session's window; returns the new pane.
    fn split_window<'a>(
        &'a self,
        session: &'a str,
        working_dir: &'a Path,
        command: Option<&'a str>,
    ) -> MuxFuture<'a, PaneInfo>;

    /// Type literal text into a pane, optionally followed by Enter.
    fn send_keys<'a>(&'a self, target: &'a str, text: &'a str, enter: bool) -> MuxFuture<'a, ()>;

    /// Capture pane contents. `scrollback_lines = 0` captures the visible
    /// screen only; larger values reach back into history.
    fn capture_pane<'a>(&'a self, target: &'a str, scrollback_lines: u32) -> MuxFuture<'a, String>;

    /// Start piping pane output into a shell command, or stop piping when
    /// `command` is `None`.
    fn pipe_pane<'a>(&'a self, target: &'a str, command: Option<&'a str>) -> MuxFuture<'a, ()>;

    fn select_layout<'a>(&'a self, session: &'a str, layout: &'a str) -> MuxFuture<'a, ()>;

    fn current_layout<'a>(&'a self, session: &'a str) -> MuxFuture<'a, String>;

    fn list_panes<'a>(&'a self, session: &'a str) -> MuxFuture<'a, Vec<PaneInfo>>;

    fn select_pane<'a>(&'a self, target: &'a str) -> MuxFuture<'a, ()>;
}

/// Field separator for `list-panes` format strings. Pane titles can contain
/// almost anything, so the separator is a control character tmux will not
/// produce in the numeric fields.
const FIELD_SEP: char = '\u{1f}';

const PANE_FORMAT: &str =
    "#{pane_id}\u{1f}#{pane_index}\u{1f}#{pane_title}\u{1f}#{pane_width}\u{1f}#{pane_height}\u{1f}#{?pane_active,1,0}";

/// tmux-backed multiplexer.
pub struct TmuxMux {
    binary: String,
    socket: Option<PathBuf>,
}

impl TmuxMux {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into(), socket: None }
    }

    /// Address an isolated tmux server via `-S <path>` on every call.
    pub fn with_socket(mut self, socket: PathBuf) -> Self {
        self.socket = Some(socket);
        self
    }

    fn cmd(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.binary);
        if let Some(ref s) = self.socket {
            cmd.arg("-S").arg(s);
        }
        cmd
    }

    async fn run(&self, args: &[&str]) -> OpResult<std::process::Output> {
        let output = self.cmd().args(args).output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OpError::dependency_missing(
                    format!("{} is not installed or not in PATH", self.binary),
                    "install tmux 3.2 or newer (e.g. apt install tmux)",
                )
            } else {
                OpError::internal(format!("failed to run {}: {e}", self.binary))
            }
        })?;
        Ok(output)
    }

    async fn run_ok(&self, args: &[&str]) -> OpResult<std::process::Output> {
        let output = self.run(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OpError::unavailable(format!(
                "{} {} failed: {}",
                self.binary,
                args.first().unwrap_or(&""),
                stderr.trim()
            )));
        }
        Ok(output)
    }
}

impl Multiplexer for TmuxMux {
    fn create_session<'a>(
        &'a self,
        name: &'a str,
        working_dir: &'a Path,
        command: Option<&'a str>,
    ) -> MuxFuture<'a, ()> {
        Box::pin(async move {
            let dir = working_dir.to_string_lossy().into_owned();
            let mut args = vec!["new-session", "-d", "-s", name, "-c", dir.as_str()];
            if let Some(cmd) = command {
                args.push(cmd);
            }
            self.run_ok(&args).await?;
            Ok(())
        })
    }

    fn kill_session<'a>(&'a self, name: &'a str) -> MuxFuture<'a, ()> {
        Box::pin(async move {
            self.run_ok(&["kill-session", "-t", name]).await?;
            Ok(())
        })
    }

    fn session_exists<'a>(&'a self, name: &'a str) -> MuxFuture<'a, bool> {
        Box::pin(async move {
            let output = self.run(&["has-session", "-t", name]).await?;
            Ok(output.status.success())
        })
    }

    fn split_window<'a>(
        &'a self,
        session: &'a str,
        working_dir: &'a Path,
        command: Option<&'a str>,
    ) -> MuxFuture<'a, PaneInfo> {
        Box::pin(async move {
            let dir = working_dir.to_string_lossy().into_owned();
            let mut args =
                vec!["split-window", "-d", "-t", session, "-c", dir.as_str(), "-P", "-F", PANE_FORMAT];
            if let Some(cmd) = command {
                args.push(cmd);
            }
            let output = self.run_ok(&args).await?;
            let line = String::from_utf8_lossy(&output.stdout);
            parse_pane_line(line.trim())
                .ok_or_else(|| OpError::internal(format!("unparseable split-window output: {line}")))
        })
    }

    fn send_keys<'a>(&'a self, target: &'a str, text: &'a str, enter: bool) -> MuxFuture<'a, ()> {
        Box::pin(async move {
            self.run_ok(&["send-keys", "-l", "-t", target, text]).await?;
            if enter {
                self.run_ok(&["send-keys", "-t", target, "Enter"]).await?;
            }
            Ok(())
        })
    }

    fn capture_pane<'a>(&'a self, target: &'a str, scrollback_lines: u32) -> MuxFuture<'a, String> {
        Box::pin(async move {
            let start = format!("-{scrollback_lines}");
            let mut args = vec!["capture-pane", "-p", "-t", target];
            if scrollback_lines > 0 {
                args.extend(["-S", start.as_str()]);
            }
            let output = self.run_ok(&args).await?;
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        })
    }

    fn pipe_pane<'a>(&'a self, target: &'a str, command: Option<&'a str>) -> MuxFuture<'a, ()> {
        Box::pin(async move {
            let mut args = vec!["pipe-pane", "-t", target];
            if let Some(cmd) = command {
                args.push(cmd);
            }
            self.run_ok(&args).await?;
            Ok(())
        })
    }

    fn select_layout<'a>(&'a self, session: &'a str, layout: &'a str) -> MuxFuture<'a, ()> {
        Box::pin(async move {
            self.run_ok(&["select-layout", "-t", session, layout]).await?;
            Ok(())
        })
    }

    fn current_layout<'a>(&'a self, session: &'a str) -> MuxFuture<'a, String> {
        Box::pin(async move {
            let output = self
                .run_ok(&["display-message", "-p", "-t", session, "#{window_layout}"])
                .await?;
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
        })
    }

    fn list_panes<'a>(&'a self, session: &'a str) -> MuxFuture<'a, Vec<PaneInfo>> {
        Box::pin(async move {
            let output = self.run_ok(&["list-panes", "-t", session, "-F", PANE_FORMAT]).await?;
            let text = String::from_utf8_lossy(&output.stdout);
            Ok(text.lines().filter_map(parse_pane_line).collect())
        })
    }

    fn select_pane<'a>(&'a self, target: &'a str) -> MuxFuture<'a, ()> {
        Box::pin(async move {
            self.run_ok(&["select-pane", "-t", target]).await?;
            Ok(())
        })
    }
}

fn parse_pane_line(line: &str) -> Option<PaneInfo> {
    let mut fields = line.split(FIELD_SEP);
    let id = fields.next()?.to_owned();
    let index = fields.next()?.parse().ok()?;
    let title = fields.next()?.to_owned();
    let width = fields.next()?.parse().ok()?;
    let height = fields.next()?.parse().ok()?;
    let active = fields.next()? == "1";
    Some(PaneInfo { id, index, title, width, height, active })
}

#[cfg(test)]
#[path = "mux_tests.rs"]
mod tests;
