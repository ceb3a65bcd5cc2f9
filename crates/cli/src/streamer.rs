// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pane output streaming.
//!
//! Preferred path: a named pipe the multiplexer feeds via `pipe-pane`,
//! read line-by-line. Fallback: poll `capture-pane` and diff against the
//! previous capture. Both paths coalesce lines that arrive within a small
//! window into one `pane.output` event carrying a `lines` array, so a
//! burst of output costs one fan-out instead of hundreds.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncBufReadExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{OpError, OpResult};
use crate::event;
use crate::hub::EventBus;
use crate::mux::{Multiplexer, PaneInfo};

/// Streaming knobs.
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Directory for stream FIFOs.
    pub data_dir: PathBuf,
    /// Lines arriving within this window coalesce into one event.
    pub coalesce_window: Duration,
    /// Capture cadence on the polling fallback.
    pub poll_interval: Duration,
    /// Try the pipe path first; false forces polling.
    pub prefer_pipe: bool,
}

impl StreamerConfig {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            coalesce_window: Duration::from_millis(25),
            poll_interval: Duration::from_millis(300),
            prefer_pipe: true,
        }
    }
}

struct ActiveStream {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    fifo: Option<PathBuf>,
}

/// Owns every live pane stream. Start and stop are idempotent; `stop_all`
/// releases every FIFO and task deterministically on shutdown.
pub struct StreamManager {
    mux: Arc<dyn Multiplexer>,
    bus: Arc<EventBus>,
    config: StreamerConfig,
    active: tokio::sync::Mutex<HashMap<String, ActiveStream>>,
}

impl StreamManager {
    pub fn new(mux: Arc<dyn Multiplexer>, bus: Arc<EventBus>, config: StreamerConfig) -> Self {
        Self { mux, bus, config, active: tokio::sync::Mutex::new(HashMap::new()) }
    }

    /// Start streaming one pane. Calling again for a live stream is a
    /// no-op; a stream whose task has finished is restarted.
    pub async fn start_stream(&self, session: &str, pane: &PaneInfo) -> OpResult<()> {
        let mut active = self.active.lock().await;
        if let Some(existing) = active.get(&pane.id) {
            if !existing.task.is_finished() {
                return Ok(());
            }
            active.remove(&pane.id);
        }

        let topic = event::pane_topic(session, pane.index);
        let cancel = CancellationToken::new();

        let stream = if self.config.prefer_pipe {
            match self.start_pipe(pane, topic.clone(), cancel.clone()).await {
                Ok(stream) => stream,
                Err(e) => {
                    debug!(pane = %pane.id, "pipe path unavailable ({e}), polling instead");
                    self.start_poll(pane, topic, cancel.clone())
                }
            }
        } else {
            self.start_poll(pane, topic, cancel.clone())
        };

        active.insert(pane.id.clone(), stream);
        Ok(())
    }

    /// Stop one pane's stream. Unknown panes are a no-op.
    pub async fn stop_stream(&self, pane_id: &str) -> OpResult<()> {
        let removed = self.active.lock().await.remove(pane_id);
        if let Some(stream) = removed {
            self.teardown(pane_id, stream).await;
        }
        Ok(())
    }

    /// Stop every stream. Called on shutdown.
    pub async fn stop_all(&self) {
        let drained: Vec<(String, ActiveStream)> =
            self.active.lock().await.drain().collect();
        for (pane_id, stream) in drained {
            self.teardown(&pane_id, stream).await;
        }
    }

    /// Pane ids with a live stream.
    pub async fn active_panes(&self) -> Vec<String> {
        let mut panes: Vec<String> = self.active.lock().await.keys().cloned().collect();
        panes.sort();
        panes
    }

    async fn teardown(&self, pane_id: &str, stream: ActiveStream) {
        stream.cancel.cancel();
        let _ = stream.task.await;
        if let Some(fifo) = stream.fifo {
            // Ask the multiplexer to stop writing before unlinking.
            if let Err(e) = self.mux.pipe_pane(pane_id, None).await {
                debug!(pane = pane_id, "pipe-pane stop failed: {e}");
            }
            let _ = std::fs::remove_file(&fifo);
        }
        debug!(pane = pane_id, "stream stopped");
    }

    async fn start_pipe(
        &self,
        pane: &PaneInfo,
        topic: String,
        cancel: CancellationToken,
    ) -> OpResult<ActiveStream> {
        let dir = self.config.data_dir.join("streams");
        std::fs::create_dir_all(&dir)?;
        let fifo = dir.join(format!("pane-{}.fifo", pane.id.trim_start_matches('%')));
        let _ = std::fs::remove_file(&fifo);
        nix::unistd::mkfifo(&fifo, nix::sys::stat::Mode::from_bits_truncate(0o600))
            .map_err(|e| OpError::internal(format!("mkfifo failed: {e}")))?;

        let pipe_cmd = format!("cat >> {}", fifo.display());
        if let Err(e) = self.mux.pipe_pane(&pane.id, Some(&pipe_cmd)).await {
            let _ = std::fs::remove_file(&fifo);
            return Err(e);
        }

        let bus = Arc::clone(&self.bus);
        let pane_id = pane.id.clone();
        let window = self.config.coalesce_window;
        let fifo_path = fifo.clone();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            if let Err(e) =
                run_pipe_reader(&fifo_path, &bus, &topic, &pane_id, window, task_cancel).await
            {
                warn!(pane = %pane_id, "pipe reader ended: {e}");
            }
        });

        Ok(ActiveStream { cancel, task, fifo: Some(fifo) })
    }

    fn start_poll(
        &self,
        pane: &PaneInfo,
        topic: String,
        cancel: CancellationToken,
    ) -> ActiveStream {
        let mux = Arc::clone(&self.mux);
        let bus = Arc::clone(&self.bus);
        let pane_id = pane.id.clone();
        let interval = self.config.poll_interval;
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            run_poller(mux, bus, topic, pane_id, interval, task_cancel).await;
        });
        ActiveStream { cancel, task, fifo: None }
    }
}

/// Read the FIFO line-by-line, coalescing bursts into one event.
async fn run_pipe_reader(
    fifo: &std::path::Path,
    bus: &EventBus,
    topic: &str,
    pane_id: &str,
    window: Duration,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    // Opening the read end parks until the multiplexer opens the writer.
    let file = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        file = tokio::fs::File::open(fifo) => file?,
    };
    let mut lines = tokio::io::BufReader::new(file).lines();

    loop {
        let first = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => return Ok(()),
            },
        };

        let mut batch = vec![first];
        // Keep draining until the window goes quiet.
        loop {
            match tokio::time::timeout(window, lines.next_line()).await {
                Ok(Ok(Some(line))) => batch.push(line),
                Ok(Ok(None)) | Ok(Err(_)) | Err(_) => break,
            }
        }
        publish_lines(bus, topic, pane_id, batch);
    }
}

/// Poll `capture-pane` and publish lines that extend the previous capture.
async fn run_poller(
    mux: Arc<dyn Multiplexer>,
    bus: Arc<EventBus>,
    topic: String,
    pane_id: String,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut previous: Vec<String> = vec![];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tick.tick() => {
                let capture = match mux.capture_pane(&pane_id, 0).await {
                    Ok(text) => text,
                    Err(e) => {
                        debug!(pane = %pane_id, "capture-pane failed, stopping poller: {e}");
                        return;
                    }
                };
                let current: Vec<String> =
                    capture.lines().map(str::to_owned).collect();
                let fresh = diff_captures(&previous, &current);
                if !fresh.is_empty() {
                    publish_lines(&bus, &topic, &pane_id, fresh);
                }
                previous = current;
            }
        }
    }
}

/// Lines in `current` that were not already at the tail of `previous`.
///
/// The visible screen scrolls, so the common case is that `current` shares
/// a suffix-aligned window with `previous`; everything after the longest
/// overlap is new.
fn diff_captures(previous: &[String], current: &[String]) -> Vec<String> {
    if previous.is_empty() {
        return current.iter().filter(|l| !l.trim().is_empty()).cloned().collect();
    }
    if previous == current {
        return vec![];
    }
    // Find the longest suffix of `previous` that prefixes into `current`.
    let max_overlap = previous.len().min(current.len());
    for overlap in (1..=max_overlap).rev() {
        if previous[previous.len() - overlap..] == current[..overlap] {
            return current[overlap..].to_vec();
        }
    }
    current.to_vec()
}

fn publish_lines(bus: &EventBus, topic: &str, pane_id: &str, lines: Vec<String>) {
    bus.emit(
        topic,
        event::PANE_OUTPUT,
        serde_json::json!({ "pane_id": pane_id, "lines": lines }),
    );
}

#[cfg(test)]
#[path = "streamer_tests.rs"]
mod tests;
