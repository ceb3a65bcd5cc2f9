// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::coordinator::CoordinatorConfig;
use crate::event_store::DurableConfig;
use crate::headroom::HeadroomConfig;
use crate::hub::HubConfig;
use crate::score::ScoringConfig;
use crate::streamer::StreamerConfig;

/// Multi-agent terminal orchestrator.
#[derive(Debug, Parser)]
#[command(name = "roost", version, about)]
pub struct Config {
    /// HTTP port to listen on.
    #[arg(long, env = "ROOST_PORT")]
    pub port: Option<u16>,

    /// Unix socket path for HTTP.
    #[arg(long, env = "ROOST_SOCKET")]
    pub socket: Option<String>,

    /// Host address to bind to.
    #[arg(long, env = "ROOST_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Health-check-only HTTP port.
    #[arg(long, env = "ROOST_HEALTH_PORT")]
    pub health_port: Option<u16>,

    /// Bearer token for API authentication.
    #[arg(long, env = "ROOST_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Data directory (durable event log, checkpoints, stream FIFOs).
    #[arg(long, env = "ROOST_DATA_DIR", default_value = ".roost")]
    pub data_dir: PathBuf,

    /// Working directory for new sessions and checkpoints.
    /// Defaults to the process working directory.
    #[arg(long, env = "ROOST_WORKING_DIR")]
    pub working_dir: Option<PathBuf>,

    /// Terminal multiplexer binary.
    #[arg(long, env = "ROOST_TMUX_BIN", default_value = "tmux")]
    pub tmux_bin: String,

    /// Multiplexer server socket path (isolated server when set).
    #[arg(long, env = "ROOST_TMUX_SOCKET")]
    pub tmux_socket: Option<PathBuf>,

    /// In-memory event ring capacity, in events.
    #[arg(long, env = "ROOST_RING_CAPACITY", default_value = "4096")]
    pub ring_capacity: usize,

    /// Disable the durable event log (ring only).
    #[arg(long, env = "ROOST_NO_DURABLE_LOG")]
    pub no_durable_log: bool,

    /// Durable event log retention, in seconds.
    #[arg(long, env = "ROOST_RETENTION_SECS", default_value = "3600")]
    pub retention_secs: u64,

    /// Durable log cleaner cadence, in seconds.
    #[arg(long, env = "ROOST_CLEANER_SECS", default_value = "60")]
    pub cleaner_secs: u64,

    /// Per-subscriber WS send queue capacity.
    #[arg(long, env = "ROOST_QUEUE_CAPACITY", default_value = "256")]
    pub queue_capacity: usize,

    /// Consecutive failed deliveries before a subscriber is dropped.
    #[arg(long, env = "ROOST_OVERFLOW_WINDOW", default_value = "64")]
    pub overflow_window: u32,

    /// Max events one catchup response returns.
    #[arg(long, env = "ROOST_CATCHUP_LIMIT", default_value = "500")]
    pub catchup_limit: usize,

    /// Pane output coalescing window, in milliseconds.
    #[arg(long, env = "ROOST_COALESCE_MS", default_value = "25")]
    pub coalesce_ms: u64,

    /// Capture-pane polling cadence (fallback path), in milliseconds.
    #[arg(long, env = "ROOST_POLL_MS", default_value = "300")]
    pub poll_ms: u64,

    /// Force the capture-pane polling path (skip pipe-pane FIFOs).
    #[arg(long, env = "ROOST_NO_PIPE")]
    pub no_pipe: bool,

    /// Agent liveness window, in seconds.
    #[arg(long, env = "ROOST_LIVENESS_SECS", default_value = "120")]
    pub liveness_secs: u64,

    /// Agent groomer cadence, in seconds.
    #[arg(long, env = "ROOST_GROOM_SECS", default_value = "30")]
    pub groom_secs: u64,

    /// Reservation TTL sweeper cadence, in seconds.
    #[arg(long, env = "ROOST_SWEEP_SECS", default_value = "10")]
    pub sweep_secs: u64,

    /// Triage command producing ranked work items as JSON.
    #[arg(long, env = "ROOST_TRIAGE_COMMAND", default_value = "bv triage --json")]
    pub triage_command: String,

    /// Recommendation cache TTL, in seconds.
    #[arg(long, env = "ROOST_TRIAGE_TTL_SECS", default_value = "60")]
    pub triage_ttl_secs: u64,

    /// Max recommendations fetched per refresh.
    #[arg(long, env = "ROOST_TRIAGE_LIMIT", default_value = "50")]
    pub triage_limit: usize,

    /// Assignment tick cadence, in seconds.
    #[arg(long, env = "ROOST_TICK_SECS", default_value = "30")]
    pub tick_secs: u64,

    /// Disable the automatic assignment loop (manual ticks only).
    #[arg(long, env = "ROOST_NO_COORDINATOR")]
    pub no_coordinator: bool,

    /// Context usage percentage where the assignment penalty starts.
    #[arg(long, env = "ROOST_CONTEXT_THRESHOLD", default_value = "80")]
    pub context_threshold: u8,

    /// Disable the pre-spawn headroom guard.
    #[arg(long, env = "ROOST_NO_HEADROOM")]
    pub no_headroom: bool,

    /// Usage fraction at which agent spawns are blocked.
    #[arg(long, env = "ROOST_BLOCK_PCT", default_value = "0.75")]
    pub block_pct: f64,

    /// Usage fraction at which agent spawns warn.
    #[arg(long, env = "ROOST_WARN_PCT", default_value = "0.70")]
    pub warn_pct: f64,

    /// Minimum free process slots below which spawns are blocked.
    #[arg(long, env = "ROOST_MIN_FREE", default_value = "50")]
    pub min_free: u64,

    /// Headroom probe cache TTL, in seconds.
    #[arg(long, env = "ROOST_PROBE_TTL_SECS", default_value = "3")]
    pub probe_ttl_secs: u64,

    /// Headroom re-check cadence while blocked, in seconds.
    #[arg(long, env = "ROOST_RECHECK_SECS", default_value = "30")]
    pub recheck_secs: u64,

    /// Log format (json or text).
    #[arg(long, env = "ROOST_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "ROOST_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port.is_none() && self.socket.is_none() {
            anyhow::bail!("either --port or --socket must be specified");
        }
        if !(0.0..=1.0).contains(&self.block_pct) || !(0.0..=1.0).contains(&self.warn_pct) {
            anyhow::bail!("--block-pct and --warn-pct must be within 0..=1");
        }
        if self.warn_pct > self.block_pct {
            anyhow::bail!("--warn-pct must not exceed --block-pct");
        }
        if self.ring_capacity == 0 {
            anyhow::bail!("--ring-capacity must be positive");
        }
        if self.triage_command.split_whitespace().next().is_none() {
            anyhow::bail!("--triage-command must not be empty");
        }
        Ok(())
    }

    pub fn working_dir(&self) -> PathBuf {
        match self.working_dir {
            Some(ref dir) => dir.clone(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    pub fn durable_config(&self) -> Option<DurableConfig> {
        if self.no_durable_log {
            return None;
        }
        Some(DurableConfig {
            path: self.data_dir.join("events.jsonl"),
            retention: Duration::from_secs(self.retention_secs),
        })
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig { queue_capacity: self.queue_capacity, overflow_window: self.overflow_window }
    }

    pub fn streamer_config(&self) -> StreamerConfig {
        StreamerConfig {
            data_dir: self.data_dir.clone(),
            coalesce_window: Duration::from_millis(self.coalesce_ms),
            poll_interval: Duration::from_millis(self.poll_ms),
            prefer_pipe: !self.no_pipe,
        }
    }

    pub fn headroom_config(&self) -> HeadroomConfig {
        HeadroomConfig {
            enabled: !self.no_headroom,
            block_pct: self.block_pct,
            warn_pct: self.warn_pct,
            min_free: self.min_free,
            cache_ttl: Duration::from_secs(self.probe_ttl_secs),
            recheck_interval: Duration::from_secs(self.recheck_secs),
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            tick_interval: Duration::from_secs(self.tick_secs),
            scoring: ScoringConfig {
                context_threshold_pct: f64::from(self.context_threshold),
            },
        }
    }

    /// The triage command as argv.
    pub fn triage_argv(&self) -> Vec<String> {
        self.triage_command.split_whitespace().map(str::to_owned).collect()
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::from_secs(self.liveness_secs)
    }

    pub fn groom_interval(&self) -> Duration {
        Duration::from_secs(self.groom_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_secs)
    }

    pub fn cleaner_interval(&self) -> Duration {
        Duration::from_secs(self.cleaner_secs)
    }

    pub fn triage_ttl(&self) -> Duration {
        Duration::from_secs(self.triage_ttl_secs)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
