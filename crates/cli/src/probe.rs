// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OS resource-limit probe.
//!
//! Up to four sources bound how many processes this user can still spawn:
//! the per-user soft limit, the container's cgroup pid cap, the service
//! manager's task ceiling, and the kernel-wide pid ceiling. The effective
//! limit is the smallest non-zero source. Usage prefers the container's
//! own counter and falls back to scanning the process table for entries
//! owned by the current user.

use std::future::Future;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::OpResult;

/// Which source produced the binding limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitSource {
    UserProcesses,
    CgroupPids,
    ServiceTasks,
    KernelPidMax,
}

impl LimitSource {
    /// Operator-facing remediation for the binding limit.
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::UserProcesses => {
                "raise the user process limit (ulimit -u, or nproc in /etc/security/limits.conf)"
            }
            Self::CgroupPids => {
                "raise the container pid limit (pids.max in the cgroup, or --pids-limit)"
            }
            Self::ServiceTasks => {
                "raise TasksMax for the user slice (systemctl set-property user-<uid>.slice TasksMax=...)"
            }
            Self::KernelPidMax => "raise kernel.pid_max via sysctl",
        }
    }
}

/// Limits read from each source. `None` means unlimited or unreadable.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub user_process_soft: Option<u64>,
    pub cgroup_pids_max: Option<u64>,
    pub service_task_max: Option<u64>,
    pub kernel_pid_max: Option<u64>,
}

impl ResourceLimits {
    /// The smallest non-zero limit and its source.
    pub fn effective(&self) -> Option<(u64, LimitSource)> {
        let candidates = [
            (self.user_process_soft, LimitSource::UserProcesses),
            (self.cgroup_pids_max, LimitSource::CgroupPids),
            (self.service_task_max, LimitSource::ServiceTasks),
            (self.kernel_pid_max, LimitSource::KernelPidMax),
        ];
        candidates
            .into_iter()
            .filter_map(|(limit, source)| match limit {
                Some(v) if v > 0 => Some((v, source)),
                _ => None,
            })
            .min_by_key(|(v, _)| *v)
    }
}

/// Where the usage number came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageSource {
    CgroupPidsCurrent,
    UserProcessScan,
}

/// Current process usage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub current: u64,
    pub source: UsageSource,
}

/// One probe result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub limits: ResourceLimits,
    pub usage: ResourceUsage,
}

/// Boxed future shorthand for the object-safe probe trait.
pub type ProbeFuture<'a, T> = Pin<Box<dyn Future<Output = OpResult<T>> + Send + 'a>>;

/// Source of resource snapshots. Object-safe so the headroom guard can
/// take a canned probe in tests.
pub trait ResourceProbe: Send + Sync + 'static {
    fn probe(&self) -> ProbeFuture<'_, ResourceSnapshot>;
}

/// Probe backed by the proc/cgroup pseudo-filesystems and the service
/// manager. Roots are injectable so tests can point it at a fixture tree.
pub struct ProcProbe {
    proc_root: PathBuf,
    cgroup_root: PathBuf,
    /// Gates the subprocess fallbacks (`systemctl`, `ulimit`). Off for
    /// fixture-rooted probes so tests never shell out to the host.
    host_fallbacks: bool,
}

impl Default for ProcProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcProbe {
    pub fn new() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            cgroup_root: PathBuf::from("/sys/fs/cgroup"),
            host_fallbacks: true,
        }
    }

    /// Point the probe at fixture directories and skip the host fallbacks.
    pub fn with_roots(proc_root: PathBuf, cgroup_root: PathBuf) -> Self {
        Self { proc_root, cgroup_root, host_fallbacks: false }
    }

    /// Per-user process soft limit: `/proc/self/limits` preferred, shell
    /// `ulimit -u` when the pseudo-file cannot be read.
    async fn user_process_soft(&self) -> Option<u64> {
        match std::fs::read_to_string(self.proc_root.join("self/limits")) {
            Ok(contents) => parse_max_processes(&contents),
            Err(_) => self.ulimit_user_processes().await,
        }
    }

    async fn ulimit_user_processes(&self) -> Option<u64> {
        if !self.host_fallbacks {
            return None;
        }
        let output = tokio::process::Command::new("sh")
            .args(["-c", "ulimit -u"])
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        parse_ulimit(&output.stdout)
    }

    /// Resolve this process's cgroup v2 directory and read a file in it.
    fn cgroup_value(&self, file: &str) -> Option<u64> {
        let path = self.cgroup_dir()?.join(file);
        let raw = std::fs::read_to_string(path).ok()?;
        let trimmed = raw.trim();
        if trimmed == "max" {
            return None;
        }
        trimmed.parse().ok()
    }

    fn cgroup_dir(&self) -> Option<PathBuf> {
        let contents = std::fs::read_to_string(self.proc_root.join("self/cgroup")).ok()?;
        // cgroup v2: a single line "0::/user.slice/...".
        let rel = contents
            .lines()
            .find_map(|line| line.strip_prefix("0::"))?
            .trim_start_matches('/');
        Some(self.cgroup_root.join(rel))
    }

    async fn service_task_max(&self) -> Option<u64> {
        if !self.host_fallbacks {
            return None;
        }
        let uid = nix::unistd::Uid::current().as_raw();
        let slice = format!("user-{uid}.slice");
        let output = tokio::process::Command::new("systemctl")
            .args(["show", "--property", "TasksMax", "--value", &slice])
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let raw = String::from_utf8_lossy(&output.stdout);
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "infinity" {
            return None;
        }
        match trimmed.parse::<u64>() {
            Ok(u64::MAX) => None,
            Ok(v) => Some(v),
            Err(_) => None,
        }
    }

    fn read_usage(&self) -> ResourceUsage {
        if let Some(current) = self.cgroup_value("pids.current") {
            return ResourceUsage { current, source: UsageSource::CgroupPidsCurrent };
        }
        ResourceUsage {
            current: self.count_user_processes(),
            source: UsageSource::UserProcessScan,
        }
    }

    /// Count process-table entries owned by the current user. Ownership
    /// comes from a stat of the pid directory; entries that cannot be
    /// stat'ed (raced exits) fall back to parsing the status file.
    fn count_user_processes(&self) -> u64 {
        let uid = nix::unistd::Uid::current().as_raw();
        let Ok(entries) = std::fs::read_dir(&self.proc_root) else {
            return 0;
        };
        let mut count = 0u64;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            let owned = match entry.metadata() {
                Ok(meta) => meta.uid() == uid,
                Err(_) => status_file_uid(&entry.path()).is_some_and(|u| u == uid),
            };
            if owned {
                count += 1;
            }
        }
        count
    }
}

impl ResourceProbe for ProcProbe {
    fn probe(&self) -> ProbeFuture<'_, ResourceSnapshot> {
        Box::pin(async move {
            let limits = ResourceLimits {
                user_process_soft: self.user_process_soft().await,
                cgroup_pids_max: self.cgroup_value("pids.max"),
                service_task_max: self.service_task_max().await,
                kernel_pid_max: read_u64(&self.proc_root.join("sys/kernel/pid_max")),
            };
            let usage = self.read_usage();
            debug!(?limits, ?usage, "resource probe");
            Ok(ResourceSnapshot { limits, usage })
        })
    }
}

/// Parse the soft column of the `Max processes` row in `/proc/self/limits`.
fn parse_max_processes(contents: &str) -> Option<u64> {
    let line = contents.lines().find(|l| l.starts_with("Max processes"))?;
    let soft = line.split_whitespace().nth(2)?;
    if soft == "unlimited" {
        return None;
    }
    soft.parse().ok()
}

/// Parse `ulimit -u` output. `unlimited` means no cap.
fn parse_ulimit(stdout: &[u8]) -> Option<u64> {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim();
    if trimmed == "unlimited" {
        return None;
    }
    trimmed.parse().ok()
}

/// Portable fallback: the `Uid:` row of a pid's status file (real uid).
fn status_file_uid(pid_dir: &Path) -> Option<u32> {
    let contents = std::fs::read_to_string(pid_dir.join("status")).ok()?;
    let line = contents.lines().find(|l| l.starts_with("Uid:"))?;
    line.split_whitespace().nth(1)?.parse().ok()
}

fn read_u64(path: &Path) -> Option<u64> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(test)]
#[path = "probe_tests.rs"]
mod tests;
