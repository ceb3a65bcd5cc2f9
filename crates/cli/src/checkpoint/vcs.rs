// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! VCS snapshot and rollback helpers, shelling out to git.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{OpError, OpResult};

/// Captured VCS state of the checkpoint's working directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcsState {
    pub branch: String,
    pub commit: String,
    pub dirty: bool,
    pub staged_count: usize,
    pub unstaged_count: usize,
    pub untracked_count: usize,
    /// Relative path of the uncommitted-changes patch, when captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_file: Option<String>,
}

async fn git(dir: &Path, args: &[&str]) -> OpResult<std::process::Output> {
    tokio::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OpError::dependency_missing(
                    "git is not installed or not in PATH",
                    "install git to capture and restore VCS state",
                )
            } else {
                OpError::internal(format!("failed to run git: {e}"))
            }
        })
}

async fn git_ok(dir: &Path, args: &[&str]) -> OpResult<String> {
    let output = git(dir, args).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(OpError::unavailable(format!(
            "git {} failed: {}",
            args.first().unwrap_or(&""),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
}

/// Snapshot the working directory's VCS state. `None` when the directory
/// is not inside a git work tree.
pub async fn snapshot(dir: &Path) -> OpResult<Option<VcsState>> {
    let inside = git(dir, &["rev-parse", "--is-inside-work-tree"]).await?;
    if !inside.status.success() {
        return Ok(None);
    }

    let branch = git_ok(dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await?;
    let commit = git_ok(dir, &["rev-parse", "HEAD"]).await?;
    let status = git_ok(dir, &["status", "--porcelain"]).await?;
    let counts = count_porcelain(&status);

    Ok(Some(VcsState {
        branch,
        commit,
        dirty: counts.staged + counts.unstaged + counts.untracked > 0,
        staged_count: counts.staged,
        unstaged_count: counts.unstaged,
        untracked_count: counts.untracked,
        patch_file: None,
    }))
}

/// Diff of uncommitted changes against HEAD (staged and unstaged).
pub async fn uncommitted_patch(dir: &Path) -> OpResult<String> {
    git_ok(dir, &["diff", "HEAD"]).await
}

/// Stash the working tree, including untracked files.
pub async fn stash(dir: &Path, message: &str) -> OpResult<()> {
    git_ok(dir, &["stash", "push", "--include-untracked", "-m", message]).await?;
    Ok(())
}

/// Re-apply a stored VCS state: check out the branch, then hard-reset to
/// the stored commit when HEAD differs.
pub async fn apply(dir: &Path, state: &VcsState) -> OpResult<Vec<String>> {
    let mut warnings = vec![];
    git_ok(dir, &["checkout", &state.branch]).await?;
    let head = git_ok(dir, &["rev-parse", "HEAD"]).await?;
    if head != state.commit {
        git_ok(dir, &["reset", "--hard", &state.commit]).await?;
        warnings.push(format!(
            "reset {} from {} to {}",
            state.branch,
            &head[..head.len().min(12)],
            &state.commit[..state.commit.len().min(12)]
        ));
    }
    Ok(warnings)
}

struct PorcelainCounts {
    staged: usize,
    unstaged: usize,
    untracked: usize,
}

/// Count entries in `git status --porcelain` output.
fn count_porcelain(status: &str) -> PorcelainCounts {
    let mut counts = PorcelainCounts { staged: 0, unstaged: 0, untracked: 0 };
    for line in status.lines() {
        let mut chars = line.chars();
        let x = chars.next().unwrap_or(' ');
        let y = chars.next().unwrap_or(' ');
        if x == '?' && y == '?' {
            counts.untracked += 1;
            continue;
        }
        if x != ' ' {
            counts.staged += 1;
        }
        if y != ' ' {
            counts.unstaged += 1;
        }
    }
    counts
}

#[cfg(test)]
#[path = "vcs_tests.rs"]
mod tests;
