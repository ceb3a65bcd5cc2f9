// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session checkpoints: immutable snapshots of pane topology, scrollback,
//! and VCS state.
//!
//! A checkpoint is a directory under the data dir containing
//! `metadata.json`, a `MANIFEST.json` with the SHA-256 of every file,
//! per-pane scrollback files, and optionally a diff patch. Checkpoints
//! are addressed by id and never modified after capture.

pub mod archive;
pub mod capture;
pub mod redact;
pub mod restore;
pub mod vcs;

pub use archive::{export_checkpoint, import_checkpoint, ArchiveFormat};
pub use capture::{capture_checkpoint, CaptureOptions};
pub use restore::{restore_checkpoint, rollback_checkpoint, RestoreOptions, RestoreResult};
pub use vcs::VcsState;

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::agent::AgentType;
use crate::error::{OpError, OpResult};

/// Placeholder substituted for the absolute working directory in exported
/// archives so they are relocatable.
pub const WORKDIR_PLACEHOLDER: &str = "__WORKDIR__";

/// Current manifest schema version.
pub const MANIFEST_VERSION: u32 = 1;

/// One pane's place in a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaneMeta {
    pub id: String,
    pub index: u32,
    pub title: String,
    pub agent_type: AgentType,
    /// Path of the scrollback file, relative to the checkpoint directory.
    pub scrollback_file: String,
    pub width: u16,
    pub height: u16,
}

/// Checkpoint metadata, stored as `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub session_name: String,
    pub working_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub panes: Vec<PaneMeta>,
    pub layout: String,
    pub active_pane_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcs: Option<VcsState>,
    pub pane_count: usize,
}

/// `MANIFEST.json`: relative path → SHA-256 hex digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub files: BTreeMap<String, String>,
}

impl Manifest {
    /// Hash a set of in-memory files.
    pub fn from_files<'a>(files: impl Iterator<Item = (&'a str, &'a [u8])>) -> Self {
        let mut manifest = BTreeMap::new();
        for (path, bytes) in files {
            manifest.insert(path.to_owned(), sha256_hex(bytes));
        }
        Self { version: MANIFEST_VERSION, files: manifest }
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// On-disk checkpoint store plus the per-session capture/restore locks.
pub struct CheckpointStore {
    root: PathBuf,
    session_locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Redaction scans are exclusive; a second export while one runs
    /// reports SCAN_IN_PROGRESS instead of queueing.
    scan_slot: Arc<tokio::sync::Mutex<()>>,
}

impl CheckpointStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join("checkpoints"),
            session_locks: parking_lot::Mutex::new(HashMap::new()),
            scan_slot: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of one checkpoint.
    pub fn dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Serialize capture/restore per session name.
    pub fn session_lock(&self, session: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.session_locks.lock();
        Arc::clone(locks.entry(session.to_owned()).or_default())
    }

    pub(crate) fn scan_slot(&self) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(&self.scan_slot)
    }

    /// Load a checkpoint by id, or by name (latest match) as a fallback.
    pub fn load(&self, id_or_name: &str) -> OpResult<CheckpointMeta> {
        let direct = self.dir(id_or_name).join("metadata.json");
        if direct.exists() {
            return read_meta(&direct);
        }
        let mut matches: Vec<CheckpointMeta> = self
            .list()?
            .into_iter()
            .filter(|c| c.name == id_or_name)
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matches
            .into_iter()
            .next()
            .ok_or_else(|| OpError::not_found(format!("no such checkpoint: {id_or_name}")))
    }

    /// Every stored checkpoint, newest first.
    pub fn list(&self) -> OpResult<Vec<CheckpointMeta>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };
        let mut all = vec![];
        for entry in entries.flatten() {
            let meta_path = entry.path().join("metadata.json");
            if let Ok(meta) = read_meta(&meta_path) {
                all.push(meta);
            }
        }
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    /// Remove a checkpoint directory.
    pub fn delete(&self, id: &str) -> OpResult<()> {
        let dir = self.dir(id);
        if !dir.join("metadata.json").exists() {
            return Err(OpError::not_found(format!("no such checkpoint: {id}")));
        }
        std::fs::remove_dir_all(dir)?;
        Ok(())
    }

    /// Read the manifest of a stored checkpoint.
    pub fn manifest(&self, id: &str) -> OpResult<Manifest> {
        let path = self.dir(id).join("MANIFEST.json");
        let contents = std::fs::read_to_string(&path)
            .map_err(|_| OpError::not_found(format!("checkpoint {id} has no manifest")))?;
        serde_json::from_str(&contents)
            .map_err(|e| OpError::internal(format!("unreadable manifest for {id}: {e}")))
    }

    /// Verify every manifest entry against the file on disk. Returns the
    /// list of mismatched or missing paths.
    pub fn verify(&self, id: &str) -> OpResult<Vec<String>> {
        let manifest = self.manifest(id)?;
        let dir = self.dir(id);
        let mut bad = vec![];
        for (rel, expected) in &manifest.files {
            match std::fs::read(dir.join(rel)) {
                Ok(bytes) if &sha256_hex(&bytes) == expected => {}
                _ => bad.push(rel.clone()),
            }
        }
        Ok(bad)
    }
}

/// Write a checkpoint directory's manifest from its current contents.
pub(crate) fn write_manifest(dir: &Path) -> OpResult<Manifest> {
    let mut files: Vec<(String, Vec<u8>)> = vec![];
    collect_files(dir, dir, &mut files)?;
    let manifest =
        Manifest::from_files(files.iter().map(|(p, b)| (p.as_str(), b.as_slice())));
    let json = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| OpError::internal(format!("manifest serialization failed: {e}")))?;
    std::fs::write(dir.join("MANIFEST.json"), json)?;
    Ok(manifest)
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<(String, Vec<u8>)>) -> OpResult<()> {
    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
            continue;
        }
        let rel = path
            .strip_prefix(root)
            .map_err(|_| OpError::internal("file escaped checkpoint root"))?
            .to_string_lossy()
            .into_owned();
        if rel == "MANIFEST.json" {
            continue;
        }
        out.push((rel, std::fs::read(&path)?));
    }
    Ok(())
}

fn read_meta(path: &Path) -> OpResult<CheckpointMeta> {
    let contents = std::fs::read_to_string(path)
        .map_err(|_| OpError::not_found("checkpoint metadata missing"))?;
    serde_json::from_str(&contents)
        .map_err(|e| OpError::internal(format!("unreadable checkpoint metadata: {e}")))
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
