// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Checkpoint archive export and import.
//!
//! Export wraps a checkpoint directory into a tar+gzip (default) or zip
//! archive, after redacting credentials and substituting the absolute
//! working directory with a placeholder so the archive is relocatable.
//! Import validates every member path and the manifest checksums before a
//! single file is written.

use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ErrorCode, OpError, OpResult};

use super::redact::Redactor;
use super::{
    sha256_hex, CheckpointMeta, CheckpointStore, Manifest, WORKDIR_PLACEHOLDER,
};

/// Supported archive containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveFormat {
    TarGz,
    Zip,
}

impl ArchiveFormat {
    /// Infer the format from a file name.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

/// Export options.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub format: ArchiveFormat,
    /// Scan and redact credentials before archiving (default true).
    pub redact: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self { format: ArchiveFormat::TarGz, redact: true }
    }
}

/// What an export produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSummary {
    pub checkpoint_id: String,
    pub path: PathBuf,
    pub format: ArchiveFormat,
    pub files: usize,
    pub redactions: usize,
}

/// Export a checkpoint to an archive file.
///
/// The redaction scan is exclusive: a second export racing the scan gets
/// SCAN_IN_PROGRESS instead of queueing behind it.
pub async fn export_checkpoint(
    store: &CheckpointStore,
    id_or_name: &str,
    out_path: &Path,
    options: ExportOptions,
) -> OpResult<ExportSummary> {
    let meta = store.load(id_or_name)?;

    let slot = store.scan_slot();
    let _scan_guard = if options.redact {
        match slot.try_lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                return Err(OpError::new(
                    ErrorCode::ScanInProgress,
                    "a redaction scan is already running",
                ))
            }
        }
    } else {
        None
    };

    let dir = store.dir(&meta.id);
    let mut files = read_dir_files(&dir)?;
    files.retain(|(rel, _)| rel != "MANIFEST.json");

    // Relocatability + redaction happen on the archive copy only; the
    // stored checkpoint stays byte-identical to what was captured.
    let workdir = meta.working_dir.to_string_lossy().into_owned();
    let redactor = Redactor::new();
    let mut redactions = 0;
    for (_, bytes) in &mut files {
        let mut text = String::from_utf8_lossy(bytes).into_owned();
        if !workdir.is_empty() {
            text = text.replace(&workdir, WORKDIR_PLACEHOLDER);
        }
        if options.redact {
            let (scrubbed, count) = redactor.redact(&text);
            text = scrubbed;
            redactions += count;
        }
        *bytes = text.into_bytes();
    }

    // The manifest ships hashes of the transformed content so import can
    // verify what is actually in the archive.
    let manifest =
        Manifest::from_files(files.iter().map(|(p, b)| (p.as_str(), b.as_slice())));
    let manifest_json = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| OpError::internal(format!("manifest serialization failed: {e}")))?;
    files.push(("MANIFEST.json".to_owned(), manifest_json));

    match options.format {
        ArchiveFormat::TarGz => write_tar_gz(out_path, &files)?,
        ArchiveFormat::Zip => write_zip(out_path, &files)?,
    }

    info!(
        checkpoint = %meta.id,
        path = %out_path.display(),
        redactions,
        "checkpoint exported"
    );
    Ok(ExportSummary {
        checkpoint_id: meta.id,
        path: out_path.to_path_buf(),
        format: options.format,
        files: files.len(),
        redactions,
    })
}

/// Import an archive into the checkpoint store.
///
/// Every member path is validated and every checksum verified before any
/// file is written; the placeholder working directory is rewritten to
/// `rewrite_workdir` (or the process working directory).
pub async fn import_checkpoint(
    store: &CheckpointStore,
    archive_path: &Path,
    rewrite_workdir: Option<&Path>,
) -> OpResult<CheckpointMeta> {
    let format = ArchiveFormat::from_path(archive_path).ok_or_else(|| {
        OpError::bad_request(format!(
            "unrecognized archive extension: {} (expected .tar.gz, .tgz, or .zip)",
            archive_path.display()
        ))
    })?;

    let mut files = match format {
        ArchiveFormat::TarGz => read_tar_gz(archive_path)?,
        ArchiveFormat::Zip => read_zip(archive_path)?,
    };

    // 1. Path safety: every member must stay inside the extraction root.
    for (rel, _) in &files {
        if !is_safe_member(rel) {
            return Err(OpError::bad_request(format!(
                "archive member escapes extraction root: {rel}"
            )));
        }
    }

    // 2. Integrity: the manifest must cover exactly the shipped files.
    let manifest_bytes = files
        .iter()
        .find(|(rel, _)| rel == "MANIFEST.json")
        .map(|(_, b)| b.clone())
        .ok_or_else(|| OpError::bad_request("archive has no MANIFEST.json"))?;
    let manifest: Manifest = serde_json::from_slice(&manifest_bytes)
        .map_err(|e| OpError::bad_request(format!("unreadable MANIFEST.json: {e}")))?;
    for (rel, bytes) in &files {
        if rel == "MANIFEST.json" {
            continue;
        }
        match manifest.files.get(rel) {
            Some(expected) if expected == &sha256_hex(bytes) => {}
            Some(_) => {
                return Err(OpError::bad_request(format!("checksum mismatch for {rel}")))
            }
            None => {
                return Err(OpError::bad_request(format!("unmanifested archive member: {rel}")))
            }
        }
    }
    for rel in manifest.files.keys() {
        if !files.iter().any(|(r, _)| r == rel) {
            return Err(OpError::bad_request(format!("archive is missing {rel}")));
        }
    }

    // 3. Resolve the placeholder to a concrete working directory.
    let target = match rewrite_workdir {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };
    let target_str = target.to_string_lossy().into_owned();
    for (rel, bytes) in &mut files {
        if rel == "MANIFEST.json" {
            continue;
        }
        let text = String::from_utf8_lossy(bytes).into_owned();
        *bytes = text.replace(WORKDIR_PLACEHOLDER, &target_str).into_bytes();
    }

    let meta_bytes = files
        .iter()
        .find(|(rel, _)| rel == "metadata.json")
        .map(|(_, b)| b.clone())
        .ok_or_else(|| OpError::bad_request("archive has no metadata.json"))?;
    let meta: CheckpointMeta = serde_json::from_slice(&meta_bytes)
        .map_err(|e| OpError::bad_request(format!("unreadable metadata.json: {e}")))?;

    let dir = store.dir(&meta.id);
    if dir.exists() {
        return Err(OpError::conflict(format!("checkpoint already exists: {}", meta.id)));
    }

    // 4. Only now touch the disk.
    for (rel, bytes) in &files {
        if rel == "MANIFEST.json" {
            continue;
        }
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, bytes)?;
    }
    super::write_manifest(&dir)?;

    info!(checkpoint = %meta.id, from = %archive_path.display(), "checkpoint imported");
    Ok(meta)
}

/// A member is safe when it is relative and made only of normal
/// components — no `..`, no root, no drive prefixes.
fn is_safe_member(rel: &str) -> bool {
    let path = Path::new(rel);
    !rel.is_empty()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

fn read_dir_files(dir: &Path) -> OpResult<Vec<(String, Vec<u8>)>> {
    let mut out = vec![];
    walk(dir, dir, &mut out)?;
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<(String, Vec<u8>)>) -> OpResult<()> {
    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, out)?;
            continue;
        }
        let rel = path
            .strip_prefix(root)
            .map_err(|_| OpError::internal("file escaped checkpoint root"))?
            .to_string_lossy()
            .into_owned();
        out.push((rel, std::fs::read(&path)?));
    }
    Ok(())
}

fn write_tar_gz(out_path: &Path, files: &[(String, Vec<u8>)]) -> OpResult<()> {
    let file = std::fs::File::create(out_path)?;
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (rel, bytes) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, rel, bytes.as_slice())
            .map_err(|e| OpError::internal(format!("tar append failed: {e}")))?;
    }
    builder
        .into_inner()
        .and_then(|enc| enc.finish())
        .map_err(|e| OpError::internal(format!("archive finalize failed: {e}")))?;
    Ok(())
}

fn read_tar_gz(path: &Path) -> OpResult<Vec<(String, Vec<u8>)>> {
    let file = std::fs::File::open(path)
        .map_err(|_| OpError::not_found(format!("no such archive: {}", path.display())))?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    let mut out = vec![];
    let entries = archive
        .entries()
        .map_err(|e| OpError::bad_request(format!("unreadable tar archive: {e}")))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| OpError::bad_request(format!("corrupt tar entry: {e}")))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        // Raw bytes, not the sanitized accessor: traversal checks happen
        // on exactly what the archive claims.
        let rel = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let mut bytes = vec![];
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| OpError::bad_request(format!("corrupt tar entry {rel}: {e}")))?;
        out.push((rel, bytes));
    }
    Ok(out)
}

fn write_zip(out_path: &Path, files: &[(String, Vec<u8>)]) -> OpResult<()> {
    let file = std::fs::File::create(out_path)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (rel, bytes) in files {
        writer
            .start_file(rel.as_str(), options)
            .map_err(|e| OpError::internal(format!("zip write failed: {e}")))?;
        writer
            .write_all(bytes)
            .map_err(|e| OpError::internal(format!("zip write failed: {e}")))?;
    }
    writer
        .finish()
        .map_err(|e| OpError::internal(format!("archive finalize failed: {e}")))?;
    Ok(())
}

fn read_zip(path: &Path) -> OpResult<Vec<(String, Vec<u8>)>> {
    let file = std::fs::File::open(path)
        .map_err(|_| OpError::not_found(format!("no such archive: {}", path.display())))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| OpError::bad_request(format!("unreadable zip archive: {e}")))?;
    let mut out = vec![];
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| OpError::bad_request(format!("corrupt zip entry: {e}")))?;
        if entry.is_dir() {
            continue;
        }
        let rel = entry.name().to_owned();
        let mut bytes = vec![];
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| OpError::bad_request(format!("corrupt zip entry {rel}: {e}")))?;
        out.push((rel, bytes));
    }
    Ok(out)
}

#[cfg(test)]
#[path = "archive_tests.rs"]
mod tests;
