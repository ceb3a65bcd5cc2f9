// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::agent::{AgentRegistry, AgentType, RegisterAgent};
use crate::mux::Multiplexer;
use crate::test_support::FakeMux;

use super::super::capture::{capture_checkpoint, CaptureOptions};
use super::super::{CheckpointStore, WORKDIR_PLACEHOLDER};

struct Fixture {
    _data: tempfile::TempDir,
    workdir: tempfile::TempDir,
    store: CheckpointStore,
    checkpoint_id: String,
}

async fn fixture(scrollback: &str) -> Fixture {
    let data = tempfile::tempdir().unwrap();
    let workdir = tempfile::tempdir().unwrap();
    let mux = FakeMux::new();
    let dyn_mux: Arc<dyn Multiplexer> = Arc::clone(&mux) as Arc<dyn Multiplexer>;
    dyn_mux.create_session("dev", workdir.path(), None).await.unwrap();
    dyn_mux.split_window("dev", workdir.path(), None).await.unwrap();
    mux.set_capture("%0", scrollback);
    mux.set_capture("%1", "second pane\n");

    let agents = AgentRegistry::new(Duration::from_secs(60));
    agents
        .register(RegisterAgent {
            pane_id: "%0".to_owned(),
            pane_index: 0,
            session: "dev".to_owned(),
            agent_type: AgentType::Claude,
            mail_name: None,
        })
        .await;
    agents
        .register(RegisterAgent {
            pane_id: "%1".to_owned(),
            pane_index: 1,
            session: "dev".to_owned(),
            agent_type: AgentType::Codex,
            mail_name: None,
        })
        .await;

    let store = CheckpointStore::new(data.path());
    let mut options = CaptureOptions::new("roundtrip");
    options.description = "export fixture".to_owned();
    let meta = capture_checkpoint(&dyn_mux, &agents, &store, "dev", workdir.path(), options)
        .await
        .unwrap();
    Fixture { _data: data, workdir, store, checkpoint_id: meta.id }
}

/// Like `write_tar_gz`, but writes the member name into the header's raw
/// bytes directly so the `tar` crate's own path-safety check (which now
/// rejects `..` on `append_data`) doesn't stop us from building a malicious
/// fixture for `import_checkpoint`'s traversal check to reject.
fn write_tar_gz_with_unsafe_names(out_path: &Path, files: &[(String, Vec<u8>)]) {
    let file = std::fs::File::create(out_path).unwrap();
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (rel, bytes) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        let name = header.as_old_mut().name.as_mut();
        let raw = rel.as_bytes();
        name[..raw.len()].copy_from_slice(raw);
        header.set_cksum();
        builder.append(&header, bytes.as_slice()).unwrap();
    }
    builder
        .into_inner()
        .and_then(|enc| enc.finish())
        .unwrap();
}

async fn roundtrip(format: ArchiveFormat, file_name: &str) {
    let f = fixture("plain scrollback\n").await;
    let out = f._data.path().join(file_name);
    let summary = export_checkpoint(
        &f.store,
        &f.checkpoint_id,
        &out,
        ExportOptions { format, redact: true },
    )
    .await
    .unwrap();
    assert_eq!(summary.format, format);
    assert!(out.exists());

    // Import into a second store, as if on another machine.
    let other_root = tempfile::tempdir().unwrap();
    let other_store = CheckpointStore::new(other_root.path());
    let new_workdir = tempfile::tempdir().unwrap();
    let imported = import_checkpoint(&other_store, &out, Some(new_workdir.path()))
        .await
        .unwrap();

    let original = f.store.load(&f.checkpoint_id).unwrap();
    assert_eq!(imported.name, original.name);
    assert_eq!(imported.description, original.description);
    assert_eq!(imported.pane_count, original.pane_count);
    let imported_types: Vec<AgentType> =
        imported.panes.iter().map(|p| p.agent_type).collect();
    let original_types: Vec<AgentType> =
        original.panes.iter().map(|p| p.agent_type).collect();
    assert_eq!(imported_types, original_types);
    assert_eq!(imported.working_dir, new_workdir.path());

    // The imported copy verifies against its own manifest.
    assert!(other_store.verify(&imported.id).unwrap().is_empty());
}

#[tokio::test]
async fn tar_gz_roundtrip() {
    roundtrip(ArchiveFormat::TarGz, "snap.tar.gz").await;
}

#[tokio::test]
async fn zip_roundtrip() {
    roundtrip(ArchiveFormat::Zip, "snap.zip").await;
}

#[tokio::test]
async fn export_redacts_credentials_and_rewrites_workdir() {
    let f = fixture("token sk-ant-REDACTED leaked\n").await;
    let out = f._data.path().join("redacted.tar.gz");
    let summary = export_checkpoint(
        &f.store,
        &f.checkpoint_id,
        &out,
        ExportOptions::default(),
    )
    .await
    .unwrap();
    assert!(summary.redactions >= 1);

    let entries = read_tar_gz(&out).unwrap();
    let (_, scrollback) =
        entries.iter().find(|(rel, _)| rel == "panes/pane-0.txt").unwrap();
    let text = String::from_utf8_lossy(scrollback);
    assert!(!text.contains("supersecretvalue"));
    assert!(text.contains("[REDACTED]"));

    let (_, meta_bytes) =
        entries.iter().find(|(rel, _)| rel == "metadata.json").unwrap();
    let meta_text = String::from_utf8_lossy(meta_bytes);
    assert!(meta_text.contains(WORKDIR_PLACEHOLDER));
    assert!(!meta_text.contains(&f.workdir.path().to_string_lossy().into_owned()));

    // The stored checkpoint itself is untouched.
    let on_disk = std::fs::read_to_string(
        f.store.dir(&f.checkpoint_id).join("panes/pane-0.txt"),
    )
    .unwrap();
    assert!(on_disk.contains("supersecretvalue"));
}

#[tokio::test]
async fn import_rejects_path_traversal_without_writing() {
    let f = fixture("x\n").await;
    let evil = f._data.path().join("evil.tar.gz");
    write_tar_gz_with_unsafe_names(
        &evil,
        &[
            ("../escape.txt".to_owned(), b"outside".to_vec()),
            ("metadata.json".to_owned(), b"{}".to_vec()),
        ],
    );

    let other_root = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(other_root.path());
    let err = import_checkpoint(&store, &evil, None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::BadRequest);
    assert!(err.message.contains("escapes"));

    // Nothing was written anywhere near the store root.
    assert!(!other_root.path().join("escape.txt").exists());
    assert!(!other_root.path().parent().unwrap().join("escape.txt").exists());
    assert!(store.list().unwrap().is_empty());
}

#[tokio::test]
async fn import_rejects_absolute_members() {
    let f = fixture("x\n").await;
    let evil = f._data.path().join("abs.zip");
    {
        use std::io::Write;
        let file = std::fs::File::create(&evil).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("/etc/roost-evil", options).unwrap();
        writer.write_all(b"nope").unwrap();
        writer.finish().unwrap();
    }

    let other_root = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(other_root.path());
    let err = import_checkpoint(&store, &evil, None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::BadRequest);
}

#[tokio::test]
async fn import_rejects_checksum_mismatch() {
    let f = fixture("x\n").await;
    let out = f._data.path().join("snap.tar.gz");
    export_checkpoint(&f.store, &f.checkpoint_id, &out, ExportOptions::default())
        .await
        .unwrap();

    // Corrupt one member, keep the manifest.
    let mut entries = read_tar_gz(&out).unwrap();
    for (rel, bytes) in &mut entries {
        if rel == "panes/pane-0.txt" {
            *bytes = b"tampered".to_vec();
        }
    }
    write_tar_gz(&out, &entries).unwrap();

    let other_root = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(other_root.path());
    let err = import_checkpoint(&store, &out, None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::BadRequest);
    assert!(err.message.contains("checksum"));
    assert!(store.list().unwrap().is_empty());
}

#[tokio::test]
async fn reimport_conflicts_on_same_id() {
    let f = fixture("x\n").await;
    let out = f._data.path().join("snap.tar.gz");
    export_checkpoint(&f.store, &f.checkpoint_id, &out, ExportOptions::default())
        .await
        .unwrap();

    let other_root = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(other_root.path());
    import_checkpoint(&store, &out, None).await.unwrap();
    let err = import_checkpoint(&store, &out, None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);
}

#[tokio::test]
async fn concurrent_redaction_scan_is_refused() {
    let f = fixture("x\n").await;
    let slot = f.store.scan_slot();
    let _held = slot.lock().await;

    let out = f._data.path().join("busy.tar.gz");
    let err = export_checkpoint(&f.store, &f.checkpoint_id, &out, ExportOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ScanInProgress);

    // Without redaction the export skips the scan slot entirely.
    export_checkpoint(
        &f.store,
        &f.checkpoint_id,
        &out,
        ExportOptions { format: ArchiveFormat::TarGz, redact: false },
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn unknown_extension_is_rejected() {
    let f = fixture("x\n").await;
    let err = import_checkpoint(&f.store, Path::new("snap.rar"), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::BadRequest);
    assert_eq!(ArchiveFormat::from_path(Path::new("a.tar.gz")), Some(ArchiveFormat::TarGz));
    assert_eq!(ArchiveFormat::from_path(Path::new("a.tgz")), Some(ArchiveFormat::TarGz));
    assert_eq!(ArchiveFormat::from_path(Path::new("a.zip")), Some(ArchiveFormat::Zip));
    assert_eq!(ArchiveFormat::from_path(Path::new("a.rar")), None);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Any member with a parent-dir or root component is rejected.
        #[test]
        fn unsafe_members_never_pass(
            prefix in proptest::sample::select(vec!["../", "/", "a/../../", "./../"]),
            name in "[a-z]{1,8}"
        ) {
            let member = format!("{}{}", prefix, name);
            prop_assert!(!is_safe_member(&member));
        }

        /// Plain relative member names always pass.
        #[test]
        fn normal_members_pass(segments in proptest::collection::vec("[a-z]{1,8}", 1..4)) {
            prop_assert!(is_safe_member(&segments.join("/")));
        }
    }
}
