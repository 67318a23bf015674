//! End-to-end session lifecycle scenarios.

mod common;

use std::time::Duration;

use common::{add_paragraph, manager, manager_at, manager_with, remove_paragraph, session_text, TENANT};
use docx_session_content::{Document, PatchOp};
use docx_session_core::{EngineError, LockManager, SourceDescriptor};
use docx_session_engine::{EngineConfig, ExternalState};
use docx_session_store::{ExternalChangeKind, FileLock, NotifyWatcher};
use serde_json::json;

#[tokio::test]
async fn add_undo_redo_round_trip() {
    let (mgr, _dir) = manager();
    let sid = mgr.open(TENANT, None).await.unwrap();

    let report = mgr
        .apply_patch(TENANT, &sid, &[add_paragraph("Hello")])
        .await
        .unwrap();
    assert!(report.success);
    assert_eq!(report.applied, 1);

    let status = mgr.session_status(TENANT, &sid).await.unwrap();
    assert_eq!(status.wal_length, 1);
    assert_eq!(status.cursor_position, 1);
    assert!(status.checkpoint_positions.contains(&0));
    assert!(status.can_undo);
    assert!(!status.can_redo);

    let cursor = mgr.undo(TENANT, &sid, 1).await.unwrap();
    assert_eq!(cursor, 0);
    assert_eq!(session_text(&mgr, &sid).await, "");
    let status = mgr.session_status(TENANT, &sid).await.unwrap();
    assert!(!status.can_undo);
    assert!(status.can_redo);

    let cursor = mgr.redo(TENANT, &sid, 1).await.unwrap();
    assert_eq!(cursor, 1);
    assert_eq!(session_text(&mgr, &sid).await, "Hello");
}

#[tokio::test]
async fn edit_after_undo_truncates_tail_and_checkpoints() {
    let (mgr, _dir) = manager();
    let sid = mgr.open(TENANT, None).await.unwrap();

    for i in 1..=10 {
        let report = mgr
            .apply_patch(TENANT, &sid, &[add_paragraph(&format!("p{i}"))])
            .await
            .unwrap();
        assert!(report.success);
    }

    let status = mgr.session_status(TENANT, &sid).await.unwrap();
    assert_eq!(status.wal_length, 10);
    assert!(status.checkpoint_positions.contains(&10));

    let cursor = mgr.undo(TENANT, &sid, 5).await.unwrap();
    assert_eq!(cursor, 5);
    assert_eq!(session_text(&mgr, &sid).await, "p1p2p3p4p5");

    let report = mgr
        .apply_patch(TENANT, &sid, &[add_paragraph("fresh")])
        .await
        .unwrap();
    assert!(report.success);

    let status = mgr.session_status(TENANT, &sid).await.unwrap();
    assert_eq!(status.wal_length, 6);
    assert_eq!(status.cursor_position, 6);
    assert!(!status.checkpoint_positions.contains(&10));
    assert!(status.checkpoint_positions.contains(&0));
    assert_eq!(session_text(&mgr, &sid).await, "p1p2p3p4p5fresh");
}

#[tokio::test]
async fn failing_op_aborts_batch_without_committing() {
    let (mgr, _dir) = manager();
    let sid = mgr.open(TENANT, None).await.unwrap();
    mgr.apply_patch(TENANT, &sid, &[add_paragraph("base")])
        .await
        .unwrap();

    let ops = vec![
        add_paragraph("one"),
        PatchOp::Remove {
            path: "/body/paragraph[99]".into(),
        },
        add_paragraph("three"),
    ];
    let report = mgr.apply_patch(TENANT, &sid, &ops).await.unwrap();
    assert!(!report.success);
    assert_eq!(report.applied, 0);
    assert_eq!(report.total, 3);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["operations"][0]["status"], "would_succeed");
    assert_eq!(json["operations"][1]["status"], "failed");
    assert_eq!(json["operations"][2]["status"], "not_attempted");

    let status = mgr.session_status(TENANT, &sid).await.unwrap();
    assert_eq!(status.wal_length, 1);
    assert_eq!(session_text(&mgr, &sid).await, "base");
}

#[tokio::test]
async fn external_change_gates_edits_until_synced() {
    let (mgr, dir) = manager();
    let source_path = dir.path().join("report.docx");

    // Seed the backing file with one paragraph.
    let mut doc = Document::empty();
    doc.apply(&add_paragraph("one")).unwrap();
    std::fs::write(&source_path, doc.to_bytes().unwrap()).unwrap();

    let source = SourceDescriptor::local(&source_path);
    let sid = mgr.open(TENANT, Some(source)).await.unwrap();
    assert_eq!(session_text(&mgr, &sid).await, "one");

    // Modify the file behind the engine's back.
    let mut external = Document::from_bytes(&std::fs::read(&source_path).unwrap()).unwrap();
    external.apply(&add_paragraph("two")).unwrap();
    std::fs::write(&source_path, external.to_bytes().unwrap()).unwrap();

    let state = mgr.check_external(TENANT, &sid).await.unwrap();
    let ExternalState::Pending(changes) = state else {
        panic!("external change should be detected");
    };
    assert_eq!(changes.summary()["added"], 1);
    assert!(mgr
        .session_status(TENANT, &sid)
        .await
        .unwrap()
        .pending_external_change);

    let err = mgr
        .apply_patch(TENANT, &sid, &[add_paragraph("blocked")])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ExternalChangeBlocked));

    let report = mgr.sync_external(TENANT, &sid).await.unwrap();
    assert!(report.changed);
    assert_eq!(report.summary["added"], 1);

    let status = mgr.session_status(TENANT, &sid).await.unwrap();
    assert!(!status.pending_external_change);
    assert_eq!(status.wal_length, 1);
    assert!(status.checkpoint_positions.contains(&1));

    let (entries, _) = mgr.read_history(TENANT, &sid, 0, 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].operation, docx_session_core::EditKind::ExternalSync);

    // The gate is open again.
    let report = mgr
        .apply_patch(TENANT, &sid, &[add_paragraph("three")])
        .await
        .unwrap();
    assert!(report.success);
    assert_eq!(session_text(&mgr, &sid).await, "onetwothree");
}

#[tokio::test]
async fn foreign_lock_holder_times_out_mutations() {
    let config = EngineConfig {
        lock_acquire_timeout: Duration::from_millis(300),
        lock_retry_min: Duration::from_millis(20),
        lock_retry_max: Duration::from_millis(50),
        ..EngineConfig::default()
    };
    let (mgr, dir) = manager_with(config);
    let sid = mgr.open(TENANT, None).await.unwrap();
    // Let the open lease's background release land before contending.
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Another process holds the session lock.
    let foreign = FileLock::new(dir.path());
    let held = foreign
        .acquire(
            TENANT,
            &format!("session:{sid}"),
            "other-process",
            Duration::from_secs(60),
        )
        .await
        .unwrap();
    assert!(held.acquired);

    let err = mgr
        .apply_patch(TENANT, &sid, &[add_paragraph("contended")])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Lock {
            kind: docx_session_core::LockErrorKind::AcquireTimeout,
            ..
        }
    ));

    // Nothing was committed.
    let status = mgr.session_status(TENANT, &sid).await.unwrap();
    assert_eq!(status.wal_length, 0);
}

#[tokio::test]
async fn repeated_removes_roll_back_as_a_unit() {
    let (mgr, _dir) = manager();
    let sid = mgr.open(TENANT, None).await.unwrap();
    mgr.apply_patch(TENANT, &sid, &[add_paragraph("victim")])
        .await
        .unwrap();

    let ops: Vec<PatchOp> = (0..10).map(|_| remove_paragraph(0)).collect();
    let report = mgr.apply_patch(TENANT, &sid, &ops).await.unwrap();
    assert!(!report.success);
    assert_eq!(report.applied, 0);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["operations"][0]["status"], "would_succeed");
    assert_eq!(json["operations"][1]["status"], "failed");
    for i in 2..10 {
        assert_eq!(json["operations"][i]["status"], "not_attempted");
    }

    let status = mgr.session_status(TENANT, &sid).await.unwrap();
    assert_eq!(status.wal_length, 1);
    assert_eq!(session_text(&mgr, &sid).await, "victim");
}

#[tokio::test]
async fn history_survives_restart() {
    let (mgr, dir) = manager();
    let sid = mgr.open(TENANT, None).await.unwrap();
    for text in ["a", "b", "c"] {
        mgr.apply_patch(TENANT, &sid, &[add_paragraph(text)])
            .await
            .unwrap();
    }
    mgr.undo(TENANT, &sid, 1).await.unwrap();
    mgr.close(TENANT, &sid).await.unwrap();
    drop(mgr);

    // A new process over the same directory.
    let mgr = manager_at(dir.path(), EngineConfig::default());
    mgr.resume(TENANT, &sid).await.unwrap();

    let status = mgr.session_status(TENANT, &sid).await.unwrap();
    assert_eq!(status.wal_length, 3);
    assert_eq!(status.cursor_position, 2);
    assert_eq!(session_text(&mgr, &sid).await, "ab");

    let cursor = mgr.redo(TENANT, &sid, 1).await.unwrap();
    assert_eq!(cursor, 3);
    assert_eq!(session_text(&mgr, &sid).await, "abc");
}

#[tokio::test]
async fn oversized_batch_is_rejected_up_front() {
    let (mgr, _dir) = manager();
    let sid = mgr.open(TENANT, None).await.unwrap();

    let ops: Vec<PatchOp> = (0..11).map(|i| add_paragraph(&format!("p{i}"))).collect();
    let err = mgr.apply_patch(TENANT, &sid, &ops).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));

    let err = mgr.read_history(TENANT, &sid, 0, 51).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
}

#[tokio::test]
async fn auto_save_mirrors_edits_to_source() {
    let (mgr, dir) = manager();
    let source_path = dir.path().join("mirrored.docx");
    std::fs::write(&source_path, Document::empty().to_bytes().unwrap()).unwrap();

    let sid = mgr
        .open(TENANT, Some(SourceDescriptor::local(&source_path)))
        .await
        .unwrap();
    mgr.apply_patch(TENANT, &sid, &[add_paragraph("mirrored")])
        .await
        .unwrap();

    let on_disk = Document::from_bytes(&std::fs::read(&source_path).unwrap()).unwrap();
    assert_eq!(on_disk.body().unwrap().text_content(), "mirrored");

    // The write-back is not mistaken for an external change.
    let state = mgr.check_external(TENANT, &sid).await.unwrap();
    assert!(matches!(state, ExternalState::Clean));
}

#[tokio::test]
async fn delete_session_removes_persistent_state() {
    let (mgr, _dir) = manager();
    let sid = mgr.open(TENANT, None).await.unwrap();
    mgr.apply_patch(TENANT, &sid, &[add_paragraph("x")])
        .await
        .unwrap();

    // Deleting an open session is refused.
    let err = mgr.delete_session(TENANT, &sid).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));

    mgr.close(TENANT, &sid).await.unwrap();
    let existed = mgr.delete_session(TENANT, &sid).await.unwrap();
    assert!(existed);

    assert!(matches!(
        mgr.session_status(TENANT, &sid).await.unwrap_err(),
        EngineError::NotFound(_)
    ));
    assert!(mgr.list_sessions(TENANT).await.unwrap().is_empty());
}

#[tokio::test]
async fn jump_to_is_bidirectional() {
    let (mgr, _dir) = manager();
    let sid = mgr.open(TENANT, None).await.unwrap();
    for text in ["a", "b", "c", "d"] {
        mgr.apply_patch(TENANT, &sid, &[add_paragraph(text)])
            .await
            .unwrap();
    }

    let cursor = mgr.jump_to(TENANT, &sid, 1).await.unwrap();
    assert_eq!(cursor, 1);
    assert_eq!(session_text(&mgr, &sid).await, "a");

    let cursor = mgr.jump_to(TENANT, &sid, 3).await.unwrap();
    assert_eq!(cursor, 3);
    assert_eq!(session_text(&mgr, &sid).await, "abc");

    let err = mgr.jump_to(TENANT, &sid, 9).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
}

#[tokio::test]
async fn sync_external_without_source_is_not_found() {
    let (mgr, _dir) = manager();
    let sid = mgr.open(TENANT, None).await.unwrap();

    let state = mgr.check_external(TENANT, &sid).await.unwrap();
    assert!(matches!(state, ExternalState::NoSource));

    let err = mgr.sync_external(TENANT, &sid).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn watcher_feeds_the_external_check() {
    let (mgr, dir) = manager();
    let source_path = dir.path().join("watched.docx");

    let mut doc = Document::empty();
    doc.apply(&add_paragraph("one")).unwrap();
    std::fs::write(&source_path, doc.to_bytes().unwrap()).unwrap();

    let source = SourceDescriptor::local(&source_path);
    let sid = mgr.open(TENANT, Some(source.clone())).await.unwrap();

    let watcher = NotifyWatcher::new();
    watcher.start_watch(TENANT, &sid, &source).unwrap();
    assert!(watcher.check(TENANT, &sid).is_none());

    let mut external = Document::from_bytes(&std::fs::read(&source_path).unwrap()).unwrap();
    external.apply(&add_paragraph("two")).unwrap();
    std::fs::write(&source_path, external.to_bytes().unwrap()).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The watcher's cheap signal is what prompts the full digest check.
    let change = watcher.check(TENANT, &sid).expect("watcher should flag the edit");
    assert_eq!(change.kind, ExternalChangeKind::Modified);

    let state = mgr.check_external(TENANT, &sid).await.unwrap();
    assert!(matches!(state, ExternalState::Pending(_)));
    watcher.stop_watch(TENANT, &sid);
}

#[tokio::test]
async fn compact_suggestion_appears_past_threshold() {
    let config = EngineConfig {
        wal_compact_threshold: 5,
        ..EngineConfig::default()
    };
    let (mgr, _dir) = manager_with(config);
    let sid = mgr.open(TENANT, None).await.unwrap();

    for i in 0..5 {
        mgr.apply_patch(TENANT, &sid, &[add_paragraph(&format!("p{i}"))])
            .await
            .unwrap();
    }
    let status = mgr.session_status(TENANT, &sid).await.unwrap();
    assert!(status.compact_suggested);

    let ops_json = json!([{"op": "replace_text", "path": "/body/paragraph[0]", "find": "p0", "replace": "q0"}]);
    let ops: Vec<PatchOp> = serde_json::from_value(ops_json).unwrap();
    let report = mgr.apply_patch(TENANT, &sid, &ops).await.unwrap();
    assert!(report.success);
    assert_eq!(session_text(&mgr, &sid).await, "q0p1p2p3p4");
}
