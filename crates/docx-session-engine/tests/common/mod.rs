// Each test binary uses its own subset of these helpers.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use docx_session_content::PatchOp;
use docx_session_engine::{EngineConfig, SessionManager};
use docx_session_store::{FileLock, LocalSourceStore, LocalStorage};
use serde_json::json;
use tempfile::TempDir;

pub const TENANT: &str = "acme";

/// A manager over a fresh temp directory.
pub fn manager() -> (SessionManager, TempDir) {
    manager_with(EngineConfig::default())
}

pub fn manager_with(mut config: EngineConfig) -> (SessionManager, TempDir) {
    let dir = TempDir::new().unwrap();
    config.sessions_dir = dir.path().to_path_buf();
    (manager_at(dir.path(), config), dir)
}

/// A manager over an existing directory, for restart/multi-process tests.
pub fn manager_at(base: &Path, config: EngineConfig) -> SessionManager {
    SessionManager::new(
        Arc::new(LocalStorage::new(base)),
        Arc::new(FileLock::new(base)),
        Arc::new(LocalSourceStore::new()),
        config,
    )
}

pub fn add_paragraph(text: &str) -> PatchOp {
    PatchOp::Add {
        path: "/body/paragraph[*]".into(),
        value: json!({"type": "paragraph", "text": text}),
    }
}

pub fn remove_paragraph(index: usize) -> PatchOp {
    PatchOp::Remove {
        path: format!("/body/paragraph[{index}]"),
    }
}

/// Flattened text of the session's current image.
pub async fn session_text(manager: &SessionManager, session_id: &str) -> String {
    let bytes = manager.export(TENANT, session_id).await.unwrap();
    let doc = docx_session_content::Document::from_bytes(&bytes).unwrap();
    doc.body().unwrap().text_content()
}
