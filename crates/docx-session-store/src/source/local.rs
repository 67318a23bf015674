use std::path::{Path, PathBuf};

use async_trait::async_trait;
use docx_session_core::{EngineError, SourceDescriptor, SourceMetadata, SourceStore};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, instrument};

/// Source store for local files.
///
/// Cloud descriptors are rejected here; a hosted deployment supplies its own
/// `SourceStore` for them.
#[derive(Debug, Clone, Default)]
pub struct LocalSourceStore;

impl LocalSourceStore {
    pub fn new() -> Self {
        Self
    }

    fn file_path(source: &SourceDescriptor) -> Result<&Path, EngineError> {
        match source {
            SourceDescriptor::LocalFile { path } => Ok(path.as_path()),
            SourceDescriptor::Cloud { .. } => Err(EngineError::InvalidRequest(format!(
                "local source store cannot reach cloud source {}",
                source.location()
            ))),
        }
    }
}

#[async_trait]
impl SourceStore for LocalSourceStore {
    fn store_name(&self) -> &'static str {
        "local"
    }

    #[instrument(skip(self), level = "debug")]
    async fn read(&self, source: &SourceDescriptor) -> Result<Vec<u8>, EngineError> {
        let path = Self::file_path(source)?;
        let data = fs::read(path)
            .await
            .map_err(|e| EngineError::io(format!("failed to read {}: {e}", path.display())))?;
        debug!("read {} bytes from {}", data.len(), path.display());
        Ok(data)
    }

    #[instrument(skip(self, data), level = "debug", fields(data_len = data.len()))]
    async fn write(&self, source: &SourceDescriptor, data: &[u8]) -> Result<(), EngineError> {
        let path = Self::file_path(source)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                EngineError::io(format!(
                    "failed to create parent directory for {}: {e}",
                    path.display()
                ))
            })?;
        }

        // Atomic: the watcher and other readers never observe a torn file.
        let temp_path = temp_sibling(path);
        fs::write(&temp_path, data)
            .await
            .map_err(|e| EngineError::io(format!("failed to write {}: {e}", temp_path.display())))?;
        fs::rename(&temp_path, path)
            .await
            .map_err(|e| EngineError::io(format!("failed to rename to {}: {e}", path.display())))?;

        debug!("wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn metadata(
        &self,
        source: &SourceDescriptor,
    ) -> Result<Option<SourceMetadata>, EngineError> {
        let path = Self::file_path(source)?;
        let content = match fs::read(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(EngineError::io(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };
        let meta = fs::metadata(path)
            .await
            .map_err(|e| EngineError::io(format!("failed to stat {}: {e}", path.display())))?;

        let mut hasher = Sha256::new();
        hasher.update(&content);

        Ok(Some(SourceMetadata {
            size_bytes: meta.len(),
            modified_at: meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
            etag: None,
            content_hash: Some(hasher.finalize().to_vec()),
        }))
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| std::ffi::OsString::from("source"));
    name.push(".sync.tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = LocalSourceStore::new();
        let source = SourceDescriptor::local(dir.path().join("nested").join("out.docx"));

        let data = b"PK\x03\x04fake docx content";
        store.write(&source, data).await.unwrap();
        assert_eq!(store.read(&source).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_metadata_hashes_content() {
        let dir = TempDir::new().unwrap();
        let store = LocalSourceStore::new();
        let source = SourceDescriptor::local(dir.path().join("out.docx"));

        assert!(store.metadata(&source).await.unwrap().is_none());

        store.write(&source, b"version one").await.unwrap();
        let first = store.metadata(&source).await.unwrap().unwrap();
        assert_eq!(first.size_bytes, 11);

        store.write(&source, b"version two").await.unwrap();
        let second = store.metadata(&source).await.unwrap().unwrap();
        assert_ne!(first.content_hash, second.content_hash);
    }

    #[tokio::test]
    async fn test_cloud_descriptor_rejected() {
        let store = LocalSourceStore::new();
        let source = SourceDescriptor::Cloud {
            connection_id: "conn".into(),
            path: "/a.docx".into(),
            file_id: None,
        };
        assert!(store.read(&source).await.is_err());
        assert!(store.write(&source, b"x").await.is_err());
    }
}
