use std::path::{Path, PathBuf};

use async_trait::async_trait;
use docx_session_core::{CheckpointInfo, EngineError, SessionIndex, StorageBackend, WalEntry};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, instrument, warn};

/// Local filesystem storage backend.
///
/// Sessions, WALs, checkpoints and the index live under
/// `{base_dir}/{tenant_id}/sessions/`. All writes are atomic via a temp file
/// and rename, except checkpoint creation which is exclusive: checkpoints are
/// write-once per position, so the second writer must fail.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_dir: PathBuf,
}

impl LocalStorage {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    fn sessions_dir(&self, tenant_id: &str) -> PathBuf {
        self.base_dir.join(tenant_id).join("sessions")
    }

    fn session_path(&self, tenant_id: &str, session_id: &str) -> PathBuf {
        self.sessions_dir(tenant_id)
            .join(format!("{session_id}.docx"))
    }

    fn wal_path(&self, tenant_id: &str, session_id: &str) -> PathBuf {
        self.sessions_dir(tenant_id)
            .join(format!("{session_id}.wal"))
    }

    fn checkpoint_path(&self, tenant_id: &str, session_id: &str, position: u64) -> PathBuf {
        self.sessions_dir(tenant_id)
            .join(format!("{session_id}.ckpt.{position}.docx"))
    }

    fn index_path(&self, tenant_id: &str) -> PathBuf {
        self.sessions_dir(tenant_id).join("index.json")
    }

    async fn ensure_sessions_dir(&self, tenant_id: &str) -> Result<(), EngineError> {
        let dir = self.sessions_dir(tenant_id);
        fs::create_dir_all(&dir).await.map_err(|e| {
            EngineError::io(format!("failed to create sessions dir {}: {e}", dir.display()))
        })?;
        Ok(())
    }

    /// Atomic write via temp file + rename.
    async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), EngineError> {
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, data)
            .await
            .map_err(|e| EngineError::io(format!("failed to write {}: {e}", temp_path.display())))?;
        fs::rename(&temp_path, path)
            .await
            .map_err(|e| EngineError::io(format!("failed to rename to {}: {e}", path.display())))?;
        Ok(())
    }

    /// Current WAL length (entry count), without parsing entries.
    async fn wal_length(&self, tenant_id: &str, session_id: &str) -> Result<u64, EngineError> {
        let path = self.wal_path(tenant_id, session_id);
        let file = match fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(EngineError::io(format!(
                    "failed to open WAL {}: {e}",
                    path.display()
                )))
            }
        };
        let mut lines = BufReader::new(file).lines();
        let mut count = 0u64;
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| EngineError::io(format!("failed to read WAL line: {e}")))?
        {
            if !line.trim().is_empty() {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    // =========================================================================
    // Session image operations
    // =========================================================================

    #[instrument(skip(self), level = "debug")]
    async fn load_session(
        &self,
        tenant_id: &str,
        session_id: &str,
    ) -> Result<Option<Vec<u8>>, EngineError> {
        let path = self.session_path(tenant_id, session_id);
        match fs::read(&path).await {
            Ok(data) => {
                debug!("loaded session {} ({} bytes)", session_id, data.len());
                Ok(Some(data))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::io(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    #[instrument(skip(self, data), level = "debug", fields(data_len = data.len()))]
    async fn save_session(
        &self,
        tenant_id: &str,
        session_id: &str,
        data: &[u8],
    ) -> Result<(), EngineError> {
        self.ensure_sessions_dir(tenant_id).await?;
        Self::write_atomic(&self.session_path(tenant_id, session_id), data).await?;
        debug!("saved session {} ({} bytes)", session_id, data.len());
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_session(
        &self,
        tenant_id: &str,
        session_id: &str,
    ) -> Result<bool, EngineError> {
        let session_path = self.session_path(tenant_id, session_id);
        let existed = session_path.exists();

        for path in [session_path, self.wal_path(tenant_id, session_id)] {
            if let Err(e) = fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("failed to delete {}: {e}", path.display());
                }
            }
        }

        for ckpt in self.list_checkpoints(tenant_id, session_id).await? {
            let path = self.checkpoint_path(tenant_id, session_id, ckpt.position);
            if let Err(e) = fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("failed to delete checkpoint {}: {e}", path.display());
                }
            }
        }

        debug!("deleted session {} (existed: {})", session_id, existed);
        Ok(existed)
    }

    #[instrument(skip(self), level = "debug")]
    async fn session_exists(
        &self,
        tenant_id: &str,
        session_id: &str,
    ) -> Result<bool, EngineError> {
        Ok(self.session_path(tenant_id, session_id).exists())
    }

    // =========================================================================
    // Index operations
    // =========================================================================

    #[instrument(skip(self), level = "debug")]
    async fn load_index(&self, tenant_id: &str) -> Result<Option<SessionIndex>, EngineError> {
        let path = self.index_path(tenant_id);
        match fs::read_to_string(&path).await {
            Ok(json) => {
                let index: SessionIndex = serde_json::from_str(&json).map_err(|e| {
                    EngineError::serialization(format!("failed to parse index: {e}"))
                })?;
                debug!("loaded index with {} sessions", index.sessions.len());
                Ok(Some(index))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::io(format!(
                "failed to read index {}: {e}",
                path.display()
            ))),
        }
    }

    #[instrument(skip(self, index), level = "debug", fields(sessions = index.sessions.len()))]
    async fn save_index(&self, tenant_id: &str, index: &SessionIndex) -> Result<(), EngineError> {
        self.ensure_sessions_dir(tenant_id).await?;
        let json = serde_json::to_string_pretty(index)
            .map_err(|e| EngineError::serialization(format!("failed to serialize index: {e}")))?;
        Self::write_atomic(&self.index_path(tenant_id), json.as_bytes()).await?;
        debug!("saved index with {} sessions", index.sessions.len());
        Ok(())
    }

    // =========================================================================
    // WAL operations
    // =========================================================================

    #[instrument(skip(self, entries), level = "debug", fields(entries_count = entries.len()))]
    async fn append_wal(
        &self,
        tenant_id: &str,
        session_id: &str,
        entries: &[WalEntry],
    ) -> Result<u64, EngineError> {
        let current = self.wal_length(tenant_id, session_id).await?;
        if entries.is_empty() {
            return Ok(current);
        }

        // The log must stay dense: entries continue [0, current) exactly.
        for (i, entry) in entries.iter().enumerate() {
            let expected = current + i as u64;
            if entry.position != expected {
                return Err(EngineError::concurrent_modification(format!(
                    "WAL position {} does not continue the log at {expected}",
                    entry.position
                )));
            }
        }

        self.ensure_sessions_dir(tenant_id).await?;
        let path = self.wal_path(tenant_id, session_id);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| EngineError::io(format!("failed to open WAL {}: {e}", path.display())))?;

        for entry in entries {
            let line = serde_json::to_string(entry).map_err(|e| {
                EngineError::serialization(format!("failed to serialize WAL entry: {e}"))
            })?;
            file.write_all(line.as_bytes())
                .await
                .map_err(|e| EngineError::io(format!("failed to write WAL: {e}")))?;
            file.write_all(b"\n")
                .await
                .map_err(|e| EngineError::io(format!("failed to write WAL newline: {e}")))?;
        }

        // Durable before append returns success.
        file.sync_all()
            .await
            .map_err(|e| EngineError::io(format!("failed to sync WAL: {e}")))?;

        let new_length = current + entries.len() as u64;
        debug!(
            "appended {} WAL entries, new length {}",
            entries.len(),
            new_length
        );
        Ok(new_length)
    }

    #[instrument(skip(self), level = "debug")]
    async fn read_wal(
        &self,
        tenant_id: &str,
        session_id: &str,
        from: u64,
        limit: Option<u64>,
    ) -> Result<(Vec<WalEntry>, bool), EngineError> {
        let path = self.wal_path(tenant_id, session_id);
        let file = match fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((vec![], false)),
            Err(e) => {
                return Err(EngineError::io(format!(
                    "failed to open WAL {}: {e}",
                    path.display()
                )))
            }
        };

        let mut lines = BufReader::new(file).lines();
        let mut entries = Vec::new();
        let limit = limit.unwrap_or(u64::MAX);

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| EngineError::io(format!("failed to read WAL line: {e}")))?
        {
            if line.trim().is_empty() {
                continue;
            }
            let entry: WalEntry = serde_json::from_str(&line).map_err(|e| {
                EngineError::corruption(format!("unparseable WAL entry: {e}"))
            })?;
            if entry.position >= from {
                if (entries.len() as u64) < limit {
                    entries.push(entry);
                } else {
                    return Ok((entries, true));
                }
            }
        }

        debug!("read {} WAL entries from position {}", entries.len(), from);
        Ok((entries, false))
    }

    #[instrument(skip(self), level = "debug")]
    async fn truncate_wal(
        &self,
        tenant_id: &str,
        session_id: &str,
        keep_from: u64,
    ) -> Result<u64, EngineError> {
        let (entries, _) = self.read_wal(tenant_id, session_id, 0, None).await?;
        let (to_keep, to_remove): (Vec<_>, Vec<_>) =
            entries.into_iter().partition(|e| e.position < keep_from);

        let removed_count = to_remove.len() as u64;
        if removed_count == 0 {
            return Ok(0);
        }

        let path = self.wal_path(tenant_id, session_id);
        let temp_path = path.with_extension("wal.tmp");
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| EngineError::io(format!("failed to create temp WAL: {e}")))?;

        for entry in &to_keep {
            let line = serde_json::to_string(entry).map_err(|e| {
                EngineError::serialization(format!("failed to serialize WAL entry: {e}"))
            })?;
            file.write_all(line.as_bytes())
                .await
                .map_err(|e| EngineError::io(format!("failed to write WAL: {e}")))?;
            file.write_all(b"\n")
                .await
                .map_err(|e| EngineError::io(format!("failed to write WAL newline: {e}")))?;
        }
        file.sync_all()
            .await
            .map_err(|e| EngineError::io(format!("failed to sync temp WAL: {e}")))?;

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| EngineError::io(format!("failed to rename temp WAL: {e}")))?;

        debug!("truncated WAL, removed {} entries", removed_count);
        Ok(removed_count)
    }

    // =========================================================================
    // Checkpoint operations
    // =========================================================================

    #[instrument(skip(self, data), level = "debug", fields(data_len = data.len()))]
    async fn save_checkpoint(
        &self,
        tenant_id: &str,
        session_id: &str,
        position: u64,
        data: &[u8],
    ) -> Result<(), EngineError> {
        self.ensure_sessions_dir(tenant_id).await?;
        let path = self.checkpoint_path(tenant_id, session_id, position);

        // Write-once: exclusive create makes the second writer fail.
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(EngineError::concurrent_modification(format!(
                    "checkpoint at position {position} already exists"
                )))
            }
            Err(e) => {
                return Err(EngineError::io(format!(
                    "failed to create checkpoint {}: {e}",
                    path.display()
                )))
            }
        };

        file.write_all(data)
            .await
            .map_err(|e| EngineError::io(format!("failed to write checkpoint: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| EngineError::io(format!("failed to sync checkpoint: {e}")))?;

        debug!("saved checkpoint at position {} ({} bytes)", position, data.len());
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn load_checkpoint(
        &self,
        tenant_id: &str,
        session_id: &str,
        position: u64,
    ) -> Result<Option<Vec<u8>>, EngineError> {
        let path = self.checkpoint_path(tenant_id, session_id, position);
        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::io(format!("failed to read checkpoint: {e}"))),
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn load_nearest_checkpoint(
        &self,
        tenant_id: &str,
        session_id: &str,
        position: u64,
    ) -> Result<Option<(Vec<u8>, u64)>, EngineError> {
        let checkpoints = self.list_checkpoints(tenant_id, session_id).await?;
        let Some(nearest) = checkpoints
            .iter()
            .map(|c| c.position)
            .filter(|p| *p <= position)
            .max()
        else {
            return Ok(None);
        };

        match self.load_checkpoint(tenant_id, session_id, nearest).await? {
            Some(data) => Ok(Some((data, nearest))),
            // Listed a moment ago but gone now; treat as absent.
            None => Ok(None),
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_checkpoint(
        &self,
        tenant_id: &str,
        session_id: &str,
        position: u64,
    ) -> Result<bool, EngineError> {
        let path = self.checkpoint_path(tenant_id, session_id, position);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(EngineError::io(format!(
                "failed to delete checkpoint {}: {e}",
                path.display()
            ))),
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_checkpoints(
        &self,
        tenant_id: &str,
        session_id: &str,
    ) -> Result<Vec<CheckpointInfo>, EngineError> {
        let dir = self.sessions_dir(tenant_id);
        if !dir.exists() {
            return Ok(vec![]);
        }

        let prefix = format!("{session_id}.ckpt.");
        let mut checkpoints = Vec::new();

        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| EngineError::io(format!("failed to read dir {}: {e}", dir.display())))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EngineError::io(format!("failed to read dir entry: {e}")))?
        {
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some(position) = file_name
                .strip_prefix(&prefix)
                .and_then(|s| s.strip_suffix(".docx"))
                .and_then(|s| s.parse::<u64>().ok())
            else {
                continue;
            };

            let metadata = entry
                .metadata()
                .await
                .map_err(|e| EngineError::io(format!("failed to get metadata: {e}")))?;
            checkpoints.push(CheckpointInfo {
                position,
                created_at: metadata
                    .modified()
                    .map(chrono::DateTime::from)
                    .unwrap_or_else(|_| chrono::Utc::now()),
                size_bytes: metadata.len(),
            });
        }

        checkpoints.sort_by_key(|c| c.position);
        debug!(
            "listed {} checkpoints for session {}",
            checkpoints.len(),
            session_id
        );
        Ok(checkpoints)
    }
}
