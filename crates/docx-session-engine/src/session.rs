use std::sync::Arc;

use dashmap::DashMap;
use docx_session_content::{diff, Document, DocumentDiff, PatchOp};
use docx_session_core::{
    EditKind, EngineError, LockManager, SessionIndex, SessionIndexEntry, SourceDescriptor,
    SourceStore, StorageBackend, WalEntry,
};
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::config::EngineConfig;
use crate::lease::LockLease;
use crate::patch::PatchReport;

/// Public view of one session's state.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub source: Option<SourceDescriptor>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub modified_at: chrono::DateTime<chrono::Utc>,
    pub wal_length: u64,
    pub cursor_position: u64,
    pub can_undo: bool,
    pub can_redo: bool,
    pub checkpoint_positions: Vec<u64>,
    pub pending_external_change: bool,
    /// Set when the WAL has grown past the configured compaction threshold.
    /// Advisory only: the history itself is never compacted.
    pub compact_suggested: bool,
    pub open: bool,
}

/// Result of `check_external`.
#[derive(Debug)]
pub enum ExternalState {
    /// The session has no source; implicitly clean.
    NoSource,
    /// Source and in-memory image agree.
    Clean,
    /// The source changed under us; mutations are now gated.
    Pending(DocumentDiff),
}

/// Result of `sync_external`.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// False when the source already matched the in-memory image.
    pub changed: bool,
    pub summary: serde_json::Value,
}

struct OpenSession {
    tenant_id: String,
    session_id: String,
    doc: Document,
    cursor: u64,
    wal_length: u64,
    source: Option<SourceDescriptor>,
    pending_external_change: bool,
    auto_save: bool,
    last_wal_ts: i64,
}

impl OpenSession {
    /// WAL timestamps are clamped monotone within the session.
    fn next_wal_ts(&mut self) -> i64 {
        let ts = chrono::Utc::now().timestamp().max(self.last_wal_ts);
        self.last_wal_ts = ts;
        ts
    }

    /// The edit gate. A session with no source is implicitly clean.
    fn check_gate(&self) -> Result<(), EngineError> {
        if self.pending_external_change && self.source.is_some() {
            return Err(EngineError::ExternalChangeBlocked);
        }
        Ok(())
    }
}

/// Orchestrates the content codec, WAL, checkpoints, index, locks and diff
/// engine into the observable session lifecycle.
///
/// Reads may run in parallel across sessions; any mutation takes exclusive
/// in-process access to its session plus the cross-process session lock, and
/// index writes additionally serialise on the tenant index lock. Lock order
/// is always session before index.
pub struct SessionManager {
    storage: Arc<dyn StorageBackend>,
    locks: Arc<dyn LockManager>,
    sources: Arc<dyn SourceStore>,
    config: EngineConfig,
    holder_id: String,
    sessions: DashMap<(String, String), Arc<RwLock<OpenSession>>>,
}

const INDEX_RESOURCE: &str = "index";

impl SessionManager {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        locks: Arc<dyn LockManager>,
        sources: Arc<dyn SourceStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            storage,
            locks,
            sources,
            config,
            holder_id: uuid::Uuid::new_v4().to_string(),
            sessions: DashMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn session_resource(session_id: &str) -> String {
        format!("session:{session_id}")
    }

    async fn session_lease(
        &self,
        tenant_id: &str,
        session_id: &str,
    ) -> Result<LockLease, EngineError> {
        LockLease::acquire(
            Arc::clone(&self.locks),
            tenant_id,
            &Self::session_resource(session_id),
            &self.holder_id,
            &self.config,
        )
        .await
    }

    /// Acquire-modify-release on the tenant index.
    async fn update_index<F>(&self, tenant_id: &str, mutate: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut SessionIndex) -> Result<(), EngineError> + Send,
    {
        let _lease = LockLease::acquire(
            Arc::clone(&self.locks),
            tenant_id,
            INDEX_RESOURCE,
            &self.holder_id,
            &self.config,
        )
        .await?;
        let mut index = self.storage.load_index(tenant_id).await?.unwrap_or_default();
        mutate(&mut index)?;
        self.storage.save_index(tenant_id, &index).await
    }

    fn open_handle(
        &self,
        tenant_id: &str,
        session_id: &str,
    ) -> Result<Arc<RwLock<OpenSession>>, EngineError> {
        self.sessions
            .get(&(tenant_id.to_string(), session_id.to_string()))
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::NotFound(format!("session {session_id} is not open")))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create a session from a source, or from the empty template.
    ///
    /// The position-0 checkpoint is written unconditionally so that full
    /// replay is always possible.
    #[instrument(skip(self), level = "debug")]
    pub async fn open(
        &self,
        tenant_id: &str,
        source: Option<SourceDescriptor>,
    ) -> Result<String, EngineError> {
        let session_id = uuid::Uuid::new_v4().simple().to_string();
        let _lease = self.session_lease(tenant_id, &session_id).await?;

        let (doc, source_bytes) = match &source {
            Some(descriptor) => {
                let bytes = self.sources.read(descriptor).await?;
                (Document::from_bytes(&bytes)?, Some(bytes))
            }
            None => (Document::empty(), None),
        };
        let image = doc.to_bytes()?;

        self.storage
            .save_checkpoint(tenant_id, &session_id, 0, &image)
            .await?;
        self.storage
            .save_session(tenant_id, &session_id, &image)
            .await?;

        // Loading may have stamped identifiers onto a foreign document.
        // Under auto-save, converge the source immediately so the very first
        // check_external does not see our own stamping as an external edit.
        if self.config.auto_save {
            if let (Some(descriptor), Some(bytes)) = (&source, &source_bytes) {
                if image != *bytes {
                    self.sources.write(descriptor, &image).await?;
                }
            }
        }

        let now = chrono::Utc::now();
        let entry = SessionIndexEntry {
            source: source.clone(),
            created_at: now,
            modified_at: now,
            wal_length: 0,
            cursor_position: 0,
            checkpoint_positions: vec![0],
            pending_external_change: false,
            auto_save: self.config.auto_save,
        };
        let entry_id = session_id.clone();
        self.update_index(tenant_id, move |index| {
            index.sessions.insert(entry_id, entry);
            Ok(())
        })
        .await?;

        let open = OpenSession {
            tenant_id: tenant_id.to_string(),
            session_id: session_id.clone(),
            doc,
            cursor: 0,
            wal_length: 0,
            source,
            pending_external_change: false,
            auto_save: self.config.auto_save,
            last_wal_ts: now.timestamp(),
        };
        self.sessions.insert(
            (tenant_id.to_string(), session_id.clone()),
            Arc::new(RwLock::new(open)),
        );

        info!("opened session {session_id} for tenant {tenant_id}");
        Ok(session_id)
    }

    /// Reopen a persisted session after a restart: rebuild the image from the
    /// nearest checkpoint and replay up to the recorded cursor.
    #[instrument(skip(self), level = "debug")]
    pub async fn resume(&self, tenant_id: &str, session_id: &str) -> Result<(), EngineError> {
        let key = (tenant_id.to_string(), session_id.to_string());
        if self.sessions.contains_key(&key) {
            return Ok(());
        }

        let _lease = self.session_lease(tenant_id, session_id).await?;
        let index = self.storage.load_index(tenant_id).await?.unwrap_or_default();
        let entry = index.entry(session_id)?.clone();

        let doc = self
            .rebuild_at(tenant_id, session_id, entry.cursor_position)
            .await?;

        let open = OpenSession {
            tenant_id: tenant_id.to_string(),
            session_id: session_id.to_string(),
            doc,
            cursor: entry.cursor_position,
            wal_length: entry.wal_length,
            source: entry.source.clone(),
            pending_external_change: entry.pending_external_change,
            auto_save: entry.auto_save,
            last_wal_ts: entry.modified_at.timestamp(),
        };
        self.sessions.insert(key, Arc::new(RwLock::new(open)));

        info!(
            "resumed session {session_id} for tenant {tenant_id} at cursor {}",
            entry.cursor_position
        );
        Ok(())
    }

    /// Flush the in-memory image and drop it. Persistent state remains.
    #[instrument(skip(self), level = "debug")]
    pub async fn close(&self, tenant_id: &str, session_id: &str) -> Result<(), EngineError> {
        let handle = self.open_handle(tenant_id, session_id)?;
        {
            let session = handle.write().await;
            let _lease = self.session_lease(tenant_id, session_id).await?;
            let image = session.doc.to_bytes()?;
            self.storage
                .save_session(tenant_id, session_id, &image)
                .await?;
        }
        self.sessions
            .remove(&(tenant_id.to_string(), session_id.to_string()));
        info!("closed session {session_id} for tenant {tenant_id}");
        Ok(())
    }

    /// Remove a closed session's persistent state.
    #[instrument(skip(self), level = "debug")]
    pub async fn delete_session(
        &self,
        tenant_id: &str,
        session_id: &str,
    ) -> Result<bool, EngineError> {
        let key = (tenant_id.to_string(), session_id.to_string());
        if self.sessions.contains_key(&key) {
            return Err(EngineError::InvalidRequest(format!(
                "session {session_id} is open; close it before deleting"
            )));
        }

        let _lease = self.session_lease(tenant_id, session_id).await?;
        let existed = self.storage.delete_session(tenant_id, session_id).await?;
        let entry_id = session_id.to_string();
        self.update_index(tenant_id, move |index| {
            index.sessions.remove(&entry_id);
            Ok(())
        })
        .await?;
        Ok(existed)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// All sessions known to the tenant index.
    pub async fn list_sessions(&self, tenant_id: &str) -> Result<Vec<SessionStatus>, EngineError> {
        let index = self.storage.load_index(tenant_id).await?.unwrap_or_default();
        Ok(index
            .sessions
            .iter()
            .map(|(id, entry)| self.status_of(tenant_id, id, entry))
            .collect())
    }

    pub async fn session_status(
        &self,
        tenant_id: &str,
        session_id: &str,
    ) -> Result<SessionStatus, EngineError> {
        let index = self.storage.load_index(tenant_id).await?.unwrap_or_default();
        let entry = index.entry(session_id)?;
        Ok(self.status_of(tenant_id, session_id, entry))
    }

    fn status_of(&self, tenant_id: &str, session_id: &str, entry: &SessionIndexEntry) -> SessionStatus {
        SessionStatus {
            session_id: session_id.to_string(),
            source: entry.source.clone(),
            created_at: entry.created_at,
            modified_at: entry.modified_at,
            wal_length: entry.wal_length,
            cursor_position: entry.cursor_position,
            can_undo: entry.can_undo(),
            can_redo: entry.can_redo(),
            checkpoint_positions: entry.checkpoint_positions.clone(),
            pending_external_change: entry.pending_external_change,
            compact_suggested: entry.wal_length >= self.config.wal_compact_threshold,
            open: self
                .sessions
                .contains_key(&(tenant_id.to_string(), session_id.to_string())),
        }
    }

    /// Read a window of the session's history.
    pub async fn read_history(
        &self,
        tenant_id: &str,
        session_id: &str,
        from: u64,
        limit: u64,
    ) -> Result<(Vec<WalEntry>, bool), EngineError> {
        if limit > self.config.max_query_limit {
            return Err(EngineError::InvalidRequest(format!(
                "history limit {limit} exceeds the maximum of {}",
                self.config.max_query_limit
            )));
        }
        self.storage
            .read_wal(tenant_id, session_id, from, Some(limit))
            .await
    }

    /// The session's current document bytes.
    pub async fn export(&self, tenant_id: &str, session_id: &str) -> Result<Vec<u8>, EngineError> {
        let handle = self.open_handle(tenant_id, session_id)?;
        let session = handle.read().await;
        session.doc.to_bytes()
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Apply a batch of typed operations.
    ///
    /// The batch is all-or-nothing: operations apply in order against the
    /// in-memory image, and the first failure rolls the image back to the
    /// pre-batch snapshot and commits nothing. Per-op results are always
    /// reported; only conditions that prevent the batch from starting at all
    /// (unknown session, gate closed, oversized batch) surface as errors.
    #[instrument(skip(self, ops), level = "debug", fields(ops = ops.len()))]
    pub async fn apply_patch(
        &self,
        tenant_id: &str,
        session_id: &str,
        ops: &[PatchOp],
    ) -> Result<PatchReport, EngineError> {
        if ops.is_empty() {
            return Err(EngineError::InvalidRequest("empty patch batch".into()));
        }
        if ops.len() > self.config.max_batch_ops {
            return Err(EngineError::InvalidRequest(format!(
                "batch of {} exceeds the maximum of {} operations",
                ops.len(),
                self.config.max_batch_ops
            )));
        }

        let handle = self.open_handle(tenant_id, session_id)?;
        let mut session = handle.write().await;
        session.check_gate()?;

        let _lease = self.session_lease(tenant_id, session_id).await?;

        // Editing after undo discards the forward tail.
        self.discard_forward_tail(&mut session).await?;

        let snapshot = session.doc.clone();
        let mut outcomes = Vec::with_capacity(ops.len());
        for (i, op) in ops.iter().enumerate() {
            match session.doc.apply(op) {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    session.doc = snapshot;
                    debug!("batch aborted at op {i}: {err}");
                    return Ok(PatchReport::aborted(ops, i, &err, outcomes));
                }
            }
        }

        // Commit order: WAL, checkpoint, image, source, index. Interruption
        // at any point leaves a valid prefix.
        let ts = session.next_wal_ts();
        let mut entries = Vec::with_capacity(ops.len());
        for (i, op) in ops.iter().enumerate() {
            entries.push(WalEntry {
                position: session.cursor + i as u64,
                operation: op.kind(),
                path: op.target_path().to_string(),
                patch: serde_json::to_value(op).map_err(|e| {
                    EngineError::serialization(format!("failed to serialize op: {e}"))
                })?,
                ts,
            });
        }
        let new_length = self
            .storage
            .append_wal(tenant_id, session_id, &entries)
            .await?;
        session.cursor = new_length;
        session.wal_length = new_length;

        let image = session.doc.to_bytes()?;
        let new_checkpoint = if session.cursor % self.config.checkpoint_interval == 0 {
            self.storage
                .save_checkpoint(tenant_id, session_id, session.cursor, &image)
                .await?;
            Some(session.cursor)
        } else {
            None
        };
        self.storage
            .save_session(tenant_id, session_id, &image)
            .await?;
        self.write_back(&session, &image).await?;

        let cursor = session.cursor;
        let entry_id = session_id.to_string();
        self.update_index(tenant_id, move |index| {
            let entry = index.entry_mut(&entry_id)?;
            entry.wal_length = cursor;
            entry.cursor_position = cursor;
            if let Some(position) = new_checkpoint {
                entry.record_checkpoint(position);
            }
            entry.touch();
            Ok(())
        })
        .await?;

        debug!(
            "applied batch of {} ops, cursor now {}",
            ops.len(),
            session.cursor
        );
        Ok(PatchReport::committed(ops, outcomes))
    }

    /// Move the cursor back `steps` entries. The WAL is untouched.
    #[instrument(skip(self), level = "debug")]
    pub async fn undo(
        &self,
        tenant_id: &str,
        session_id: &str,
        steps: u64,
    ) -> Result<u64, EngineError> {
        let handle = self.open_handle(tenant_id, session_id)?;
        let mut session = handle.write().await;
        session.check_gate()?;
        let _lease = self.session_lease(tenant_id, session_id).await?;

        let target = session.cursor.saturating_sub(steps);
        self.seek(&mut session, target).await?;
        Ok(session.cursor)
    }

    /// Move the cursor forward `steps` entries by replaying the WAL on the
    /// current image.
    #[instrument(skip(self), level = "debug")]
    pub async fn redo(
        &self,
        tenant_id: &str,
        session_id: &str,
        steps: u64,
    ) -> Result<u64, EngineError> {
        let handle = self.open_handle(tenant_id, session_id)?;
        let mut session = handle.write().await;
        session.check_gate()?;
        let _lease = self.session_lease(tenant_id, session_id).await?;

        let target = session.wal_length.min(session.cursor.saturating_add(steps));
        self.seek(&mut session, target).await?;
        Ok(session.cursor)
    }

    /// Jump to an absolute WAL position.
    #[instrument(skip(self), level = "debug")]
    pub async fn jump_to(
        &self,
        tenant_id: &str,
        session_id: &str,
        position: u64,
    ) -> Result<u64, EngineError> {
        let handle = self.open_handle(tenant_id, session_id)?;
        let mut session = handle.write().await;
        session.check_gate()?;

        if position > session.wal_length {
            return Err(EngineError::InvalidRequest(format!(
                "position {position} is beyond the WAL length {}",
                session.wal_length
            )));
        }
        let _lease = self.session_lease(tenant_id, session_id).await?;
        self.seek(&mut session, position).await?;
        Ok(session.cursor)
    }

    // =========================================================================
    // External reconciliation
    // =========================================================================

    /// Compare the in-memory image against the source by content digest.
    ///
    /// Idempotent; never touches the WAL. Sets or clears the pending flag and
    /// returns a transient diff when the source moved.
    #[instrument(skip(self), level = "debug")]
    pub async fn check_external(
        &self,
        tenant_id: &str,
        session_id: &str,
    ) -> Result<ExternalState, EngineError> {
        let handle = self.open_handle(tenant_id, session_id)?;
        let mut session = handle.write().await;

        let Some(descriptor) = session.source.clone() else {
            // No source configured: implicitly clean, even if a stale flag
            // survived in the index.
            if session.pending_external_change {
                self.set_pending_flag(&mut session, false).await?;
            }
            return Ok(ExternalState::NoSource);
        };

        let source_doc = Document::from_bytes(&self.sources.read(&descriptor).await?)?;
        if source_doc.digest()? == session.doc.digest()? {
            if session.pending_external_change {
                self.set_pending_flag(&mut session, false).await?;
            }
            return Ok(ExternalState::Clean);
        }

        let changes = diff(&session.doc, &source_doc)?;
        if !session.pending_external_change {
            self.set_pending_flag(&mut session, true).await?;
        }
        Ok(ExternalState::Pending(changes))
    }

    /// Adopt the source's current bytes as the new image, recording one
    /// `external_sync` WAL entry and a checkpoint at the resulting position.
    #[instrument(skip(self), level = "debug")]
    pub async fn sync_external(
        &self,
        tenant_id: &str,
        session_id: &str,
    ) -> Result<SyncReport, EngineError> {
        let handle = self.open_handle(tenant_id, session_id)?;
        let mut session = handle.write().await;

        let Some(descriptor) = session.source.clone() else {
            return Err(EngineError::NotFound(format!(
                "session {session_id} has no source configured"
            )));
        };

        let _lease = self.session_lease(tenant_id, session_id).await?;

        let source_doc = Document::from_bytes(&self.sources.read(&descriptor).await?)?;
        let changes = diff(&session.doc, &source_doc)?;
        let summary = changes.summary();

        if changes.is_empty() {
            if session.pending_external_change {
                self.set_pending_flag(&mut session, false).await?;
            }
            return Ok(SyncReport {
                changed: false,
                summary,
            });
        }

        // Appending mid-history would break WAL density, so a sync after
        // undo discards the forward tail like any other mutation.
        self.discard_forward_tail(&mut session).await?;

        session.doc = source_doc;
        let ts = session.next_wal_ts();
        let entry = WalEntry {
            position: session.cursor,
            operation: EditKind::ExternalSync,
            path: "/".to_string(),
            patch: json!({ "summary": summary }),
            ts,
        };
        let new_length = self
            .storage
            .append_wal(tenant_id, session_id, &[entry])
            .await?;
        session.cursor = new_length;
        session.wal_length = new_length;

        // The checkpoint at the sync position is what makes the opaque
        // external_sync entry replayable.
        let image = session.doc.to_bytes()?;
        self.storage
            .save_checkpoint(tenant_id, session_id, session.cursor, &image)
            .await?;
        self.storage
            .save_session(tenant_id, session_id, &image)
            .await?;

        session.pending_external_change = false;
        let cursor = session.cursor;
        let entry_id = session_id.to_string();
        self.update_index(tenant_id, move |index| {
            let entry = index.entry_mut(&entry_id)?;
            entry.wal_length = cursor;
            entry.cursor_position = cursor;
            entry.record_checkpoint(cursor);
            entry.pending_external_change = false;
            entry.touch();
            Ok(())
        })
        .await?;

        info!("synced session {session_id} from source, cursor now {cursor}");
        Ok(SyncReport {
            changed: true,
            summary,
        })
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Rebuild the document image at `target` from the nearest checkpoint.
    async fn rebuild_at(
        &self,
        tenant_id: &str,
        session_id: &str,
        target: u64,
    ) -> Result<Document, EngineError> {
        let (bytes, position) = self
            .storage
            .load_nearest_checkpoint(tenant_id, session_id, target)
            .await?
            .ok_or_else(|| {
                EngineError::corruption(format!(
                    "no checkpoint at or below position {target} for session {session_id}"
                ))
            })?;
        let mut doc = Document::from_bytes(&bytes)?;
        self.replay(&mut doc, tenant_id, session_id, position, target)
            .await?;
        Ok(doc)
    }

    /// Replay WAL entries `[from, to)` onto `doc`.
    async fn replay(
        &self,
        doc: &mut Document,
        tenant_id: &str,
        session_id: &str,
        from: u64,
        to: u64,
    ) -> Result<(), EngineError> {
        if from >= to {
            return Ok(());
        }
        let (entries, _) = self
            .storage
            .read_wal(tenant_id, session_id, from, Some(to - from))
            .await?;
        if entries.len() as u64 != to - from {
            return Err(EngineError::corruption(format!(
                "WAL for session {session_id} is missing entries in [{from}, {to})"
            )));
        }

        for entry in entries {
            if entry.operation == EditKind::ExternalSync {
                // The op record only summarises the sync; the actual state
                // lives in the checkpoint written at the resulting position.
                let bytes = self
                    .storage
                    .load_checkpoint(tenant_id, session_id, entry.position + 1)
                    .await?
                    .ok_or_else(|| {
                        EngineError::corruption(format!(
                            "external sync at position {} has no checkpoint",
                            entry.position
                        ))
                    })?;
                *doc = Document::from_bytes(&bytes)?;
                continue;
            }
            let op: PatchOp = serde_json::from_value(entry.patch.clone()).map_err(|e| {
                EngineError::corruption(format!(
                    "WAL entry {} is not a replayable op: {e}",
                    entry.position
                ))
            })?;
            doc.apply(&op).map_err(|e| {
                EngineError::corruption(format!(
                    "WAL entry {} does not replay cleanly: {e}",
                    entry.position
                ))
            })?;
        }
        Ok(())
    }

    /// Move the cursor to `target`, rebuilding (backward) or replaying
    /// (forward) as needed, then persist the derived state.
    async fn seek(&self, session: &mut OpenSession, target: u64) -> Result<(), EngineError> {
        if target == session.cursor {
            return Ok(());
        }
        let tenant_id = session.tenant_id.clone();
        let session_id = session.session_id.clone();

        if target < session.cursor {
            session.doc = self.rebuild_at(&tenant_id, &session_id, target).await?;
        } else {
            // Replay onto a scratch copy so a corrupt entry cannot leave the
            // live image half-advanced.
            let mut doc = session.doc.clone();
            self.replay(&mut doc, &tenant_id, &session_id, session.cursor, target)
                .await?;
            session.doc = doc;
        }
        session.cursor = target;

        let image = session.doc.to_bytes()?;
        self.storage
            .save_session(&tenant_id, &session_id, &image)
            .await?;
        self.write_back(session, &image).await?;

        let entry_id = session_id.clone();
        self.update_index(&tenant_id, move |index| {
            let entry = index.entry_mut(&entry_id)?;
            entry.cursor_position = target;
            entry.touch();
            Ok(())
        })
        .await?;

        debug!("session {session_id} cursor moved to {target}");
        Ok(())
    }

    /// Discard WAL entries and checkpoints beyond the cursor. No-op when the
    /// cursor is at the head.
    async fn discard_forward_tail(&self, session: &mut OpenSession) -> Result<(), EngineError> {
        if session.cursor >= session.wal_length {
            return Ok(());
        }
        let tenant_id = session.tenant_id.clone();
        let session_id = session.session_id.clone();
        let keep = session.cursor;

        let removed = self
            .storage
            .truncate_wal(&tenant_id, &session_id, keep)
            .await?;

        for info in self.storage.list_checkpoints(&tenant_id, &session_id).await? {
            if info.position > keep {
                self.storage
                    .delete_checkpoint(&tenant_id, &session_id, info.position)
                    .await?;
            }
        }

        let entry_id = session_id.clone();
        self.update_index(&tenant_id, move |index| {
            let entry = index.entry_mut(&entry_id)?;
            entry.wal_length = keep;
            entry.drop_checkpoints_above(keep);
            entry.touch();
            Ok(())
        })
        .await?;

        session.wal_length = keep;
        debug!("discarded {removed} forward WAL entries for session {session_id}");
        Ok(())
    }

    /// Mirror a successful mutation to the source, when auto-save applies.
    async fn write_back(&self, session: &OpenSession, image: &[u8]) -> Result<(), EngineError> {
        if !session.auto_save {
            return Ok(());
        }
        let Some(descriptor) = &session.source else {
            return Ok(());
        };
        self.sources.write(descriptor, image).await?;
        Ok(())
    }

    async fn set_pending_flag(
        &self,
        session: &mut OpenSession,
        pending: bool,
    ) -> Result<(), EngineError> {
        let tenant_id = session.tenant_id.clone();
        let entry_id = session.session_id.clone();
        self.update_index(&tenant_id, move |index| {
            let entry = index.entry_mut(&entry_id)?;
            entry.pending_external_change = pending;
            Ok(())
        })
        .await?;
        session.pending_external_change = pending;
        Ok(())
    }
}
