use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::source::SourceDescriptor;

/// Edit operation kinds recorded in the WAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditKind {
    Add,
    Replace,
    Remove,
    Move,
    Copy,
    ReplaceText,
    RemoveColumn,
    ExternalSync,
}

impl EditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Replace => "replace",
            Self::Remove => "remove",
            Self::Move => "move",
            Self::Copy => "copy",
            Self::ReplaceText => "replace_text",
            Self::RemoveColumn => "remove_column",
            Self::ExternalSync => "external_sync",
        }
    }
}

/// One immutable WAL record.
///
/// Serialised as one JSON object per line: `{position, op, path, patch, ts}`.
/// Positions are dense from 0; entries are never mutated once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Position in the WAL (0-based, dense).
    pub position: u64,
    #[serde(rename = "op")]
    pub operation: EditKind,
    /// The typed path the operation targeted.
    pub path: String,
    /// The operation's full serialised form, replayable as-is.
    pub patch: serde_json::Value,
    /// Unix timestamp; non-decreasing within a session.
    pub ts: i64,
}

/// Information about a stored checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub position: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub size_bytes: u64,
}

/// The per-tenant session index.
///
/// This is the authoritative source of `cursor_position`,
/// `pending_external_change` and the checkpoint set; the per-session files
/// on disk are derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionIndex {
    /// Schema version.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub sessions: BTreeMap<String, SessionIndexEntry>,
}

fn default_version() -> u32 {
    1
}

impl Default for SessionIndex {
    fn default() -> Self {
        Self {
            version: default_version(),
            sessions: BTreeMap::new(),
        }
    }
}

impl SessionIndex {
    /// Look up a session entry, as a taxonomy error when absent.
    pub fn entry(&self, session_id: &str) -> Result<&SessionIndexEntry, EngineError> {
        self.sessions
            .get(session_id)
            .ok_or_else(|| EngineError::NotFound(format!("unknown session {session_id}")))
    }

    /// Mutable variant of [`SessionIndex::entry`].
    pub fn entry_mut(&mut self, session_id: &str) -> Result<&mut SessionIndexEntry, EngineError> {
        self.sessions
            .get_mut(session_id)
            .ok_or_else(|| EngineError::NotFound(format!("unknown session {session_id}")))
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }
}

/// One session's entry in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionIndexEntry {
    /// Where the backing file lives, if the session has one.
    #[serde(
        rename = "source_path",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source: Option<SourceDescriptor>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub modified_at: chrono::DateTime<chrono::Utc>,
    /// Total WAL entries ever written (`wal_position` on the wire).
    #[serde(rename = "wal_position", default)]
    pub wal_length: u64,
    /// The WAL offset the session's current image reflects. May lag behind
    /// `wal_length` after undo.
    #[serde(default)]
    pub cursor_position: u64,
    /// Positions with a stored checkpoint, ascending.
    #[serde(default)]
    pub checkpoint_positions: Vec<u64>,
    #[serde(default)]
    pub pending_external_change: bool,
    /// Whether mutations write back to the source.
    #[serde(default = "default_auto_save")]
    pub auto_save: bool,
}

fn default_auto_save() -> bool {
    true
}

impl SessionIndexEntry {
    pub fn can_undo(&self) -> bool {
        self.cursor_position > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor_position < self.wal_length
    }

    /// Largest checkpoint position `<= target`, if any.
    pub fn nearest_checkpoint(&self, target: u64) -> Option<u64> {
        self.checkpoint_positions
            .iter()
            .copied()
            .filter(|p| *p <= target)
            .max()
    }

    /// Record a checkpoint position, keeping the set sorted and unique.
    pub fn record_checkpoint(&mut self, position: u64) {
        if let Err(at) = self.checkpoint_positions.binary_search(&position) {
            self.checkpoint_positions.insert(at, position);
        }
    }

    /// Drop checkpoint positions `> keep`, returning the removed ones.
    pub fn drop_checkpoints_above(&mut self, keep: u64) -> Vec<u64> {
        let removed: Vec<u64> = self
            .checkpoint_positions
            .iter()
            .copied()
            .filter(|p| *p > keep)
            .collect();
        self.checkpoint_positions.retain(|p| *p <= keep);
        removed
    }

    pub fn touch(&mut self) {
        self.modified_at = chrono::Utc::now();
    }
}

/// Storage backend abstraction for tenant-aware session persistence.
///
/// All methods take `tenant_id` as the first parameter; implementations must
/// keep tenants physically isolated (e.g. `{base}/{tenant_id}/`).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Returns the backend identifier (e.g., "local").
    fn backend_name(&self) -> &'static str;

    // =========================================================================
    // Session image operations
    // =========================================================================

    /// Load a session's current document bytes.
    async fn load_session(
        &self,
        tenant_id: &str,
        session_id: &str,
    ) -> Result<Option<Vec<u8>>, EngineError>;

    /// Save a session's current document bytes.
    async fn save_session(
        &self,
        tenant_id: &str,
        session_id: &str,
        data: &[u8],
    ) -> Result<(), EngineError>;

    /// Delete a session and all associated data (WAL, checkpoints).
    async fn delete_session(&self, tenant_id: &str, session_id: &str)
        -> Result<bool, EngineError>;

    /// Check whether a session image exists.
    async fn session_exists(&self, tenant_id: &str, session_id: &str)
        -> Result<bool, EngineError>;

    // =========================================================================
    // Index operations
    // =========================================================================

    /// Load the session index for a tenant.
    async fn load_index(&self, tenant_id: &str) -> Result<Option<SessionIndex>, EngineError>;

    /// Save the session index for a tenant atomically.
    async fn save_index(&self, tenant_id: &str, index: &SessionIndex) -> Result<(), EngineError>;

    // =========================================================================
    // WAL operations
    // =========================================================================

    /// Append entries to a session's WAL, durably.
    ///
    /// Entry positions must continue the log densely; an entry whose position
    /// does not equal the current length fails with a concurrent-modification
    /// error and nothing is written. Returns the new WAL length.
    async fn append_wal(
        &self,
        tenant_id: &str,
        session_id: &str,
        entries: &[WalEntry],
    ) -> Result<u64, EngineError>;

    /// Read entries with `position >= from`, up to `limit`.
    async fn read_wal(
        &self,
        tenant_id: &str,
        session_id: &str,
        from: u64,
        limit: Option<u64>,
    ) -> Result<(Vec<WalEntry>, bool), EngineError>;

    /// Drop the tail `[keep_from, wal_length)`, returning the removed count.
    async fn truncate_wal(
        &self,
        tenant_id: &str,
        session_id: &str,
        keep_from: u64,
    ) -> Result<u64, EngineError>;

    // =========================================================================
    // Checkpoint operations
    // =========================================================================

    /// Save a checkpoint at a specific WAL position.
    ///
    /// Checkpoints are write-once per position: a second writer for the same
    /// position fails with a concurrent-modification error.
    async fn save_checkpoint(
        &self,
        tenant_id: &str,
        session_id: &str,
        position: u64,
        data: &[u8],
    ) -> Result<(), EngineError>;

    /// Load the checkpoint at exactly `position`.
    async fn load_checkpoint(
        &self,
        tenant_id: &str,
        session_id: &str,
        position: u64,
    ) -> Result<Option<Vec<u8>>, EngineError>;

    /// Load the checkpoint with the largest stored position `<= position`.
    async fn load_nearest_checkpoint(
        &self,
        tenant_id: &str,
        session_id: &str,
        position: u64,
    ) -> Result<Option<(Vec<u8>, u64)>, EngineError>;

    /// Delete the checkpoint at `position`, if present.
    async fn delete_checkpoint(
        &self,
        tenant_id: &str,
        session_id: &str,
        position: u64,
    ) -> Result<bool, EngineError>;

    /// List all checkpoints for a session, ascending by position.
    async fn list_checkpoints(
        &self,
        tenant_id: &str,
        session_id: &str,
    ) -> Result<Vec<CheckpointInfo>, EngineError>;
}
