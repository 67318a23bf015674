use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use docx_session_core::{EngineError, SourceDescriptor};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

/// What happened to a watched source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalChangeKind {
    Modified,
    Deleted,
}

/// A detected external change to a session's backing file.
#[derive(Debug, Clone)]
pub struct ExternalChange {
    pub session_id: String,
    pub kind: ExternalChangeKind,
    pub detected_at: i64,
}

struct WatchedSource {
    path: PathBuf,
    #[allow(dead_code)]
    watch_id: String,
    known_hash: Option<Vec<u8>>,
    // Kept alive for the duration of the watch; dropping stops it.
    _watcher: std::sync::Mutex<RecommendedWatcher>,
}

struct Inner {
    watched: DashMap<(String, String), WatchedSource>,
    pending: DashMap<(String, String), ExternalChange>,
}

/// Filesystem watcher for local sources.
///
/// Uses `notify` events (inotify, FSEvents, ...) for cheap detection, with a
/// SHA-256 content comparison as the fallback: editors that replace files via
/// rename sometimes produce event streams the platform backend coalesces or
/// drops, and the hash check catches those on the next poll.
pub struct NotifyWatcher {
    inner: Arc<Inner>,
}

impl NotifyWatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                watched: DashMap::new(),
                pending: DashMap::new(),
            }),
        }
    }

    fn key(tenant_id: &str, session_id: &str) -> (String, String) {
        (tenant_id.to_string(), session_id.to_string())
    }

    fn local_path(source: &SourceDescriptor) -> Result<PathBuf, EngineError> {
        match source {
            SourceDescriptor::LocalFile { path } => Ok(path.clone()),
            SourceDescriptor::Cloud { .. } => Err(EngineError::InvalidRequest(format!(
                "filesystem watcher cannot watch cloud source {}",
                source.location()
            ))),
        }
    }

    fn hash_file(path: &Path) -> Option<Vec<u8>> {
        let content = std::fs::read(path).ok()?;
        let mut hasher = Sha256::new();
        hasher.update(&content);
        Some(hasher.finalize().to_vec())
    }

    /// Start watching a session's source. Returns a watch id.
    #[instrument(skip(self), level = "debug")]
    pub fn start_watch(
        &self,
        tenant_id: &str,
        session_id: &str,
        source: &SourceDescriptor,
    ) -> Result<String, EngineError> {
        let path = Self::local_path(source)?;
        let watch_id = uuid::Uuid::new_v4().to_string();
        let key = Self::key(tenant_id, session_id);
        let known_hash = Self::hash_file(&path);

        let inner = Arc::clone(&self.inner);
        let event_key = key.clone();
        let session = session_id.to_string();
        let watched_path = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if !event.paths.iter().any(|p| p == &watched_path) {
                        return;
                    }
                    let kind = match event.kind {
                        EventKind::Modify(_) | EventKind::Create(_) => {
                            ExternalChangeKind::Modified
                        }
                        EventKind::Remove(_) => ExternalChangeKind::Deleted,
                        _ => return,
                    };
                    inner.pending.insert(
                        event_key.clone(),
                        ExternalChange {
                            session_id: session.clone(),
                            kind,
                            detected_at: chrono::Utc::now().timestamp(),
                        },
                    );
                    debug!("detected {:?} change for session {}", kind, session);
                }
                Err(e) => warn!("watch error: {e}"),
            },
            Config::default(),
        )
        .map_err(|e| EngineError::io(format!("failed to create watcher: {e}")))?;

        // Watch the parent directory: file watches miss atomic replaces.
        let watch_target = path.parent().map(Path::to_path_buf).unwrap_or_else(|| path.clone());
        watcher
            .watch(&watch_target, RecursiveMode::NonRecursive)
            .map_err(|e| {
                EngineError::io(format!("failed to watch {}: {e}", watch_target.display()))
            })?;

        self.inner.watched.insert(
            key,
            WatchedSource {
                path: path.clone(),
                watch_id: watch_id.clone(),
                known_hash,
                _watcher: std::sync::Mutex::new(watcher),
            },
        );

        info!(
            "started watching {} for tenant {} session {}",
            path.display(),
            tenant_id,
            session_id
        );
        Ok(watch_id)
    }

    /// Stop watching a session's source.
    #[instrument(skip(self), level = "debug")]
    pub fn stop_watch(&self, tenant_id: &str, session_id: &str) {
        let key = Self::key(tenant_id, session_id);
        if self.inner.watched.remove(&key).is_some() {
            info!(
                "stopped watching source for tenant {} session {}",
                tenant_id, session_id
            );
        }
        self.inner.pending.remove(&key);
    }

    /// Poll for a detected change, consuming it.
    ///
    /// Falls back to a content-hash comparison when no event was captured.
    #[instrument(skip(self), level = "debug")]
    pub fn check(&self, tenant_id: &str, session_id: &str) -> Option<ExternalChange> {
        let key = Self::key(tenant_id, session_id);

        if let Some((_, change)) = self.inner.pending.remove(&key) {
            return Some(change);
        }

        let watched = self.inner.watched.get(&key)?;
        let current = Self::hash_file(&watched.path);
        match (&watched.known_hash, &current) {
            (Some(known), Some(current)) if known != current => Some(ExternalChange {
                session_id: session_id.to_string(),
                kind: ExternalChangeKind::Modified,
                detected_at: chrono::Utc::now().timestamp(),
            }),
            (Some(_), None) => Some(ExternalChange {
                session_id: session_id.to_string(),
                kind: ExternalChangeKind::Deleted,
                detected_at: chrono::Utc::now().timestamp(),
            }),
            (None, Some(_)) => Some(ExternalChange {
                session_id: session_id.to_string(),
                kind: ExternalChangeKind::Modified,
                detected_at: chrono::Utc::now().timestamp(),
            }),
            _ => None,
        }
    }

    /// Record the current source content as the known-good baseline.
    /// Called after the engine itself wrote the source, so the write-back is
    /// not reported as an external change.
    #[instrument(skip(self), level = "debug")]
    pub fn mark_synced(&self, tenant_id: &str, session_id: &str) {
        let key = Self::key(tenant_id, session_id);
        if let Some(mut watched) = self.inner.watched.get_mut(&key) {
            watched.known_hash = Self::hash_file(&watched.path);
        }
        self.inner.pending.remove(&key);
    }
}

impl Default for NotifyWatcher {
    fn default() -> Self {
        Self::new()
    }
}
