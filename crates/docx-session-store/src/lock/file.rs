use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use docx_session_core::{
    EngineError, LockAcquireResult, LockManager, LockReleaseOutcome, LockReleaseResult,
    LockRenewOutcome, LockRenewResult,
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, instrument, warn};

/// File-based advisory lock manager.
///
/// Lock artifacts live at `{base_dir}/{tenant_id}/locks/{resource_id}.lock`
/// and contain JSON with the holder and expiry. A fresh acquisition creates
/// the file exclusively; taking over an expired lock replaces the file and
/// then confirms ownership by re-reading, so two racing takeovers cannot both
/// believe they won.
#[derive(Debug, Clone)]
pub struct FileLock {
    base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockFile {
    holder_id: String,
    expires_at: i64,
}

impl FileLock {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    fn lock_path(&self, tenant_id: &str, resource_id: &str) -> PathBuf {
        self.base_dir
            .join(tenant_id)
            .join("locks")
            .join(format!("{resource_id}.lock"))
    }

    async fn ensure_locks_dir(&self, tenant_id: &str) -> Result<(), EngineError> {
        let dir = self.base_dir.join(tenant_id).join("locks");
        fs::create_dir_all(&dir).await.map_err(|e| {
            EngineError::io(format!("failed to create locks dir {}: {e}", dir.display()))
        })?;
        Ok(())
    }

    /// Read the lock file, if present. Corrupt files are removed.
    async fn read_lock(&self, tenant_id: &str, resource_id: &str) -> Option<LockFile> {
        let path = self.lock_path(tenant_id, resource_id);
        let content = fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str::<LockFile>(&content) {
            Ok(lock) => Some(lock),
            Err(e) => {
                warn!("removing unparseable lock file {}: {e}", path.display());
                let _ = fs::remove_file(&path).await;
                None
            }
        }
    }

    /// Create the lock file exclusively. `Ok(false)` means it already exists.
    ///
    /// The content is staged in a private temp file and published with a
    /// hard link: the link either fails (lock taken) or makes the complete
    /// lock appear atomically, so concurrent readers never see a torn file.
    async fn try_create(
        &self,
        tenant_id: &str,
        resource_id: &str,
        lock: &LockFile,
    ) -> Result<bool, EngineError> {
        self.ensure_locks_dir(tenant_id).await?;
        let path = self.lock_path(tenant_id, resource_id);
        let staging = path.with_extension(format!("{}.staging", uuid::Uuid::new_v4().simple()));

        let content = serde_json::to_string(lock)
            .map_err(|e| EngineError::serialization(format!("failed to serialize lock: {e}")))?;
        fs::write(&staging, &content)
            .await
            .map_err(|e| EngineError::io(format!("failed to stage lock file: {e}")))?;

        let linked = fs::hard_link(&staging, &path).await;
        let _ = fs::remove_file(&staging).await;
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(EngineError::io(format!(
                "failed to publish lock {}: {e}",
                path.display()
            ))),
        }
    }

    /// Replace the lock file atomically (renew and takeover paths).
    async fn overwrite(
        &self,
        tenant_id: &str,
        resource_id: &str,
        lock: &LockFile,
    ) -> Result<(), EngineError> {
        self.ensure_locks_dir(tenant_id).await?;
        let path = self.lock_path(tenant_id, resource_id);
        let temp_path = path.with_extension("lock.tmp");

        let content = serde_json::to_string(lock)
            .map_err(|e| EngineError::serialization(format!("failed to serialize lock: {e}")))?;
        fs::write(&temp_path, &content)
            .await
            .map_err(|e| EngineError::io(format!("failed to write lock file: {e}")))?;
        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| EngineError::io(format!("failed to rename lock file: {e}")))?;
        Ok(())
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl LockManager for FileLock {
    fn lock_type(&self) -> &'static str {
        "file"
    }

    #[instrument(skip(self), level = "debug")]
    async fn acquire(
        &self,
        tenant_id: &str,
        resource_id: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<LockAcquireResult, EngineError> {
        let expires_at = now_unix() + ttl.as_secs() as i64;
        let lock = LockFile {
            holder_id: holder_id.to_string(),
            expires_at,
        };

        if self.try_create(tenant_id, resource_id, &lock).await? {
            debug!(
                "acquired lock on {}/{} for {} (expires at {})",
                tenant_id, resource_id, holder_id, expires_at
            );
            return Ok(LockAcquireResult {
                acquired: true,
                current_holder: None,
                expires_at,
            });
        }

        let Some(existing) = self.read_lock(tenant_id, resource_id).await else {
            // The file vanished between create and read; try once more.
            let created = self.try_create(tenant_id, resource_id, &lock).await?;
            return Ok(LockAcquireResult {
                acquired: created,
                current_holder: None,
                expires_at: if created { expires_at } else { 0 },
            });
        };

        if existing.holder_id == holder_id {
            // Re-entrant acquire extends our own lock.
            self.overwrite(tenant_id, resource_id, &lock).await?;
            debug!(
                "renewed existing lock on {}/{} for {}",
                tenant_id, resource_id, holder_id
            );
            return Ok(LockAcquireResult {
                acquired: true,
                current_holder: None,
                expires_at,
            });
        }

        if existing.expires_at > now_unix() {
            debug!(
                "lock on {}/{} held by {} (requested by {})",
                tenant_id, resource_id, existing.holder_id, holder_id
            );
            return Ok(LockAcquireResult {
                acquired: false,
                current_holder: Some(existing.holder_id),
                expires_at: existing.expires_at,
            });
        }

        // Expired: take over, then confirm we actually won the race.
        self.overwrite(tenant_id, resource_id, &lock).await?;
        let confirmed = self
            .read_lock(tenant_id, resource_id)
            .await
            .is_some_and(|l| l.holder_id == holder_id);
        if confirmed {
            debug!(
                "took over expired lock on {}/{} from {} for {}",
                tenant_id, resource_id, existing.holder_id, holder_id
            );
            Ok(LockAcquireResult {
                acquired: true,
                current_holder: None,
                expires_at,
            })
        } else {
            let winner = self.read_lock(tenant_id, resource_id).await;
            Ok(LockAcquireResult {
                acquired: false,
                current_holder: winner.as_ref().map(|l| l.holder_id.clone()),
                expires_at: winner.map(|l| l.expires_at).unwrap_or(0),
            })
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn renew(
        &self,
        tenant_id: &str,
        resource_id: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<LockRenewResult, EngineError> {
        let Some(existing) = self.read_lock(tenant_id, resource_id).await else {
            return Ok(LockRenewResult {
                outcome: LockRenewOutcome::NotFound,
                expires_at: 0,
            });
        };

        if existing.holder_id != holder_id {
            debug!(
                "cannot renew lock on {}/{}: held by {} not {}",
                tenant_id, resource_id, existing.holder_id, holder_id
            );
            return Ok(LockRenewResult {
                outcome: LockRenewOutcome::NotOwner,
                expires_at: existing.expires_at,
            });
        }

        let expires_at = now_unix() + ttl.as_secs() as i64;
        self.overwrite(
            tenant_id,
            resource_id,
            &LockFile {
                holder_id: holder_id.to_string(),
                expires_at,
            },
        )
        .await?;
        debug!(
            "renewed lock on {}/{} for {} (new expiry: {})",
            tenant_id, resource_id, holder_id, expires_at
        );
        Ok(LockRenewResult {
            outcome: LockRenewOutcome::Renewed,
            expires_at,
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn release(
        &self,
        tenant_id: &str,
        resource_id: &str,
        holder_id: &str,
    ) -> Result<LockReleaseResult, EngineError> {
        let Some(existing) = self.read_lock(tenant_id, resource_id).await else {
            debug!(
                "lock on {}/{} not found for release by {}",
                tenant_id, resource_id, holder_id
            );
            return Ok(LockReleaseResult {
                outcome: LockReleaseOutcome::NotFound,
            });
        };

        if existing.holder_id != holder_id {
            debug!(
                "cannot release lock on {}/{}: held by {} not {}",
                tenant_id, resource_id, existing.holder_id, holder_id
            );
            return Ok(LockReleaseResult {
                outcome: LockReleaseOutcome::NotOwner,
            });
        }

        let path = self.lock_path(tenant_id, resource_id);
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(EngineError::io(format!("failed to delete lock: {e}")));
            }
        }
        debug!("released lock on {}/{} by {}", tenant_id, resource_id, holder_id);
        Ok(LockReleaseResult {
            outcome: LockReleaseOutcome::Released,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (FileLock, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let lock = FileLock::new(temp_dir.path());
        (lock, temp_dir)
    }

    #[tokio::test]
    async fn test_acquire_release() {
        let (lock_mgr, _temp) = setup();
        let tenant = "test-tenant";
        let resource = "session:abc";
        let ttl = Duration::from_secs(60);

        let result = lock_mgr
            .acquire(tenant, resource, "holder-1", ttl)
            .await
            .unwrap();
        assert!(result.acquired);
        assert!(result.current_holder.is_none());

        let result2 = lock_mgr
            .acquire(tenant, resource, "holder-2", ttl)
            .await
            .unwrap();
        assert!(!result2.acquired);
        assert_eq!(result2.current_holder.as_deref(), Some("holder-1"));

        let release = lock_mgr.release(tenant, resource, "holder-1").await.unwrap();
        assert!(release.released());

        let result3 = lock_mgr
            .acquire(tenant, resource, "holder-2", ttl)
            .await
            .unwrap();
        assert!(result3.acquired);
    }

    #[tokio::test]
    async fn test_renew() {
        let (lock_mgr, _temp) = setup();
        let tenant = "test-tenant";
        let resource = "index";
        let ttl = Duration::from_secs(60);

        let acquire = lock_mgr
            .acquire(tenant, resource, "holder-1", ttl)
            .await
            .unwrap();
        assert!(acquire.acquired);

        let renew = lock_mgr
            .renew(tenant, resource, "holder-1", ttl)
            .await
            .unwrap();
        assert!(renew.renewed());
        assert!(renew.expires_at >= acquire.expires_at);

        let bad = lock_mgr
            .renew(tenant, resource, "wrong-holder", ttl)
            .await
            .unwrap();
        assert_eq!(bad.outcome, LockRenewOutcome::NotOwner);

        let missing = lock_mgr
            .renew(tenant, "other-resource", "holder-1", ttl)
            .await
            .unwrap();
        assert_eq!(missing.outcome, LockRenewOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_release_not_owner() {
        let (lock_mgr, _temp) = setup();
        let tenant = "test-tenant";
        let resource = "session:abc";
        let ttl = Duration::from_secs(60);

        lock_mgr
            .acquire(tenant, resource, "holder-1", ttl)
            .await
            .unwrap();

        let release = lock_mgr.release(tenant, resource, "holder-2").await.unwrap();
        assert_eq!(release.outcome, LockReleaseOutcome::NotOwner);

        // Still held by holder-1.
        let result = lock_mgr
            .acquire(tenant, resource, "holder-2", ttl)
            .await
            .unwrap();
        assert!(!result.acquired);
    }

    #[tokio::test]
    async fn test_expired_lock_takeover() {
        let (lock_mgr, _temp) = setup();
        let tenant = "test-tenant";
        let resource = "session:abc";

        let result = lock_mgr
            .acquire(tenant, resource, "holder-1", Duration::from_secs(0))
            .await
            .unwrap();
        assert!(result.acquired);

        tokio::time::sleep(Duration::from_millis(1100)).await;

        let result2 = lock_mgr
            .acquire(tenant, resource, "holder-2", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(result2.acquired);

        // The old holder can no longer renew.
        let renew = lock_mgr
            .renew(tenant, resource, "holder-1", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(renew.outcome, LockRenewOutcome::NotOwner);
    }

    #[tokio::test]
    async fn test_reentrant_acquire_extends() {
        let (lock_mgr, _temp) = setup();
        let tenant = "test-tenant";
        let resource = "session:abc";
        let ttl = Duration::from_secs(60);

        let first = lock_mgr
            .acquire(tenant, resource, "holder-1", ttl)
            .await
            .unwrap();
        let second = lock_mgr
            .acquire(tenant, resource, "holder-1", ttl)
            .await
            .unwrap();
        assert!(second.acquired);
        assert!(second.expires_at >= first.expires_at);
    }

    #[tokio::test]
    async fn test_tenant_isolation() {
        let (lock_mgr, _temp) = setup();
        let ttl = Duration::from_secs(60);

        lock_mgr
            .acquire("tenant-a", "session:s", "holder", ttl)
            .await
            .unwrap();
        let result = lock_mgr
            .acquire("tenant-b", "session:s", "holder", ttl)
            .await
            .unwrap();
        assert!(result.acquired);
    }
}
