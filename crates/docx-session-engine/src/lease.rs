use std::sync::Arc;

use docx_session_core::{EngineError, LockManager};
use tracing::warn;

use crate::config::EngineConfig;

/// A scoped cross-process lock.
///
/// Acquisition retries with bounded backoff until the configured deadline; a
/// background task renews the lock at TTL/3 while the lease lives; dropping
/// the lease releases the lock on every exit path, normal or error.
pub(crate) struct LockLease {
    locks: Arc<dyn LockManager>,
    tenant_id: String,
    resource_id: String,
    holder_id: String,
    renew_task: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for LockLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockLease")
            .field("tenant_id", &self.tenant_id)
            .field("resource_id", &self.resource_id)
            .field("holder_id", &self.holder_id)
            .finish()
    }
}

impl LockLease {
    pub(crate) async fn acquire(
        locks: Arc<dyn LockManager>,
        tenant_id: &str,
        resource_id: &str,
        holder_id: &str,
        config: &EngineConfig,
    ) -> Result<Self, EngineError> {
        let deadline = tokio::time::Instant::now() + config.lock_acquire_timeout;
        let mut backoff = config.lock_retry_min;

        loop {
            let result = locks
                .acquire(tenant_id, resource_id, holder_id, config.lock_ttl)
                .await?;
            if result.acquired {
                break;
            }
            if tokio::time::Instant::now() + backoff > deadline {
                let holder = result.current_holder.unwrap_or_else(|| "unknown".into());
                return Err(EngineError::lock_timeout(format!(
                    "{resource_id} held by {holder} past the acquisition deadline"
                )));
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(config.lock_retry_max);
        }

        let renew_task = {
            let locks = Arc::clone(&locks);
            let tenant = tenant_id.to_string();
            let resource = resource_id.to_string();
            let holder = holder_id.to_string();
            let ttl = config.lock_ttl;
            tokio::spawn(async move {
                let interval = ttl / 3;
                loop {
                    tokio::time::sleep(interval).await;
                    match locks.renew(&tenant, &resource, &holder, ttl).await {
                        Ok(result) if result.renewed() => {}
                        Ok(_) => {
                            warn!("lost lock {resource} for tenant {tenant} while renewing");
                            break;
                        }
                        Err(e) => {
                            warn!("failed to renew lock {resource} for tenant {tenant}: {e}");
                            break;
                        }
                    }
                }
            })
        };

        Ok(Self {
            locks,
            tenant_id: tenant_id.to_string(),
            resource_id: resource_id.to_string(),
            holder_id: holder_id.to_string(),
            renew_task,
        })
    }
}

impl Drop for LockLease {
    fn drop(&mut self) {
        self.renew_task.abort();
        // Release in the background; Drop cannot await.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let locks = Arc::clone(&self.locks);
            let tenant = std::mem::take(&mut self.tenant_id);
            let resource = std::mem::take(&mut self.resource_id);
            let holder = std::mem::take(&mut self.holder_id);
            handle.spawn(async move {
                if let Err(e) = locks.release(&tenant, &resource, &holder).await {
                    warn!("failed to release lock {resource} for tenant {tenant}: {e}");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use docx_session_store::FileLock;
    use tempfile::TempDir;

    fn quick_config() -> EngineConfig {
        EngineConfig {
            lock_acquire_timeout: Duration::from_millis(300),
            lock_retry_min: Duration::from_millis(20),
            lock_retry_max: Duration::from_millis(50),
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn lease_releases_on_drop() {
        let dir = TempDir::new().unwrap();
        let locks: Arc<dyn LockManager> = Arc::new(FileLock::new(dir.path()));
        let config = quick_config();

        let lease = LockLease::acquire(locks.clone(), "t", "session:a", "h1", &config)
            .await
            .unwrap();
        drop(lease);
        // Give the background release a moment.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let result = locks
            .acquire("t", "session:a", "h2", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(result.acquired);
    }

    #[tokio::test]
    async fn acquisition_times_out_against_foreign_holder() {
        let dir = TempDir::new().unwrap();
        let locks: Arc<dyn LockManager> = Arc::new(FileLock::new(dir.path()));
        let config = quick_config();

        locks
            .acquire("t", "session:a", "other-process", Duration::from_secs(60))
            .await
            .unwrap();

        let err = LockLease::acquire(locks.clone(), "t", "session:a", "me", &config)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Lock {
                kind: docx_session_core::LockErrorKind::AcquireTimeout,
                ..
            }
        ));
    }
}
