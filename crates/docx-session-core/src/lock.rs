use std::time::Duration;

use async_trait::async_trait;

use crate::error::EngineError;

/// Result of a lock acquisition attempt.
#[derive(Debug, Clone)]
pub struct LockAcquireResult {
    /// Whether the lock was acquired.
    pub acquired: bool,
    /// If not acquired, who currently holds the lock.
    pub current_holder: Option<String>,
    /// Lock expiration timestamp (Unix epoch seconds).
    pub expires_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReleaseOutcome {
    Released,
    NotOwner,
    NotFound,
}

/// Result of a lock release attempt.
#[derive(Debug, Clone)]
pub struct LockReleaseResult {
    pub outcome: LockReleaseOutcome,
}

impl LockReleaseResult {
    pub fn released(&self) -> bool {
        self.outcome == LockReleaseOutcome::Released
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockRenewOutcome {
    Renewed,
    NotOwner,
    NotFound,
}

/// Result of a lock renewal attempt.
#[derive(Debug, Clone)]
pub struct LockRenewResult {
    pub outcome: LockRenewOutcome,
    /// New expiration timestamp when renewed, otherwise the observed one.
    pub expires_at: i64,
}

impl LockRenewResult {
    pub fn renewed(&self) -> bool {
        self.outcome == LockRenewOutcome::Renewed
    }
}

/// Advisory lock manager for tenant-scoped resources.
///
/// Resources are named strings (`session:<id>`, `index`); locks are on the
/// pair `(tenant_id, resource_id)` so tenants never contend with each other.
/// Acquisition is non-blocking: callers that want to wait retry with backoff.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Returns the lock manager identifier (e.g., "file").
    fn lock_type(&self) -> &'static str;

    /// Attempt to acquire a lock on `(tenant_id, resource_id)`.
    ///
    /// Returns immediately. If the recorded expiry of an existing lock is in
    /// the past, the implementation may atomically take the lock over.
    async fn acquire(
        &self,
        tenant_id: &str,
        resource_id: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<LockAcquireResult, EngineError>;

    /// Extend a held lock's TTL. Only succeeds for the current holder.
    async fn renew(
        &self,
        tenant_id: &str,
        resource_id: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<LockRenewResult, EngineError>;

    /// Release a held lock. Only succeeds for the current holder.
    async fn release(
        &self,
        tenant_id: &str,
        resource_id: &str,
        holder_id: &str,
    ) -> Result<LockReleaseResult, EngineError>;
}
