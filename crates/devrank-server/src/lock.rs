//! Cluster-wide singleton execution
//!
//! A lock is a key in the shared store holding a random owner token with a TTL.
//! Only the owner that set the token may release it; an expired lock that was
//! re-acquired by someone else is never deleted by the previous owner.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::store::{SharedStore, StoreResult};

pub const RANKING_UPDATE_LOCK: &str = "locks:ranking:update";
pub const DISCOVERY_LOCK: &str = "locks:discovery";

/// Result of [`DistributedLock::run_exclusively`]
#[derive(Debug, PartialEq, Eq)]
pub enum LockOutcome<T> {
    Executed(T),
    /// Another owner holds the lock; the task did not run
    Skipped,
}

impl<T> LockOutcome<T> {
    pub fn is_executed(&self) -> bool {
        matches!(self, LockOutcome::Executed(_))
    }
}

#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn SharedStore>,
}

/// Proof of ownership for one acquisition
#[derive(Debug, Clone)]
pub struct LockGuard {
    pub key: String,
    token: String,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    pub async fn try_acquire(&self, key: &str, ttl: Duration) -> StoreResult<Option<LockGuard>> {
        let token = Uuid::new_v4().to_string();
        if self.store.set_if_absent(key, &token, ttl).await? {
            tracing::debug!(lock = key, ttl_ms = ttl.as_millis() as u64, "Lock acquired");
            Ok(Some(LockGuard {
                key: key.to_string(),
                token,
            }))
        } else {
            Ok(None)
        }
    }

    /// Release if still owned; returns whether this guard's token was removed
    pub async fn release(&self, guard: &LockGuard) -> StoreResult<bool> {
        self.store.delete_if_equals(&guard.key, &guard.token).await
    }

    /// Run `task` only if the lock can be taken, releasing it afterwards even
    /// when the task itself fails
    pub async fn run_exclusively<F, Fut, T>(
        &self,
        key: &str,
        ttl: Duration,
        task: F,
    ) -> StoreResult<LockOutcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let Some(guard) = self.try_acquire(key, ttl).await? else {
            tracing::info!(lock = key, "Lock held elsewhere, skipping this cycle");
            return Ok(LockOutcome::Skipped);
        };

        let output = task().await;

        match self.release(&guard).await {
            Ok(true) => tracing::debug!(lock = key, "Lock released"),
            Ok(false) => tracing::warn!(lock = key, "Lock expired before release; task outlived its TTL"),
            Err(e) => tracing::error!(lock = key, error = %e, "Failed to release lock"),
        }

        Ok(LockOutcome::Executed(output))
    }
}
