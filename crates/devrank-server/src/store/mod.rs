//! Shared key-value store
//!
//! Backs the singleton lock and the read-side cache. Redis is used when a URL
//! is configured; otherwise an in-process store keeps a single instance
//! working without external services.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::RedisConfig;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Minimal key-value operations the lock and cache need
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Set only if the key does not exist; returns whether it was set
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Atomically delete the key only if it still holds `expected`
    async fn delete_if_equals(&self, key: &str, expected: &str) -> StoreResult<bool>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Delete every key matching a `*` glob; returns the number removed
    async fn delete_matching(&self, pattern: &str) -> StoreResult<u64>;
}

/// Pick the backend for this deployment
pub async fn connect(config: &RedisConfig) -> StoreResult<Arc<dyn SharedStore>> {
    match config.url.as_deref().filter(|url| !url.is_empty()) {
        Some(url) => {
            let store = RedisStore::connect(url).await?;
            tracing::info!("Connected to Redis shared store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("REDIS_URL not set - using in-process store, locks are not shared across instances");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
