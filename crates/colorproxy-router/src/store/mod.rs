//! Key/value backends for route storage

mod memory;
#[cfg(feature = "redis")]
mod redis;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use memory::MemoryKvStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisKvStore;

/// Key/value store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Store is closed")]
    Closed,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Opaque string store with per-entry expiry
///
/// Values are written with an expiry; once it lapses the entry is gone as far
/// as `get` and `keys` are concerned.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Write `value` under `key`, replacing any previous value
    async fn set_with_expiry(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Keys starting with `prefix`, in no particular order
    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Remove `key`; removing an absent key succeeds
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Release the backend. Every later call fails with [`StoreError::Closed`].
    async fn close(&self) -> StoreResult<()>;
}
