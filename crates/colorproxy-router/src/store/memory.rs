use super::{KvStore, StoreError, StoreResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    /// `None` when `now + ttl` does not fit in an `Instant`
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Process-local store backed by a concurrent map
///
/// Expired entries are dropped lazily by `get` and `keys`.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, Entry>,
    closed: AtomicBool,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, including ones not yet reaped
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn set_with_expiry(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()> {
        self.ensure_open()?;

        let expires_at = Instant::now().checked_add(ttl);
        self.entries
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.ensure_open()?;

        let now = Instant::now();
        let value = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => None,
            None => return Ok(None),
        };

        if value.is_none() {
            trace!(key = %key, "Dropping expired entry");
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }

        Ok(value)
    }

    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.ensure_open()?;

        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));

        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.ensure_open()?;
        self.entries.remove(key);
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::Release);
        self.entries.clear();
        Ok(())
    }
}
