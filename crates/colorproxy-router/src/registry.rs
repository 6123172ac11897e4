//! Route registry: leased tag → address bindings with heartbeat protection
//!
//! Routes are written as JSON documents under `colorproxy:route:<tag>`, each
//! with a store-level expiry equal to the lease TTL. A heartbeat must present
//! the address and token the route was registered with.

use crate::route::Route;
use crate::store::{KvStore, MemoryKvStore, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Key prefix for stored routes
pub const ROUTE_KEY_PREFIX: &str = "colorproxy:route:";

/// Route registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Route not found: {0}")]
    NotFound(String),

    #[error("Address or token mismatch for route: {0}")]
    Mismatch(String),

    #[error("Route encoding error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Leasing protocol over routes
///
/// Safe for concurrent callers. A heartbeat racing a register for the same tag
/// is last-write-wins.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait RouteStore: Send + Sync {
    /// Store `route` leased until `now + ttl`, replacing any route under the same tag.
    /// Returns the route as stored.
    async fn register(&self, route: Route, ttl: Duration) -> RegistryResult<Route>;

    /// Stored route for `tag`, whether or not its lease has lapsed
    async fn get(&self, tag: &str) -> RegistryResult<Route>;

    /// Renew the lease of `tag` if `address` and `token` match the stored route
    async fn heartbeat(
        &self,
        tag: &str,
        address: &str,
        token: &str,
        ttl: Duration,
    ) -> RegistryResult<Route>;

    /// Every readable stored route
    async fn list(&self) -> RegistryResult<Vec<Route>>;

    /// Remove `tag`; removing an absent tag succeeds
    async fn delete(&self, tag: &str) -> RegistryResult<()>;

    /// Remove every route whose lease has lapsed, returning how many were removed
    async fn delete_expired(&self) -> RegistryResult<usize>;

    async fn close(&self) -> RegistryResult<()>;
}

/// [`RouteStore`] layered on any [`KvStore`]
pub struct KvRouteStore {
    store: Arc<dyn KvStore>,
    key_prefix: String,
}

impl KvRouteStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            key_prefix: ROUTE_KEY_PREFIX.to_string(),
        }
    }

    /// Registry over a fresh process-local store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKvStore::new()))
    }

    /// Namespace routes under a different key prefix
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    fn key(&self, tag: &str) -> String {
        format!("{}{}", self.key_prefix, tag)
    }

    async fn write(&self, route: &Route, ttl: Duration) -> RegistryResult<()> {
        let value = serde_json::to_string(route)?;
        self.store
            .set_with_expiry(&self.key(&route.tag), value, ttl)
            .await?;
        Ok(())
    }
}

impl Default for KvRouteStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[async_trait]
impl RouteStore for KvRouteStore {
    async fn register(&self, mut route: Route, ttl: Duration) -> RegistryResult<Route> {
        route.renew(Utc::now(), ttl);
        self.write(&route, ttl).await?;

        trace!(
            color = %route.tag,
            address = %route.address,
            expires_at = %route.expires_at,
            "Registered route"
        );
        Ok(route)
    }

    async fn get(&self, tag: &str) -> RegistryResult<Route> {
        let raw = self
            .store
            .get(&self.key(tag))
            .await?
            .ok_or_else(|| RegistryError::NotFound(tag.to_string()))?;

        Ok(serde_json::from_str(&raw)?)
    }

    async fn heartbeat(
        &self,
        tag: &str,
        address: &str,
        token: &str,
        ttl: Duration,
    ) -> RegistryResult<Route> {
        let route = self.get(tag).await?;

        if !route.matches(address, token) {
            debug!(color = %tag, address = %address, "Heartbeat rejected: address or token mismatch");
            return Err(RegistryError::Mismatch(tag.to_string()));
        }

        self.register(route, ttl).await
    }

    async fn list(&self) -> RegistryResult<Vec<Route>> {
        let keys = self.store.keys(&self.key_prefix).await?;
        let mut routes = Vec::with_capacity(keys.len());

        for key in keys {
            let raw = match self.store.get(&key).await {
                Ok(Some(raw)) => raw,
                // Expired between KEYS and GET
                Ok(None) => continue,
                Err(e) => {
                    debug!(key = %key, error = %e, "Skipping unreadable route");
                    continue;
                }
            };

            match serde_json::from_str::<Route>(&raw) {
                Ok(route) => routes.push(route),
                Err(e) => warn!(key = %key, error = %e, "Skipping corrupt route entry"),
            }
        }

        Ok(routes)
    }

    async fn delete(&self, tag: &str) -> RegistryResult<()> {
        self.store.delete(&self.key(tag)).await?;
        trace!(color = %tag, "Deleted route");
        Ok(())
    }

    async fn delete_expired(&self) -> RegistryResult<usize> {
        let now = Utc::now();
        let mut purged = 0;

        for route in self.list().await? {
            if route.is_live_at(now) {
                continue;
            }

            match self.store.delete(&self.key(&route.tag)).await {
                Ok(()) => {
                    debug!(color = %route.tag, expires_at = %route.expires_at, "Purged expired route");
                    purged += 1;
                }
                Err(e) => warn!(color = %route.tag, error = %e, "Failed to purge expired route"),
            }
        }

        if purged > 0 {
            info!(purged, "Expired routes purged");
        }
        Ok(purged)
    }

    async fn close(&self) -> RegistryResult<()> {
        self.store.close().await?;
        Ok(())
    }
}
