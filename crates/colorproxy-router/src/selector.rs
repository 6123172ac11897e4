//! Target selection by routing tag

use crate::registry::{RegistryResult, RouteStore};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

/// Maps a routing tag onto a target address
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait Selector: Send + Sync {
    /// Address to forward to, or [`RegistryError::NotFound`](crate::RegistryError::NotFound)
    async fn resolve(&self, tag: &str) -> RegistryResult<String>;
}

/// One registry lookup per request, returning the stored address.
///
/// The lease is not checked: a lapsed route keeps receiving traffic until the
/// next expiry sweep removes it.
pub struct DirectSelector {
    registry: Arc<dyn RouteStore>,
}

impl DirectSelector {
    pub fn new(registry: Arc<dyn RouteStore>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Selector for DirectSelector {
    async fn resolve(&self, tag: &str) -> RegistryResult<String> {
        let route = self.registry.get(tag).await?;
        trace!(color = %tag, address = %route.address, "Resolved route");
        Ok(route.address)
    }
}
