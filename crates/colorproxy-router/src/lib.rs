//! Route registry and target selection for colorproxy
//!
//! Routes bind a routing tag ("color") to the base URL of a backend. They are
//! leased: every route carries an expiry, refreshed by heartbeats and purged by
//! a periodic sweep once it lapses.
//!
//! The crate is layered:
//! - [`KvStore`]: the opaque key/value backend (in-memory, or Redis with the
//!   `redis` feature)
//! - [`RouteStore`]: the leasing protocol (register, heartbeat, list, expiry)
//!   implemented on top of any `KvStore` by [`KvRouteStore`]
//! - [`Selector`]: maps a tag onto a target address

pub mod registry;
pub mod route;
pub mod selector;
pub mod store;

pub use registry::{KvRouteStore, RegistryError, RegistryResult, RouteStore, ROUTE_KEY_PREFIX};
pub use route::Route;
pub use selector::{DirectSelector, Selector};
pub use store::{KvStore, MemoryKvStore, StoreError, StoreResult};

#[cfg(feature = "redis")]
pub use store::RedisKvStore;

#[cfg(any(test, feature = "mock"))]
pub use registry::MockRouteStore;
#[cfg(any(test, feature = "mock"))]
pub use selector::MockSelector;
#[cfg(any(test, feature = "mock"))]
pub use store::MockKvStore;
