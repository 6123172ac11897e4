//! ColorProxy Library - Public API for Rust applications
//!
//! Re-exports the ColorProxy crates behind a single entry point: the route
//! registry, the pooled transports, the orchestrator and its axum
//! integration.
//!
//! # Attaching to an axum application
//!
//! ```ignore
//! use colorproxy_lib::{attach, ColorProxyBuilder};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let proxy = ColorProxyBuilder::new().start().await?;
//!
//! // Requests carrying `color: blue` go to whichever backend registered
//! // "blue"; everything else reaches the routes below.
//! let app = attach(
//!     axum::Router::new().route("/ping", axum::routing::get(|| async { "pong" })),
//!     proxy.clone(),
//! );
//! # Ok(())
//! # }
//! ```
//!
//! # Custom route stores
//!
//! Anything implementing [`KvStore`] can hold routes:
//!
//! ```ignore
//! let registry = Arc::new(KvRouteStore::new(Arc::new(my_store)));
//! let proxy = ColorProxyBuilder::new().registry(registry).start().await?;
//! ```

pub mod builder;

pub use builder::ColorProxyBuilder;

// Route registry
pub use colorproxy_router::{
    DirectSelector, KvRouteStore, KvStore, MemoryKvStore, RegistryError, RegistryResult, Route,
    RouteStore, Selector, StoreError, StoreResult, ROUTE_KEY_PREFIX,
};

#[cfg(feature = "redis")]
pub use colorproxy_router::RedisKvStore;

// Transports
pub use colorproxy_transport::{
    Forwarder, HttpForwarder, HttpForwarderConfig, RpcForwarder, RpcForwarderConfig, RpcRelay,
    TransportError, TransportLifecycle, TransportResult,
};

// Orchestration
pub use colorproxy_control::{
    ColorProxy, ConfigError, Dispatch, Heartbeat, ProxyComponents, ProxyConfig, ProxyError,
    ProxyResult, ProxyState, RegisterRoute, SelfRegistration,
};

// axum integration
pub use colorproxy_api::{admin_router, attach, ApiDoc};
