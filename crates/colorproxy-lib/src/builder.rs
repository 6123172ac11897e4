//! High-level builder for a running [`ColorProxy`]
//!
//! # Quick Start
//!
//! ```ignore
//! use colorproxy_lib::{attach, ColorProxyBuilder};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let proxy = ColorProxyBuilder::new()
//!         .ttl(Duration::from_secs(60))
//!         .routing_header("x-color")
//!         .start()
//!         .await?;
//!
//!     let app = attach(axum::Router::new(), proxy.clone());
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!
//!     proxy.shutdown(Duration::from_secs(5)).await?;
//!     Ok(())
//! }
//! ```

use colorproxy_control::{
    ColorProxy, ConfigError, ProxyComponents, ProxyConfig, ProxyError, ProxyResult,
    SelfRegistration,
};
use colorproxy_router::{KvRouteStore, RouteStore, Selector};
use colorproxy_transport::{
    Forwarder, HttpForwarder, HttpForwarderConfig, RpcForwarder, RpcForwarderConfig, RpcRelay,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Where routes are kept
enum RegistrySource {
    InMemory,
    Custom(Arc<dyn RouteStore>),
    #[cfg(feature = "redis")]
    Redis(String),
}

/// Builder for a [`ColorProxy`].
///
/// Routes are kept in memory unless a registry (or, with the `redis`
/// feature, a Redis URL) is supplied. Forwarding uses an
/// [`HttpForwarder`] bounded by the proxy's request timeout unless
/// [`http_forwarder`](Self::http_forwarder) or
/// [`forwarder`](Self::forwarder) says otherwise.
pub struct ColorProxyBuilder {
    config: ProxyConfig,
    registry: RegistrySource,
    http: Option<HttpForwarderConfig>,
    forwarder: Option<Arc<dyn Forwarder>>,
    selector: Option<Arc<dyn Selector>>,
    rpc: Option<RpcForwarderConfig>,
}

impl ColorProxyBuilder {
    pub fn new() -> Self {
        Self::from_config(ProxyConfig::default())
    }

    pub fn from_config(config: ProxyConfig) -> Self {
        Self {
            config,
            registry: RegistrySource::InMemory,
            http: None,
            forwarder: None,
            selector: None,
            rpc: None,
        }
    }

    /// Lease granted on register and heartbeat (default: 120s)
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl = ttl;
        self
    }

    /// Period of the self-heartbeat (default: 30s)
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Period of the expired-route sweep (default: 60s)
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn routing_header(mut self, header: &str) -> Self {
        self.config.routing_header = header.to_string();
        self
    }

    pub fn admin_prefix(mut self, prefix: &str) -> Self {
        self.config.admin_prefix = prefix.to_string();
        self
    }

    /// Register this instance under a tag and keep the route alive
    pub fn self_registration(mut self, registration: SelfRegistration) -> Self {
        self.config.self_registration = Some(registration);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn RouteStore>) -> Self {
        self.registry = RegistrySource::Custom(registry);
        self
    }

    /// Keep routes in a Redis server shared with other instances
    #[cfg(feature = "redis")]
    pub fn redis(mut self, url: &str) -> Self {
        self.registry = RegistrySource::Redis(url.to_string());
        self
    }

    pub fn http_forwarder(mut self, config: HttpForwarderConfig) -> Self {
        self.http = Some(config);
        self
    }

    /// Use a custom forwarder; overrides [`http_forwarder`](Self::http_forwarder)
    pub fn forwarder(mut self, forwarder: Arc<dyn Forwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    pub fn selector(mut self, selector: Arc<dyn Selector>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Enable unary RPC relaying
    pub fn rpc(mut self, config: RpcForwarderConfig) -> Self {
        self.rpc = Some(config);
        self
    }

    /// Validate everything, connect the registry and start the proxy
    pub async fn start(self) -> ProxyResult<Arc<ColorProxy>> {
        self.config.validate()?;
        if let Some(http) = &self.http {
            validate_http(http)?;
        }
        if let Some(rpc) = &self.rpc {
            validate_rpc(rpc)?;
        }

        let registry: Arc<dyn RouteStore> = match self.registry {
            RegistrySource::InMemory => {
                info!("Using in-memory route store");
                Arc::new(KvRouteStore::in_memory())
            }
            RegistrySource::Custom(registry) => registry,
            #[cfg(feature = "redis")]
            RegistrySource::Redis(url) => {
                let store = colorproxy_router::RedisKvStore::connect(&url)
                    .await
                    .map_err(|e| ProxyError::Registry(e.into()))?;
                Arc::new(KvRouteStore::new(Arc::new(store)))
            }
        };

        let forwarder = match (self.forwarder, self.http) {
            (Some(forwarder), _) => Some(forwarder),
            (None, Some(http)) => Some(Arc::new(HttpForwarder::new(http)) as Arc<dyn Forwarder>),
            (None, None) => None,
        };

        let rpc = self
            .rpc
            .map(|config| Arc::new(RpcForwarder::new(config)) as Arc<dyn RpcRelay>);

        ColorProxy::start(
            self.config,
            ProxyComponents {
                registry: Some(registry),
                forwarder,
                selector: self.selector,
                rpc,
            },
        )
        .await
    }
}

impl Default for ColorProxyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_http(config: &HttpForwarderConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("request_timeout", config.request_timeout),
        ("idle_timeout", config.idle_timeout),
        ("sweep_interval", config.sweep_interval),
    ] {
        if value.is_zero() {
            return Err(ConfigError::Transport(format!(
                "http forwarder {} must be non-zero",
                name
            )));
        }
    }
    Ok(())
}

fn validate_rpc(config: &RpcForwarderConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("request_timeout", config.request_timeout),
        ("connect_timeout", config.connect_timeout),
        ("idle_timeout", config.idle_timeout),
        ("sweep_interval", config.sweep_interval),
    ] {
        if value.is_zero() {
            return Err(ConfigError::Transport(format!(
                "rpc forwarder {} must be non-zero",
                name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use colorproxy_control::ProxyState;

    #[tokio::test]
    async fn test_builder_defaults_to_memory_store() {
        let proxy = ColorProxyBuilder::new().start().await.unwrap();

        assert_eq!(proxy.state(), ProxyState::Running);
        assert!(proxy.list_routes().await.unwrap().is_empty());

        proxy.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_builder_applies_settings() {
        let proxy = ColorProxyBuilder::new()
            .ttl(Duration::from_secs(10))
            .routing_header("X-Color")
            .admin_prefix("/admin")
            .start()
            .await
            .unwrap();

        assert_eq!(proxy.config().ttl, Duration::from_secs(10));
        assert_eq!(proxy.routing_header().as_str(), "x-color");
        assert_eq!(proxy.config().admin_prefix, "/admin");
    }

    #[tokio::test]
    async fn test_builder_rejects_zero_http_timeout() {
        let result = ColorProxyBuilder::new()
            .http_forwarder(HttpForwarderConfig {
                request_timeout: Duration::ZERO,
                ..Default::default()
            })
            .start()
            .await;

        assert!(matches!(
            result,
            Err(ProxyError::Config(ConfigError::Transport(_)))
        ));
    }

    #[tokio::test]
    async fn test_builder_rejects_invalid_proxy_config() {
        let result = ColorProxyBuilder::new().admin_prefix("admin").start().await;

        assert!(matches!(
            result,
            Err(ProxyError::Config(ConfigError::InvalidAdminPrefix(_)))
        ));
    }

    #[test]
    fn test_rpc_validation() {
        let config = RpcForwarderConfig {
            connect_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(validate_rpc(&config).is_err());
        assert!(validate_rpc(&RpcForwarderConfig::default()).is_ok());
    }
}
