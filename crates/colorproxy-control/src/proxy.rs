//! The proxy orchestrator
//!
//! Owns the registry, forwarders and selector, runs the background tasks
//! (expired-route sweep and optional self-heartbeat) and drives shutdown in a
//! fixed order: stop tasks, deregister self, wait for tasks under a deadline,
//! close forwarders, close the registry.

use crate::config::ProxyConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::self_address::resolve_self_address;
use crate::supervisor::TaskSupervisor;
use axum::body::Body;
use bytes::Bytes;
use colorproxy_router::{DirectSelector, RegistryError, Route, RouteStore, Selector};
use colorproxy_transport::{
    Forwarder, HttpForwarder, HttpForwarderConfig, RpcRelay, TransportLifecycle,
};
use http::{HeaderMap, HeaderName, Request, Response};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

pub const ROUTE_SWEEP_TASK: &str = "route-sweep";
pub const SELF_HEARTBEAT_TASK: &str = "self-heartbeat";

/// Lifecycle of a [`ColorProxy`]; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProxyState {
    Initializing = 0,
    Running = 1,
    ShuttingDown = 2,
    Closed = 3,
}

impl ProxyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ProxyState::Initializing,
            1 => ProxyState::Running,
            2 => ProxyState::ShuttingDown,
            _ => ProxyState::Closed,
        }
    }
}

impl fmt::Display for ProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProxyState::Initializing => "initializing",
            ProxyState::Running => "running",
            ProxyState::ShuttingDown => "shutting down",
            ProxyState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Pluggable parts of a proxy. Only the registry is mandatory.
#[derive(Default)]
pub struct ProxyComponents {
    pub registry: Option<Arc<dyn RouteStore>>,
    /// Defaults to an [`HttpForwarder`] using the proxy's request timeout
    pub forwarder: Option<Arc<dyn Forwarder>>,
    /// Defaults to a [`DirectSelector`] over the registry
    pub selector: Option<Arc<dyn Selector>>,
    pub rpc: Option<Arc<dyn RpcRelay>>,
}

/// Input of an administrative register
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterRoute {
    pub tag: String,
    pub address: String,
    pub token: String,
    pub owner: String,
}

/// Input of an administrative heartbeat
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Heartbeat {
    pub tag: String,
    pub address: String,
    pub token: String,
}

/// Outcome of routing one inbound request
#[derive(Debug)]
pub enum Dispatch {
    /// A backend answered; the response is returned verbatim
    Forwarded(Response<Body>),
    /// The proxy does not handle this request; serve it locally
    Passthrough(Request<Body>),
    /// A backend was selected but forwarding failed
    Failed(ProxyError),
}

/// Self route with its address already resolved
#[derive(Debug, Clone)]
struct SelfRoute {
    tag: String,
    address: String,
    token: String,
    owner: String,
}

impl SelfRoute {
    fn to_route(&self) -> Route {
        Route::new(&self.tag, &self.address, &self.token).with_owner(&self.owner)
    }
}

/// Tag-routing reverse proxy with a leased route registry
pub struct ColorProxy {
    config: Arc<ProxyConfig>,
    routing_header: HeaderName,
    registry: Arc<dyn RouteStore>,
    forwarder: Arc<dyn Forwarder>,
    selector: Arc<dyn Selector>,
    rpc: Option<Arc<dyn RpcRelay>>,
    supervisor: TaskSupervisor,
    shutdown_lock: Mutex<()>,
    self_route: Option<SelfRoute>,
    state: AtomicU8,
}

impl ColorProxy {
    /// Validate the configuration, start background tasks and register the
    /// proxy's own route when configured.
    ///
    /// Must be called within a tokio runtime.
    pub async fn start(config: ProxyConfig, components: ProxyComponents) -> ProxyResult<Arc<Self>> {
        config.validate()?;
        let routing_header = config.routing_header_name()?;

        let registry = components
            .registry
            .ok_or(crate::config::ConfigError::RegistryRequired)?;
        let forwarder = components.forwarder.unwrap_or_else(|| {
            Arc::new(HttpForwarder::new(HttpForwarderConfig {
                request_timeout: config.request_timeout,
                ..Default::default()
            }))
        });
        let selector = components
            .selector
            .unwrap_or_else(|| Arc::new(DirectSelector::new(registry.clone())));

        let self_route = config.self_registration.as_ref().and_then(|registration| {
            match resolve_self_address(&registration.address) {
                Ok(address) => Some(SelfRoute {
                    tag: registration.tag.clone(),
                    address,
                    token: registration.token.clone(),
                    owner: registration.owner.clone(),
                }),
                Err(e) => {
                    error!(
                        color = %registration.tag,
                        address = %registration.address,
                        "Failed to resolve self address, self registration disabled: {}",
                        e
                    );
                    None
                }
            }
        });

        let proxy = Arc::new(Self {
            config: Arc::new(config),
            routing_header,
            registry,
            forwarder,
            selector,
            rpc: components.rpc,
            supervisor: TaskSupervisor::new(),
            shutdown_lock: Mutex::new(()),
            self_route,
            state: AtomicU8::new(ProxyState::Initializing as u8),
        });

        proxy.start_background_tasks();

        if let Some(route) = &proxy.self_route {
            match proxy.register_self(route).await {
                Ok(stored) => info!(
                    color = %stored.tag,
                    address = %stored.address,
                    "Self registered"
                ),
                Err(e) => error!(color = %route.tag, "Self registration failed: {}", e),
            }
        }

        proxy.set_state(ProxyState::Running);
        info!(
            routing_header = %proxy.routing_header,
            admin_prefix = %proxy.config.admin_prefix,
            ttl = ?proxy.config.ttl,
            "Color proxy started"
        );
        Ok(proxy)
    }

    fn start_background_tasks(&self) {
        let registry = self.registry.clone();
        let timeout = self.config.request_timeout;
        self.supervisor.spawn_periodic(
            ROUTE_SWEEP_TASK,
            self.config.cleanup_interval,
            move || {
                let registry = registry.clone();
                async move {
                    match tokio::time::timeout(timeout, registry.delete_expired()).await {
                        Ok(Ok(purged)) => debug!(purged, "Route sweep complete"),
                        Ok(Err(e)) => error!("Cleanup of expired routes failed: {}", e),
                        Err(_) => error!("Cleanup of expired routes timed out after {:?}", timeout),
                    }
                }
            },
        );

        if let Some(route) = self.self_route.clone() {
            let registry = self.registry.clone();
            let ttl = self.config.ttl;
            self.supervisor.spawn_periodic(
                SELF_HEARTBEAT_TASK,
                self.config.heartbeat_interval,
                move || {
                    let registry = registry.clone();
                    let route = route.clone();
                    async move { heartbeat_self(registry.as_ref(), &route, ttl, timeout).await }
                },
            );
        }
    }

    async fn register_self(&self, route: &SelfRoute) -> ProxyResult<Route> {
        self.bounded("register", self.registry.register(route.to_route(), self.config.ttl))
            .await
    }

    pub fn state(&self) -> ProxyState {
        ProxyState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, next: ProxyState) {
        // Never move backwards
        self.state.fetch_max(next as u8, Ordering::AcqRel);
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn routing_header(&self) -> &HeaderName {
        &self.routing_header
    }

    pub fn registry(&self) -> &Arc<dyn RouteStore> {
        &self.registry
    }

    pub fn forwarder(&self) -> &Arc<dyn Forwarder> {
        &self.forwarder
    }

    /// Address the proxy advertises for itself, once resolved
    pub fn self_address(&self) -> Option<&str> {
        self.self_route.as_ref().map(|route| route.address.as_str())
    }

    /// Names of running background tasks
    pub fn background_tasks(&self) -> Vec<String> {
        self.supervisor.task_names()
    }

    fn ensure_open(&self) -> ProxyResult<()> {
        if self.state() == ProxyState::Closed {
            return Err(ProxyError::Closed);
        }
        Ok(())
    }

    /// Run a registry call on behalf of a caller, bounded by the request timeout
    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, RegistryError>>,
    ) -> ProxyResult<T> {
        self.ensure_open()?;
        match tokio::time::timeout(self.config.request_timeout, call).await {
            Ok(result) => result.map_err(ProxyError::from),
            Err(_) => Err(ProxyError::Timeout(operation, self.config.request_timeout)),
        }
    }

    /// Register (or overwrite) a route leased for the configured TTL
    pub async fn register(&self, input: RegisterRoute) -> ProxyResult<Route> {
        require("color", &input.tag)?;
        require("address", &input.address)?;
        require("token", &input.token)?;

        let route = Route::new(input.tag, input.address, input.token).with_owner(input.owner);
        let stored = self
            .bounded("register", self.registry.register(route, self.config.ttl))
            .await?;

        info!(color = %stored.tag, address = %stored.address, owner = %stored.owner, "Route registered");
        Ok(stored)
    }

    /// Renew a route's lease; address and token must match the stored route
    pub async fn heartbeat(&self, input: Heartbeat) -> ProxyResult<Route> {
        require("color", &input.tag)?;
        require("address", &input.address)?;
        require("token", &input.token)?;

        self.bounded(
            "heartbeat",
            self.registry
                .heartbeat(&input.tag, &input.address, &input.token, self.config.ttl),
        )
        .await
    }

    pub async fn get_route(&self, tag: &str) -> ProxyResult<Route> {
        self.bounded("get", self.registry.get(tag)).await
    }

    pub async fn list_routes(&self) -> ProxyResult<Vec<Route>> {
        let mut routes = self.bounded("list", self.registry.list()).await?;
        routes.sort_by(|a, b| a.tag.cmp(&b.tag));
        Ok(routes)
    }

    pub async fn delete_route(&self, tag: &str) -> ProxyResult<()> {
        self.bounded("delete", self.registry.delete(tag)).await?;
        info!(color = %tag, "Route deleted");
        Ok(())
    }

    /// Route one inbound request by its tag header
    pub async fn dispatch(&self, request: Request<Body>) -> Dispatch {
        let Some(tag) = routing_tag(request.headers(), &self.routing_header) else {
            return Dispatch::Passthrough(request);
        };

        if self.state() == ProxyState::Closed {
            return Dispatch::Failed(ProxyError::Closed);
        }

        let target = match tokio::time::timeout(
            self.config.request_timeout,
            self.selector.resolve(&tag),
        )
        .await
        {
            Ok(Ok(target)) => target,
            Ok(Err(RegistryError::NotFound(_))) => {
                debug!(color = %tag, "No route for tag, passing through");
                return Dispatch::Passthrough(request);
            }
            Ok(Err(e)) => {
                warn!(color = %tag, error = %e, "Route lookup failed, passing through");
                return Dispatch::Passthrough(request);
            }
            Err(_) => {
                warn!(color = %tag, "Route lookup timed out, passing through");
                return Dispatch::Passthrough(request);
            }
        };

        debug!(color = %tag, target = %target, uri = %request.uri(), "Dispatching request");

        match self.forwarder.relay(&target, request).await {
            Ok(response) => Dispatch::Forwarded(response),
            Err(e) => {
                warn!(color = %tag, target = %target, error = %e, "Forwarding failed");
                Dispatch::Failed(ProxyError::Transport(e))
            }
        }
    }

    /// Relay a unary RPC to the backend selected by `tag`
    pub async fn call_rpc(
        &self,
        tag: &str,
        method: &str,
        request: tonic::Request<Bytes>,
    ) -> ProxyResult<tonic::Response<Bytes>> {
        self.ensure_open()?;
        let rpc = self.rpc.as_ref().ok_or(ProxyError::RpcNotConfigured)?;

        let target = self.bounded("resolve", self.selector.resolve(tag)).await?;
        debug!(color = %tag, target = %target, method = %method, "Dispatching RPC");

        Ok(rpc.call(&target, method, request).await?)
    }

    /// Stop background tasks, deregister self, wait up to `deadline` for the
    /// tasks, then release forwarders and the registry.
    ///
    /// The deadline covers every step, including the self-route delete. On
    /// timeout nothing is released and the proxy stays shutting down, so
    /// shutdown can be called again. Shutting down a closed proxy is a no-op.
    pub async fn shutdown(&self, deadline: Duration) -> ProxyResult<()> {
        let until = Instant::now() + deadline;
        // One shutdown at a time; a concurrent caller sees the outcome
        let _guard = match timeout_at(until, self.shutdown_lock.lock()).await {
            Ok(guard) => guard,
            Err(_) => return Err(ProxyError::ShutdownTimeout(deadline)),
        };

        match self.state() {
            ProxyState::Closed => return Ok(()),
            ProxyState::Initializing => {
                return Err(ProxyError::InvalidState(ProxyState::Initializing))
            }
            ProxyState::Running | ProxyState::ShuttingDown => {}
        }

        self.set_state(ProxyState::ShuttingDown);
        info!("Shutting down color proxy");
        self.supervisor.cancel();

        if let Some(route) = &self.self_route {
            match timeout_at(until, self.registry.delete(&route.tag)).await {
                Ok(Ok(())) => info!(color = %route.tag, "Self route removed"),
                Ok(Err(e)) => error!(color = %route.tag, "Failed to remove self route: {}", e),
                Err(_) => {
                    warn!(
                        color = %route.tag,
                        ?deadline,
                        "Removing self route outlived the shutdown deadline"
                    );
                    return Err(ProxyError::ShutdownTimeout(deadline));
                }
            }
        }

        let remaining = until.saturating_duration_since(Instant::now());
        if !self.supervisor.join(remaining).await {
            warn!(
                ?deadline,
                pending = ?self.supervisor.task_names(),
                "Background tasks still running at shutdown deadline"
            );
            return Err(ProxyError::ShutdownTimeout(deadline));
        }

        self.set_state(ProxyState::Closed);

        if let Err(e) = self.forwarder.close() {
            error!("Failed to close HTTP forwarder: {}", e);
        }
        if let Some(rpc) = &self.rpc {
            if let Err(e) = rpc.close() {
                error!("Failed to close RPC forwarder: {}", e);
            }
        }

        self.registry.close().await?;
        info!("Color proxy closed");
        Ok(())
    }
}

/// One self-heartbeat tick. A missing route (e.g., after a store flush) is
/// registered again.
async fn heartbeat_self(
    registry: &dyn RouteStore,
    route: &SelfRoute,
    ttl: Duration,
    timeout: Duration,
) {
    let heartbeat = registry.heartbeat(&route.tag, &route.address, &route.token, ttl);
    let result = match tokio::time::timeout(timeout, heartbeat).await {
        Ok(Err(RegistryError::NotFound(_))) => {
            warn!(color = %route.tag, "Self route missing, registering again");
            match tokio::time::timeout(timeout, registry.register(route.to_route(), ttl)).await {
                Ok(result) => result.map(|_| ()),
                Err(_) => {
                    error!(color = %route.tag, "Self registration timed out");
                    return;
                }
            }
        }
        Ok(result) => result.map(|_| ()),
        Err(_) => {
            error!(color = %route.tag, "Self heartbeat timed out after {:?}", timeout);
            return;
        }
    };

    match result {
        Ok(()) => debug!(color = %route.tag, "Self heartbeat ok"),
        Err(e) => error!(color = %route.tag, "Self heartbeat failed: {}", e),
    }
}

fn require(field: &str, value: &str) -> ProxyResult<()> {
    if value.trim().is_empty() {
        return Err(ProxyError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

/// Non-empty UTF-8 value of the routing header
fn routing_tag(headers: &HeaderMap, header: &HeaderName) -> Option<String> {
    headers
        .get(header)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_state_round_trip() {
        for state in [
            ProxyState::Initializing,
            ProxyState::Running,
            ProxyState::ShuttingDown,
            ProxyState::Closed,
        ] {
            assert_eq!(ProxyState::from_u8(state as u8), state);
        }
        assert_eq!(ProxyState::ShuttingDown.to_string(), "shutting down");
    }

    #[test]
    fn test_routing_tag() {
        let header = HeaderName::from_static("color");
        let mut headers = HeaderMap::new();
        assert_eq!(routing_tag(&headers, &header), None);

        headers.insert("color", HeaderValue::from_static(""));
        assert_eq!(routing_tag(&headers, &header), None);

        headers.insert("color", HeaderValue::from_static("  "));
        assert_eq!(routing_tag(&headers, &header), None);

        headers.insert("color", HeaderValue::from_bytes(b"\xffblue").unwrap());
        assert_eq!(routing_tag(&headers, &header), None);

        headers.insert("color", HeaderValue::from_static("blue"));
        assert_eq!(routing_tag(&headers, &header), Some("blue".to_string()));
    }

    #[test]
    fn test_require() {
        assert!(require("color", "blue").is_ok());
        assert!(matches!(
            require("color", " "),
            Err(ProxyError::Validation(msg)) if msg == "color is required"
        ));
    }
}
