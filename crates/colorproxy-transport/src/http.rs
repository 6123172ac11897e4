//! HTTP reverse-proxy forwarder
//!
//! Uses the hyper pooled client, one client per target base URL, so
//! keep-alive connections are reused across requests for the same backend.
//! `https` backends are reached over rustls with the webpki root store.
//! Request and response bodies are streamed, never buffered.

use crate::pool::{spawn_idle_sweep, IdlePool};
use crate::{Forwarder, TransportError, TransportLifecycle, TransportResult};
use ::http::header::{HeaderMap, HeaderValue, HOST};
use ::http::uri::{Authority, Scheme, Uri};
use ::http::{Request, Response, Version};
use async_trait::async_trait;
use axum::body::Body;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use rustls::crypto::ring;
use rustls::{ClientConfig, RootCertStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Headers that apply to a single hop and are never forwarded
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "proxy-authorization",
    "proxy-authenticate",
];

type HttpClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Configuration for [`HttpForwarder`]
#[derive(Debug, Clone)]
pub struct HttpForwarderConfig {
    /// Bound on connect + send + response headers
    pub request_timeout: Duration,
    /// Pooled clients and their keep-alive connections are dropped after this much idleness
    pub idle_timeout: Duration,
    /// How often the idle sweep runs
    pub sweep_interval: Duration,
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpForwarderConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            pool_max_idle_per_host: 32,
        }
    }
}

/// Parsed `http(s)://authority/base?query` target
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    scheme: Scheme,
    authority: Authority,
    base_path: String,
    base_query: Option<String>,
}

impl Target {
    fn parse(target: &str) -> TransportResult<Self> {
        let uri: Uri = target
            .parse()
            .map_err(|e| TransportError::InvalidTarget(format!("{}: {}", target, e)))?;

        let scheme = match uri.scheme_str() {
            Some("http") => Scheme::HTTP,
            Some("https") => Scheme::HTTPS,
            Some(other) => {
                return Err(TransportError::InvalidTarget(format!(
                    "{}: unsupported scheme {}",
                    target, other
                )))
            }
            None => {
                return Err(TransportError::InvalidTarget(format!(
                    "{}: not an absolute URL",
                    target
                )))
            }
        };

        let authority = uri
            .authority()
            .cloned()
            .ok_or_else(|| TransportError::InvalidTarget(format!("{}: missing host", target)))?;

        // A bare authority parses with path "/"
        let base_path = match uri.path() {
            "/" if !target.trim_end().ends_with('/') => String::new(),
            path => path.to_string(),
        };

        Ok(Self {
            scheme,
            authority,
            base_path,
            base_query: uri.query().map(str::to_string),
        })
    }

    /// One pooled client per scheme, authority and base path
    fn pool_key(&self) -> String {
        format!("{}://{}{}", self.scheme, self.authority, self.base_path)
    }

    fn upstream_uri(&self, inbound: &Uri) -> TransportResult<Uri> {
        let path = single_joining_slash(&self.base_path, inbound.path());
        let uri = match join_query(self.base_query.as_deref(), inbound.query()) {
            Some(query) => format!("{}://{}{}?{}", self.scheme, self.authority, path, query),
            None => format!("{}://{}{}", self.scheme, self.authority, path),
        };

        uri.parse()
            .map_err(|e| TransportError::InvalidTarget(format!("{}: {}", uri, e)))
    }

    fn host_header(&self) -> TransportResult<HeaderValue> {
        HeaderValue::from_str(self.authority.as_str())
            .map_err(|e| TransportError::InvalidTarget(format!("{}: {}", self.authority, e)))
    }
}

/// Join two path segments with exactly one slash between them
///
/// `/api` + `/users` and `/api/` + `users` both give `/api/users`.
pub fn single_joining_slash(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

/// Concatenate the target's query and the inbound query with `&`
pub fn join_query(base: Option<&str>, inbound: Option<&str>) -> Option<String> {
    match (base.filter(|q| !q.is_empty()), inbound.filter(|q| !q.is_empty())) {
        (Some(base), Some(inbound)) => Some(format!("{}&{}", base, inbound)),
        (Some(query), None) | (None, Some(query)) => Some(query.to_string()),
        (None, None) => None,
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

/// Client TLS settings trusting the webpki roots, using the ring provider
fn tls_config() -> TransportResult<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Connection(format!("TLS setup failed: {}", e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(config)
}

fn map_client_error(err: hyper_util::client::legacy::Error) -> TransportError {
    let detail = match std::error::Error::source(&err) {
        Some(source) => format!("{}: {}", err, source),
        None => err.to_string(),
    };

    if err.is_connect() {
        TransportError::Connection(detail)
    } else {
        TransportError::Upstream(detail)
    }
}

/// Reverse proxy relaying requests to backend base URLs
pub struct HttpForwarder {
    config: HttpForwarderConfig,
    pool: Arc<IdlePool<HttpClient>>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl HttpForwarder {
    /// Create the forwarder and start its idle sweep on the current runtime
    pub fn new(config: HttpForwarderConfig) -> Self {
        let pool = Arc::new(IdlePool::new());
        let shutdown = CancellationToken::new();

        spawn_idle_sweep(
            "http",
            pool.clone(),
            config.sweep_interval,
            config.idle_timeout,
            shutdown.clone(),
        );

        Self {
            config,
            pool,
            shutdown,
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &HttpForwarderConfig {
        &self.config
    }

    fn build_client(&self) -> TransportResult<HttpClient> {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.set_connect_timeout(Some(self.config.request_timeout));
        // The TLS layer hands https URIs down to the TCP connector
        connector.enforce_http(false);

        let connector = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config()?)
            .https_or_http()
            .enable_http1()
            .wrap_connector(connector);

        Ok(Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(self.config.idle_timeout)
            .pool_max_idle_per_host(self.config.pool_max_idle_per_host)
            .build(connector))
    }
}

impl Default for HttpForwarder {
    fn default() -> Self {
        Self::new(HttpForwarderConfig::default())
    }
}

impl Drop for HttpForwarder {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl TransportLifecycle for HttpForwarder {
    fn close(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.shutdown.cancel();
        let dropped = self.pool.len();
        self.pool.clear();
        info!(dropped, "HTTP forwarder closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn pool_size(&self) -> usize {
        self.pool.len()
    }

    fn evict_idle(&self) -> usize {
        self.pool.evict_idle(self.config.idle_timeout)
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn relay(&self, target: &str, request: Request<Body>) -> TransportResult<Response<Body>> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let target = Target::parse(target)?;
        let client = self
            .pool
            .get_or_try_insert(&target.pool_key(), || self.build_client())?;

        let (mut parts, body) = request.into_parts();
        let method = parts.method.clone();
        parts.uri = target.upstream_uri(&parts.uri)?;
        // The pooled client speaks HTTP/1.1 to backends
        parts.version = Version::HTTP_11;
        strip_hop_by_hop(&mut parts.headers);
        parts.headers.insert(HOST, target.host_header()?);

        debug!(method = %method, upstream = %parts.uri, "Forwarding request");

        let upstream = Request::from_parts(parts, body);
        let response =
            match tokio::time::timeout(self.config.request_timeout, client.request(upstream)).await
            {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    let err = map_client_error(e);
                    warn!(authority = %target.authority, error = %err, "Upstream request failed");
                    return Err(err);
                }
                Err(_) => {
                    warn!(
                        authority = %target.authority,
                        timeout = ?self.config.request_timeout,
                        "Upstream request timed out"
                    );
                    return Err(TransportError::Timeout(self.config.request_timeout));
                }
            };

        let (mut parts, incoming): (_, hyper::body::Incoming) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        debug!(status = %parts.status, "Upstream responded");

        Ok(Response::from_parts(parts, Body::new(incoming)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_joining_slash() {
        assert_eq!(single_joining_slash("/api", "/users"), "/api/users");
        assert_eq!(single_joining_slash("/api/", "/users"), "/api/users");
        assert_eq!(single_joining_slash("/api/", "users"), "/api/users");
        assert_eq!(single_joining_slash("/api", "users"), "/api/users");
        assert_eq!(single_joining_slash("", "users"), "/users");
        assert_eq!(single_joining_slash("", "/users"), "/users");
    }

    #[test]
    fn test_join_query() {
        assert_eq!(join_query(Some("a=1"), Some("b=2")), Some("a=1&b=2".to_string()));
        assert_eq!(join_query(Some("a=1"), None), Some("a=1".to_string()));
        assert_eq!(join_query(None, Some("b=2")), Some("b=2".to_string()));
        assert_eq!(join_query(Some(""), Some("b=2")), Some("b=2".to_string()));
        assert_eq!(join_query(None, None), None);
    }

    #[test]
    fn test_target_parse() {
        let target = Target::parse("http://10.0.0.7:8080/api?v=2").unwrap();
        assert_eq!(target.authority.as_str(), "10.0.0.7:8080");
        assert_eq!(target.base_path, "/api");
        assert_eq!(target.base_query.as_deref(), Some("v=2"));
        assert_eq!(target.pool_key(), "http://10.0.0.7:8080/api");

        let bare = Target::parse("http://backend:9000").unwrap();
        assert_eq!(bare.base_path, "");
        assert_eq!(bare.pool_key(), "http://backend:9000");

        let trailing = Target::parse("http://backend:9000/").unwrap();
        assert_eq!(trailing.base_path, "/");

        let secure = Target::parse("https://backend.example.com/api").unwrap();
        assert_eq!(secure.scheme, Scheme::HTTPS);
        assert_eq!(secure.pool_key(), "https://backend.example.com/api");
        let plain = Target::parse("http://backend.example.com/api").unwrap();
        assert_ne!(secure.pool_key(), plain.pool_key());
    }

    #[test]
    fn test_target_parse_rejects_invalid() {
        for target in ["", "backend:9000", "/relative", "ftp://host/x", "http://"] {
            assert!(
                matches!(Target::parse(target), Err(TransportError::InvalidTarget(_))),
                "{} should be rejected",
                target
            );
        }
    }

    #[test]
    fn test_upstream_uri() {
        let target = Target::parse("http://backend:9000/api?v=2").unwrap();
        let inbound: Uri = "/users/7?page=3".parse().unwrap();
        assert_eq!(
            target.upstream_uri(&inbound).unwrap(),
            "http://backend:9000/api/users/7?v=2&page=3"
        );

        let bare = Target::parse("http://backend:9000").unwrap();
        let root: Uri = "/".parse().unwrap();
        assert_eq!(bare.upstream_uri(&root).unwrap(), "http://backend:9000/");

        let secure = Target::parse("https://backend:8443/v1").unwrap();
        assert_eq!(
            secure.upstream_uri(&inbound).unwrap(),
            "https://backend:8443/v1/users/7?page=3"
        );
    }

    #[test]
    fn test_tls_config_builds() {
        assert!(tls_config().is_ok());
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("proxy-authorization", HeaderValue::from_static("Basic x"));
        headers.insert("upgrade", HeaderValue::from_static("websocket"));
        headers.insert("x-request-id", HeaderValue::from_static("abc"));
        headers.insert("authorization", HeaderValue::from_static("Bearer t"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 2);
        assert!(headers.contains_key("x-request-id"));
        assert!(headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn test_relay_after_close() {
        let forwarder = HttpForwarder::default();
        forwarder.close().unwrap();
        // Idempotent
        forwarder.close().unwrap();

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let result = forwarder.relay("http://127.0.0.1:1", request).await;
        assert!(matches!(result, Err(TransportError::Closed)));
        assert!(forwarder.is_closed());
    }

    #[tokio::test]
    async fn test_relay_invalid_target() {
        let forwarder = HttpForwarder::default();
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();

        let result = forwarder.relay("not a url", request).await;
        assert!(matches!(result, Err(TransportError::InvalidTarget(_))));
        assert_eq!(forwarder.pool_size(), 0);
    }
}
