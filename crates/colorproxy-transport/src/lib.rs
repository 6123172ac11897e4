//! Pooled forwarding transports for colorproxy
//!
//! Two relays share one lifecycle contract:
//! - [`Forwarder`]: reverse-proxies an HTTP request to a base URL
//!   ([`HttpForwarder`], built on the hyper client)
//! - [`RpcRelay`]: relays a unary gRPC call with opaque payloads
//!   ([`RpcForwarder`], built on tonic channels)
//!
//! Both keep one reusable handle per normalized target and reclaim handles that
//! sit idle past a threshold. After [`TransportLifecycle::close`] every relay
//! fails with [`TransportError::Closed`].

pub mod http;
pub mod pool;
pub mod rpc;

use async_trait::async_trait;
use axum::body::Body;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

pub use self::http::{join_query, single_joining_slash, HttpForwarder, HttpForwarderConfig};
pub use pool::IdlePool;
pub use rpc::{normalize_rpc_target, RawCodec, RpcForwarder, RpcForwarderConfig};

/// Transport-level errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("RPC failed: {0}")]
    Rpc(tonic::Status),

    #[error("Transport is closed")]
    Closed,
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Pool management shared by every relay
pub trait TransportLifecycle: Send + Sync {
    /// Stop the idle sweep and drop every pooled handle. Idempotent.
    fn close(&self) -> TransportResult<()>;

    fn is_closed(&self) -> bool;

    /// Number of pooled handles
    fn pool_size(&self) -> usize;

    /// Drop handles idle past the configured threshold, returning how many went
    fn evict_idle(&self) -> usize;
}

/// HTTP reverse-proxy relay
#[async_trait]
pub trait Forwarder: TransportLifecycle {
    /// Forward `request` to the base URL `target` and return the backend response as-is
    async fn relay(&self, target: &str, request: ::http::Request<Body>)
        -> TransportResult<::http::Response<Body>>;
}

/// Unary gRPC relay with opaque payloads
#[async_trait]
pub trait RpcRelay: TransportLifecycle {
    /// Invoke `method` (e.g., "/echo.Echo/Say") on `target`, forwarding request metadata
    async fn call(
        &self,
        target: &str,
        method: &str,
        request: tonic::Request<Bytes>,
    ) -> TransportResult<tonic::Response<Bytes>>;
}
