//! gRPC relay over pooled tonic channels
//!
//! Payloads are relayed as opaque bytes, so any unary method can be forwarded
//! without generated stubs.

use crate::pool::{spawn_idle_sweep, IdlePool};
use crate::{RpcRelay, TransportError, TransportLifecycle, TransportResult};
use ::http::uri::{Authority, PathAndQuery};
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tonic::client::Grpc;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::transport::{Channel, Endpoint};
use tonic::Status;
use tracing::{debug, info};

/// Configuration for [`RpcForwarder`]
#[derive(Debug, Clone)]
pub struct RpcForwarderConfig {
    /// Per-call deadline, including waiting for the channel to become ready
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_timeout: Duration,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for RpcForwarderConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(10),
            keepalive_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Reduce `host:port` or `scheme://host:port[/..]` to `host:port`
pub fn normalize_rpc_target(target: &str) -> TransportResult<String> {
    let trimmed = target.trim();
    let rest = match trimmed.split_once("://") {
        Some((_, rest)) => rest,
        None => trimmed,
    };
    let authority = rest.split('/').next().unwrap_or_default();

    if authority.is_empty() {
        return Err(TransportError::InvalidTarget(format!(
            "{}: missing host",
            target
        )));
    }

    authority
        .parse::<Authority>()
        .map(|authority| authority.to_string())
        .map_err(|e| TransportError::InvalidTarget(format!("{}: {}", target, e)))
}

/// Pass-through codec: message bodies stay opaque bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

#[derive(Debug, Clone, Copy, Default)]
pub struct RawEncoder;

#[derive(Debug, Clone, Copy, Default)]
pub struct RawDecoder;

impl Codec for RawCodec {
    type Encode = Bytes;
    type Decode = Bytes;
    type Encoder = RawEncoder;
    type Decoder = RawDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        RawEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        RawDecoder
    }
}

impl Encoder for RawEncoder {
    type Item = Bytes;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        dst.put(item);
        Ok(())
    }
}

impl Decoder for RawDecoder {
    type Item = Bytes;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let len = src.remaining();
        Ok(Some(src.copy_to_bytes(len)))
    }
}

/// Relays unary calls over one lazily-connected channel per authority
pub struct RpcForwarder {
    config: RpcForwarderConfig,
    pool: Arc<IdlePool<Channel>>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl RpcForwarder {
    /// Create the forwarder and start its idle sweep on the current runtime
    pub fn new(config: RpcForwarderConfig) -> Self {
        let pool = Arc::new(IdlePool::new());
        let shutdown = CancellationToken::new();

        spawn_idle_sweep(
            "rpc",
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

    pub fn config(&self) -> &RpcForwarderConfig {
        &self.config
    }

    fn channel(&self, authority: &str) -> TransportResult<Channel> {
        self.pool.get_or_try_insert(authority, || {
            let endpoint = Endpoint::from_shared(format!("http://{}", authority))
                .map_err(|e| TransportError::InvalidTarget(format!("{}: {}", authority, e)))?
                .connect_timeout(self.config.connect_timeout)
                .http2_keep_alive_interval(self.config.keepalive_interval)
                .keep_alive_timeout(self.config.keepalive_timeout)
                .keep_alive_while_idle(true);

            debug!(authority = %authority, "Opening lazy RPC channel");
            Ok(endpoint.connect_lazy())
        })
    }
}

impl Default for RpcForwarder {
    fn default() -> Self {
        Self::new(RpcForwarderConfig::default())
    }
}

impl Drop for RpcForwarder {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl TransportLifecycle for RpcForwarder {
    fn close(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.shutdown.cancel();
        let dropped = self.pool.len();
        self.pool.clear();
        info!(dropped, "RPC forwarder closed");
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
impl RpcRelay for RpcForwarder {
    async fn call(
        &self,
        target: &str,
        method: &str,
        request: tonic::Request<Bytes>,
    ) -> TransportResult<tonic::Response<Bytes>> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        if !method.starts_with('/') {
            return Err(TransportError::InvalidTarget(format!(
                "method must be /package.Service/Method, got {}",
                method
            )));
        }
        let path = PathAndQuery::try_from(method)
            .map_err(|e| TransportError::InvalidTarget(format!("{}: {}", method, e)))?;

        let authority = normalize_rpc_target(target)?;
        let mut grpc = Grpc::new(self.channel(&authority)?);

        debug!(authority = %authority, method = %method, "Relaying RPC");

        let call = async move {
            grpc.ready()
                .await
                .map_err(|e| TransportError::Connection(e.to_string()))?;
            grpc.unary(request, path, RawCodec)
                .await
                .map_err(TransportError::Rpc)
        };

        match tokio::time::timeout(self.config.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.config.request_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_rpc_target() {
        assert_eq!(normalize_rpc_target("10.0.0.1:50051").unwrap(), "10.0.0.1:50051");
        assert_eq!(
            normalize_rpc_target("grpc://10.0.0.1:50051").unwrap(),
            "10.0.0.1:50051"
        );
        assert_eq!(
            normalize_rpc_target("http://svc.internal:9000/ignored").unwrap(),
            "svc.internal:9000"
        );
        assert!(matches!(
            normalize_rpc_target("grpc://"),
            Err(TransportError::InvalidTarget(_))
        ));
        assert!(matches!(
            normalize_rpc_target("  "),
            Err(TransportError::InvalidTarget(_))
        ));
    }

    #[tokio::test]
    async fn test_channel_shared_across_target_spellings() {
        let forwarder = RpcForwarder::new(RpcForwarderConfig {
            request_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_millis(500),
            ..Default::default()
        });

        // Nothing listens on port 1, so both calls fail after borrowing the channel
        for target in ["grpc://127.0.0.1:1", "127.0.0.1:1"] {
            let result = forwarder
                .call(target, "/echo.Echo/Say", tonic::Request::new(Bytes::from_static(b"hi")))
                .await;
            assert!(result.is_err());
        }

        assert_eq!(forwarder.pool_size(), 1);
    }

    #[tokio::test]
    async fn test_invalid_method_rejected() {
        let forwarder = RpcForwarder::default();
        let result = forwarder
            .call("127.0.0.1:1", "echo.Echo/Say", tonic::Request::new(Bytes::new()))
            .await;

        assert!(matches!(result, Err(TransportError::InvalidTarget(_))));
        assert_eq!(forwarder.pool_size(), 0);
    }

    #[tokio::test]
    async fn test_call_after_close() {
        let forwarder = RpcForwarder::default();
        forwarder.close().unwrap();

        let result = forwarder
            .call("127.0.0.1:50051", "/echo.Echo/Say", tonic::Request::new(Bytes::new()))
            .await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_channels_evicted() {
        let forwarder = RpcForwarder::new(RpcForwarderConfig {
            idle_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(3600),
            ..Default::default()
        });
        forwarder.channel("127.0.0.1:50051").unwrap();
        assert_eq!(forwarder.pool_size(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(forwarder.evict_idle(), 1);
        assert_eq!(forwarder.pool_size(), 0);
    }
}
