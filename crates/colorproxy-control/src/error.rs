use crate::config::ConfigError;
use crate::proxy::ProxyState;
use colorproxy_router::RegistryError;
use colorproxy_transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by [`ColorProxy`](crate::ColorProxy) operations
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, Duration),

    #[error("Background tasks did not stop within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("Proxy is closed")]
    Closed,

    #[error("Operation not allowed while proxy is {0}")]
    InvalidState(ProxyState),

    #[error("No RPC forwarder configured")]
    RpcNotConfigured,
}

pub type ProxyResult<T> = Result<T, ProxyError>;
