//! Tag dispatch middleware
//!
//! Tagged requests with a registered route are answered by the backend;
//! everything else continues to the host application.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use colorproxy_control::{ColorProxy, Dispatch, ProxyError};
use colorproxy_transport::TransportError;
use std::sync::Arc;

use crate::models::GatewayError;

pub async fn dispatch(
    State(proxy): State<Arc<ColorProxy>>,
    request: Request,
    next: Next,
) -> Response {
    match proxy.dispatch(request).await {
        Dispatch::Forwarded(response) => response,
        Dispatch::Passthrough(request) => next.run(request).await,
        Dispatch::Failed(err) => gateway_error(err).into_response(),
    }
}

/// 503 once the proxy is closed, 504 on upstream timeout, 502 otherwise
fn gateway_error(err: ProxyError) -> (StatusCode, Json<GatewayError>) {
    let status = match &err {
        ProxyError::Closed | ProxyError::Transport(TransportError::Closed) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ProxyError::Transport(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };

    (
        status,
        Json(GatewayError {
            error: "proxy failed".to_string(),
            detail: err.to_string(),
        }),
    )
}
