//! Administrative route handlers

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use colorproxy_control::{Heartbeat, ProxyError, RegisterRoute};
use colorproxy_router::RegistryError;
use std::sync::Arc;
use tracing::{debug, warn};
use utoipa::OpenApi;

use crate::models::*;
use crate::{ApiDoc, AppState};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, error: String, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error,
            code: Some(code.to_string()),
        }),
    )
}

/// Map a proxy error onto the admin API's status codes
fn proxy_error(err: ProxyError) -> ApiError {
    let (status, code) = match &err {
        ProxyError::Validation(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
        ProxyError::Registry(RegistryError::NotFound(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "ROUTE_NOT_FOUND")
        }
        ProxyError::Registry(RegistryError::Mismatch(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "ROUTE_MISMATCH")
        }
        ProxyError::Registry(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
        ProxyError::Timeout(..) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_TIMEOUT"),
        ProxyError::Closed => (StatusCode::SERVICE_UNAVAILABLE, "PROXY_CLOSED"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    };

    if status.is_server_error() {
        warn!("Admin request failed: {}", err);
    }
    error_response(status, err.to_string(), code)
}

fn bad_json(rejection: JsonRejection) -> ApiError {
    error_response(
        StatusCode::BAD_REQUEST,
        rejection.body_text(),
        "INVALID_REQUEST",
    )
}

/// Register a route
#[utoipa::path(
    post,
    path = "/colorproxy/register",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Route registered", body = RegisterResponse),
        (status = 400, description = "Malformed request or missing field", body = ErrorResponse),
        (status = 500, description = "Store error", body = ErrorResponse)
    ),
    tag = "routes"
)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let Json(req) = payload.map_err(bad_json)?;
    debug!("Registering route: {}", req.color);

    let route = state
        .proxy
        .register(RegisterRoute {
            tag: req.color,
            address: req.address,
            token: req.token,
            owner: req.owner,
        })
        .await
        .map_err(proxy_error)?;

    Ok(Json(RegisterResponse {
        message: "registered".to_string(),
        color: route.tag,
    }))
}

/// Renew a route's lease
#[utoipa::path(
    post,
    path = "/colorproxy/heartbeat",
    request_body = HeartbeatRequest,
    responses(
        (status = 200, description = "Lease renewed", body = HeartbeatResponse),
        (status = 400, description = "Malformed request or missing field", body = ErrorResponse),
        (status = 500, description = "Route not found, address/token mismatch or store error", body = ErrorResponse)
    ),
    tag = "routes"
)]
pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let Json(req) = payload.map_err(bad_json)?;

    state
        .proxy
        .heartbeat(Heartbeat {
            tag: req.color,
            address: req.address,
            token: req.token,
        })
        .await
        .map_err(proxy_error)?;

    Ok(Json(HeartbeatResponse {
        message: "heartbeat ok".to_string(),
    }))
}

/// List stored routes, including lapsed ones not yet swept
#[utoipa::path(
    get,
    path = "/colorproxy/routes",
    responses(
        (status = 200, description = "Stored routes", body = RouteList),
        (status = 500, description = "Store error", body = ErrorResponse)
    ),
    tag = "routes"
)]
pub async fn list_routes(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RouteList>, ApiError> {
    let now = Utc::now();
    let routes: Vec<RouteView> = state
        .proxy
        .list_routes()
        .await
        .map_err(proxy_error)?
        .into_iter()
        .map(|route| RouteView::at(route, now))
        .collect();

    Ok(Json(RouteList {
        count: routes.len(),
        routes,
    }))
}

/// Delete a route
#[utoipa::path(
    delete,
    path = "/colorproxy/routes/{color}",
    params(
        ("color" = String, Path, description = "Routing tag")
    ),
    responses(
        (status = 200, description = "Route deleted (or was absent)", body = DeleteResponse),
        (status = 500, description = "Store error", body = ErrorResponse)
    ),
    tag = "routes"
)]
pub async fn delete_route(
    State(state): State<Arc<AppState>>,
    Path(color): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    state
        .proxy
        .delete_route(&color)
        .await
        .map_err(proxy_error)?;

    Ok(Json(DeleteResponse {
        message: "deleted".to_string(),
        color,
    }))
}

/// OpenAPI document of the administrative API
#[utoipa::path(
    get,
    path = "/colorproxy/openapi.json",
    responses(
        (status = 200, description = "OpenAPI document")
    ),
    tag = "system"
)]
pub async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
