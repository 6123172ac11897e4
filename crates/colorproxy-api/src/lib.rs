//! axum integration for ColorProxy
//!
//! Provides the administrative routes (register, heartbeat, list, delete),
//! the dispatch middleware that forwards tagged requests, and the OpenAPI
//! document describing the administrative surface.

pub mod handlers;
pub mod middleware;
pub mod models;

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use colorproxy_control::ColorProxy;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;

/// Application state shared across handlers
pub struct AppState {
    pub proxy: Arc<ColorProxy>,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "ColorProxy API",
        version = "0.1.0",
        description = "Route administration for tag-based request routing"
    ),
    paths(
        handlers::register,
        handlers::heartbeat,
        handlers::list_routes,
        handlers::delete_route,
        handlers::openapi,
    ),
    components(
        schemas(
            models::RegisterRequest,
            models::RegisterResponse,
            models::HeartbeatRequest,
            models::HeartbeatResponse,
            models::DeleteResponse,
            models::RouteView,
            models::RouteList,
            models::ErrorResponse,
            models::GatewayError,
        )
    ),
    tags(
        (name = "routes", description = "Route registration and lease management"),
        (name = "system", description = "API description")
    )
)]
pub struct ApiDoc;

/// Administrative routes, relative to the admin prefix
pub fn admin_router(proxy: Arc<ColorProxy>) -> Router {
    let state = Arc::new(AppState { proxy });

    Router::new()
        .route("/register", post(handlers::register))
        .route("/heartbeat", post(handlers::heartbeat))
        .route("/routes", get(handlers::list_routes))
        .route("/routes/{color}", delete(handlers::delete_route))
        .route("/openapi.json", get(handlers::openapi))
        .with_state(state)
}

/// Attach the proxy to a host application.
///
/// The dispatch middleware wraps every route already on `app` (including its
/// fallback); the admin routes are nested afterwards so they are never
/// dispatched.
pub fn attach(app: Router, proxy: Arc<ColorProxy>) -> Router {
    let prefix = proxy.config().admin_prefix.clone();
    info!(
        "Attaching proxy (routing header: {}, admin prefix: {})",
        proxy.routing_header(),
        prefix
    );

    app.layer(axum_middleware::from_fn_with_state(
        proxy.clone(),
        middleware::dispatch,
    ))
    .nest(&prefix, admin_router(proxy))
    .layer(TraceLayer::new_for_http())
}
