//! Request and response bodies of the administrative API

use chrono::{DateTime, Utc};
use colorproxy_router::Route;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Register (or overwrite) a route
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    /// Routing tag
    #[schema(example = "blue")]
    pub color: String,
    /// Backend base URL
    #[schema(example = "http://10.0.0.7:8080")]
    pub address: String,
    /// Who owns the route (informational)
    #[serde(default)]
    pub owner: String,
    /// Credential later heartbeats must present
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterResponse {
    pub message: String,
    pub color: String,
}

/// Renew a route's lease
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HeartbeatRequest {
    pub color: String,
    pub address: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HeartbeatResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeleteResponse {
    pub message: String,
    pub color: String,
}

/// A stored route. The token is never exposed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RouteView {
    pub color: String,
    pub address: String,
    pub owner: String,
    pub expires_at: DateTime<Utc>,
    /// Whether the lease is still running
    pub live: bool,
}

impl RouteView {
    pub fn at(route: Route, now: DateTime<Utc>) -> Self {
        Self {
            live: route.is_live_at(now),
            color: route.tag,
            address: route.address,
            owner: route.owner,
            expires_at: route.expires_at,
        }
    }
}

/// Route list response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RouteList {
    pub routes: Vec<RouteView>,
    pub count: usize,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Body returned when a tagged request could not be forwarded
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GatewayError {
    #[schema(example = "proxy failed")]
    pub error: String,
    pub detail: String,
}
