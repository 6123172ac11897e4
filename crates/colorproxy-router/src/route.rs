//! Leased tag → address binding

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A routing tag bound to a backend base URL until `expires_at`.
///
/// The tag is stored under the `color` key so that records written by other
/// clients of the same store stay readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Routing tag, unique across stored routes
    #[serde(rename = "color")]
    pub tag: String,
    /// Fully-qualified base URL of the backend (e.g., "http://10.0.0.7:8080/api")
    pub address: String,
    /// Who registered the route (informational only)
    #[serde(default)]
    pub owner: String,
    /// Credential a heartbeat must present
    pub token: String,
    /// Absolute expiry, set on register and refreshed on heartbeat
    pub expires_at: DateTime<Utc>,
}

impl Route {
    /// Create a route that is not yet leased; `expires_at` is assigned on register.
    pub fn new(
        tag: impl Into<String>,
        address: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            tag: tag.into(),
            address: address.into(),
            owner: String::new(),
            token: token.into(),
            expires_at: Utc::now(),
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Whether the lease is still running at `now`
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    pub fn is_live(&self) -> bool {
        self.is_live_at(Utc::now())
    }

    /// Check heartbeat credentials against this route
    pub fn matches(&self, address: &str, token: &str) -> bool {
        self.address == address && self.token == token
    }

    /// Restart the lease at `now + ttl`
    pub fn renew(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.expires_at = expiry_after(now, ttl);
    }
}

/// `now + ttl`, saturating at the largest representable timestamp
pub(crate) fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
