//! Proxy configuration

use http::HeaderName;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("A route registry is required")]
    RegistryRequired,

    #[error("{0} must be greater than zero")]
    InvalidDuration(&'static str),

    #[error("Invalid routing header name: {0:?}")]
    InvalidRoutingHeader(String),

    #[error("Admin prefix must start with '/' and must not end with one: {0:?}")]
    InvalidAdminPrefix(String),

    #[error("Invalid self registration: {0}")]
    InvalidSelfRegistration(String),

    #[error("Invalid transport configuration: {0}")]
    Transport(String),
}

/// The proxy's own route, kept alive by the self-heartbeat task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfRegistration {
    pub tag: String,
    /// Full base URL, or a bare port to be combined with the host's IPv4 address
    pub address: String,
    pub token: String,
    pub owner: String,
}

impl SelfRegistration {
    pub fn new(
        tag: impl Into<String>,
        address: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            tag: tag.into(),
            address: address.into(),
            token: token.into(),
            owner: String::new(),
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }
}

/// Immutable proxy settings, shared by reference once the proxy starts
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Lease granted on register and heartbeat
    pub ttl: Duration,
    /// Period of the self-heartbeat task
    pub heartbeat_interval: Duration,
    /// Period of the expired-route sweep
    pub cleanup_interval: Duration,
    /// Bound on each registry call made on behalf of a caller
    pub request_timeout: Duration,
    /// Header carrying the routing tag
    pub routing_header: String,
    /// Path prefix of the administrative routes
    pub admin_prefix: String,
    pub self_registration: Option<SelfRegistration>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(120),
            heartbeat_interval: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            routing_header: "color".to_string(),
            admin_prefix: "/colorproxy".to_string(),
            self_registration: None,
        }
    }
}

impl ProxyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("ttl", self.ttl),
            ("heartbeat_interval", self.heartbeat_interval),
            ("cleanup_interval", self.cleanup_interval),
            ("request_timeout", self.request_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidDuration(name));
            }
        }

        self.routing_header_name()?;

        let prefix = &self.admin_prefix;
        if !prefix.starts_with('/') || prefix.ends_with('/') {
            return Err(ConfigError::InvalidAdminPrefix(prefix.clone()));
        }

        if let Some(registration) = &self.self_registration {
            for (field, value) in [
                ("tag", &registration.tag),
                ("address", &registration.address),
                ("token", &registration.token),
            ] {
                if value.trim().is_empty() {
                    return Err(ConfigError::InvalidSelfRegistration(format!(
                        "{} is required",
                        field
                    )));
                }
            }
        }

        Ok(())
    }

    /// The routing header as a (lowercased) header name
    pub fn routing_header_name(&self) -> Result<HeaderName, ConfigError> {
        HeaderName::from_bytes(self.routing_header.as_bytes())
            .map_err(|_| ConfigError::InvalidRoutingHeader(self.routing_header.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProxyConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(120));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.cleanup_interval, Duration::from_secs(60));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.routing_header, "color");
        assert_eq!(config.admin_prefix, "/colorproxy");
        assert!(config.self_registration.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_duration_rejected() {
        let config = ProxyConfig {
            cleanup_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDuration("cleanup_interval"))
        ));
    }

    #[test]
    fn test_routing_header_validation() {
        let config = ProxyConfig {
            routing_header: "X-Color".to_string(),
            ..Default::default()
        };
        assert_eq!(config.routing_header_name().unwrap().as_str(), "x-color");

        let bad = ProxyConfig {
            routing_header: "bad header".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(ConfigError::InvalidRoutingHeader(_))
        ));
    }

    #[test]
    fn test_admin_prefix_validation() {
        for prefix in ["colorproxy", "/", "/colorproxy/", ""] {
            let config = ProxyConfig {
                admin_prefix: prefix.to_string(),
                ..Default::default()
            };
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidAdminPrefix(_))),
                "{:?} should be rejected",
                prefix
            );
        }
    }

    #[test]
    fn test_self_registration_requires_fields() {
        let config = ProxyConfig {
            self_registration: Some(SelfRegistration::new("blue", "8080", "")),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSelfRegistration(_))
        ));

        let config = ProxyConfig {
            self_registration: Some(SelfRegistration::new("blue", "8080", "t").with_owner("ops")),
            ..Default::default()
        };
        config.validate().unwrap();
    }
}
