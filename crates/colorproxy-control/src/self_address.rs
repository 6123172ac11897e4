//! Resolution of the proxy's own advertised address

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelfAddressError {
    #[error("No non-loopback IPv4 address found")]
    NoLocalAddress,

    #[error("Not a URL or port: {0:?}")]
    InvalidPort(String),
}

/// Whether `address` already is an `http://` or `https://` URL
pub fn is_full_url(address: &str) -> bool {
    address.starts_with("http://") || address.starts_with("https://")
}

/// Full URLs are used as-is; a bare port (`8080` or `:8080`) becomes
/// `http://<host IPv4>:<port>`.
pub fn resolve_self_address(address: &str) -> Result<String, SelfAddressError> {
    resolve_self_address_with(address, discover_local_ipv4)
}

pub fn resolve_self_address_with(
    address: &str,
    discover: impl FnOnce() -> Option<Ipv4Addr>,
) -> Result<String, SelfAddressError> {
    let address = address.trim();
    if is_full_url(address) {
        return Ok(address.to_string());
    }

    let port = address.strip_prefix(':').unwrap_or(address);
    if port.parse::<u16>().is_err() {
        return Err(SelfAddressError::InvalidPort(address.to_string()));
    }

    let ip = discover().ok_or(SelfAddressError::NoLocalAddress)?;
    Ok(format!("http://{}:{}", ip, port))
}

/// The host's IPv4 address.
///
/// Prefers the interface holding the default route; connecting a UDP socket
/// only selects a source address, nothing is sent. Hosts without a default
/// route fall back to the first usable address among their interfaces.
pub fn discover_local_ipv4() -> Option<Ipv4Addr> {
    default_route_ipv4().or_else(|| match if_addrs::get_if_addrs() {
        Ok(interfaces) => {
            let found = pick_ipv4(interfaces.iter().filter_map(|iface| match iface.ip() {
                IpAddr::V4(ip) => Some(ip),
                IpAddr::V6(_) => None,
            }));
            debug!(found = ?found, "Resolved host IPv4 from interfaces");
            found
        }
        Err(e) => {
            warn!("Failed to enumerate network interfaces: {}", e);
            None
        }
    })
}

fn default_route_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;

    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if usable(ip) => Some(ip),
        _ => None,
    }
}

/// First routable address, else the first link-local one
pub fn pick_ipv4(candidates: impl IntoIterator<Item = Ipv4Addr>) -> Option<Ipv4Addr> {
    let mut link_local = None;
    for ip in candidates.into_iter().filter(|ip| usable(*ip)) {
        if !ip.is_link_local() {
            return Some(ip);
        }
        link_local.get_or_insert(ip);
    }
    link_local
}

fn usable(ip: Ipv4Addr) -> bool {
    !ip.is_loopback() && !ip.is_unspecified()
}
