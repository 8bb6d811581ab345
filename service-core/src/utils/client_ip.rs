//! Client address resolution.
//!
//! Every caller that records or compares a client address goes through
//! [`resolve_client_ip`], so the precedence below is the single source of truth:
//!
//! 1. an explicitly supplied address (e.g. from the request body)
//! 2. the first entry of the `x-forwarded-for` header
//! 3. the transport peer address
//! 4. the literal `"unknown"`
//!
//! Blank values at any step fall through to the next one.

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::request::Parts,
};
use std::convert::Infallible;
use std::net::SocketAddr;

pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const UNKNOWN_CLIENT_IP: &str = "unknown";

pub fn resolve_client_ip(
    explicit: Option<&str>,
    forwarded_for: Option<&str>,
    peer: Option<SocketAddr>,
) -> String {
    if let Some(ip) = explicit.map(str::trim).filter(|ip| !ip.is_empty()) {
        return ip.to_string();
    }

    if let Some(ip) = forwarded_for
        .and_then(|header| header.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return ip.to_string();
    }

    match peer {
        Some(addr) => addr.ip().to_string(),
        None => UNKNOWN_CLIENT_IP.to_string(),
    }
}

/// Transport-level facts about where a request came from.
///
/// Never rejects: missing pieces are simply `None`.
#[derive(Debug, Clone, Default)]
pub struct RequestOrigin {
    pub forwarded_for: Option<String>,
    pub peer: Option<SocketAddr>,
}

impl RequestOrigin {
    pub fn new(forwarded_for: Option<String>, peer: Option<SocketAddr>) -> Self {
        Self {
            forwarded_for,
            peer,
        }
    }

    /// Resolve the client address, preferring `explicit` when it is non-blank.
    pub fn client_ip(&self, explicit: Option<&str>) -> String {
        resolve_client_ip(explicit, self.forwarded_for.as_deref(), self.peer)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestOrigin
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded_for = parts
            .headers
            .get(FORWARDED_FOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Ok(Self {
            forwarded_for,
            peer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> Option<SocketAddr> {
        "10.0.0.9:51234".parse().ok()
    }

    #[test]
    fn explicit_ip_wins_over_everything() {
        let ip = resolve_client_ip(Some("203.0.113.7"), Some("198.51.100.1"), peer());
        assert_eq!(ip, "203.0.113.7");
    }

    #[test]
    fn first_forwarded_entry_used_when_no_explicit_ip() {
        let ip = resolve_client_ip(None, Some(" 198.51.100.1 , 10.1.1.1"), peer());
        assert_eq!(ip, "198.51.100.1");
    }

    #[test]
    fn blank_explicit_falls_through_to_forwarded() {
        let ip = resolve_client_ip(Some("  "), Some("198.51.100.1"), peer());
        assert_eq!(ip, "198.51.100.1");
    }

    #[test]
    fn peer_used_when_no_header() {
        assert_eq!(resolve_client_ip(None, None, peer()), "10.0.0.9");
    }

    #[test]
    fn empty_forwarded_header_falls_through_to_peer() {
        assert_eq!(resolve_client_ip(None, Some(""), peer()), "10.0.0.9");
        assert_eq!(resolve_client_ip(None, Some(" ,1.2.3.4"), peer()), "10.0.0.9");
    }

    #[test]
    fn unknown_when_nothing_available() {
        assert_eq!(resolve_client_ip(None, None, None), UNKNOWN_CLIENT_IP);
    }

    #[test]
    fn origin_resolves_with_same_precedence() {
        let origin = RequestOrigin::new(Some("198.51.100.1".to_string()), peer());
        assert_eq!(origin.client_ip(None), "198.51.100.1");
        assert_eq!(origin.client_ip(Some("203.0.113.7")), "203.0.113.7");
        assert_eq!(RequestOrigin::default().client_ip(None), "unknown");
    }
}
