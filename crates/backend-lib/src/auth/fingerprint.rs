// ============================
// crates/backend-lib/src/auth/fingerprint.rs
// ============================
//! Device fingerprinting.
//!
//! A fingerprint is the hex SHA-256 of the resolved client address and the
//! `User-Agent`. It only needs to be stable for one client, not meaningful, so
//! missing inputs are hashed as empty strings.
use axum::http::{header::USER_AGENT, HeaderMap};
use sha2::{Digest, Sha256};
use std::fmt;
use std::net::IpAddr;

/// Forwarding headers consulted in order before the socket address
pub const FORWARDING_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "proxy-client-ip"];

/// Opaque, stable identifier for a client connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceFingerprint(String);

impl DeviceFingerprint {
    /// Derive the fingerprint from an already resolved address and user agent
    pub fn compute(client_ip: &str, user_agent: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(client_ip.as_bytes());
        hasher.update(b"\n");
        hasher.update(user_agent.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Derive the fingerprint of a request
    pub fn from_headers(headers: &HeaderMap, peer: Option<IpAddr>) -> Self {
        Self::compute(&resolve_client_ip(headers, peer), user_agent(headers))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for DeviceFingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for DeviceFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub(crate) fn user_agent(headers: &HeaderMap) -> &str {
    headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// Resolve the client address of a request.
///
/// Returns the first non-blank, non-`unknown` forwarding header value (first
/// entry of a comma separated list), else the peer address, else `""`.
pub fn resolve_client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> String {
    for name in FORWARDING_HEADERS {
        let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("unknown") {
            continue;
        }
        let first = value.split(',').next().unwrap_or(value).trim();
        return first.to_string();
    }

    peer.map(|ip| ip.to_string()).unwrap_or_default()
}
