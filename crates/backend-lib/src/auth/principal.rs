// ============================
// crates/backend-lib/src/auth/principal.rs
// ============================
//! Request-scoped identity placed in extensions by the gate middleware.
use super::{
    fingerprint::{resolve_client_ip, user_agent, DeviceFingerprint},
    token::Claims,
};
use crate::error::AppError;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use gatehouse_common::PrincipalView;
use std::net::IpAddr;

/// Authenticated identity of the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject_id: String,
    pub role: String,
    pub namespace: String,
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        Self {
            subject_id: claims.sub,
            role: claims.role,
            namespace: claims.ns,
        }
    }
}

impl From<Principal> for PrincipalView {
    fn from(principal: Principal) -> Self {
        Self {
            subject_id: principal.subject_id,
            role: principal.role,
            namespace: principal.namespace,
        }
    }
}

/// Network identity of the caller, resolved once per request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMeta {
    /// Resolved address; also the rate-limit identity
    pub client_ip: String,
    pub fingerprint: DeviceFingerprint,
}

impl ClientMeta {
    /// Forwarding headers are only consulted when `trust_forwarded` is set;
    /// otherwise the socket peer alone identifies the client.
    pub fn from_request(headers: &HeaderMap, peer: Option<IpAddr>, trust_forwarded: bool) -> Self {
        if trust_forwarded {
            return Self {
                client_ip: resolve_client_ip(headers, peer),
                fingerprint: DeviceFingerprint::from_headers(headers, peer),
            };
        }

        let client_ip = peer.map(|ip| ip.to_string()).unwrap_or_default();
        let fingerprint = DeviceFingerprint::compute(&client_ip, user_agent(headers));
        Self {
            client_ip,
            fingerprint,
        }
    }
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}

impl<S> FromRequestParts<S> for ClientMeta
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ClientMeta>()
            .cloned()
            .ok_or_else(|| AppError::Internal("client metadata missing from request".to_string()))
    }
}
