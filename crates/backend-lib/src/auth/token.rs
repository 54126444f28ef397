// ============================
// crates/backend-lib/src/auth/token.rs
// ============================
/** Stateless session tokens.
A token is `base64url(claims) "." base64url(HMAC-SHA256(key, claims segment))`.
Issuing needs no store lookup and validation holds no shared state, so both
are safe to call inline from any request task. */
use super::{clock::Clock, fingerprint::DeviceFingerprint};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Default token lifetime (1 hour)
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// Minimum signing key length in bytes
pub const MIN_SECRET_LEN: usize = 32;

/// Why a token was refused. Callers must not surface the variant to clients.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is malformed or its signature is invalid")]
    Malformed,

    #[error("token has expired")]
    Expired,

    #[error("token was issued to a different device")]
    FingerprintMismatch,
}

/// Claims embedded in a token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject id
    pub sub: String,
    pub role: String,
    /// Principal table the subject belongs to
    pub ns: String,
    /// Device fingerprint at issuance
    pub fp: String,
    /// Issued at, unix seconds
    pub iat: i64,
    /// Expires at, unix seconds (exclusive)
    pub exp: i64,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_default()
    }
}

/// A freshly issued token with its claims
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

/// Signing key shorter than [`MIN_SECRET_LEN`]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("token signing key must be at least {MIN_SECRET_LEN} bytes")]
pub struct WeakKeyError;

/// Issues and validates signed tokens
pub struct TokenService {
    mac: HmacSha256,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("ttl", &self.ttl)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(key: &SecretString, ttl: Duration, clock: Arc<dyn Clock>) -> Result<Self, WeakKeyError> {
        let key = key.expose_secret().as_bytes();
        if key.len() < MIN_SECRET_LEN {
            return Err(WeakKeyError);
        }
        let mac = HmacSha256::new_from_slice(key).map_err(|_| WeakKeyError)?;
        Ok(Self { mac, ttl, clock })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token bound to `fingerprint`
    pub fn issue(
        &self,
        subject_id: &str,
        role: &str,
        namespace: &str,
        fingerprint: &DeviceFingerprint,
    ) -> IssuedToken {
        let iat = self.clock.now().timestamp();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX).max(1);
        let claims = Claims {
            sub: subject_id.to_string(),
            role: role.to_string(),
            ns: namespace.to_string(),
            fp: fingerprint.as_str().to_string(),
            iat,
            exp: iat.saturating_add(ttl),
        };

        // Claims hold only strings and integers
        let payload = serde_json::to_vec(&claims).unwrap_or_default();
        let body = URL_SAFE_NO_PAD.encode(payload);
        let signature = URL_SAFE_NO_PAD.encode(self.sign(body.as_bytes()));

        IssuedToken {
            token: format!("{body}.{signature}"),
            claims,
        }
    }

    /// Validate a token for the fingerprint of the current request.
    ///
    /// Checks run in order: signature, expiry, fingerprint. No claim is read
    /// before the signature has been verified.
    pub fn validate(&self, token: &str, fingerprint: &DeviceFingerprint) -> Result<Claims, TokenError> {
        let (body, signature) = token.split_once('.').ok_or(TokenError::Malformed)?;
        if body.is_empty() || signature.contains('.') {
            return Err(TokenError::Malformed);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Malformed)?;
        let mut mac = self.mac.clone();
        mac.update(body.as_bytes());
        mac.verify_slice(&signature).map_err(|_| TokenError::Malformed)?;

        let payload = URL_SAFE_NO_PAD.decode(body).map_err(|_| TokenError::Malformed)?;
        let claims: Claims = serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;
        if claims.exp <= claims.iat {
            return Err(TokenError::Malformed);
        }

        if self.clock.now().timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }

        let same_device: bool = claims
            .fp
            .as_bytes()
            .ct_eq(fingerprint.as_str().as_bytes())
            .into();
        if !same_device {
            return Err(TokenError::FingerprintMismatch);
        }

        Ok(claims)
    }

    fn sign(&self, body: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(body);
        mac.finalize().into_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    fn setup() -> (TokenService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        let service =
            TokenService::new(&SecretString::from(KEY), DEFAULT_TOKEN_TTL, clock.clone()).unwrap();
        (service, clock)
    }

    fn fp(ip: &str) -> DeviceFingerprint {
        DeviceFingerprint::compute(ip, "GymApp/2.1")
    }

    #[test]
    fn test_issue_and_validate() {
        let (service, _) = setup();
        let issued = service.issue("42", "coach", "coach", &fp("192.0.2.1"));

        assert_eq!(issued.claims.exp - issued.claims.iat, 3600);
        let claims = service.validate(&issued.token, &fp("192.0.2.1")).unwrap();
        assert_eq!(claims, issued.claims);
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.role, "coach");
    }

    #[test]
    fn test_validate_is_idempotent() {
        let (service, clock) = setup();
        let issued = service.issue("7", "member", "member", &fp("192.0.2.1"));

        let first = service.validate(&issued.token, &fp("192.0.2.1"));
        clock.advance(Duration::from_secs(30));
        let second = service.validate(&issued.token, &fp("192.0.2.1"));
        assert_eq!(first, second);

        let wrong_first = service.validate(&issued.token, &fp("192.0.2.2"));
        let wrong_second = service.validate(&issued.token, &fp("192.0.2.2"));
        assert_eq!(wrong_first, wrong_second);
    }

    #[test]
    fn test_fingerprint_binding() {
        let (service, _) = setup();
        let issued = service.issue("7", "member", "member", &fp("192.0.2.1"));

        assert_eq!(
            service.validate(&issued.token, &fp("198.51.100.1")),
            Err(TokenError::FingerprintMismatch)
        );
    }

    #[test]
    fn test_expiry_is_exclusive() {
        let (service, clock) = setup();
        let issued = service.issue("7", "member", "member", &fp("192.0.2.1"));

        clock.advance(Duration::from_secs(3599));
        assert!(service.validate(&issued.token, &fp("192.0.2.1")).is_ok());

        clock.advance(Duration::from_secs(1));
        assert_eq!(
            service.validate(&issued.token, &fp("192.0.2.1")),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_expired_token_with_wrong_fingerprint_reports_expiry() {
        let (service, clock) = setup();
        let issued = service.issue("7", "member", "member", &fp("192.0.2.1"));
        clock.advance(Duration::from_secs(7200));

        assert_eq!(
            service.validate(&issued.token, &fp("198.51.100.1")),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_short_key_is_rejected() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let err = TokenService::new(&SecretString::from("too-short"), DEFAULT_TOKEN_TTL, clock)
            .unwrap_err();
        assert_eq!(err, WeakKeyError);
    }

    #[test]
    fn test_malformed_tokens() {
        let (service, _) = setup();
        let f = fp("192.0.2.1");

        for token in ["", ".", "abc", "abc.", ".abc", "a.b.c", "!!!.???"] {
            assert_eq!(service.validate(token, &f), Err(TokenError::Malformed), "{token}");
        }
    }

    #[test]
    fn test_tampered_claims_are_malformed() {
        let (service, _) = setup();
        let f = fp("192.0.2.1");
        let issued = service.issue("7", "member", "member", &f);
        let (_, signature) = issued.token.split_once('.').unwrap();

        let mut forged = issued.claims.clone();
        forged.role = "admin".to_string();
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());

        assert_eq!(
            service.validate(&format!("{body}.{signature}"), &f),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn test_foreign_key_is_malformed() {
        let (service, clock) = setup();
        let other = TokenService::new(
            &SecretString::from("fedcba9876543210fedcba9876543210"),
            DEFAULT_TOKEN_TTL,
            clock,
        )
        .unwrap();
        let f = fp("192.0.2.1");
        let issued = other.issue("7", "admin", "admin", &f);

        assert_eq!(service.validate(&issued.token, &f), Err(TokenError::Malformed));
    }
}
