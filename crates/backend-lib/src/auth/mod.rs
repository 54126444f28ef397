// ============================
// crates/backend-lib/src/auth/mod.rs
// ============================
//! Request gatekeeping: fingerprints, credentials, throttling, tokens.

pub mod clock;
pub mod credential;
pub mod fingerprint;
pub mod gate;
pub mod password;
pub mod principal;
pub mod rate_limit;
pub mod routes;
pub mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use credential::{
    Credential, CredentialError, CredentialKey, CredentialStore, LockoutPolicy,
    MemoryCredentialStore, PasswordCredentialManager, StoreError,
};
pub use fingerprint::{resolve_client_ip, DeviceFingerprint};
pub use gate::{
    Access, AuthorizationGate, DecisionEvent, DecisionHook, Outcome, TracingAuditHook,
    DEFAULT_TOKEN_HEADER,
};
pub use password::{PasswordPolicy, PasswordRequirements, MIN_PASSWORD_LENGTH};
pub use principal::{ClientMeta, Principal};
pub use rate_limit::{EndpointClass, RateDecision, RateLimiter, RatePolicies, RatePolicy};
pub use routes::{RouteClass, RouteTable};
pub use token::{Claims, IssuedToken, TokenError, TokenService};
