// ================
// crates/common/src/lib.rs
// ================
//! Wire types shared between the gatehouse server and its clients.
//! Request and response bodies of the credential endpoints plus the
//! standard error envelope returned on every rejection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Code carried by every successful response body
pub const CODE_OK: i32 = 0;

/// Namespace used when a request does not name one
pub const DEFAULT_NAMESPACE: &str = "member";

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// Body of `POST /api/auth/login`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginRequest {
    /// Principal table the account lives in (`member`, `coach`, `admin`, ...)
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub username: String,
    pub password: String,
}

/// Successful login
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub code: i32,
    pub token: String,
    pub role: String,
    pub expires_at: DateTime<Utc>,
}

/// Body of `POST /api/auth/register`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RegisterRequest {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub username: String,
    pub password: String,
}

/// Successful registration
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub code: i32,
    pub subject_id: String,
    pub role: String,
}

/// Body of `POST /api/auth/password`
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub username: String,
    pub current_password: String,
    pub new_password: String,
}

/// Generic acknowledgement
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AckResponse {
    pub code: i32,
    pub msg: String,
}

impl AckResponse {
    pub fn ok(msg: impl Into<String>) -> Self {
        Self {
            code: CODE_OK,
            msg: msg.into(),
        }
    }
}

/// Error envelope; `code` is never [`CODE_OK`]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorBody {
    pub code: i32,
    pub msg: String,
}

/// Identity echoed back by `GET /api/me`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalView {
    pub subject_id: String,
    pub role: String,
    pub namespace: String,
}
