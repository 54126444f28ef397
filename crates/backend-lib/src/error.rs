// crates/backend-lib/src/error.rs

//! Central error type + Axum integration.
use crate::auth::{CredentialError, StoreError, TokenError};
use crate::validation::ValidationError;
use axum::{
    extract::rejection::JsonRejection,
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use gatehouse_common::ErrorBody;
use thiserror::Error;
use tracing::error;

const AUTH_FAILED: &str = "authentication failed";

/// Application error types with error codes and context
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Covers every token failure and bad login; the cause is never surfaced
    #[error("Authentication failed")]
    Unauthorized,

    /// `reveal` controls whether the client learns about the lock
    #[error("Credential locked until {until}")]
    Locked { until: DateTime<Utc>, reveal: bool },

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    TooManyRequests { retry_after_secs: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized | AppError::Locked { .. } => StatusCode::UNAUTHORIZED,
            AppError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VAL_001",
            AppError::Unauthorized => "AUTH_001",
            AppError::Locked { .. } => "AUTH_002",
            AppError::TooManyRequests { .. } => "RATE_001",
            AppError::Internal(_) => "INT_001",
        }
    }

    /// Get a message that is safe to show to clients
    pub fn sanitized_message(&self) -> String {
        match self {
            AppError::Validation(reason) => reason.clone(),
            AppError::Unauthorized => AUTH_FAILED.to_string(),
            AppError::Locked { reveal: false, .. } => AUTH_FAILED.to_string(),
            AppError::Locked { reveal: true, .. } => {
                "account temporarily locked, try again later".to_string()
            },
            AppError::TooManyRequests { .. } => {
                "too many requests, please try again later".to_string()
            },
            AppError::Internal(_) => "an internal server error occurred".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let AppError::Internal(detail) = &self {
            error!(error_code = self.error_code(), %detail, "internal error");
        }

        let body = ErrorBody {
            code: i32::from(status.as_u16()),
            msg: self.sanitized_message(),
        };
        let mut response = (status, Json(body)).into_response();

        if let AppError::TooManyRequests { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Validation(reason) => AppError::Validation(reason),
            CredentialError::InvalidCredentials => AppError::Unauthorized,
            CredentialError::Locked { until } => AppError::Locked {
                until,
                reveal: false,
            },
            CredentialError::UsernameTaken => {
                AppError::Validation("username unavailable".to_string())
            },
            CredentialError::Store(e) => e.into(),
            CredentialError::Internal(detail) => AppError::Internal(detail),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<TokenError> for AppError {
    fn from(_: TokenError) -> Self {
        AppError::Unauthorized
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}
