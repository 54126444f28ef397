// ============================
// crates/backend-lib/src/handlers/mod.rs
// ============================
//! HTTP handlers.

pub mod auth;

use axum::{http::StatusCode, Json};
use gatehouse_common::{AckResponse, ErrorBody};

/// Liveness probe
pub async fn health() -> Json<AckResponse> {
    Json(AckResponse::ok("ok"))
}

/// Reached only by authenticated requests to unknown paths
pub async fn not_found() -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            code: i32::from(StatusCode::NOT_FOUND.as_u16()),
            msg: "not found".to_string(),
        }),
    )
}
