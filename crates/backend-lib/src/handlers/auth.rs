// ============================
// crates/backend-lib/src/handlers/auth.rs
// ============================
//! Credential endpoints and the caller's identity.
//!
//! The gate middleware has already throttled these requests; the handlers
//! only parse the body and run the matching flow.
use crate::{
    auth::{ClientMeta, Principal},
    error::AppError,
    AppState,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use gatehouse_common::{
    AckResponse, LoginRequest, LoginResponse, PrincipalView, RegisterRequest, RegisterResponse,
    ResetPasswordRequest,
};

/// `POST /api/auth/login`
pub async fn login(
    State(state): State<AppState>,
    client: ClientMeta,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    let Json(request) = payload?;
    Ok(Json(state.gate.login(&client, request).await?))
}

/// `POST /api/auth/register`
pub async fn register(
    State(state): State<AppState>,
    client: ClientMeta,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<RegisterResponse>, AppError> {
    let Json(request) = payload?;
    Ok(Json(state.gate.register(&client, request).await?))
}

/// `POST /api/auth/password`
pub async fn reset_password(
    State(state): State<AppState>,
    client: ClientMeta,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> Result<Json<AckResponse>, AppError> {
    let Json(request) = payload?;
    Ok(Json(state.gate.reset_password(&client, request).await?))
}

/// `GET /api/me`
pub async fn me(principal: Principal) -> Json<PrincipalView> {
    Json(principal.into())
}
