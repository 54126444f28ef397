// ============================
// crates/backend-lib/src/middleware/gate.rs
// ============================
use crate::{
    auth::{Access, ClientMeta},
    error::AppError,
    AppState,
};
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;

/// Run the authorization gate before any handler.
///
/// Admitted requests carry [`ClientMeta`] and, on protected routes, the
/// [`crate::auth::Principal`] in their extensions.
pub async fn authorize(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let client = ClientMeta::from_request(
        request.headers(),
        peer,
        state.settings.server.trust_forwarded_headers,
    );

    let access = state
        .gate
        .check(request.uri().path(), request.headers(), &client)?;

    if let Access::Authenticated(principal) = access {
        request.extensions_mut().insert(principal);
    }
    request.extensions_mut().insert(client);

    Ok(next.run(request).await)
}
