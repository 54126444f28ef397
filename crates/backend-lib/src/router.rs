// ============================
// crates/backend-lib/src/router.rs
// ============================
//! HTTP router and the route registry the gate consults.
use crate::{
    auth::{EndpointClass, RouteTable},
    handlers::{self, auth},
    middleware::authorize,
    AppState,
};
use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub const HEALTH_PATH: &str = "/health";
pub const LOGIN_PATH: &str = "/api/auth/login";
pub const REGISTER_PATH: &str = "/api/auth/register";
pub const PASSWORD_PATH: &str = "/api/auth/password";
pub const ME_PATH: &str = "/api/me";

/// Access classes of every served path. Anything else is protected.
pub fn route_table() -> RouteTable {
    RouteTable::builder()
        .public(HEALTH_PATH)
        .sensitive(LOGIN_PATH, EndpointClass::Login)
        .sensitive(REGISTER_PATH, EndpointClass::Register)
        .sensitive(PASSWORD_PATH, EndpointClass::PasswordReset)
        .protected("/api/*")
        .build()
}

/// Create the HTTP router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(handlers::health))
        .route(LOGIN_PATH, post(auth::login))
        .route(REGISTER_PATH, post(auth::register))
        .route(PASSWORD_PATH, post(auth::reset_password))
        .route(ME_PATH, get(auth::me))
        .fallback(handlers::not_found)
        .layer(from_fn_with_state(state.clone(), authorize))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::RouteClass;

    #[test]
    fn test_route_table_classes() {
        let table = route_table();
        assert_eq!(table.resolve(HEALTH_PATH), RouteClass::Public);
        assert_eq!(
            table.resolve(LOGIN_PATH),
            RouteClass::Sensitive(EndpointClass::Login)
        );
        assert_eq!(
            table.resolve(REGISTER_PATH),
            RouteClass::Sensitive(EndpointClass::Register)
        );
        assert_eq!(
            table.resolve(PASSWORD_PATH),
            RouteClass::Sensitive(EndpointClass::PasswordReset)
        );
        assert_eq!(table.resolve(ME_PATH), RouteClass::Protected);
        assert_eq!(table.resolve("/metrics"), RouteClass::Protected);
    }
}
