use super::*;
use crate::{
    auth::{DeviceFingerprint, ManualClock, MemoryCredentialStore, Principal},
    config::Settings,
    AppState,
};
use axum::{
    body::{to_bytes, Body},
    extract::ConnectInfo,
    http::{Request, StatusCode},
    middleware::from_fn_with_state,
    routing::get,
    Router,
};
use gatehouse_common::ErrorBody;
use std::{net::SocketAddr, sync::Arc};
use tower::ServiceExt;

const PEER: &str = "10.0.0.5:41000";
const UA: &str = "GymApp/2.1";

fn state() -> AppState {
    state_with(|_| {})
}

fn state_with(configure: impl FnOnce(&mut Settings)) -> AppState {
    let mut settings = Settings::default();
    settings.tokens.secret = "0123456789abcdef0123456789abcdef".to_string();
    settings.password.scrypt_log_n = 10;
    settings.rate_limit.generic.capacity = 2;
    configure(&mut settings);
    AppState::new(
        settings,
        Arc::new(MemoryCredentialStore::new()),
        Arc::new(ManualClock::default()),
    )
    .unwrap()
}

async fn whoami(principal: Principal) -> String {
    principal.subject_id
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/whoami", get(whoami))
        .layer(from_fn_with_state(state.clone(), authorize))
        .with_state(state)
}

fn request(path: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(path).header("user-agent", UA);
    if let Some(token) = token {
        builder = builder.header("token", token);
    }
    let mut request = builder.body(Body::empty()).unwrap();
    let peer: SocketAddr = PEER.parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(peer));
    request
}

#[tokio::test]
async fn test_public_route_needs_no_token() {
    let response = app(state()).oneshot(request("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_protected_route_rejects_missing_token() {
    let response = app(state()).oneshot(request("/api/whoami", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body.code, 401);
}

#[tokio::test]
async fn test_valid_token_attaches_principal() {
    let state = state();
    let fingerprint = DeviceFingerprint::compute("10.0.0.5", UA);
    let issued = state.gate.tokens().issue("42", "member", "member", &fingerprint);

    let response = app(state)
        .oneshot(request("/api/whoami", Some(&issued.token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"42");
}

#[tokio::test]
async fn test_token_from_other_address_is_rejected() {
    let state = state();
    let fingerprint = DeviceFingerprint::compute("203.0.113.50", UA);
    let issued = state.gate.tokens().issue("42", "member", "member", &fingerprint);

    let response = app(state)
        .oneshot(request("/api/whoami", Some(&issued.token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_protected_routes_share_generic_limit() {
    let app = app(state());

    for _ in 0..2 {
        let response = app.clone().oneshot(request("/api/whoami", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = app.oneshot(request("/api/whoami", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
}

#[tokio::test]
async fn test_rotating_forwarded_for_escapes_limit_only_when_trusted() {
    let forwarded = |i: usize| {
        let mut request = request("/api/whoami", None);
        request
            .headers_mut()
            .insert("x-forwarded-for", format!("198.51.100.{i}").parse().unwrap());
        request
    };

    let trusting = app(state());
    for i in 0..5 {
        let response = trusting.clone().oneshot(forwarded(i)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let direct = app(state_with(|s| s.server.trust_forwarded_headers = false));
    for i in 0..2 {
        let response = direct.clone().oneshot(forwarded(i)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    let response = direct.oneshot(forwarded(2)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_untrusted_forwarding_headers_do_not_change_the_fingerprint() {
    let state = state_with(|s| s.server.trust_forwarded_headers = false);
    let fingerprint = DeviceFingerprint::compute("10.0.0.5", UA);
    let issued = state.gate.tokens().issue("42", "member", "member", &fingerprint);

    let mut request = request("/api/whoami", Some(&issued.token));
    request
        .headers_mut()
        .insert("x-forwarded-for", "203.0.113.50".parse().unwrap());
    let response = app(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
