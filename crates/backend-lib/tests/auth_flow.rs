//! End-to-end flows through the router: registration, login, lockout,
//! throttling, device binding and expiry.
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    extract::ConnectInfo,
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use gatehouse_common::{ErrorBody, LoginResponse, PrincipalView, RegisterResponse};
use gatehouse_lib::{
    auth::{
        Credential, CredentialKey, CredentialStore, ManualClock, MemoryCredentialStore,
        StoreError,
    },
    config::Settings,
    router::create_router,
    AppState,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tower::ServiceExt;

const UA: &str = "GymApp/2.1 (Android 14)";
const PASSWORD: &str = "Passw0rd";

/// Memory store that counts lookups
#[derive(Debug, Default)]
struct CountingStore {
    inner: MemoryCredentialStore,
    finds: AtomicUsize,
}

#[async_trait]
impl CredentialStore for CountingStore {
    async fn find(&self, key: &CredentialKey) -> Result<Option<Credential>, StoreError> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        self.inner.find(key).await
    }

    async fn insert(&self, credential: Credential) -> Result<(), StoreError> {
        self.inner.insert(credential).await
    }

    async fn update(&self, credential: &Credential) -> Result<(), StoreError> {
        self.inner.update(credential).await
    }
}

struct Harness {
    app: Router,
    state: AppState,
    clock: Arc<ManualClock>,
    store: Arc<CountingStore>,
}

fn harness(configure: impl FnOnce(&mut Settings)) -> Harness {
    let mut settings = Settings::default();
    settings.tokens.secret = "an-integration-test-signing-key-0123456789".to_string();
    settings.password.scrypt_log_n = 10;
    configure(&mut settings);

    let clock = Arc::new(ManualClock::default());
    let store = Arc::new(CountingStore::default());
    let state = AppState::new(settings, store.clone(), clock.clone()).unwrap();

    Harness {
        app: create_router(state.clone()),
        state,
        clock,
        store,
    }
}

impl Harness {
    async fn send(&self, method: &str, path: &str, ip: &str, token: Option<&str>, body: Option<serde_json::Value>) -> Response {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("user-agent", UA)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("token", token);
        }
        let body = body.map_or_else(Body::empty, |b| Body::from(b.to_string()));
        let mut request = builder.body(body).unwrap();
        let peer: SocketAddr = format!("{ip}:50000").parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));

        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn register(&self, ip: &str, username: &str) -> RegisterResponse {
        let response = self
            .send(
                "POST",
                "/api/auth/register",
                ip,
                None,
                Some(json!({ "username": username, "password": PASSWORD })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        read(response).await
    }

    async fn login(&self, ip: &str, username: &str, password: &str) -> Response {
        self.send(
            "POST",
            "/api/auth/login",
            ip,
            None,
            Some(json!({ "username": username, "password": password })),
        )
        .await
    }

    async fn me(&self, ip: &str, token: &str) -> Response {
        self.send("GET", "/api/me", ip, Some(token), None).await
    }
}

async fn read<T: DeserializeOwned>(response: Response) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn fresh_login_issues_a_token_valid_for_the_same_device() {
    let h = harness(|_| {});
    let registered = h.register("192.0.2.10", "alice").await;

    let response = h.login("192.0.2.10", "alice", PASSWORD).await;
    assert_eq!(response.status(), StatusCode::OK);
    let login: LoginResponse = read(response).await;
    assert_eq!(login.code, 0);
    assert_eq!(login.role, "member");

    let response = h.me("192.0.2.10", &login.token).await;
    assert_eq!(response.status(), StatusCode::OK);
    let me: PrincipalView = read(response).await;
    assert_eq!(me.subject_id, registered.subject_id);
    assert_eq!(me.namespace, "member");
}

#[tokio::test]
async fn repeated_failures_lock_the_account_until_the_window_passes() {
    let h = harness(|s| s.rate_limit.login.capacity = 50);
    h.register("192.0.2.20", "bob").await;

    let mut failure_msg = String::new();
    for _ in 0..5 {
        let response = h.login("192.0.2.20", "bob", "Wrong-pass1").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        failure_msg = read::<ErrorBody>(response).await.msg;
    }

    // Correct password, still locked; indistinguishable from a bad password
    let response = h.login("192.0.2.20", "bob", PASSWORD).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read::<ErrorBody>(response).await.msg, failure_msg);

    h.clock.advance(Duration::from_secs(15 * 60));
    let response = h.login("192.0.2.20", "bob", PASSWORD).await;
    assert_eq!(response.status(), StatusCode::OK);

    let stored = h
        .state
        .gate
        .credentials()
        .credential("member", "bob")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.failed_attempts, 0);
    assert!(stored.locked_until.is_none());
}

#[tokio::test]
async fn lock_state_can_be_revealed_by_configuration() {
    let h = harness(|s| {
        s.rate_limit.login.capacity = 50;
        s.lockout.reveal_lock_state = true;
    });
    h.register("192.0.2.21", "carol").await;

    for _ in 0..5 {
        h.login("192.0.2.21", "carol", "Wrong-pass1").await;
    }
    let response = h.login("192.0.2.21", "carol", PASSWORD).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(read::<ErrorBody>(response).await.msg.contains("locked"));
}

#[tokio::test]
async fn sixth_rapid_login_is_throttled_without_touching_the_store() {
    let h = harness(|_| {});
    h.register("192.0.2.30", "dave").await;
    let finds_before = h.store.finds.load(Ordering::SeqCst);

    for _ in 0..5 {
        let response = h.login("192.0.2.30", "dave", "Wrong-pass1").await;
        assert_ne!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
    assert_eq!(h.store.finds.load(Ordering::SeqCst), finds_before + 5);

    let response = h.login("192.0.2.30", "dave", PASSWORD).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers().get("retry-after").unwrap(), "12");
    let body: ErrorBody = read(response).await;
    assert_eq!(body.code, 429);
    assert_eq!(h.store.finds.load(Ordering::SeqCst), finds_before + 5);

    // Another client is unaffected
    let response = h.login("192.0.2.31", "dave", "Wrong-pass1").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_replayed_from_another_device_is_unauthorized() {
    let h = harness(|_| {});
    h.register("192.0.2.40", "erin").await;
    let login: LoginResponse = read(h.login("192.0.2.40", "erin", PASSWORD).await).await;

    let response = h.me("198.51.100.40", &login.token).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read::<ErrorBody>(response).await.code, 401);
}

#[tokio::test]
async fn expired_token_is_unauthorized() {
    let h = harness(|_| {});
    h.register("192.0.2.50", "frank").await;
    let login: LoginResponse = read(h.login("192.0.2.50", "frank", PASSWORD).await).await;

    h.clock.advance(Duration::from_secs(3599));
    assert_eq!(h.me("192.0.2.50", &login.token).await.status(), StatusCode::OK);

    h.clock.advance(Duration::from_secs(1));
    assert_eq!(
        h.me("192.0.2.50", &login.token).await.status(),
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn password_change_replaces_the_old_password() {
    let h = harness(|_| {});
    h.register("192.0.2.60", "grace").await;

    let response = h
        .send(
            "POST",
            "/api/auth/password",
            "192.0.2.60",
            None,
            Some(json!({
                "username": "grace",
                "currentPassword": PASSWORD,
                "newPassword": "Str0nger-pass",
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(
        h.login("192.0.2.60", "grace", PASSWORD).await.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        h.login("192.0.2.60", "grace", "Str0nger-pass").await.status(),
        StatusCode::OK
    );
}

#[tokio::test]
async fn malformed_bodies_and_unknown_paths() {
    let h = harness(|_| {});

    let response = h
        .send("POST", "/api/auth/login", "192.0.2.70", None, Some(json!({ "user": "x" })))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read::<ErrorBody>(response).await.code, 400);

    // Unknown paths are protected, so anonymous callers learn nothing
    let response = h.send("GET", "/admin/users", "192.0.2.70", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(
        h.send("GET", "/health", "192.0.2.70", None, None).await.status(),
        StatusCode::OK
    );
}
