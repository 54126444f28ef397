// ============================
// crates/backend-lib/src/auth/gate.rs
// ============================
/** Per-request authorization.
The gate classifies a request through the [`RouteTable`], throttles it, and
either admits it anonymously, hands it to a credential flow, or resolves its
token into a [`Principal`]. Sensitive routes are throttled before the body is
read, so a limited caller never reaches hashing or the credential store.
Every decision is reported to the registered [`DecisionHook`]s. */
use super::{
    credential::{CredentialError, PasswordCredentialManager},
    principal::{ClientMeta, Principal},
    rate_limit::{EndpointClass, RateDecision, RateLimiter},
    routes::{RouteClass, RouteTable},
    token::TokenService,
};
use crate::{error::AppError, validation::validate_namespace};
use axum::http::{header::AUTHORIZATION, HeaderMap, HeaderName};
use gatehouse_common::{
    AckResponse, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse,
    ResetPasswordRequest, CODE_OK,
};
use std::{collections::HashMap, fmt, sync::Arc};
use tracing::{debug, info, instrument};

/// Default header carrying the session token
pub const DEFAULT_TOKEN_HEADER: &str = "token";

/// What the gate decided for an admitted request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Public,
    /// Credential endpoint; the handler runs the matching flow
    CredentialFlow(EndpointClass),
    Authenticated(Principal),
}

/// Outcome reported to decision hooks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Public,
    Admitted(EndpointClass),
    Authenticated,
    RateLimited {
        class: EndpointClass,
        retry_after_secs: u64,
    },
    /// Token missing or invalid; the reason is for logs only
    Denied(&'static str),
    LoginSucceeded,
    LoginFailed,
    Locked,
    Registered,
    PasswordChanged,
    Rejected(String),
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Public => "public",
            Outcome::Admitted(_) => "admitted",
            Outcome::Authenticated => "authenticated",
            Outcome::RateLimited { .. } => "rate_limited",
            Outcome::Denied(_) => "denied",
            Outcome::LoginSucceeded => "login_succeeded",
            Outcome::LoginFailed => "login_failed",
            Outcome::Locked => "locked",
            Outcome::Registered => "registered",
            Outcome::PasswordChanged => "password_changed",
            Outcome::Rejected(_) => "rejected",
        }
    }
}

/// A gate decision as seen by hooks
#[derive(Debug, Clone)]
pub struct DecisionEvent {
    pub route: String,
    pub client_ip: String,
    pub outcome: Outcome,
    pub principal: Option<Principal>,
}

/// Observer called after every decision. Must not block.
pub trait DecisionHook: Send + Sync + fmt::Debug {
    fn on_decision(&self, event: &DecisionEvent);
}

/// Writes decisions to the `audit` tracing target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditHook;

impl DecisionHook for TracingAuditHook {
    fn on_decision(&self, event: &DecisionEvent) {
        let subject = event
            .principal
            .as_ref()
            .map(|p| p.subject_id.as_str())
            .unwrap_or_default();
        match &event.outcome {
            Outcome::Public | Outcome::Admitted(_) | Outcome::Authenticated => {
                debug!(
                    target: "audit",
                    route = %event.route,
                    client_ip = %event.client_ip,
                    subject,
                    outcome = event.outcome.as_str(),
                );
            },
            outcome => {
                info!(
                    target: "audit",
                    route = %event.route,
                    client_ip = %event.client_ip,
                    subject,
                    outcome = outcome.as_str(),
                    detail = ?outcome,
                );
            },
        }
    }
}

/// Orchestrates route classification, throttling, credential flows and tokens
#[derive(Debug)]
pub struct AuthorizationGate {
    routes: RouteTable,
    limiter: RateLimiter,
    tokens: TokenService,
    credentials: PasswordCredentialManager,
    token_header: HeaderName,
    /// Namespaces open for self-service registration, with the role granted
    registration: HashMap<String, String>,
    reveal_lock_state: bool,
    hooks: Vec<Arc<dyn DecisionHook>>,
}

impl AuthorizationGate {
    pub fn builder(
        routes: RouteTable,
        limiter: RateLimiter,
        tokens: TokenService,
        credentials: PasswordCredentialManager,
    ) -> AuthorizationGateBuilder {
        AuthorizationGateBuilder {
            gate: AuthorizationGate {
                routes,
                limiter,
                tokens,
                credentials,
                token_header: HeaderName::from_static(DEFAULT_TOKEN_HEADER),
                registration: HashMap::new(),
                reveal_lock_state: false,
                hooks: Vec::new(),
            },
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn credentials(&self) -> &PasswordCredentialManager {
        &self.credentials
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Decide whether a request may proceed
    pub fn check(&self, path: &str, headers: &HeaderMap, client: &ClientMeta) -> Result<Access, AppError> {
        match self.routes.resolve(path) {
            RouteClass::Public => {
                self.emit(path, client, Outcome::Public, None);
                Ok(Access::Public)
            },
            RouteClass::Sensitive(class) => {
                self.throttle(path, client, class)?;
                self.emit(path, client, Outcome::Admitted(class), None);
                Ok(Access::CredentialFlow(class))
            },
            RouteClass::Protected => {
                self.throttle(path, client, EndpointClass::Generic)?;

                let Some(token) = self.extract_token(headers) else {
                    self.emit(path, client, Outcome::Denied("missing token"), None);
                    return Err(AppError::Unauthorized);
                };

                match self.tokens.validate(token, &client.fingerprint) {
                    Ok(claims) => {
                        let principal = Principal::from(claims);
                        self.emit(path, client, Outcome::Authenticated, Some(principal.clone()));
                        Ok(Access::Authenticated(principal))
                    },
                    Err(e) => {
                        debug!(path, client_ip = %client.client_ip, reason = %e, "token rejected");
                        self.emit(path, client, Outcome::Denied("invalid token"), None);
                        Err(e.into())
                    },
                }
            },
        }
    }

    /// Verify credentials and issue a token bound to the caller's device
    #[instrument(skip_all, fields(namespace = %request.namespace, client_ip = %client.client_ip))]
    pub async fn login(&self, client: &ClientMeta, request: LoginRequest) -> Result<LoginResponse, AppError> {
        let route = "login";
        validate_namespace(&request.namespace)?;

        let credential = match self
            .credentials
            .authenticate(&request.namespace, &request.username, &request.password)
            .await
        {
            Ok(credential) => credential,
            Err(e) => return Err(self.reject_credential(route, client, e)),
        };

        let issued = self.tokens.issue(
            &credential.subject_id,
            &credential.role,
            &credential.namespace,
            &client.fingerprint,
        );
        let principal = Principal::from(issued.claims.clone());
        self.emit(route, client, Outcome::LoginSucceeded, Some(principal));

        Ok(LoginResponse {
            code: CODE_OK,
            expires_at: issued.claims.expires_at(),
            token: issued.token,
            role: credential.role,
        })
    }

    /// Create an account in a namespace open for self-service registration
    #[instrument(skip_all, fields(namespace = %request.namespace, client_ip = %client.client_ip))]
    pub async fn register(
        &self,
        client: &ClientMeta,
        request: RegisterRequest,
    ) -> Result<RegisterResponse, AppError> {
        let route = "register";
        validate_namespace(&request.namespace)?;
        let Some(role) = self.registration.get(&request.namespace) else {
            let reason = "registration is not open for this namespace".to_string();
            self.emit(route, client, Outcome::Rejected(reason.clone()), None);
            return Err(AppError::Validation(reason));
        };

        let credential = match self
            .credentials
            .register(&request.namespace, &request.username, role, &request.password)
            .await
        {
            Ok(credential) => credential,
            Err(e) => return Err(self.reject_credential(route, client, e)),
        };

        let principal = Principal {
            subject_id: credential.subject_id.clone(),
            role: credential.role.clone(),
            namespace: credential.namespace.clone(),
        };
        self.emit(route, client, Outcome::Registered, Some(principal));

        Ok(RegisterResponse {
            code: CODE_OK,
            subject_id: credential.subject_id,
            role: credential.role,
        })
    }

    /// Change a password after verifying the current one
    #[instrument(skip_all, fields(namespace = %request.namespace, client_ip = %client.client_ip))]
    pub async fn reset_password(
        &self,
        client: &ClientMeta,
        request: ResetPasswordRequest,
    ) -> Result<AckResponse, AppError> {
        let route = "password_reset";
        validate_namespace(&request.namespace)?;

        if let Err(e) = self
            .credentials
            .change_password(
                &request.namespace,
                &request.username,
                &request.current_password,
                &request.new_password,
            )
            .await
        {
            return Err(self.reject_credential(route, client, e));
        }

        self.emit(route, client, Outcome::PasswordChanged, None);
        Ok(AckResponse::ok("password updated"))
    }

    fn throttle(&self, path: &str, client: &ClientMeta, class: EndpointClass) -> Result<(), AppError> {
        match self.limiter.check(&client.client_ip, class) {
            RateDecision::Allowed => Ok(()),
            RateDecision::Limited { retry_after } => {
                let retry_after_secs = retry_after.as_secs().max(1);
                self.emit(
                    path,
                    client,
                    Outcome::RateLimited {
                        class,
                        retry_after_secs,
                    },
                    None,
                );
                Err(AppError::TooManyRequests { retry_after_secs })
            },
        }
    }

    /// `Authorization: Bearer` is accepted when the configured header is absent
    fn extract_token<'h>(&self, headers: &'h HeaderMap) -> Option<&'h str> {
        let from_header = headers
            .get(&self.token_header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|t| !t.is_empty());

        from_header.or_else(|| {
            headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::trim)
                .filter(|t| !t.is_empty())
        })
    }

    fn reject_credential(&self, route: &str, client: &ClientMeta, err: CredentialError) -> AppError {
        let outcome = match &err {
            CredentialError::InvalidCredentials => Outcome::LoginFailed,
            CredentialError::Locked { .. } => Outcome::Locked,
            CredentialError::Validation(reason) => Outcome::Rejected(reason.clone()),
            CredentialError::UsernameTaken => Outcome::Rejected("username taken".to_string()),
            CredentialError::Store(_) | CredentialError::Internal(_) => {
                Outcome::Rejected("internal error".to_string())
            },
        };
        self.emit(route, client, outcome, None);

        match err {
            CredentialError::Locked { until } => AppError::Locked {
                until,
                reveal: self.reveal_lock_state,
            },
            other => other.into(),
        }
    }

    fn emit(&self, route: &str, client: &ClientMeta, outcome: Outcome, principal: Option<Principal>) {
        if self.hooks.is_empty() {
            return;
        }
        let event = DecisionEvent {
            route: route.to_string(),
            client_ip: client.client_ip.clone(),
            outcome,
            principal,
        };
        for hook in &self.hooks {
            hook.on_decision(&event);
        }
    }
}

pub struct AuthorizationGateBuilder {
    gate: AuthorizationGate,
}

impl AuthorizationGateBuilder {
    pub fn token_header(mut self, name: HeaderName) -> Self {
        self.gate.token_header = name;
        self
    }

    /// Open a namespace for self-service registration, granting `role`
    pub fn allow_registration(mut self, namespace: impl Into<String>, role: impl Into<String>) -> Self {
        self.gate.registration.insert(namespace.into(), role.into());
        self
    }

    /// Tell locked-out clients about the lock instead of a generic failure
    pub fn reveal_lock_state(mut self, reveal: bool) -> Self {
        self.gate.reveal_lock_state = reveal;
        self
    }

    pub fn hook(mut self, hook: Arc<dyn DecisionHook>) -> Self {
        self.gate.hooks.push(hook);
        self
    }

    pub fn build(self) -> AuthorizationGate {
        self.gate
    }
}
