// ============================
// crates/backend-lib/src/lib.rs
// ============================
//! Request gatekeeping core for the Gatehouse backend.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod validation;

use crate::auth::{
    AuthorizationGate, Clock, CredentialStore, PasswordCredentialManager, RateLimiter,
    TokenService, TracingAuditHook,
};
use crate::config::Settings;
use anyhow::Context;
use secrecy::SecretString;
use std::sync::Arc;

/// Application state shared across all handlers
#[derive(Debug, Clone)]
pub struct AppState {
    /// Authorization gate
    pub gate: Arc<AuthorizationGate>,
    /// Settings the services were built from
    pub settings: Arc<Settings>,
}

impl AppState {
    /// Build every service from validated settings.
    ///
    /// `settings.tokens.secret` must already hold the signing key.
    pub fn new(
        settings: Settings,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        settings.validate()?;

        let tokens = TokenService::new(
            &SecretString::from(settings.tokens.secret.clone()),
            settings.token_ttl(),
            clock.clone(),
        )
        .context("token signing key")?;

        let credentials = PasswordCredentialManager::new(
            store,
            settings.password_policy()?,
            settings.lockout_policy(),
            clock.clone(),
        );

        let limiter = RateLimiter::new(settings.rate_policies(), settings.idle_ttl(), clock);

        let mut builder =
            AuthorizationGate::builder(router::route_table(), limiter, tokens, credentials)
                .token_header(settings.token_header()?)
                .reveal_lock_state(settings.lockout.reveal_lock_state)
                .hook(Arc::new(TracingAuditHook));
        for (namespace, role) in &settings.accounts.registration {
            builder = builder.allow_registration(namespace.clone(), role.clone());
        }

        Ok(Self {
            gate: Arc::new(builder.build()),
            settings: Arc::new(settings),
        })
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        self.gate.limiter()
    }
}
