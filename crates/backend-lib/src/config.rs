// ============================
// crates/backend-lib/src/config.rs
// ============================
//! Configuration management.
//!
//! Values come from struct defaults, then a TOML file, then `GATEHOUSE_`
//! environment variables (`__` separates nested keys, e.g.
//! `GATEHOUSE_LOCKOUT__MAX_FAILED_ATTEMPTS=3`).
use crate::auth::{
    password::{PasswordError, PasswordPolicy, PasswordRequirements, MIN_PASSWORD_LENGTH},
    rate_limit::{RatePolicies, RatePolicy},
    token::MIN_SECRET_LEN,
    LockoutPolicy, DEFAULT_TOKEN_HEADER,
};
use crate::validation::validate_namespace;
use axum::http::HeaderName;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, path::Path, time::Duration};
use thiserror::Error;

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "GATEHOUSE_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const SCRYPT_LOG_N_RANGE: std::ops::RangeInclusive<u8> = 10..=20;
/// Longest accepted duration setting (one year)
const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Application settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub log_level: String,
    pub server: ServerSettings,
    pub tokens: TokenSettings,
    pub lockout: LockoutSettings,
    pub password: PasswordSettings,
    pub rate_limit: RateLimitSettings,
    pub accounts: AccountSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Take the client address from `X-Forwarded-For` and friends. Only safe
    /// behind a proxy that overwrites them.
    pub trust_forwarded_headers: bool,
}

#[derive(Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TokenSettings {
    /// HMAC key; empty means the binary generates an ephemeral one
    pub secret: String,
    pub ttl_secs: u64,
    /// Request header carrying the token
    pub header: String,
}

impl fmt::Debug for TokenSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSettings")
            .field("secret", &if self.secret.is_empty() { "" } else { "[redacted]" })
            .field("ttl_secs", &self.ttl_secs)
            .field("header", &self.header)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LockoutSettings {
    pub max_failed_attempts: u32,
    pub lock_duration_secs: u64,
    /// Tell locked-out clients about the lock instead of a generic failure
    pub reveal_lock_state: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct PasswordSettings {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
    /// scrypt cost as log2(N)
    pub scrypt_log_n: u8,
}

/// `capacity` requests per `period_secs`, refilled continuously
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct RateClassSettings {
    pub capacity: u32,
    pub period_secs: u64,
}

impl RateClassSettings {
    const fn per_minute(capacity: u32) -> Self {
        Self {
            capacity,
            period_secs: 60,
        }
    }

    fn policy(self) -> RatePolicy {
        RatePolicy::per_period(self.capacity, Duration::from_secs(self.period_secs))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitSettings {
    pub login: RateClassSettings,
    pub register: RateClassSettings,
    pub password_reset: RateClassSettings,
    pub generic: RateClassSettings,
    pub idle_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct AccountSettings {
    /// Namespaces open for self-service registration, mapped to the granted role
    pub registration: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            server: ServerSettings::default(),
            tokens: TokenSettings::default(),
            lockout: LockoutSettings::default(),
            password: PasswordSettings::default(),
            rate_limit: RateLimitSettings::default(),
            accounts: AccountSettings::default(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            trust_forwarded_headers: true,
        }
    }
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            secret: String::new(),
            ttl_secs: 60 * 60,
            header: DEFAULT_TOKEN_HEADER.to_string(),
        }
    }
}

impl Default for LockoutSettings {
    fn default() -> Self {
        let policy = LockoutPolicy::default();
        Self {
            max_failed_attempts: policy.max_failed_attempts,
            lock_duration_secs: policy.lock_duration.as_secs(),
            reveal_lock_state: false,
        }
    }
}

impl Default for PasswordSettings {
    fn default() -> Self {
        let requirements = PasswordRequirements::default();
        Self {
            min_length: requirements.min_length,
            require_uppercase: requirements.require_uppercase,
            require_lowercase: requirements.require_lowercase,
            require_digit: requirements.require_digit,
            require_special: requirements.require_special,
            scrypt_log_n: crate::auth::password::DEFAULT_LOG_N,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            login: RateClassSettings::per_minute(5),
            register: RateClassSettings::per_minute(3),
            password_reset: RateClassSettings::per_minute(2),
            generic: RateClassSettings::per_minute(600),
            idle_ttl_secs: 60 * 60,
            sweep_interval_secs: 5 * 60,
        }
    }
}

impl Default for AccountSettings {
    fn default() -> Self {
        let mut registration = BTreeMap::new();
        registration.insert(
            gatehouse_common::DEFAULT_NAMESPACE.to_string(),
            "member".to_string(),
        );
        Self { registration }
    }
}

impl Settings {
    /// Load from `path` (skipped if missing) and the environment, then validate
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = Self::figment(path.as_ref())
            .extract()
            .map_err(Box::new)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Reject values the services cannot run with
    pub fn validate(&self) -> Result<(), SettingsError> {
        let invalid = |msg: String| Err(SettingsError::Invalid(msg));

        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return invalid(format!("unknown log level `{}`", self.log_level));
        }
        if self.server.host.trim().is_empty() {
            return invalid("server.host must not be empty".to_string());
        }

        if !self.tokens.secret.is_empty() && self.tokens.secret.len() < MIN_SECRET_LEN {
            return invalid(format!("tokens.secret must be at least {MIN_SECRET_LEN} bytes"));
        }
        if self.tokens.ttl_secs == 0 {
            return invalid("tokens.ttl_secs must be positive".to_string());
        }
        self.token_header()?;

        if self.lockout.max_failed_attempts == 0 {
            return invalid("lockout.max_failed_attempts must be positive".to_string());
        }
        if self.lockout.lock_duration_secs == 0 {
            return invalid("lockout.lock_duration_secs must be positive".to_string());
        }

        if self.password.min_length < MIN_PASSWORD_LENGTH {
            return invalid(format!(
                "password.min_length must be at least {MIN_PASSWORD_LENGTH}"
            ));
        }
        if !SCRYPT_LOG_N_RANGE.contains(&self.password.scrypt_log_n) {
            return invalid(format!(
                "password.scrypt_log_n must be within {}..={}",
                SCRYPT_LOG_N_RANGE.start(),
                SCRYPT_LOG_N_RANGE.end()
            ));
        }

        let limits = &self.rate_limit;
        for (name, class) in [
            ("login", limits.login),
            ("register", limits.register),
            ("password_reset", limits.password_reset),
            ("generic", limits.generic),
        ] {
            if class.capacity == 0 || class.period_secs == 0 {
                return invalid(format!(
                    "rate_limit.{name} needs a positive capacity and period_secs"
                ));
            }
        }
        if limits.idle_ttl_secs == 0 || limits.sweep_interval_secs == 0 {
            return invalid(
                "rate_limit.idle_ttl_secs and sweep_interval_secs must be positive".to_string(),
            );
        }

        for (name, secs) in [
            ("tokens.ttl_secs", self.tokens.ttl_secs),
            ("lockout.lock_duration_secs", self.lockout.lock_duration_secs),
            ("rate_limit.login.period_secs", limits.login.period_secs),
            ("rate_limit.register.period_secs", limits.register.period_secs),
            ("rate_limit.password_reset.period_secs", limits.password_reset.period_secs),
            ("rate_limit.generic.period_secs", limits.generic.period_secs),
            ("rate_limit.idle_ttl_secs", limits.idle_ttl_secs),
            ("rate_limit.sweep_interval_secs", limits.sweep_interval_secs),
        ] {
            if secs > MAX_DURATION_SECS {
                return invalid(format!("{name} must not exceed {MAX_DURATION_SECS}"));
            }
        }

        for (namespace, role) in &self.accounts.registration {
            validate_namespace(namespace)
                .map_err(|e| SettingsError::Invalid(format!("accounts.registration: {e}")))?;
            if role.trim().is_empty() {
                return invalid(format!("accounts.registration.{namespace} has an empty role"));
            }
        }

        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.tokens.ttl_secs)
    }

    pub fn token_header(&self) -> Result<HeaderName, SettingsError> {
        HeaderName::try_from(self.tokens.header.to_lowercase())
            .map_err(|_| SettingsError::Invalid(format!("tokens.header `{}` is not a header name", self.tokens.header)))
    }

    pub fn lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy {
            max_failed_attempts: self.lockout.max_failed_attempts,
            lock_duration: Duration::from_secs(self.lockout.lock_duration_secs),
        }
    }

    pub fn password_requirements(&self) -> PasswordRequirements {
        PasswordRequirements {
            min_length: self.password.min_length,
            require_uppercase: self.password.require_uppercase,
            require_lowercase: self.password.require_lowercase,
            require_digit: self.password.require_digit,
            require_special: self.password.require_special,
        }
    }

    pub fn password_policy(&self) -> Result<PasswordPolicy, PasswordError> {
        PasswordPolicy::new(self.password_requirements(), self.password.scrypt_log_n)
    }

    pub fn rate_policies(&self) -> RatePolicies {
        RatePolicies {
            login: self.rate_limit.login.policy(),
            register: self.rate_limit.register.policy(),
            password_reset: self.rate_limit.password_reset.policy(),
            generic: self.rate_limit.generic.policy(),
        }
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.rate_limit.idle_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.rate_limit.sweep_interval_secs)
    }
}
