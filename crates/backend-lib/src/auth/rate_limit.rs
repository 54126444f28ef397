// ============================
// crates/backend-lib/src/auth/rate_limit.rs
// ============================
//! Token-bucket rate limiting keyed by client identity and endpoint class.
//!
//! Buckets refill lazily from elapsed wall-clock time when touched. Idle
//! buckets are removed by [`RateLimiter::sweep_idle`], which a background task
//! runs periodically.

use super::clock::Clock;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

const EPSILON: f64 = 1e-9;

/// Default idle time after which a bucket is evicted (1 hour)
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(60 * 60);

/// Category of route with its own rate-limit policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointClass {
    Login,
    Register,
    PasswordReset,
    Generic,
}

impl EndpointClass {
    pub const ALL: [EndpointClass; 4] = [
        EndpointClass::Login,
        EndpointClass::Register,
        EndpointClass::PasswordReset,
        EndpointClass::Generic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EndpointClass::Login => "login",
            EndpointClass::Register => "register",
            EndpointClass::PasswordReset => "password_reset",
            EndpointClass::Generic => "generic",
        }
    }

    /// Classes that guard credential flows
    pub fn is_sensitive(self) -> bool {
        !matches!(self, EndpointClass::Generic)
    }
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upper bound on the retry hint, reached by near-zero refill rates
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(u32::MAX as u64);

/// Bucket capacity and refill rate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatePolicy {
    pub capacity: u32,
    /// Tokens added per second
    pub refill_per_sec: f64,
}

impl RatePolicy {
    /// `capacity` tokens, fully refilled once per `period`
    pub fn per_period(capacity: u32, period: Duration) -> Self {
        let secs = period.as_secs_f64();
        let refill_per_sec = if secs > 0.0 {
            f64::from(capacity) / secs
        } else {
            f64::from(capacity)
        };
        Self {
            capacity,
            refill_per_sec,
        }
    }
}

/// Policies for every endpoint class
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatePolicies {
    pub login: RatePolicy,
    pub register: RatePolicy,
    pub password_reset: RatePolicy,
    pub generic: RatePolicy,
}

impl RatePolicies {
    pub fn for_class(&self, class: EndpointClass) -> RatePolicy {
        match class {
            EndpointClass::Login => self.login,
            EndpointClass::Register => self.register,
            EndpointClass::PasswordReset => self.password_reset,
            EndpointClass::Generic => self.generic,
        }
    }
}

impl Default for RatePolicies {
    fn default() -> Self {
        let minute = Duration::from_secs(60);
        Self {
            login: RatePolicy::per_period(5, minute),
            register: RatePolicy::per_period(3, minute),
            password_reset: RatePolicy::per_period(2, minute),
            generic: RatePolicy::per_period(600, minute),
        }
    }
}

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    /// Rejected; one token will be available after `retry_after`
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    identity: String,
    class: EndpointClass,
}

/// Bucket state for one key
#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

impl TokenBucket {
    fn full(policy: RatePolicy, now: DateTime<Utc>) -> Self {
        Self {
            tokens: f64::from(policy.capacity),
            last_refill: now,
        }
    }

    fn refill(&mut self, policy: RatePolicy, now: DateTime<Utc>) {
        // A clock that stepped backwards adds nothing
        let elapsed = (now - self.last_refill).to_std().unwrap_or(Duration::ZERO);
        let capacity = f64::from(policy.capacity);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * policy.refill_per_sec).min(capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    fn try_take(&mut self, policy: RatePolicy) -> RateDecision {
        // Tolerate float noise from fractional refill rates
        if self.tokens >= 1.0 - EPSILON {
            self.tokens = (self.tokens - 1.0).max(0.0);
            return RateDecision::Allowed;
        }

        let missing = 1.0 - self.tokens;
        if policy.refill_per_sec <= 0.0 {
            return RateDecision::Limited {
                retry_after: MAX_RETRY_AFTER,
            };
        }
        // 1 / (5/60) must round to 12, not 13
        let secs = (missing / policy.refill_per_sec - EPSILON).ceil().max(1.0);
        RateDecision::Limited {
            retry_after: Duration::try_from_secs_f64(secs)
                .map_or(MAX_RETRY_AFTER, |d| d.min(MAX_RETRY_AFTER)),
        }
    }
}

/// Token-bucket limiter keyed by (client identity, endpoint class)
#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// Sharded map; one bucket update locks only its shard
    buckets: Arc<DashMap<BucketKey, TokenBucket>>,
    policies: RatePolicies,
    idle_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(policies: RatePolicies, idle_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: Arc::new(DashMap::new()),
            policies,
            idle_ttl,
            clock,
        }
    }

    pub fn policies(&self) -> &RatePolicies {
        &self.policies
    }

    /// Consume one token for the key, reporting when to retry if none is left
    pub fn check(&self, identity: &str, class: EndpointClass) -> RateDecision {
        let policy = self.policies.for_class(class);
        let now = self.clock.now();
        let key = BucketKey {
            identity: identity.to_string(),
            class,
        };

        let mut bucket = self
            .buckets
            .entry(key)
            .or_insert_with(|| TokenBucket::full(policy, now));
        bucket.refill(policy, now);
        let decision = bucket.try_take(policy);

        if !decision.is_allowed() {
            debug!(identity, class = class.as_str(), "rate limit exceeded");
        }
        decision
    }

    /// Consume one token for the key
    pub fn allow(&self, identity: &str, class: EndpointClass) -> bool {
        self.check(identity, class).is_allowed()
    }

    /// Drop buckets untouched for longer than the idle TTL, returning how many were removed
    pub fn sweep_idle(&self) -> usize {
        let now = self.clock.now();
        let idle_ttl = self.idle_ttl;
        let before = self.buckets.len();

        self.buckets.retain(|_, bucket| {
            (now - bucket.last_refill)
                .to_std()
                .map_or(true, |idle| idle <= idle_ttl)
        });

        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            debug!(removed, remaining = self.buckets.len(), "swept idle rate-limit buckets");
        }
        removed
    }

    /// Run [`Self::sweep_idle`] every `every` until the task is aborted
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // First tick fires immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                limiter.sweep_idle();
            }
        })
    }

    /// Number of live buckets
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
