// ============================
// crates/backend-lib/src/auth/credential.rs
// ============================
/** Password credentials and brute-force lockout.
Every attempt on a credential runs under that credential's own async mutex,
so the read, the verification and the counter write form one atomic step and
concurrent attempts are applied in arrival order. Unrelated credentials never
wait on each other. */
use super::{
    clock::Clock,
    password::{check_password_strength, PasswordError, PasswordPolicy},
};
use crate::validation::{validate_password_length, validate_username};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use std::{fmt, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Default number of consecutive failures before a credential locks
pub const DEFAULT_MAX_FAILED_ATTEMPTS: u32 = 5;

/// Default lockout duration (15 minutes)
pub const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(15 * 60);

/// A stored login credential
#[derive(Clone)]
pub struct Credential {
    pub subject_id: String,
    pub username: String,
    pub role: String,
    /// Principal table the subject belongs to
    pub namespace: String,
    pub password_hash: String,
    pub failed_attempts: u32,
    /// Set while locked; always in the future when it is honoured
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Credential {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }

    pub fn key(&self) -> CredentialKey {
        CredentialKey::new(&self.namespace, &self.username)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("subject_id", &self.subject_id)
            .field("username", &self.username)
            .field("role", &self.role)
            .field("namespace", &self.namespace)
            .field("failed_attempts", &self.failed_attempts)
            .field("locked_until", &self.locked_until)
            .finish_non_exhaustive()
    }
}

/// Identity of a credential: login names are unique per namespace, case-insensitively
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialKey {
    pub namespace: String,
    pub username: String,
}

impl CredentialKey {
    pub fn new(namespace: &str, username: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            username: username.to_lowercase(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("credential store unavailable: {0}")]
    Unavailable(String),

    #[error("credential already exists")]
    Conflict,

    #[error("credential not found")]
    NotFound,
}

/// Persistence contract for credentials. The engine behind it is up to the host.
#[async_trait]
pub trait CredentialStore: Send + Sync + fmt::Debug {
    async fn find(&self, key: &CredentialKey) -> Result<Option<Credential>, StoreError>;

    /// Insert a new credential, failing with [`StoreError::Conflict`] if the key exists
    async fn insert(&self, credential: Credential) -> Result<(), StoreError>;

    /// Overwrite hash, counter and lock fields of an existing credential
    async fn update(&self, credential: &Credential) -> Result<(), StoreError>;
}

/// In-process credential store
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    credentials: Arc<DashMap<CredentialKey, Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find(&self, key: &CredentialKey) -> Result<Option<Credential>, StoreError> {
        Ok(self.credentials.get(key).map(|c| c.clone()))
    }

    async fn insert(&self, credential: Credential) -> Result<(), StoreError> {
        match self.credentials.entry(credential.key()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::Conflict),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(credential);
                Ok(())
            },
        }
    }

    async fn update(&self, credential: &Credential) -> Result<(), StoreError> {
        let mut stored = self
            .credentials
            .get_mut(&credential.key())
            .ok_or(StoreError::NotFound)?;
        *stored = credential.clone();
        Ok(())
    }
}

/// Per-credential mutexes. Entries are dropped once nobody holds or awaits them.
#[derive(Debug, Default)]
struct KeyedLocks {
    locks: Arc<DashMap<CredentialKey, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    async fn acquire(&self, key: &CredentialKey) -> KeyGuard {
        let mutex = self.locks.entry(key.clone()).or_default().clone();
        let guard = mutex.lock_owned().await;
        KeyGuard {
            key: key.clone(),
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

struct KeyGuard {
    key: CredentialKey,
    locks: Arc<DashMap<CredentialKey, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // Release first so the strong count reflects only the map and waiters
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Why a credential operation was refused
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("{0}")]
    Validation(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("credential locked until {until}")]
    Locked { until: DateTime<Utc> },

    #[error("username already taken")]
    UsernameTaken,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<PasswordError> for CredentialError {
    fn from(err: PasswordError) -> Self {
        match err {
            PasswordError::Weak(reason) => CredentialError::Validation(reason),
            PasswordError::Hashing(detail) => CredentialError::Internal(detail),
        }
    }
}

/// Lockout threshold and window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub max_failed_attempts: u32,
    pub lock_duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: DEFAULT_MAX_FAILED_ATTEMPTS,
            lock_duration: DEFAULT_LOCK_DURATION,
        }
    }
}

/// Hashes, verifies and locks out password credentials
#[derive(Debug)]
pub struct PasswordCredentialManager {
    store: Arc<dyn CredentialStore>,
    policy: Arc<PasswordPolicy>,
    lockout: LockoutPolicy,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks,
    /// Hash verified against when the account does not exist
    decoy_hash: OnceCell<String>,
    #[cfg(test)]
    verifications: std::sync::atomic::AtomicUsize,
}

impl PasswordCredentialManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        policy: PasswordPolicy,
        lockout: LockoutPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            policy: Arc::new(policy),
            lockout,
            clock,
            locks: KeyedLocks::default(),
            decoy_hash: OnceCell::new(),
            #[cfg(test)]
            verifications: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn lockout(&self) -> LockoutPolicy {
        self.lockout
    }

    /// Create a credential for a new account
    #[instrument(skip(self, raw))]
    pub async fn register(
        &self,
        namespace: &str,
        username: &str,
        role: &str,
        raw: &str,
    ) -> Result<Credential, CredentialError> {
        validate_username(username).map_err(|e| CredentialError::Validation(e.to_string()))?;
        validate_password_length(raw).map_err(|e| CredentialError::Validation(e.to_string()))?;

        let password_hash = self.hash_blocking(raw, PasswordPolicy::hash).await?;
        let credential = Credential {
            subject_id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            role: role.to_string(),
            namespace: namespace.to_string(),
            password_hash,
            failed_attempts: 0,
            locked_until: None,
            created_at: self.clock.now(),
        };

        match self.store.insert(credential.clone()).await {
            Ok(()) => {
                info!(subject_id = %credential.subject_id, "credential created");
                Ok(credential)
            },
            Err(StoreError::Conflict) => Err(CredentialError::UsernameTaken),
            Err(e) => Err(e.into()),
        }
    }

    /// Verify a login attempt, applying the lockout rules
    #[instrument(skip(self, raw))]
    pub async fn authenticate(
        &self,
        namespace: &str,
        username: &str,
        raw: &str,
    ) -> Result<Credential, CredentialError> {
        let key = CredentialKey::new(namespace, username);
        let _guard = self.locks.acquire(&key).await;
        self.attempt(&key, raw).await
    }

    /// Replace the password after verifying the current one through the lockout rules
    #[instrument(skip(self, current, new))]
    pub async fn change_password(
        &self,
        namespace: &str,
        username: &str,
        current: &str,
        new: &str,
    ) -> Result<(), CredentialError> {
        validate_password_length(new).map_err(|e| CredentialError::Validation(e.to_string()))?;
        check_password_strength(new, self.policy.requirements())?;

        let key = CredentialKey::new(namespace, username);
        let _guard = self.locks.acquire(&key).await;
        let mut credential = self.attempt(&key, current).await?;

        credential.password_hash = self.hash_blocking(new, PasswordPolicy::hash).await?;
        self.store.update(&credential).await?;
        info!(subject_id = %credential.subject_id, "password changed");
        Ok(())
    }

    /// Current stored state of a credential
    pub async fn credential(
        &self,
        namespace: &str,
        username: &str,
    ) -> Result<Option<Credential>, CredentialError> {
        Ok(self.store.find(&CredentialKey::new(namespace, username)).await?)
    }

    /// One attempt of the lockout state machine. Caller holds the key's lock.
    async fn attempt(&self, key: &CredentialKey, raw: &str) -> Result<Credential, CredentialError> {
        let Some(mut credential) = self.store.find(key).await? else {
            // Pay the same hashing cost as a real account
            self.decoy_verify(raw).await?;
            debug!("login attempt for unknown account");
            return Err(CredentialError::InvalidCredentials);
        };

        let now = self.clock.now();
        let stale = credential.failed_attempts != 0 || credential.locked_until.is_some();

        if let Some(until) = credential.locked_until {
            if now < until {
                // Same hashing cost as an open or unknown account; the result is ignored
                self.verify_blocking(raw, &credential.password_hash).await?;
                debug!(subject_id = %credential.subject_id, %until, "attempt on locked credential");
                return Err(CredentialError::Locked { until });
            }
            // Lock window elapsed
            credential.failed_attempts = 0;
            credential.locked_until = None;
        }

        if self.verify_blocking(raw, &credential.password_hash).await? {
            credential.failed_attempts = 0;
            credential.locked_until = None;
            if stale {
                self.store.update(&credential).await?;
            }
            return Ok(credential);
        }

        credential.failed_attempts = credential.failed_attempts.saturating_add(1);
        if credential.failed_attempts >= self.lockout.max_failed_attempts {
            let until = now
                + chrono::Duration::from_std(self.lockout.lock_duration)
                    .map_err(|e| CredentialError::Internal(e.to_string()))?;
            credential.locked_until = Some(until);
            info!(
                subject_id = %credential.subject_id,
                failed_attempts = credential.failed_attempts,
                %until,
                "credential locked after repeated failures"
            );
        } else {
            debug!(
                subject_id = %credential.subject_id,
                failed_attempts = credential.failed_attempts,
                "failed login attempt"
            );
        }
        self.store.update(&credential).await?;
        Err(CredentialError::InvalidCredentials)
    }

    /// Run `hasher` on the blocking pool
    async fn hash_blocking(
        &self,
        raw: &str,
        hasher: fn(&PasswordPolicy, &str) -> Result<String, PasswordError>,
    ) -> Result<String, CredentialError> {
        let policy = self.policy.clone();
        let raw = Zeroizing::new(raw.to_string());
        let hash = tokio::task::spawn_blocking(move || hasher(&policy, &raw))
            .await
            .map_err(|e| CredentialError::Internal(e.to_string()))??;
        Ok(hash)
    }

    async fn verify_blocking(&self, raw: &str, hash: &str) -> Result<bool, CredentialError> {
        #[cfg(test)]
        self.verifications
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let policy = self.policy.clone();
        let raw = Zeroizing::new(raw.to_string());
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || policy.verify(&raw, &hash))
            .await
            .map_err(|e| CredentialError::Internal(e.to_string()))
    }

    async fn decoy_verify(&self, raw: &str) -> Result<(), CredentialError> {
        let decoy = self
            .decoy_hash
            .get_or_try_init(|| async {
                let filler: String = OsRng
                    .sample_iter(&Alphanumeric)
                    .take(24)
                    .map(char::from)
                    .collect();
                self.hash_blocking(&filler, PasswordPolicy::hash_unchecked).await
            })
            .await?;

        if self.verify_blocking(raw, decoy).await? {
            warn!("password matched the decoy hash");
        }
        Ok(())
    }
}
