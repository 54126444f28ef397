// ============================
// crates/backend-lib/src/auth/password.rs
// ============================
//! Password hashing and verification.
use rand::{rngs::OsRng, RngCore};
use scrypt::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Params, Scrypt,
};
use thiserror::Error;

/// Minimum password length
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Default scrypt cost (N = 2^15)
pub const DEFAULT_LOG_N: u8 = 15;

const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;
const KEY_LEN: usize = 32;
const SALT_BYTES: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PasswordError {
    #[error("{0}")]
    Weak(String),

    #[error("password hashing failed: {0}")]
    Hashing(String),
}

/// Password complexity requirements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordRequirements {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
}

impl Default for PasswordRequirements {
    fn default() -> Self {
        Self {
            min_length: MIN_PASSWORD_LENGTH,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_special: false,
        }
    }
}

/// Check a password against the complexity requirements, naming the first rule it breaks
pub fn check_password_strength(
    password: &str,
    requirements: &PasswordRequirements,
) -> Result<(), PasswordError> {
    if password.chars().count() < requirements.min_length {
        return Err(PasswordError::Weak(format!(
            "password must be at least {} characters",
            requirements.min_length
        )));
    }

    if requirements.require_uppercase && !password.chars().any(char::is_uppercase) {
        return Err(PasswordError::Weak(
            "password must contain an uppercase letter".to_string(),
        ));
    }

    if requirements.require_lowercase && !password.chars().any(char::is_lowercase) {
        return Err(PasswordError::Weak(
            "password must contain a lowercase letter".to_string(),
        ));
    }

    if requirements.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(PasswordError::Weak("password must contain a digit".to_string()));
    }

    if requirements.require_special && !password.chars().any(|c| !c.is_alphanumeric()) {
        return Err(PasswordError::Weak(
            "password must contain a special character".to_string(),
        ));
    }

    Ok(())
}

/// Complexity rules plus the fixed scrypt work factor
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    requirements: PasswordRequirements,
    params: Params,
}

impl PasswordPolicy {
    pub fn new(requirements: PasswordRequirements, log_n: u8) -> Result<Self, PasswordError> {
        let params = Params::new(log_n, SCRYPT_R, SCRYPT_P, KEY_LEN)
            .map_err(|e| PasswordError::Hashing(e.to_string()))?;
        Ok(Self {
            requirements,
            params,
        })
    }

    pub fn requirements(&self) -> &PasswordRequirements {
        &self.requirements
    }

    /// Validate and hash a new password
    pub fn hash(&self, raw: &str) -> Result<String, PasswordError> {
        check_password_strength(raw, &self.requirements)?;
        self.hash_unchecked(raw)
    }

    /// Hash without complexity checks. Used for the timing decoy of unknown accounts.
    pub(crate) fn hash_unchecked(&self, raw: &str) -> Result<String, PasswordError> {
        let mut salt_bytes = [0u8; SALT_BYTES];
        OsRng.fill_bytes(&mut salt_bytes);
        let salt =
            SaltString::encode_b64(&salt_bytes).map_err(|e| PasswordError::Hashing(e.to_string()))?;

        let hash = Scrypt
            .hash_password_customized(raw.as_bytes(), None, None, self.params, &salt)
            .map_err(|e| PasswordError::Hashing(e.to_string()))?
            .to_string();
        Ok(hash)
    }

    /// Verify a password against a stored hash
    pub fn verify(&self, raw: &str, hash: &str) -> bool {
        verify_password(hash, raw)
    }
}

/// Verify a password against a PHC hash string.
///
/// The derived key is compared in constant time; an unparseable hash never matches.
fn verify_password(hash: &str, plain: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(hash) else {
        return false;
    };
    Scrypt.verify_password(plain.as_bytes(), &parsed_hash).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy() -> PasswordPolicy {
        PasswordPolicy::new(PasswordRequirements::default(), 10).unwrap()
    }

    #[test]
    fn test_password_hashing_and_verification() {
        let policy = fast_policy();
        let hash = policy.hash("SecurePassw0rd").unwrap();

        assert_ne!(hash, "SecurePassw0rd");
        assert!(hash.starts_with("$scrypt$"));
        assert!(policy.verify("SecurePassw0rd", &hash));
        assert!(!policy.verify("SecurePassw0rD", &hash));
        assert!(!policy.verify("", &hash));
    }

    #[test]
    fn test_hashes_are_salted() {
        let policy = fast_policy();
        let a = policy.hash("SecurePassw0rd").unwrap();
        let b = policy.hash("SecurePassw0rd").unwrap();
        assert_ne!(a, b);
        assert!(policy.verify("SecurePassw0rd", &a));
        assert!(policy.verify("SecurePassw0rd", &b));
    }

    #[test]
    fn test_weak_password_is_rejected_before_hashing() {
        let policy = fast_policy();
        assert!(matches!(policy.hash("short1A"), Err(PasswordError::Weak(_))));
        assert!(matches!(policy.hash("alllowercase1"), Err(PasswordError::Weak(_))));
    }

    #[test]
    fn test_malformed_hash_never_verifies() {
        assert!(!verify_password("not-a-phc-string", "SecurePassw0rd"));
        assert!(!verify_password("", ""));
    }

    #[test]
    fn test_password_strength_validation() {
        let requirements = PasswordRequirements::default();

        assert!(check_password_strength("Passw0rd", &requirements).is_ok());

        // Too short
        assert!(check_password_strength("Pass0rd", &requirements).is_err());

        // Missing uppercase
        assert!(check_password_strength("passw0rd", &requirements).is_err());

        // Missing lowercase
        assert!(check_password_strength("PASSW0RD", &requirements).is_err());

        // Missing digit
        assert!(check_password_strength("Password", &requirements).is_err());

        let strict = PasswordRequirements {
            require_special: true,
            ..PasswordRequirements::default()
        };
        assert!(check_password_strength("Passw0rd", &strict).is_err());
        assert!(check_password_strength("Passw0rd!", &strict).is_ok());
    }

    #[test]
    fn test_strength_error_names_the_rule() {
        let err = check_password_strength("password1", &PasswordRequirements::default())
            .unwrap_err();
        assert_eq!(
            err,
            PasswordError::Weak("password must contain an uppercase letter".to_string())
        );
    }
}
