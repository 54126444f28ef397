// ============================
// crates/backend-lib/src/validation/mod.rs
// ============================
//! Input validation for credential requests.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

const MIN_USERNAME_LENGTH: usize = 3;
const MAX_USERNAME_LENGTH: usize = 64;
const MAX_PASSWORD_LENGTH: usize = 128;
const MAX_NAMESPACE_LENGTH: usize = 32;

static USERNAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._@+-]+$").expect("username pattern compiles"));
static NAMESPACE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("namespace pattern compiles"));

/// Possible validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    #[error("Invalid password: {0}")]
    InvalidPassword(String),

    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a login name
pub fn validate_username(username: &str) -> ValidationResult<&str> {
    let len = username.chars().count();
    if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&len) {
        return Err(ValidationError::InvalidUsername(format!(
            "must be between {MIN_USERNAME_LENGTH} and {MAX_USERNAME_LENGTH} characters"
        )));
    }

    if !USERNAME_REGEX.is_match(username) {
        return Err(ValidationError::InvalidUsername(
            "may only contain letters, digits and . _ @ + -".to_string(),
        ));
    }

    Ok(username)
}

/// Bound the size of a submitted password before it reaches the hasher
pub fn validate_password_length(password: &str) -> ValidationResult<&str> {
    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(ValidationError::InvalidPassword(format!(
            "must be at most {MAX_PASSWORD_LENGTH} bytes"
        )));
    }
    Ok(password)
}

/// Validate a principal namespace name
pub fn validate_namespace(namespace: &str) -> ValidationResult<&str> {
    if namespace.is_empty() || namespace.len() > MAX_NAMESPACE_LENGTH {
        return Err(ValidationError::InvalidNamespace(format!(
            "must be between 1 and {MAX_NAMESPACE_LENGTH} characters"
        )));
    }

    if !NAMESPACE_REGEX.is_match(namespace) {
        return Err(ValidationError::InvalidNamespace(
            "must be lowercase letters, digits and underscores".to_string(),
        ));
    }

    Ok(namespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_username() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("coach.bob+1@gym.example").is_ok());

        assert!(validate_username("ab").is_err());
        assert!(validate_username(&"a".repeat(65)).is_err());
        assert!(validate_username("alice smith").is_err());
        assert!(validate_username("<script>").is_err());
    }

    #[test]
    fn test_validate_password_length() {
        assert!(validate_password_length("Passw0rd").is_ok());
        assert!(validate_password_length(&"A1a".repeat(50)).is_err());
    }

    #[test]
    fn test_validate_namespace() {
        assert!(validate_namespace("member").is_ok());
        assert!(validate_namespace("gym_admin").is_ok());

        assert!(validate_namespace("").is_err());
        assert!(validate_namespace("Member").is_err());
        assert!(validate_namespace("1member").is_err());
    }
}
