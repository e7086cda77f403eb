//! Password hashing with Argon2id
//!
//! Hashes are stored in PHC string format, which embeds the algorithm,
//! parameters and salt.

use anyhow::{Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Shortest password accepted for a profile
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Check a new password against the length policy.
/// Returns the human-readable problem, if any.
pub fn validate_password(password: &str) -> Option<String> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Some(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        ));
    }
    None
}

/// Hash a password with a fresh random salt
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))
        .context("Password hashing failed")?;

    Ok(hash.to_string())
}

/// Verify a password against a stored PHC hash.
///
/// A wrong password is `Ok(false)`; a malformed hash is an error.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))
        .context("Failed to parse password hash")?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(anyhow::anyhow!("Password verification failed: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_argon2id() {
        let hash = hash_password("ledger-pass-1").expect("Failed to hash password");
        assert!(hash.starts_with("$argon2id$"));
    }

    #[test]
    fn test_same_password_different_salts() {
        let a = hash_password("same_password").unwrap();
        let b = hash_password("same_password").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify() {
        let hash = hash_password("correct_password").unwrap();
        assert!(verify_password("correct_password", &hash).unwrap());
        assert!(!verify_password("wrong_password", &hash).unwrap());
    }

    #[test]
    fn test_verify_rejects_malformed_hash() {
        assert!(verify_password("anything", "not-a-phc-string").is_err());
    }

    #[test]
    fn test_validate_password_length() {
        assert!(validate_password("short").is_some());
        assert!(validate_password("12345678").is_none());
        // counted in characters, not bytes
        assert!(validate_password("ééééééé").is_some());
    }
}
