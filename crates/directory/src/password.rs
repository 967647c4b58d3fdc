//! Password hashing and verification.
//!
//! Passwords are never stored in clear. Records carry an Argon2 PHC string
//! (`$argon2id$v=19$...`) with a per-password random salt, and verification
//! goes through [`PasswordVerifier`], which compares digests in constant time.

use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};

use crate::error::{DirectoryError, Result};

/// Minimum accepted password length, in characters.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Hash a password with default Argon2 settings and a fresh salt.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| DirectoryError::Hash(e.to_string()))
}

/// Verify a password against a stored PHC string.
///
/// A malformed stored hash never verifies.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        tracing::warn!("Stored password hash is malformed; rejecting authentication");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Returns whether `value` is a parseable PHC hash string.
pub fn is_password_hash(value: &str) -> bool {
    PasswordHash::new(value).is_ok()
}

/// Checks operator-supplied password input.
pub fn validate_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(DirectoryError::InvalidPassword(
            "password cannot be empty".into(),
        ));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(DirectoryError::InvalidPassword(format!(
            "password must be at least {} characters long",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}
