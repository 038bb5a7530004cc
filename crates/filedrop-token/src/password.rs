//! Password hashing for download-gated files
//!
//! Argon2id with library defaults, emitting self-describing PHC strings.
//! Verification goes through the PHC parser so parameter upgrades keep
//! old hashes verifiable.

use argon2::password_hash::{rand_core::OsRng, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Argon2, PasswordHash};

use filedrop_core::domain::CoreError;
use filedrop_core::ports::IPasswordHasher;

/// Argon2id-backed implementation of the password port
#[derive(Default)]
pub struct Argon2PasswordHasher;

impl Argon2PasswordHasher {
    /// Creates a hasher with default parameters
    pub fn new() -> Self {
        Self
    }
}

impl IPasswordHasher for Argon2PasswordHasher {
    fn hash(&self, password: &str) -> Result<String, CoreError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| CoreError::Internal(format!("password hashing failed: {e}")))
    }

    fn verify(&self, password: &str, stored_hash: &str) -> Result<bool, CoreError> {
        let parsed = PasswordHash::new(stored_hash)
            .map_err(|e| CoreError::Internal(format!("stored password hash unreadable: {e}")))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hasher = Argon2PasswordHasher::new();
        let hash = hasher.hash("hunter2!").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(hasher.verify("hunter2!", &hash).unwrap());
        assert!(!hasher.verify("hunter3!", &hash).unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        let hasher = Argon2PasswordHasher::new();
        let a = hasher.hash("same").unwrap();
        let b = hasher.hash("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_unreadable_hash_is_an_error() {
        let hasher = Argon2PasswordHasher::new();
        assert!(hasher.verify("x", "not-a-phc-string").is_err());
    }
}
