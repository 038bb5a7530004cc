//! Download-token port and password-hashing port
//!
//! A download link is not a database row: the signed token IS the
//! permission. The signer binds file id, expiry, a random nonce, and -
//! for password-gated files - a salt that ties the token to the current
//! password version.

use chrono::{DateTime, Utc};

use crate::domain::newtypes::FileId;
use crate::domain::CoreError;

/// Claims carried by a signed download token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkClaims {
    /// The file the token grants access to
    pub file_id: FileId,
    /// Strict expiry: verification at `now >= expires_at` fails
    pub expires_at: DateTime<Utc>,
    /// Random per-token nonce; doubles as the single-use consumption key
    pub nonce: [u8; 16],
    /// Present iff the file was password-gated at issue time
    pub password_salt: Option<[u8; 16]>,
}

impl LinkClaims {
    /// Returns true once `now` has reached the expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Port trait for issuing and verifying signed download tokens
///
/// Verification must be constant-time on the MAC and reject any unknown
/// format version.
pub trait ILinkSigner: Send + Sync {
    /// Encodes and signs `claims` into a URL-safe token
    fn issue(&self, claims: &LinkClaims) -> Result<String, CoreError>;

    /// Decodes `token`, checks the MAC, and enforces expiry against `now`
    ///
    /// # Errors
    ///
    /// `CoreError::TokenInvalid` for malformed or forged tokens,
    /// `CoreError::LinkExpired` for structurally valid but expired ones.
    fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<LinkClaims, CoreError>;
}

/// Port trait for password hashing on download-gated files
pub trait IPasswordHasher: Send + Sync {
    /// Hashes a password into a self-describing PHC string
    fn hash(&self, password: &str) -> Result<String, CoreError>;

    /// Verifies a password against a stored PHC string, constant-time
    fn verify(&self, password: &str, stored_hash: &str) -> Result<bool, CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_expiry_is_strict() {
        let now = Utc::now();
        let claims = LinkClaims {
            file_id: FileId::new(),
            expires_at: now,
            nonce: [0u8; 16],
            password_salt: None,
        };
        // expiry == now already counts as expired
        assert!(claims.is_expired(now));
        assert!(!claims.is_expired(now - Duration::seconds(1)));
    }
}
