//! HMAC-protected download tokens
//!
//! ## Wire format
//!
//! URL-safe unpadded base64 of:
//!
//! ```text
//! version(1) || file_id(16) || expiry(8, big-endian unix secs) || nonce(16) || mac(32)
//! ```
//!
//! Password-gated files extend the payload with a 16-byte salt between
//! the nonce and the MAC; the decoded length (73 vs 89 bytes) selects the
//! layout. Version is 1; any other version is rejected before the MAC is
//! even checked. MAC verification is constant-time.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use filedrop_core::domain::newtypes::FileId;
use filedrop_core::domain::CoreError;
use filedrop_core::ports::{ILinkSigner, LinkClaims};

type HmacSha256 = Hmac<Sha256>;

/// Current wire-format version
const TOKEN_VERSION: u8 = 1;
/// version + file_id + expiry + nonce
const BASE_PAYLOAD_LEN: usize = 1 + 16 + 8 + 16;
const MAC_LEN: usize = 32;
const SALT_LEN: usize = 16;

/// Signs and verifies download tokens with HMAC-SHA256
///
/// The key is the configured download signing secret; the config layer
/// guarantees at least 32 bytes of it before this type is constructed.
pub struct HmacLinkSigner {
    secret: Vec<u8>,
}

impl HmacLinkSigner {
    /// Creates a signer over `secret`
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac_over(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }
}

impl ILinkSigner for HmacLinkSigner {
    fn issue(&self, claims: &LinkClaims) -> Result<String, CoreError> {
        let expiry = claims.expires_at.timestamp();
        if expiry < 0 {
            return Err(CoreError::Validation("expiry precedes the epoch".into()));
        }

        let mut payload = Vec::with_capacity(BASE_PAYLOAD_LEN + SALT_LEN + MAC_LEN);
        payload.push(TOKEN_VERSION);
        payload.extend_from_slice(claims.file_id.as_bytes());
        payload.extend_from_slice(&(expiry as u64).to_be_bytes());
        payload.extend_from_slice(&claims.nonce);
        if let Some(salt) = &claims.password_salt {
            payload.extend_from_slice(salt);
        }

        let mac = self.mac_over(&payload);
        payload.extend_from_slice(&mac);
        Ok(URL_SAFE_NO_PAD.encode(payload))
    }

    fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<LinkClaims, CoreError> {
        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| CoreError::TokenInvalid)?;

        let salted = match raw.len() {
            n if n == BASE_PAYLOAD_LEN + MAC_LEN => false,
            n if n == BASE_PAYLOAD_LEN + SALT_LEN + MAC_LEN => true,
            _ => return Err(CoreError::TokenInvalid),
        };
        if raw[0] != TOKEN_VERSION {
            return Err(CoreError::TokenInvalid);
        }

        let (payload, mac) = raw.split_at(raw.len() - MAC_LEN);
        let mut verifier = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        verifier.update(payload);
        verifier
            .verify_slice(mac)
            .map_err(|_| CoreError::TokenInvalid)?;

        // Only after the MAC holds do the fields mean anything.
        let mut file_id = [0u8; 16];
        file_id.copy_from_slice(&payload[1..17]);
        let mut expiry_be = [0u8; 8];
        expiry_be.copy_from_slice(&payload[17..25]);
        let mut nonce = [0u8; 16];
        nonce.copy_from_slice(&payload[25..41]);
        let password_salt = if salted {
            let mut salt = [0u8; 16];
            salt.copy_from_slice(&payload[41..57]);
            Some(salt)
        } else {
            None
        };

        let expiry_secs = u64::from_be_bytes(expiry_be);
        let expires_at = Utc
            .timestamp_opt(expiry_secs.min(i64::MAX as u64) as i64, 0)
            .single()
            .ok_or(CoreError::TokenInvalid)?;

        let claims = LinkClaims {
            file_id: FileId::from_bytes(file_id),
            expires_at,
            nonce,
            password_salt,
        };

        // Strict: a token presented at exactly its expiry is dead.
        if claims.is_expired(now) {
            return Err(CoreError::LinkExpired);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn signer() -> HmacLinkSigner {
        HmacLinkSigner::new(*b"0123456789abcdef0123456789abcdef")
    }

    fn claims(ttl_secs: i64) -> LinkClaims {
        LinkClaims {
            file_id: FileId::new(),
            // Truncate to whole seconds: the wire format carries unix secs.
            expires_at: Utc
                .timestamp_opt(Utc::now().timestamp() + ttl_secs, 0)
                .single()
                .unwrap(),
            nonce: *uuid::Uuid::new_v4().as_bytes(),
            password_salt: None,
        }
    }

    #[test]
    fn test_roundtrip() {
        let s = signer();
        let original = claims(60);
        let token = s.issue(&original).unwrap();
        let verified = s.verify(&token, Utc::now()).unwrap();
        assert_eq!(verified, original);
    }

    #[test]
    fn test_roundtrip_with_salt() {
        let s = signer();
        let mut original = claims(60);
        original.password_salt = Some([9u8; 16]);
        let token = s.issue(&original).unwrap();
        let verified = s.verify(&token, Utc::now()).unwrap();
        assert_eq!(verified.password_salt, Some([9u8; 16]));
    }

    #[test]
    fn test_every_bit_flip_is_rejected() {
        let s = signer();
        let token = s.issue(&claims(60)).unwrap();
        let raw = URL_SAFE_NO_PAD.decode(&token).unwrap();

        for byte_idx in 0..raw.len() {
            for bit in 0..8 {
                let mut forged = raw.clone();
                forged[byte_idx] ^= 1 << bit;
                let forged_token = URL_SAFE_NO_PAD.encode(&forged);
                let result = s.verify(&forged_token, Utc::now());
                assert!(
                    matches!(result, Err(CoreError::TokenInvalid)),
                    "flip at byte {byte_idx} bit {bit} was accepted"
                );
            }
        }
    }

    #[test]
    fn test_expiry_is_strict() {
        let s = signer();
        let c = claims(60);
        let token = s.issue(&c).unwrap();

        // Half a lifetime in: fine.
        assert!(s.verify(&token, c.expires_at - Duration::seconds(30)).is_ok());
        // Exactly at expiry: rejected.
        assert!(matches!(
            s.verify(&token, c.expires_at),
            Err(CoreError::LinkExpired)
        ));
        // Past expiry: rejected.
        assert!(matches!(
            s.verify(&token, c.expires_at + Duration::seconds(1)),
            Err(CoreError::LinkExpired)
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = signer().issue(&claims(60)).unwrap();
        let other = HmacLinkSigner::new(*b"ffffffffffffffffffffffffffffffff");
        assert!(matches!(
            other.verify(&token, Utc::now()),
            Err(CoreError::TokenInvalid)
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let s = signer();
        let token = s.issue(&claims(60)).unwrap();
        let mut raw = URL_SAFE_NO_PAD.decode(&token).unwrap();
        raw[0] = 2;
        // Re-sign so only the version is at fault.
        let (payload, _) = raw.split_at(raw.len() - MAC_LEN);
        let mac = s.mac_over(payload);
        let mut forged = payload.to_vec();
        forged.extend_from_slice(&mac);
        assert!(matches!(
            s.verify(&URL_SAFE_NO_PAD.encode(&forged), Utc::now()),
            Err(CoreError::TokenInvalid)
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        let s = signer();
        assert!(s.verify("", Utc::now()).is_err());
        assert!(s.verify("%%%not-base64%%%", Utc::now()).is_err());
        assert!(s.verify("dG9vc2hvcnQ", Utc::now()).is_err());
    }
}
