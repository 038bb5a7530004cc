//! Domain error types
//!
//! This module defines the stable error taxonomy for the file lifecycle
//! engine. Every error carries a machine-readable kind whose wire code
//! never changes once published; HTTP adapters map kinds to status codes
//! and clients branch on the code string.

use std::time::Duration;

use thiserror::Error;

/// Stable, machine-readable classification of a [`CoreError`]
///
/// The `code()` strings are part of the public API contract and must not
/// be renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No authenticated principal on a request that requires one
    Unauthenticated,
    /// Principal authenticated but not allowed to act on the resource
    Forbidden,
    /// Unknown identifier
    NotFound,
    /// State-machine precondition violated (e.g. upload on a non-pending file)
    Conflict,
    /// Reservation would exceed the owner's storage quota
    QuotaExceeded,
    /// Declared size exceeds the global upload ceiling
    SizeExceeded,
    /// Uploaded byte count differs from the declared size
    SizeMismatch,
    /// Same owner/name/size reserved again inside the dedup window
    DuplicateInWindow,
    /// Download token failed decoding or MAC verification
    TokenInvalid,
    /// Download token expired, or a single-use token was already consumed
    LinkExpired,
    /// File exists but is not in the `ready` state
    NotReady,
    /// File is password-gated and no password was submitted
    PasswordRequired,
    /// Submitted password does not match the stored hash
    PasswordIncorrect,
    /// File row or object no longer exists for a structurally valid token
    FileGone,
    /// Rate limit exceeded for the principal/endpoint class
    RateLimited,
    /// Computed digest disagrees with the declared size or stored digest
    IntegrityFailed,
    /// Object store is unreachable or failing
    StorageUnavailable,
    /// Metadata store is unreachable or failing
    MetadataUnavailable,
    /// Request payload failed validation
    Validation,
    /// Catch-all; details are logged, never surfaced to clients
    Internal,
}

impl ErrorKind {
    /// Returns the stable wire code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::SizeExceeded => "size_exceeded",
            ErrorKind::SizeMismatch => "size_mismatch",
            ErrorKind::DuplicateInWindow => "duplicate_in_window",
            ErrorKind::TokenInvalid => "token_invalid",
            ErrorKind::LinkExpired => "link_expired",
            ErrorKind::NotReady => "not_ready",
            ErrorKind::PasswordRequired => "password_required",
            ErrorKind::PasswordIncorrect => "password_incorrect",
            ErrorKind::FileGone => "file_gone",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::IntegrityFailed => "integrity_failed",
            ErrorKind::StorageUnavailable => "storage_unavailable",
            ErrorKind::MetadataUnavailable => "metadata_unavailable",
            ErrorKind::Validation => "validation",
            ErrorKind::Internal => "internal",
        }
    }

    /// Returns true for kinds caused by transient dependency failures
    ///
    /// Background workers retry these with backoff; request handlers
    /// surface them to the caller instead.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::StorageUnavailable | ErrorKind::MetadataUnavailable
        )
    }
}

/// Errors produced by the file lifecycle engine
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("principal is not allowed to access this resource")]
    Forbidden,

    #[error("resource not found")]
    NotFound,

    #[error("operation conflicts with current state: {0}")]
    Conflict(String),

    #[error("storage quota exceeded: used {used} of {quota} bytes, requested {requested}")]
    QuotaExceeded {
        used: u64,
        quota: u64,
        requested: u64,
    },

    #[error("declared size {declared} exceeds the upload ceiling of {ceiling} bytes")]
    SizeExceeded { declared: u64, ceiling: u64 },

    #[error("uploaded {actual} bytes but {declared} were declared")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("an identical reservation was submitted within the dedup window")]
    DuplicateInWindow,

    #[error("download token is invalid")]
    TokenInvalid,

    #[error("download link has expired")]
    LinkExpired,

    #[error("file is not ready for download")]
    NotReady,

    #[error("a password is required to download this file")]
    PasswordRequired,

    #[error("incorrect password")]
    PasswordIncorrect,

    #[error("the file behind this link no longer exists")]
    FileGone,

    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("integrity check failed: {0}")]
    IntegrityFailed(String),

    #[error("object store unavailable: {0}")]
    StorageUnavailable(String),

    #[error("metadata store unavailable: {0}")]
    MetadataUnavailable(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Returns the stable kind classifying this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Unauthenticated => ErrorKind::Unauthenticated,
            CoreError::Forbidden => ErrorKind::Forbidden,
            CoreError::NotFound => ErrorKind::NotFound,
            CoreError::Conflict(_) => ErrorKind::Conflict,
            CoreError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            CoreError::SizeExceeded { .. } => ErrorKind::SizeExceeded,
            CoreError::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            CoreError::DuplicateInWindow => ErrorKind::DuplicateInWindow,
            CoreError::TokenInvalid => ErrorKind::TokenInvalid,
            CoreError::LinkExpired => ErrorKind::LinkExpired,
            CoreError::NotReady => ErrorKind::NotReady,
            CoreError::PasswordRequired => ErrorKind::PasswordRequired,
            CoreError::PasswordIncorrect => ErrorKind::PasswordIncorrect,
            CoreError::FileGone => ErrorKind::FileGone,
            CoreError::RateLimited { .. } => ErrorKind::RateLimited,
            CoreError::IntegrityFailed(_) => ErrorKind::IntegrityFailed,
            CoreError::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            CoreError::MetadataUnavailable(_) => ErrorKind::MetadataUnavailable,
            CoreError::Validation(_) => ErrorKind::Validation,
            CoreError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns the stable wire code for this error
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// Returns true if a background worker should retry this error
    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ErrorKind::QuotaExceeded.code(), "quota_exceeded");
        assert_eq!(ErrorKind::DuplicateInWindow.code(), "duplicate_in_window");
        assert_eq!(ErrorKind::TokenInvalid.code(), "token_invalid");
        assert_eq!(ErrorKind::FileGone.code(), "file_gone");
        assert_eq!(ErrorKind::Internal.code(), "internal");
    }

    #[test]
    fn test_transient_kinds() {
        assert!(ErrorKind::StorageUnavailable.is_transient());
        assert!(ErrorKind::MetadataUnavailable.is_transient());
        assert!(!ErrorKind::IntegrityFailed.is_transient());
        assert!(!ErrorKind::Conflict.is_transient());
    }

    #[test]
    fn test_error_kind_mapping() {
        let err = CoreError::QuotaExceeded {
            used: 80,
            quota: 100,
            requested: 30,
        };
        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
        assert!(err.to_string().contains("80"));

        let err = CoreError::SizeMismatch {
            declared: 10,
            actual: 12,
        };
        assert_eq!(err.code(), "size_mismatch");
    }

    #[test]
    fn test_transient_errors_retryable() {
        assert!(CoreError::StorageUnavailable("timeout".into()).is_transient());
        assert!(!CoreError::IntegrityFailed("short read".into()).is_transient());
    }
}
