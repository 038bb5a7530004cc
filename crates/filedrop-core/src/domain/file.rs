//! File domain entity
//!
//! This module defines the File entity, the central record of the upload
//! lifecycle, together with its state machine.
//!
//! ## State Machine
//!
//! ```text
//!     ┌─────────┐  body finalized  ┌────────┐   digest ok   ┌────────┐
//!     │ Pending │ ───────────────► │ Stored │ ────────────► │ Ready  │
//!     │(reserved)│                 │(bytes  │   (via Hashed)│(linkable)
//!     └─────────┘                  │ in store)              └────────┘
//!          │                       └────────┘
//!          │ abort / timeout            │ digest mismatch /
//!          ▼                            ▼ persistent error
//!     ┌─────────┐                  ┌────────┐
//!     │ Failed  │ ◄─────────────── │ Failed │   (terminal)
//!     └─────────┘                  └────────┘
//! ```
//!
//! `Hashed` is passed through in the same metadata write that lands
//! `Ready`; it never rests in the database but remains a first-class state
//! for wire compatibility. Deletion is not a state: rows are removed, the
//! object after the row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::CoreError;
use super::newtypes::{DigestHex, FileId, ObjectKey, UserId};

// ============================================================================
// FileState enum
// ============================================================================

/// Lifecycle state of a file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    /// Row reserved, no bytes in the object store yet
    #[default]
    Pending,
    /// Body fully written to the object store, digest not yet computed
    Stored,
    /// Digest computed and recorded
    Hashed,
    /// Integrity verified, eligible for link issuance and download
    Ready,
    /// Terminal failure; excluded from quota accounting
    Failed,
}

impl FileState {
    /// Returns true if an object is expected to exist at the file's key
    pub fn object_expected(&self) -> bool {
        matches!(self, FileState::Stored | FileState::Hashed | FileState::Ready)
    }

    /// Returns true if the file counts toward its owner's quota
    pub fn counts_toward_quota(&self) -> bool {
        !matches!(self, FileState::Failed)
    }

    /// Returns true if downloads are permitted
    pub fn is_downloadable(&self) -> bool {
        matches!(self, FileState::Ready)
    }

    /// Returns true if no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, FileState::Failed)
    }

    /// Returns the state name as stored in the database
    pub fn name(&self) -> &'static str {
        match self {
            FileState::Pending => "pending",
            FileState::Stored => "stored",
            FileState::Hashed => "hashed",
            FileState::Ready => "ready",
            FileState::Failed => "failed",
        }
    }

    /// Parse a state from its stored name
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "pending" => Ok(FileState::Pending),
            "stored" => Ok(FileState::Stored),
            "hashed" => Ok(FileState::Hashed),
            "ready" => Ok(FileState::Ready),
            "failed" => Ok(FileState::Failed),
            other => Err(CoreError::Internal(format!("unknown file state: {other}"))),
        }
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// FileRecord struct
// ============================================================================

/// The central entity of the lifecycle engine
///
/// A FileRecord is created by the orchestrator when an upload is reserved
/// and advanced through its states exclusively via guarded transitions.
/// All mutable fields live in the metadata store; in-process copies are
/// snapshots, never caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Unique identifier for the metadata row
    id: FileId,
    /// Opaque key of the blob in the object store
    object_key: ObjectKey,
    /// Original client-supplied file name (stored verbatim, sanitized on serve)
    original_name: String,
    /// Declared MIME type
    content_type: String,
    /// Declared size in bytes
    size_bytes: u64,
    /// Computed SHA-256, set once hashing succeeds
    digest_hex: Option<DigestHex>,
    /// Byte count observed while hashing
    digest_bytes: Option<u64>,
    /// Owning user; None once the owner account was deleted
    owner_id: Option<UserId>,
    /// Current lifecycle state
    state: FileState,
    /// Row creation time
    created_at: DateTime<Utc>,
    /// Last state change
    updated_at: DateTime<Utc>,
    /// Optional expiry; strictly greater than created_at when set
    expires_at: Option<DateTime<Utc>>,
    /// Whether the reaper removes the file once expired
    auto_delete: bool,
    /// Number of completed downloads
    download_count: u64,
    /// Time of the most recent download
    last_downloaded_at: Option<DateTime<Utc>>,
    /// Argon2 hash gating downloads, when password protection is on
    password_hash: Option<String>,
    /// Random salt bound into download tokens while a password is set
    password_salt: Option<[u8; 16]>,
}

impl FileRecord {
    /// Reserve a new file row in the `Pending` state
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` if `expires_at` is not strictly
    /// after the creation time, or the declared name is empty.
    pub fn reserve(
        owner_id: UserId,
        original_name: impl Into<String>,
        content_type: impl Into<String>,
        size_bytes: u64,
        expires_at: Option<DateTime<Utc>>,
        auto_delete: bool,
    ) -> Result<Self, CoreError> {
        let original_name = original_name.into();
        if original_name.is_empty() {
            return Err(CoreError::Validation("file name must not be empty".into()));
        }
        let created_at = Utc::now();
        if let Some(expiry) = expires_at {
            if expiry <= created_at {
                return Err(CoreError::Validation(
                    "expires_at must be strictly after creation".into(),
                ));
            }
        }

        Ok(Self {
            id: FileId::new(),
            object_key: ObjectKey::generate(),
            original_name,
            content_type: content_type.into(),
            size_bytes,
            digest_hex: None,
            digest_bytes: None,
            owner_id: Some(owner_id),
            state: FileState::Pending,
            created_at,
            updated_at: created_at,
            expires_at,
            auto_delete,
            download_count: 0,
            last_downloaded_at: None,
            password_hash: None,
            password_salt: None,
        })
    }

    /// Rehydrate a record from persisted fields
    ///
    /// Only the metadata store calls this; it performs no validation
    /// beyond what the column types already guarantee.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: FileId,
        object_key: ObjectKey,
        original_name: String,
        content_type: String,
        size_bytes: u64,
        digest_hex: Option<DigestHex>,
        digest_bytes: Option<u64>,
        owner_id: Option<UserId>,
        state: FileState,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        auto_delete: bool,
        download_count: u64,
        last_downloaded_at: Option<DateTime<Utc>>,
        password_hash: Option<String>,
        password_salt: Option<[u8; 16]>,
    ) -> Self {
        Self {
            id,
            object_key,
            original_name,
            content_type,
            size_bytes,
            digest_hex,
            digest_bytes,
            owner_id,
            state,
            created_at,
            updated_at,
            expires_at,
            auto_delete,
            download_count,
            last_downloaded_at,
            password_hash,
            password_salt,
        }
    }

    // --- Getters ---

    /// Returns the file id
    pub fn id(&self) -> FileId {
        self.id
    }

    /// Returns the object key
    pub fn object_key(&self) -> &ObjectKey {
        &self.object_key
    }

    /// Returns the original file name
    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    /// Returns the declared content type
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Returns the declared size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Returns the computed digest, if hashing completed
    pub fn digest_hex(&self) -> Option<&DigestHex> {
        self.digest_hex.as_ref()
    }

    /// Returns the byte count observed while hashing
    pub fn digest_bytes(&self) -> Option<u64> {
        self.digest_bytes
    }

    /// Returns the owner, unless the account was deleted
    pub fn owner_id(&self) -> Option<UserId> {
        self.owner_id
    }

    /// Returns the current state
    pub fn state(&self) -> FileState {
        self.state
    }

    /// Returns the creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the last state-change time
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns the expiry, if set
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Returns whether the reaper removes this file once expired
    pub fn auto_delete(&self) -> bool {
        self.auto_delete
    }

    /// Returns the completed download count
    pub fn download_count(&self) -> u64 {
        self.download_count
    }

    /// Returns the time of the most recent download
    pub fn last_downloaded_at(&self) -> Option<DateTime<Utc>> {
        self.last_downloaded_at
    }

    /// Returns the stored password hash, when download gating is on
    pub fn password_hash(&self) -> Option<&str> {
        self.password_hash.as_deref()
    }

    /// Returns the salt bound into tokens while a password is set
    pub fn password_salt(&self) -> Option<&[u8; 16]> {
        self.password_salt.as_ref()
    }

    /// Returns true if `principal` may manage this file
    ///
    /// Owners manage their own files; admins manage everything, including
    /// orphaned rows whose owner account was deleted.
    pub fn manageable_by(&self, principal: &super::user::User) -> bool {
        principal.is_admin() || self.owner_id == Some(principal.id())
    }

    /// Returns true if the expiry has passed as of `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if expiry <= now)
    }

    // --- Setters used by the orchestrator before persistence ---

    /// Attach password gating: the Argon2 hash and the token-binding salt
    pub fn set_password(&mut self, hash: String, salt: [u8; 16]) {
        self.password_hash = Some(hash);
        self.password_salt = Some(salt);
    }

    /// Record a completed download
    pub fn record_download(&mut self, at: DateTime<Utc>) {
        self.download_count += 1;
        self.last_downloaded_at = Some(at);
    }
}

// ============================================================================
// State transitions
// ============================================================================

impl FileRecord {
    /// Checks whether a transition is permitted
    ///
    /// Transitions are linear:
    /// - Pending -> Stored (upload finalized), Failed (abort/timeout)
    /// - Stored  -> Hashed (digest computed), Failed (persistent hash error)
    /// - Hashed  -> Ready (integrity confirmed, same write in practice)
    /// - Failed is terminal
    pub fn can_transition_to(&self, target: FileState) -> bool {
        match (self.state, target) {
            (FileState::Pending, FileState::Stored) => true,
            (FileState::Pending, FileState::Failed) => true,
            (FileState::Stored, FileState::Hashed) => true,
            (FileState::Stored, FileState::Failed) => true,
            (FileState::Hashed, FileState::Ready) => true,
            (FileState::Hashed, FileState::Failed) => true,
            _ => false,
        }
    }

    /// Attempts a state transition, refreshing `updated_at`
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Conflict` if the transition is not allowed.
    pub fn transition_to(&mut self, target: FileState) -> Result<(), CoreError> {
        if !self.can_transition_to(target) {
            return Err(CoreError::Conflict(format!(
                "cannot transition {} from {} to {}",
                self.id, self.state, target
            )));
        }
        self.state = target;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record digest results and advance `Stored -> Hashed -> Ready`
    ///
    /// The two hops are one logical operation; persisting them is a single
    /// metadata write.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::IntegrityFailed` when the observed byte count
    /// disagrees with the declared size, and `CoreError::Conflict` when
    /// the file is not in `Stored`.
    pub fn complete_hashing(
        &mut self,
        digest: DigestHex,
        digest_bytes: u64,
    ) -> Result<(), CoreError> {
        if self.state != FileState::Stored {
            return Err(CoreError::Conflict(format!(
                "cannot record digest for {} in state {}",
                self.id, self.state
            )));
        }
        if digest_bytes != self.size_bytes {
            return Err(CoreError::IntegrityFailed(format!(
                "digest saw {} bytes but {} were declared",
                digest_bytes, self.size_bytes
            )));
        }
        self.digest_hex = Some(digest);
        self.digest_bytes = Some(digest_bytes);
        self.transition_to(FileState::Hashed)?;
        self.transition_to(FileState::Ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::user::User;
    use chrono::Duration;

    fn reserved_file() -> FileRecord {
        FileRecord::reserve(
            UserId::new(),
            "report.pdf",
            "application/pdf",
            1024,
            None,
            false,
        )
        .unwrap()
    }

    mod file_state_tests {
        use super::*;

        #[test]
        fn test_object_expected() {
            assert!(!FileState::Pending.object_expected());
            assert!(FileState::Stored.object_expected());
            assert!(FileState::Hashed.object_expected());
            assert!(FileState::Ready.object_expected());
            assert!(!FileState::Failed.object_expected());
        }

        #[test]
        fn test_quota_accounting() {
            assert!(FileState::Pending.counts_toward_quota());
            assert!(FileState::Ready.counts_toward_quota());
            assert!(!FileState::Failed.counts_toward_quota());
        }

        #[test]
        fn test_name_roundtrip() {
            for state in [
                FileState::Pending,
                FileState::Stored,
                FileState::Hashed,
                FileState::Ready,
                FileState::Failed,
            ] {
                assert_eq!(FileState::parse(state.name()).unwrap(), state);
            }
            assert!(FileState::parse("bogus").is_err());
        }

        #[test]
        fn test_only_ready_is_downloadable() {
            assert!(FileState::Ready.is_downloadable());
            assert!(!FileState::Stored.is_downloadable());
            assert!(!FileState::Hashed.is_downloadable());
        }
    }

    mod reservation_tests {
        use super::*;

        #[test]
        fn test_reserve_starts_pending() {
            let file = reserved_file();
            assert_eq!(file.state(), FileState::Pending);
            assert!(file.digest_hex().is_none());
            assert_eq!(file.download_count(), 0);
            assert_eq!(file.created_at(), file.updated_at());
        }

        #[test]
        fn test_reserve_rejects_empty_name() {
            let result =
                FileRecord::reserve(UserId::new(), "", "text/plain", 10, None, false);
            assert!(result.is_err());
        }

        #[test]
        fn test_reserve_rejects_past_expiry() {
            let result = FileRecord::reserve(
                UserId::new(),
                "a.txt",
                "text/plain",
                10,
                Some(Utc::now() - Duration::seconds(1)),
                true,
            );
            assert!(result.is_err());
        }

        #[test]
        fn test_reserve_accepts_future_expiry() {
            let file = FileRecord::reserve(
                UserId::new(),
                "a.txt",
                "text/plain",
                10,
                Some(Utc::now() + Duration::hours(1)),
                true,
            )
            .unwrap();
            assert!(file.expires_at().is_some());
            assert!(!file.is_expired(Utc::now()));
            assert!(file.is_expired(Utc::now() + Duration::hours(2)));
        }

        #[test]
        fn test_object_keys_are_unique_per_reservation() {
            let a = reserved_file();
            let b = reserved_file();
            assert_ne!(a.object_key(), b.object_key());
        }
    }

    mod transition_tests {
        use super::*;

        #[test]
        fn test_happy_path() {
            let mut file = reserved_file();
            file.transition_to(FileState::Stored).unwrap();
            assert_eq!(file.state(), FileState::Stored);

            let digest = DigestHex::new("a".repeat(64)).unwrap();
            file.complete_hashing(digest, 1024).unwrap();
            assert_eq!(file.state(), FileState::Ready);
            assert_eq!(file.digest_bytes(), Some(1024));
        }

        #[test]
        fn test_pending_cannot_skip_to_ready() {
            let file = reserved_file();
            assert!(!file.can_transition_to(FileState::Ready));
            assert!(!file.can_transition_to(FileState::Hashed));
        }

        #[test]
        fn test_failed_is_terminal() {
            let mut file = reserved_file();
            file.transition_to(FileState::Failed).unwrap();
            assert!(!file.can_transition_to(FileState::Stored));
            assert!(!file.can_transition_to(FileState::Pending));
            assert!(file.transition_to(FileState::Ready).is_err());
        }

        #[test]
        fn test_digest_byte_mismatch_is_integrity_failure() {
            let mut file = reserved_file();
            file.transition_to(FileState::Stored).unwrap();

            let digest = DigestHex::new("b".repeat(64)).unwrap();
            let err = file.complete_hashing(digest, 999).unwrap_err();
            assert!(matches!(err, CoreError::IntegrityFailed(_)));
            // State untouched on failure; the caller decides what to do.
            assert_eq!(file.state(), FileState::Stored);
        }

        #[test]
        fn test_complete_hashing_requires_stored() {
            let mut file = reserved_file();
            let digest = DigestHex::new("c".repeat(64)).unwrap();
            assert!(file.complete_hashing(digest, 1024).is_err());
        }

        #[test]
        fn test_transition_refreshes_updated_at() {
            let mut file = reserved_file();
            let before = file.updated_at();
            std::thread::sleep(std::time::Duration::from_millis(5));
            file.transition_to(FileState::Stored).unwrap();
            assert!(file.updated_at() > before);
        }
    }

    mod ownership_tests {
        use super::*;

        #[test]
        fn test_owner_can_manage() {
            let owner = User::new(UserId::new(), Some(1000), false);
            let file = FileRecord::reserve(
                owner.id(),
                "mine.bin",
                "application/octet-stream",
                1,
                None,
                false,
            )
            .unwrap();
            assert!(file.manageable_by(&owner));

            let stranger = User::new(UserId::new(), None, false);
            assert!(!file.manageable_by(&stranger));
        }

        #[test]
        fn test_admin_can_manage_anything() {
            let admin = User::new(UserId::new(), None, true);
            let file = reserved_file();
            assert!(file.manageable_by(&admin));
        }
    }

    mod download_tests {
        use super::*;

        #[test]
        fn test_record_download() {
            let mut file = reserved_file();
            let now = Utc::now();
            file.record_download(now);
            file.record_download(now);
            assert_eq!(file.download_count(), 2);
            assert_eq!(file.last_downloaded_at(), Some(now));
        }

        #[test]
        fn test_password_binding() {
            let mut file = reserved_file();
            assert!(file.password_hash().is_none());
            file.set_password("$argon2id$v=19$...".to_string(), [7u8; 16]);
            assert!(file.password_hash().is_some());
            assert_eq!(file.password_salt(), Some(&[7u8; 16]));
        }
    }

    #[test]
    fn test_serialization_roundtrip() {
        let file = reserved_file();
        let json = serde_json::to_string(&file).unwrap();
        let back: FileRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(file, back);
    }
}
