//! Metadata store port (driven/secondary port)
//!
//! The durable record of files, users, resumable sessions, audit entries,
//! and the advisory reaper lease. The metadata store is the single source
//! of truth for every mutable field on a File; state transitions are
//! guarded single-row transactions.
//!
//! ## Design Notes
//!
//! - Methods return `CoreError` rather than `anyhow::Result` because the
//!   reserve path produces business outcomes (quota, dedup) that callers
//!   must branch on, and adapter failures must keep their stable
//!   `metadata_unavailable` code all the way to the client.
//! - `reserve_file` owns the quota SUM + insert; the adapter must make
//!   the pair serializable so concurrent reservations cannot jointly
//!   overshoot a quota.
//! - Guarded transitions return `false` (rather than erroring) when the
//!   precondition state no longer holds, letting callers map the miss to
//!   their own `Conflict` handling.

use chrono::{DateTime, Duration, Utc};

use crate::domain::newtypes::{FileId, ObjectKey, SessionId, UserId};
use crate::domain::{
    AuditEntry, CoreError, DigestHex, FileRecord, FileState, ResumableSession, User,
};

/// Outcome of a reservation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Row inserted in `pending`
    Reserved,
    /// The reservation would exceed the owner's quota
    QuotaExceeded {
        /// Effective usage at decision time
        used: u64,
        /// Configured budget
        quota: u64,
    },
    /// An identical reservation exists inside the dedup window
    DuplicateInWindow,
}

/// Port trait for persistent lifecycle state
#[async_trait::async_trait]
pub trait IMetadataStore: Send + Sync {
    // --- File operations ---

    /// Atomically checks quota and the dedup window, then inserts the
    /// `pending` row
    ///
    /// The SUM-over-non-failed-files and the insert happen in one
    /// serializable transaction. `dedup_window` bounds the duplicate
    /// check on (owner, name, size).
    async fn reserve_file(
        &self,
        file: &FileRecord,
        owner: &User,
        dedup_window: Duration,
    ) -> Result<ReserveOutcome, CoreError>;

    /// Loads a file row by id
    async fn get_file(&self, id: FileId) -> Result<Option<FileRecord>, CoreError>;

    /// Guarded state transition: applies `from -> to` only if the row is
    /// currently in `from`, refreshing `updated_at`
    ///
    /// Returns `true` when the transition was applied.
    async fn transition_state(
        &self,
        id: FileId,
        from: FileState,
        to: FileState,
    ) -> Result<bool, CoreError>;

    /// Records digest results and advances `stored -> ready` in a single
    /// guarded write
    ///
    /// Returns `true` when the row was in `stored` and is now `ready`.
    async fn record_digest(
        &self,
        id: FileId,
        digest: &DigestHex,
        digest_bytes: u64,
    ) -> Result<bool, CoreError>;

    /// Removes the row, returning its object key when it existed
    ///
    /// Row deletion precedes object deletion so the orphan scan can
    /// restore consistency from metadata alone.
    async fn delete_file(&self, id: FileId) -> Result<Option<ObjectKey>, CoreError>;

    /// Increments `download_count` and stamps `last_downloaded_at`
    async fn record_download(&self, id: FileId, at: DateTime<Utc>) -> Result<(), CoreError>;

    /// Returns true when a non-failed row references `key`
    async fn file_exists_for_object(&self, key: &ObjectKey) -> Result<bool, CoreError>;

    // --- User operations ---

    /// Loads the minimal user view
    async fn get_user(&self, id: UserId) -> Result<Option<User>, CoreError>;

    /// Inserts or updates a user view (admin bootstrap, quota changes)
    async fn upsert_user(&self, user: &User) -> Result<(), CoreError>;

    /// Effective usage: SUM of `size_bytes` over non-failed files
    async fn usage_for(&self, user: UserId) -> Result<u64, CoreError>;

    // --- Resumable session operations ---

    /// Inserts a new session row
    async fn insert_session(&self, session: &ResumableSession) -> Result<(), CoreError>;

    /// Loads a session by id
    async fn get_session(&self, id: SessionId) -> Result<Option<ResumableSession>, CoreError>;

    /// Persists session progress and status
    async fn update_session(&self, session: &ResumableSession) -> Result<(), CoreError>;

    /// Deletes terminal sessions older than `cutoff`, returning the count
    async fn prune_terminal_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64, CoreError>;

    // --- Reaper queries ---

    /// Files with `expires_at < now` and `auto_delete = true`
    async fn expired_files(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<FileRecord>, CoreError>;

    /// Files resting in `state` whose last update is older than `cutoff`
    async fn stale_files_in_state(
        &self,
        state: FileState,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<FileRecord>, CoreError>;

    /// Takes the advisory reaper lease for `holder`, valid for `ttl`
    ///
    /// Returns `false` when another live holder owns the lease. Expired
    /// leases are taken over.
    async fn acquire_reaper_lease(&self, holder: &str, ttl: Duration) -> Result<bool, CoreError>;

    /// Releases the lease if `holder` still owns it
    async fn release_reaper_lease(&self, holder: &str) -> Result<(), CoreError>;

    // --- Audit ---

    /// Appends an audit entry
    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), CoreError>;

    // --- Health ---

    /// Cheap connectivity probe used by deep readiness checks
    async fn ping(&self) -> Result<(), CoreError>;
}
