//! SQLite implementation of IMetadataStore
//!
//! This module provides the concrete SQLite-based implementation of the
//! metadata store port defined in filedrop-core. It handles all domain
//! type serialization/deserialization and SQL query construction.
//!
//! ## Type Mapping
//!
//! | Domain Type        | SQL Type | Strategy                                  |
//! |--------------------|----------|-------------------------------------------|
//! | FileId, UserId,    | TEXT     | UUID string via `.to_string()` / `FromStr`|
//! | SessionId, CorrelationId |    |                                           |
//! | ObjectKey          | TEXT     | String via `.as_str()` / `ObjectKey::new` |
//! | DigestHex          | TEXT     | String via `.as_str()` / `DigestHex::new` |
//! | DateTime<Utc>      | TEXT     | RFC 3339 with fixed microseconds, `Z`     |
//! | FileState          | TEXT     | `FileState::name()` / `FileState::parse`  |
//! | SessionStatus      | TEXT     | `name()` / `parse`                        |
//! | password_salt      | TEXT     | 32 hex chars                              |
//! | audit metadata     | TEXT     | serde_json serialization                  |
//!
//! ## Concurrency
//!
//! The reserve path opens an IMMEDIATE transaction so its quota SUM and
//! insert serialize against every other writer: of two concurrent
//! reservations that would jointly exceed a quota, the second observes
//! the first's committed row and loses.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use filedrop_core::domain::newtypes::{FileId, ObjectKey, SessionId, UserId};
use filedrop_core::domain::{
    AuditEntry, CoreError, DigestHex, FileRecord, FileState, ResumableSession, SessionStatus, User,
};
use filedrop_core::ports::{IMetadataStore, ReserveOutcome};

use crate::StoreError;

/// SQLite-based implementation of the metadata store port
///
/// All operations are performed through a connection pool; the pool (not
/// this type) owns journal mode and migration concerns.
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    /// Creates a new store instance over the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

/// Formats a timestamp for storage: fixed microsecond precision keeps
/// lexicographic TEXT comparison consistent with time order
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses a stored timestamp
fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::SerializationError(format!("Invalid timestamp {s:?}: {e}")))
}

/// Maps adapter-level failures onto the stable error taxonomy
fn db_err(e: sqlx::Error) -> CoreError {
    CoreError::MetadataUnavailable(e.to_string())
}

fn ser_err(e: StoreError) -> CoreError {
    CoreError::Internal(e.to_string())
}

/// Reconstructs a FileRecord from a row of the `files` table
fn map_file_row(row: &SqliteRow) -> Result<FileRecord, StoreError> {
    let id: String = row
        .try_get("id")
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
    let object_key: String = row
        .try_get("object_key")
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
    let state: String = row
        .try_get("state")
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

    let digest_hex: Option<String> = row
        .try_get("digest_hex")
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
    let digest_bytes: Option<i64> = row
        .try_get("digest_bytes")
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
    let owner_id: Option<String> = row
        .try_get("owner_id")
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
    let expires_at: Option<String> = row
        .try_get("expires_at")
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
    let last_downloaded_at: Option<String> = row
        .try_get("last_downloaded_at")
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
    let password_salt: Option<String> = row
        .try_get("password_salt")
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

    let salt = match password_salt {
        Some(s) => {
            let bytes = hex::decode(&s)
                .map_err(|e| StoreError::SerializationError(format!("bad salt hex: {e}")))?;
            let arr: [u8; 16] = bytes.try_into().map_err(|_| {
                StoreError::SerializationError("password salt is not 16 bytes".into())
            })?;
            Some(arr)
        }
        None => None,
    };

    Ok(FileRecord::from_parts(
        id.parse::<FileId>()
            .map_err(|e| StoreError::SerializationError(e.to_string()))?,
        ObjectKey::new(object_key).map_err(|e| StoreError::SerializationError(e.to_string()))?,
        row.try_get("original_name")
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?,
        row.try_get("content_type")
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?,
        row.try_get::<i64, _>("size_bytes")
            .map_err(|e| StoreError::QueryFailed(e.to_string()))? as u64,
        digest_hex
            .map(DigestHex::new)
            .transpose()
            .map_err(|e| StoreError::SerializationError(e.to_string()))?,
        digest_bytes.map(|b| b as u64),
        owner_id
            .map(|s| s.parse::<UserId>())
            .transpose()
            .map_err(|e| StoreError::SerializationError(e.to_string()))?,
        FileState::parse(&state).map_err(|e| StoreError::SerializationError(e.to_string()))?,
        parse_ts(
            &row.try_get::<String, _>("created_at")
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?,
        )?,
        parse_ts(
            &row.try_get::<String, _>("updated_at")
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?,
        )?,
        expires_at.as_deref().map(parse_ts).transpose()?,
        row.try_get::<i64, _>("auto_delete")
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?
            != 0,
        row.try_get::<i64, _>("download_count")
            .map_err(|e| StoreError::QueryFailed(e.to_string()))? as u64,
        last_downloaded_at.as_deref().map(parse_ts).transpose()?,
        row.try_get("password_hash")
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?,
        salt,
    ))
}

/// Reconstructs a ResumableSession from a row of the `sessions` table
fn map_session_row(row: &SqliteRow) -> Result<ResumableSession, StoreError> {
    let id: String = row
        .try_get("id")
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
    let file_id: String = row
        .try_get("file_id")
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
    let status: String = row
        .try_get("status")
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

    Ok(ResumableSession::from_parts(
        id.parse::<SessionId>()
            .map_err(|e| StoreError::SerializationError(e.to_string()))?,
        file_id
            .parse::<FileId>()
            .map_err(|e| StoreError::SerializationError(e.to_string()))?,
        row.try_get("backend_upload_id")
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?,
        row.try_get::<i64, _>("total_size")
            .map_err(|e| StoreError::QueryFailed(e.to_string()))? as u64,
        row.try_get::<i64, _>("current_size")
            .map_err(|e| StoreError::QueryFailed(e.to_string()))? as u64,
        SessionStatus::parse(&status)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?,
        parse_ts(
            &row.try_get::<String, _>("created_at")
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?,
        )?,
        parse_ts(
            &row.try_get::<String, _>("last_modified")
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?,
        )?,
    ))
}

// ============================================================================
// IMetadataStore implementation
// ============================================================================

/// Body of `reserve_file`; kept outside the `async_trait`-generated
/// future because reborrowing the connection across `.await` points
/// inside that boxed future defeats sqlx's `Executor` HRTB inference.
async fn reserve_file_impl(
    pool: &SqlitePool,
    file: &FileRecord,
    owner: &User,
    dedup_window: Duration,
) -> Result<ReserveOutcome, CoreError> {
    let mut conn = pool.acquire().await.map_err(db_err)?;

    // IMMEDIATE takes the writer lock up front; the SUM below cannot
    // be invalidated by a racing insert before our own insert lands.
    sqlx::raw_sql("BEGIN IMMEDIATE")
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;

    let outcome = reserve_in_tx(&mut *conn, file, owner, dedup_window).await;

    match &outcome {
        Ok(ReserveOutcome::Reserved) => {
            sqlx::raw_sql("COMMIT")
                .execute(&mut *conn)
                .await
                .map_err(db_err)?;
        }
        _ => {
            // Nothing written on the refusal paths; release the lock.
            let _ = sqlx::raw_sql("ROLLBACK").execute(&mut *conn).await;
        }
    }
    outcome
}

#[async_trait::async_trait]
impl IMetadataStore for SqliteMetadataStore {
    async fn reserve_file(
        &self,
        file: &FileRecord,
        owner: &User,
        dedup_window: Duration,
    ) -> Result<ReserveOutcome, CoreError> {
        reserve_file_impl(&self.pool, file, owner, dedup_window).await
    }

    async fn get_file(&self, id: FileId) -> Result<Option<FileRecord>, CoreError> {
        let row = sqlx::query("SELECT * FROM files WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(map_file_row).transpose().map_err(ser_err)
    }

    async fn transition_state(
        &self,
        id: FileId,
        from: FileState,
        to: FileState,
    ) -> Result<bool, CoreError> {
        let result =
            sqlx::query("UPDATE files SET state = ?, updated_at = ? WHERE id = ? AND state = ?")
                .bind(to.name())
                .bind(fmt_ts(Utc::now()))
                .bind(id.to_string())
                .bind(from.name())
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_digest(
        &self,
        id: FileId,
        digest: &DigestHex,
        digest_bytes: u64,
    ) -> Result<bool, CoreError> {
        // `hashed` and `ready` land in one write; the byte-count guard in
        // the use case has already run.
        let result = sqlx::query(
            "UPDATE files SET digest_hex = ?, digest_bytes = ?, state = 'ready', updated_at = ? \
             WHERE id = ? AND state = 'stored'",
        )
        .bind(digest.as_str())
        .bind(digest_bytes as i64)
        .bind(fmt_ts(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_file(&self, id: FileId) -> Result<Option<ObjectKey>, CoreError> {
        let row = sqlx::query("DELETE FROM files WHERE id = ? RETURNING object_key")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => {
                let key: String = row.try_get("object_key").map_err(db_err)?;
                Ok(Some(ObjectKey::new(key)?))
            }
            None => Ok(None),
        }
    }

    async fn record_download(&self, id: FileId, at: DateTime<Utc>) -> Result<(), CoreError> {
        sqlx::query(
            "UPDATE files SET download_count = download_count + 1, last_downloaded_at = ? \
             WHERE id = ?",
        )
        .bind(fmt_ts(at))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn file_exists_for_object(&self, key: &ObjectKey) -> Result<bool, CoreError> {
        let row: Option<i64> = sqlx::query_scalar("SELECT 1 FROM files WHERE object_key = ?")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.is_some())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, CoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => {
                let quota: Option<i64> = row.try_get("storage_quota_bytes").map_err(db_err)?;
                let is_admin: i64 = row.try_get("is_admin").map_err(db_err)?;
                Ok(Some(User::new(id, quota.map(|q| q as u64), is_admin != 0)))
            }
            None => Ok(None),
        }
    }

    async fn upsert_user(&self, user: &User) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO users (id, storage_quota_bytes, is_admin) VALUES (?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
             storage_quota_bytes = excluded.storage_quota_bytes, \
             is_admin = excluded.is_admin",
        )
        .bind(user.id().to_string())
        .bind(user.storage_quota_bytes().map(|q| q as i64))
        .bind(user.is_admin() as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn usage_for(&self, user: UserId) -> Result<u64, CoreError> {
        let used: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM files \
             WHERE owner_id = ? AND state != 'failed'",
        )
        .bind(user.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(used as u64)
    }

    async fn insert_session(&self, session: &ResumableSession) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO sessions \
             (id, file_id, backend_upload_id, total_size, current_size, status, created_at, last_modified) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session.id().to_string())
        .bind(session.file_id().to_string())
        .bind(session.backend_upload_id())
        .bind(session.total_size() as i64)
        .bind(session.current_size() as i64)
        .bind(session.status().name())
        .bind(fmt_ts(session.created_at()))
        .bind(fmt_ts(session.last_modified()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<ResumableSession>, CoreError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref()
            .map(map_session_row)
            .transpose()
            .map_err(ser_err)
    }

    async fn update_session(&self, session: &ResumableSession) -> Result<(), CoreError> {
        sqlx::query(
            "UPDATE sessions SET current_size = ?, status = ?, last_modified = ? WHERE id = ?",
        )
        .bind(session.current_size() as i64)
        .bind(session.status().name())
        .bind(fmt_ts(session.last_modified()))
        .bind(session.id().to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn prune_terminal_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64, CoreError> {
        let result =
            sqlx::query("DELETE FROM sessions WHERE status != 'active' AND last_modified < ?")
                .bind(fmt_ts(cutoff))
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn expired_files(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<FileRecord>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM files \
             WHERE expires_at IS NOT NULL AND expires_at < ? AND auto_delete = 1 \
             ORDER BY expires_at LIMIT ?",
        )
        .bind(fmt_ts(now))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(map_file_row).collect::<Result<_, _>>().map_err(ser_err)
    }

    async fn stale_files_in_state(
        &self,
        state: FileState,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<FileRecord>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM files WHERE state = ? AND updated_at < ? ORDER BY updated_at LIMIT ?",
        )
        .bind(state.name())
        .bind(fmt_ts(cutoff))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(map_file_row).collect::<Result<_, _>>().map_err(ser_err)
    }

    async fn acquire_reaper_lease(&self, holder: &str, ttl: Duration) -> Result<bool, CoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO leases (name, holder, expires_at) VALUES ('reaper', ?, ?) \
             ON CONFLICT(name) DO UPDATE SET holder = excluded.holder, expires_at = excluded.expires_at \
             WHERE leases.expires_at < ? OR leases.holder = excluded.holder",
        )
        .bind(holder)
        .bind(fmt_ts(now + ttl))
        .bind(fmt_ts(now))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_reaper_lease(&self, holder: &str) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM leases WHERE name = 'reaper' AND holder = ?")
            .bind(holder)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), CoreError> {
        let metadata = serde_json::to_string(entry.metadata())
            .map_err(|e| CoreError::Internal(format!("audit metadata serialization: {e}")))?;
        sqlx::query(
            "INSERT INTO audit_log \
             (timestamp, event, principal_id, ip, resource_id, success, metadata, correlation_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(fmt_ts(entry.timestamp()))
        .bind(entry.event().to_string())
        .bind(entry.principal_id().map(|p| p.to_string()))
        .bind(entry.ip())
        .bind(entry.resource_id())
        .bind(entry.success() as i64)
        .bind(metadata)
        .bind(entry.correlation_id().to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), CoreError> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

/// Body of the reserve transaction; the caller owns BEGIN/COMMIT/ROLLBACK
async fn reserve_in_tx(
    conn: &mut sqlx::SqliteConnection,
    file: &FileRecord,
    owner: &User,
    dedup_window: Duration,
) -> Result<ReserveOutcome, CoreError> {
    // Dedup window: an identical (owner, name, size) reservation inside
    // the window marks a client retry, not a new upload.
    let window_start = fmt_ts(Utc::now() - dedup_window);
    let duplicate: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM files \
         WHERE owner_id = ? AND original_name = ? AND size_bytes = ? AND created_at > ? \
         LIMIT 1",
    )
    .bind(owner.id().to_string())
    .bind(file.original_name())
    .bind(file.size_bytes() as i64)
    .bind(&window_start)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)?;
    if duplicate.is_some() {
        return Ok(ReserveOutcome::DuplicateInWindow);
    }

    // Quota: SUM over non-failed files, then the conditional insert,
    // both under the writer lock.
    if let Some(quota) = owner.storage_quota_bytes() {
        let used: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM files \
             WHERE owner_id = ? AND state != 'failed'",
        )
        .bind(owner.id().to_string())
        .fetch_one(&mut *conn)
        .await
        .map_err(db_err)?;
        if !owner.admits(used as u64, file.size_bytes()) {
            return Ok(ReserveOutcome::QuotaExceeded {
                used: used as u64,
                quota,
            });
        }
    }

    sqlx::query(
        "INSERT INTO files \
         (id, object_key, original_name, content_type, size_bytes, digest_hex, digest_bytes, \
          owner_id, state, created_at, updated_at, expires_at, auto_delete, download_count, \
          last_downloaded_at, password_hash, password_salt) \
         VALUES (?, ?, ?, ?, ?, NULL, NULL, ?, ?, ?, ?, ?, ?, 0, NULL, ?, ?)",
    )
    .bind(file.id().to_string())
    .bind(file.object_key().as_str())
    .bind(file.original_name())
    .bind(file.content_type())
    .bind(file.size_bytes() as i64)
    .bind(file.owner_id().map(|o| o.to_string()))
    .bind(file.state().name())
    .bind(fmt_ts(file.created_at()))
    .bind(fmt_ts(file.updated_at()))
    .bind(file.expires_at().map(fmt_ts))
    .bind(file.auto_delete() as i64)
    .bind(file.password_hash())
    .bind(file.password_salt().map(hex::encode))
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;

    Ok(ReserveOutcome::Reserved)
}
