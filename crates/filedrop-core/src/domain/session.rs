//! Resumable upload session entity
//!
//! Tracks a chunked upload against a backend multipart upload. Sessions
//! are best-effort: losing one aborts the multipart upload and fails the
//! file, it never corrupts the lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::CoreError;
use super::newtypes::{FileId, SessionId};

/// Status of a resumable session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Accepting chunks
    Active,
    /// All bytes received and the multipart upload completed
    Completed,
    /// Aborted or timed out
    Failed,
}

impl SessionStatus {
    /// Returns true once no further chunks are accepted
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }

    /// Returns the status name as stored in the database
    pub fn name(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    /// Parse a status from its stored name
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(CoreError::Internal(format!(
                "unknown session status: {other}"
            ))),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A resumable upload session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumableSession {
    id: SessionId,
    file_id: FileId,
    /// Multipart upload id assigned by the object store backend
    backend_upload_id: String,
    total_size: u64,
    current_size: u64,
    status: SessionStatus,
    created_at: DateTime<Utc>,
    last_modified: DateTime<Utc>,
}

impl ResumableSession {
    /// Opens a new session for `file_id` over a backend multipart upload
    pub fn open(file_id: FileId, backend_upload_id: impl Into<String>, total_size: u64) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            file_id,
            backend_upload_id: backend_upload_id.into(),
            total_size,
            current_size: 0,
            status: SessionStatus::Active,
            created_at: now,
            last_modified: now,
        }
    }

    /// Rehydrate a session from persisted fields
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: SessionId,
        file_id: FileId,
        backend_upload_id: String,
        total_size: u64,
        current_size: u64,
        status: SessionStatus,
        created_at: DateTime<Utc>,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            file_id,
            backend_upload_id,
            total_size,
            current_size,
            status,
            created_at,
            last_modified,
        }
    }

    /// Returns the session id
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the file this session uploads into
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// Returns the backend multipart upload id
    pub fn backend_upload_id(&self) -> &str {
        &self.backend_upload_id
    }

    /// Returns the declared total size
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Returns bytes received so far
    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    /// Returns the session status
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Returns the creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the time of the last chunk or status change
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    /// Next part number for the backend, 1-based
    pub fn next_part_number(&self, chunk_bytes: u64) -> i32 {
        // Parts are fixed-size except the last; derive from bytes received.
        debug_assert!(chunk_bytes > 0);
        (self.current_size / chunk_bytes.max(1)) as i32 + 1
    }

    /// Extends the session by one received chunk
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Conflict` when the session is terminal and
    /// `CoreError::SizeMismatch` when the chunk would overrun the declared
    /// total.
    pub fn advance(&mut self, chunk_bytes: u64) -> Result<(), CoreError> {
        if self.status.is_terminal() {
            return Err(CoreError::Conflict(format!(
                "session {} is {}",
                self.id, self.status
            )));
        }
        let new_size = self.current_size.saturating_add(chunk_bytes);
        if new_size > self.total_size {
            return Err(CoreError::SizeMismatch {
                declared: self.total_size,
                actual: new_size,
            });
        }
        self.current_size = new_size;
        self.last_modified = Utc::now();
        Ok(())
    }

    /// Returns true once every declared byte has been received
    pub fn is_complete(&self) -> bool {
        self.current_size == self.total_size
    }

    /// Marks the session completed
    ///
    /// # Errors
    ///
    /// Returns `CoreError::SizeMismatch` when bytes are still missing.
    pub fn complete(&mut self) -> Result<(), CoreError> {
        if !self.is_complete() {
            return Err(CoreError::SizeMismatch {
                declared: self.total_size,
                actual: self.current_size,
            });
        }
        self.status = SessionStatus::Completed;
        self.last_modified = Utc::now();
        Ok(())
    }

    /// Marks the session failed; idempotent
    pub fn fail(&mut self) {
        self.status = SessionStatus::Failed;
        self.last_modified = Utc::now();
    }
}
