//! Audit entry domain entities
//!
//! Append-only records written by every state-changing core operation.
//! Entries carry the correlation id surfaced to clients so a failure can
//! be traced end to end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::newtypes::{CorrelationId, UserId};

/// Events recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    /// A file row was reserved
    FileReserve,
    /// An upload body was finalized
    FileUpload,
    /// The hash worker advanced or failed a file
    FileHash,
    /// A download link was issued
    LinkIssue,
    /// A download completed (or was refused)
    FileDownload,
    /// A file was deleted by owner, admin, or reaper
    FileDelete,
    /// A resumable session was opened
    SessionOpen,
    /// A resumable session chunk was accepted
    SessionChunk,
    /// A resumable session reached a terminal state
    SessionClose,
    /// A reaper pass ran
    ReaperSweep,
}

impl std::fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditEvent::FileReserve => "file_reserve",
            AuditEvent::FileUpload => "file_upload",
            AuditEvent::FileHash => "file_hash",
            AuditEvent::LinkIssue => "link_issue",
            AuditEvent::FileDownload => "file_download",
            AuditEvent::FileDelete => "file_delete",
            AuditEvent::SessionOpen => "session_open",
            AuditEvent::SessionChunk => "session_chunk",
            AuditEvent::SessionClose => "session_close",
            AuditEvent::ReaperSweep => "reaper_sweep",
        };
        write!(f, "{}", s)
    }
}

/// One append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the event occurred
    timestamp: DateTime<Utc>,
    /// What happened
    event: AuditEvent,
    /// Acting principal, when authenticated
    principal_id: Option<UserId>,
    /// Client address, when known
    ip: Option<String>,
    /// Affected resource (file id, session id, ...)
    resource_id: Option<String>,
    /// Whether the operation succeeded
    success: bool,
    /// Free-form event details
    metadata: Value,
    /// Correlation id surfaced to the client
    correlation_id: CorrelationId,
}

impl AuditEntry {
    /// Creates a successful entry for `event`
    pub fn new(event: AuditEvent, correlation_id: CorrelationId) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
            principal_id: None,
            ip: None,
            resource_id: None,
            success: true,
            metadata: Value::Null,
            correlation_id,
        }
    }

    /// Sets the acting principal
    pub fn with_principal(mut self, principal_id: UserId) -> Self {
        self.principal_id = Some(principal_id);
        self
    }

    /// Sets the client address
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// Sets the affected resource
    pub fn with_resource(mut self, resource_id: impl ToString) -> Self {
        self.resource_id = Some(resource_id.to_string());
        self
    }

    /// Marks the entry as a failure
    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }

    /// Attaches free-form details
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Returns the event timestamp
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the event type
    pub fn event(&self) -> AuditEvent {
        self.event
    }

    /// Returns the acting principal, if any
    pub fn principal_id(&self) -> Option<UserId> {
        self.principal_id
    }

    /// Returns the client address, if any
    pub fn ip(&self) -> Option<&str> {
        self.ip.as_deref()
    }

    /// Returns the affected resource, if any
    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    /// Returns whether the operation succeeded
    pub fn success(&self) -> bool {
        self.success
    }

    /// Returns the event details
    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    /// Returns the correlation id
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }
}
