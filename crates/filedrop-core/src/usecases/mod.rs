//! Use cases orchestrating the file lifecycle
//!
//! Each use case owns one operation of the lifecycle engine and is the
//! only code permitted to drive state transitions for it. Adapters are
//! injected as `Arc<dyn Port>`; there is no ambient state.
//!
//! - [`ReserveUploadUseCase`] - quota-checked reservation (`-> pending`)
//! - [`UploadFileUseCase`] - streaming ingestion (`pending -> stored`)
//! - [`ResumableUploadUseCase`] - chunked ingestion over multipart uploads
//! - [`HashFileUseCase`] - digesting (`stored -> ready` / `failed`)
//! - [`IssueLinkUseCase`] - signed download-link issuance
//! - [`DownloadFileUseCase`] - token-gated streaming downloads
//! - [`DeleteFileUseCase`] - owner/admin deletion
//! - [`QuotaUseCase`] - usage reads
//! - [`CleanupUseCase`] - the reaper pass

pub mod cleanup;
pub mod delete_file;
pub mod download_file;
pub mod hash_file;
pub mod issue_link;
pub mod quota;
pub mod reserve_upload;
pub mod resumable;
pub mod upload_file;

pub use cleanup::{CleanupPolicy, CleanupUseCase, SweepSummary};
pub use delete_file::DeleteFileUseCase;
pub use download_file::{DownloadFileUseCase, DownloadPayload, DownloadRequest};
pub use hash_file::{HashFileUseCase, HashOutcome};
pub use issue_link::{IssueLinkUseCase, IssueOptions, IssuedLink};
pub use quota::QuotaUseCase;
pub use reserve_upload::{ReserveRequest, ReserveUploadUseCase};
pub use resumable::ResumableUploadUseCase;
pub use upload_file::UploadFileUseCase;

use std::sync::Arc;

use crate::domain::newtypes::CorrelationId;
use crate::domain::AuditEntry;
use crate::ports::IMetadataStore;

/// Per-request context threaded into every operation
#[derive(Debug, Clone)]
pub struct RequestMeta {
    /// Correlation id surfaced to the client and stamped on audit entries
    pub correlation_id: CorrelationId,
    /// Client address, when known
    pub ip: Option<String>,
}

impl RequestMeta {
    /// Context for internally-originated work (workers, reaper)
    pub fn internal() -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            ip: None,
        }
    }
}

/// Appends an audit entry, logging instead of failing the operation
///
/// The audit trail must not take the upload or download path down with
/// it; a failed append is an operational signal, not a client error.
pub(crate) async fn audit_best_effort(store: &Arc<dyn IMetadataStore>, entry: AuditEntry) {
    if let Err(e) = store.append_audit(&entry).await {
        tracing::warn!(error = %e, event = %entry.event(), "failed to append audit entry");
    }
}

/// Stamps the client address onto an entry when the request carried one
pub(crate) fn stamp_ip(entry: AuditEntry, meta: &RequestMeta) -> AuditEntry {
    match &meta.ip {
        Some(ip) => entry.with_ip(ip.clone()),
        None => entry,
    }
}
