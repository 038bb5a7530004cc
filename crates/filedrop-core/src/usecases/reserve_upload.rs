//! Upload reservation use case
//!
//! First phase of the two-phase upload: validate the declared metadata,
//! check the owner's quota, and insert the `pending` row. No object-store
//! I/O happens here; the row always precedes the bytes.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::domain::{AuditEntry, AuditEvent, CoreError, FileRecord, User};
use crate::ports::{IMetadataStore, IPasswordHasher, ReserveOutcome};

use super::{audit_best_effort, stamp_ip, RequestMeta};

/// Client-declared metadata for a reservation
#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub original_name: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub expires_at: Option<DateTime<Utc>>,
    /// When set, downloads require this password
    pub password: Option<String>,
    pub auto_delete: bool,
}

/// Use case for reserving an upload slot
///
/// Enforces the global size ceiling and the per-user quota. The quota
/// comparison and the insert are one serializable transaction inside the
/// metadata store, so two concurrent reservations can never jointly
/// overshoot a budget.
pub struct ReserveUploadUseCase {
    metadata: Arc<dyn IMetadataStore>,
    passwords: Arc<dyn IPasswordHasher>,
    max_upload_bytes: u64,
    dedup_window: Duration,
}

impl ReserveUploadUseCase {
    /// Creates the use case with its collaborators and limits
    pub fn new(
        metadata: Arc<dyn IMetadataStore>,
        passwords: Arc<dyn IPasswordHasher>,
        max_upload_bytes: u64,
        dedup_window: Duration,
    ) -> Self {
        Self {
            metadata,
            passwords,
            max_upload_bytes,
            dedup_window,
        }
    }

    /// Reserves a `pending` file row for `principal`
    ///
    /// # Errors
    ///
    /// - `SizeExceeded` when the declared size is over the global ceiling
    /// - `QuotaExceeded` when the owner's budget cannot absorb the size
    /// - `DuplicateInWindow` for an identical reservation inside the window
    /// - `Validation` for malformed names or expiries
    pub async fn execute(
        &self,
        principal: &User,
        request: ReserveRequest,
        meta: &RequestMeta,
    ) -> Result<FileRecord, CoreError> {
        // Step 1: global ceiling, checked before any database work
        if request.size_bytes > self.max_upload_bytes {
            return Err(CoreError::SizeExceeded {
                declared: request.size_bytes,
                ceiling: self.max_upload_bytes,
            });
        }

        // Step 2: build the pending record
        let mut file = FileRecord::reserve(
            principal.id(),
            request.original_name,
            request.content_type,
            request.size_bytes,
            request.expires_at,
            request.auto_delete,
        )?;

        if let Some(password) = &request.password {
            let hash = self.passwords.hash(password)?;
            // The salt binds issued tokens to this password version.
            let salt = *Uuid::new_v4().as_bytes();
            file.set_password(hash, salt);
        }

        // Step 3: serializable quota check + insert
        let outcome = self
            .metadata
            .reserve_file(&file, principal, self.dedup_window)
            .await?;

        let entry = stamp_ip(
            AuditEntry::new(AuditEvent::FileReserve, meta.correlation_id)
                .with_principal(principal.id())
                .with_resource(file.id())
                .with_metadata(json!({
                    "size_bytes": file.size_bytes(),
                    "name": file.original_name(),
                })),
            meta,
        );

        match outcome {
            ReserveOutcome::Reserved => {
                audit_best_effort(&self.metadata, entry).await;
                tracing::info!(file_id = %file.id(), size = file.size_bytes(), "upload reserved");
                Ok(file)
            }
            ReserveOutcome::QuotaExceeded { used, quota } => {
                audit_best_effort(&self.metadata, entry.failed()).await;
                Err(CoreError::QuotaExceeded {
                    used,
                    quota,
                    requested: file.size_bytes(),
                })
            }
            ReserveOutcome::DuplicateInWindow => {
                audit_best_effort(&self.metadata, entry.failed()).await;
                Err(CoreError::DuplicateInWindow)
            }
        }
    }
}
