//! Deletion use case
//!
//! Owner- or admin-initiated removal. The row goes first, then the
//! object: a crash in between leaves an orphan blob for the reaper's
//! orphan scan, never a servable row without bytes.

use std::sync::Arc;

use serde_json::json;

use crate::domain::newtypes::FileId;
use crate::domain::{AuditEntry, AuditEvent, CoreError, User};
use crate::ports::{IMetadataStore, IObjectStore};

use super::{audit_best_effort, stamp_ip, RequestMeta};

/// Use case for explicit file deletion
pub struct DeleteFileUseCase {
    metadata: Arc<dyn IMetadataStore>,
    objects: Arc<dyn IObjectStore>,
}

impl DeleteFileUseCase {
    /// Creates the use case with its collaborators
    pub fn new(metadata: Arc<dyn IMetadataStore>, objects: Arc<dyn IObjectStore>) -> Self {
        Self { metadata, objects }
    }

    /// Deletes `file_id` on behalf of `principal`
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown id
    /// - `Forbidden` when `principal` is neither owner nor admin
    pub async fn execute(
        &self,
        principal: &User,
        file_id: FileId,
        meta: &RequestMeta,
    ) -> Result<(), CoreError> {
        let file = self
            .metadata
            .get_file(file_id)
            .await?
            .ok_or(CoreError::NotFound)?;

        if !file.manageable_by(principal) {
            return Err(CoreError::Forbidden);
        }

        // Row first, then object.
        let Some(key) = self.metadata.delete_file(file_id).await? else {
            // Raced with the reaper or a concurrent delete.
            return Err(CoreError::NotFound);
        };
        if let Err(e) = self.objects.delete(&key).await {
            tracing::warn!(%file_id, key = %key, error = %e, "object delete deferred to orphan scan");
        }

        let entry = stamp_ip(
            AuditEntry::new(AuditEvent::FileDelete, meta.correlation_id)
                .with_principal(principal.id())
                .with_resource(file_id)
                .with_metadata(json!({"state": file.state().name()})),
            meta,
        );
        audit_best_effort(&self.metadata, entry).await;

        tracing::info!(%file_id, "file deleted");
        Ok(())
    }
}
