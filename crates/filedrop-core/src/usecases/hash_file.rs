//! Hashing use case
//!
//! One digest attempt for one file: stream the stored object through the
//! digest provider, verify the byte count against the declaration, and
//! promote `stored -> ready` in a single metadata write. The hash worker
//! owns retry and backoff; this use case only distinguishes permanent
//! failures from transient ones via [`CoreError::is_transient`].

use std::sync::Arc;

use serde_json::json;

use crate::domain::newtypes::FileId;
use crate::domain::{AuditEntry, AuditEvent, CoreError, FileState};
use crate::ports::{IDigestProvider, IMetadataStore, IObjectStore};

use super::{audit_best_effort, RequestMeta};

/// Result of one hash attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashOutcome {
    /// Digest recorded, file is now `ready`
    Ready,
    /// The file was already past hashing; nothing to do
    AlreadyDone,
    /// The file is not in a hashable state (raced with abort/delete)
    Skipped(FileState),
    /// Permanent integrity failure; the file is now `failed` and the
    /// object removed
    FailedIntegrity,
}

/// Use case for digesting stored objects
pub struct HashFileUseCase {
    metadata: Arc<dyn IMetadataStore>,
    objects: Arc<dyn IObjectStore>,
    digests: Arc<dyn IDigestProvider>,
}

impl HashFileUseCase {
    /// Creates the use case with its collaborators
    pub fn new(
        metadata: Arc<dyn IMetadataStore>,
        objects: Arc<dyn IObjectStore>,
        digests: Arc<dyn IDigestProvider>,
    ) -> Self {
        Self {
            metadata,
            objects,
            digests,
        }
    }

    /// Runs one digest attempt for `file_id`
    ///
    /// # Errors
    ///
    /// Transient dependency failures bubble up for the worker to retry;
    /// permanent outcomes are encoded in [`HashOutcome`].
    pub async fn execute(
        &self,
        file_id: FileId,
        meta: &RequestMeta,
    ) -> Result<HashOutcome, CoreError> {
        // Step 1: load and classify
        let Some(file) = self.metadata.get_file(file_id).await? else {
            tracing::debug!(%file_id, "hash job for a deleted file, skipping");
            return Ok(HashOutcome::Skipped(FileState::Failed));
        };

        match file.state() {
            FileState::Stored => {}
            FileState::Ready | FileState::Hashed => return Ok(HashOutcome::AlreadyDone),
            other => return Ok(HashOutcome::Skipped(other)),
        }

        // Step 2: stream the object through the digest provider
        let download = match self.objects.get(file.object_key()).await {
            Ok(d) => d,
            Err(CoreError::NotFound) => {
                // Missing object under a `stored` row is permanent.
                tracing::error!(%file_id, key = %file.object_key(), "stored object missing");
                self.fail_file(file_id, meta, "object missing").await;
                return Ok(HashOutcome::FailedIntegrity);
            }
            Err(e) => return Err(e),
        };

        let result = self.digests.digest(download.stream).await?;

        // Step 3: integrity gate - observed bytes must match the declaration
        if result.bytes != file.size_bytes() {
            tracing::warn!(
                %file_id,
                declared = file.size_bytes(),
                observed = result.bytes,
                "digest byte count mismatch"
            );
            if let Err(e) = self.objects.delete(file.object_key()).await {
                tracing::warn!(%file_id, error = %e, "failed to delete mismatched object");
            }
            self.fail_file(file_id, meta, "byte count mismatch").await;
            return Ok(HashOutcome::FailedIntegrity);
        }

        // Step 4: record digest and land `ready` in one guarded write
        let applied = self
            .metadata
            .record_digest(file_id, &result.digest, result.bytes)
            .await?;
        if !applied {
            return Ok(HashOutcome::Skipped(FileState::Failed));
        }

        let entry = AuditEntry::new(AuditEvent::FileHash, meta.correlation_id)
            .with_resource(file_id)
            .with_metadata(json!({
                "digest": result.digest.as_str(),
                "bytes": result.bytes,
            }));
        audit_best_effort(&self.metadata, entry).await;

        tracing::info!(%file_id, digest = %result.digest, "file ready");
        Ok(HashOutcome::Ready)
    }

    /// Guarded `stored -> failed`, with a failure audit entry
    async fn fail_file(&self, file_id: FileId, meta: &RequestMeta, reason: &str) {
        if let Err(e) = self
            .metadata
            .transition_state(file_id, FileState::Stored, FileState::Failed)
            .await
        {
            tracing::warn!(%file_id, error = %e, "failed to mark file failed");
        }
        let entry = AuditEntry::new(AuditEvent::FileHash, meta.correlation_id)
            .with_resource(file_id)
            .failed()
            .with_metadata(json!({"reason": reason}));
        audit_best_effort(&self.metadata, entry).await;
    }
}
