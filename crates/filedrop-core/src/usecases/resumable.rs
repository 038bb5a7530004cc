//! Resumable upload use case
//!
//! Chunked ingestion over the object store's multipart protocol. The
//! session row tracks byte progress; every chunk except the last must be
//! exactly the negotiated chunk size so part numbers stay derivable from
//! offsets. Completion feeds the same finalize path as a single-shot
//! upload.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;

use crate::domain::newtypes::{FileId, SessionId};
use crate::domain::{
    AuditEntry, AuditEvent, CoreError, FileState, ResumableSession, SessionStatus, User,
};
use crate::ports::{IHashScheduler, IMetadataStore, IObjectStore};

use super::upload_file::promote_to_stored;
use super::{audit_best_effort, stamp_ip, RequestMeta};

/// Use case for chunked uploads over multipart sessions
pub struct ResumableUploadUseCase {
    metadata: Arc<dyn IMetadataStore>,
    objects: Arc<dyn IObjectStore>,
    scheduler: Arc<dyn IHashScheduler>,
    chunk_bytes: u64,
}

impl ResumableUploadUseCase {
    /// Creates the use case with its collaborators and the negotiated
    /// chunk size
    pub fn new(
        metadata: Arc<dyn IMetadataStore>,
        objects: Arc<dyn IObjectStore>,
        scheduler: Arc<dyn IHashScheduler>,
        chunk_bytes: u64,
    ) -> Self {
        Self {
            metadata,
            objects,
            scheduler,
            chunk_bytes,
        }
    }

    /// The chunk size every non-final chunk must match
    pub fn chunk_bytes(&self) -> u64 {
        self.chunk_bytes
    }

    /// Opens a session for a `pending` file
    pub async fn open(
        &self,
        principal: &User,
        file_id: FileId,
        meta: &RequestMeta,
    ) -> Result<ResumableSession, CoreError> {
        let file = self
            .metadata
            .get_file(file_id)
            .await?
            .ok_or(CoreError::NotFound)?;
        if !file.manageable_by(principal) {
            return Err(CoreError::Forbidden);
        }
        if file.state() != FileState::Pending {
            return Err(CoreError::Conflict(format!(
                "resumable upload requires a pending file, found {}",
                file.state()
            )));
        }

        let backend_id = self.objects.create_multipart(file.object_key()).await?;
        let session = ResumableSession::open(file_id, backend_id, file.size_bytes());
        self.metadata.insert_session(&session).await?;

        let entry = stamp_ip(
            AuditEntry::new(AuditEvent::SessionOpen, meta.correlation_id)
                .with_principal(principal.id())
                .with_resource(session.id())
                .with_metadata(json!({
                    "file_id": file_id.to_string(),
                    "total_size": session.total_size(),
                })),
            meta,
        );
        audit_best_effort(&self.metadata, entry).await;

        tracing::info!(session_id = %session.id(), %file_id, "resumable session opened");
        Ok(session)
    }

    /// Accepts one chunk for an active session
    ///
    /// # Errors
    ///
    /// - `Conflict` when the session is terminal
    /// - `SizeMismatch` when the chunk overruns the declared total
    /// - `Validation` when a non-final chunk deviates from the chunk size
    pub async fn append(
        &self,
        principal: &User,
        session_id: SessionId,
        chunk: Bytes,
        meta: &RequestMeta,
    ) -> Result<ResumableSession, CoreError> {
        let mut session = self.load_session(principal, session_id).await?;

        let chunk_len = chunk.len() as u64;
        let completes = session.current_size() + chunk_len == session.total_size();
        if !completes && chunk_len != self.chunk_bytes {
            return Err(CoreError::Validation(format!(
                "non-final chunks must be exactly {} bytes, got {}",
                self.chunk_bytes, chunk_len
            )));
        }

        // Part number before advancing: offsets stay chunk-aligned.
        let part_number = session.next_part_number(self.chunk_bytes);
        session.advance(chunk_len)?;

        let file = self
            .metadata
            .get_file(session.file_id())
            .await?
            .ok_or(CoreError::FileGone)?;

        self.objects
            .upload_part(file.object_key(), session.backend_upload_id(), part_number, chunk)
            .await?;
        self.metadata.update_session(&session).await?;

        let entry = stamp_ip(
            AuditEntry::new(AuditEvent::SessionChunk, meta.correlation_id)
                .with_principal(principal.id())
                .with_resource(session_id)
                .with_metadata(json!({
                    "part": part_number,
                    "received": session.current_size(),
                })),
            meta,
        );
        audit_best_effort(&self.metadata, entry).await;

        Ok(session)
    }

    /// Completes the multipart upload and finalizes the file
    pub async fn complete(
        &self,
        principal: &User,
        session_id: SessionId,
        meta: &RequestMeta,
    ) -> Result<ResumableSession, CoreError> {
        let mut session = self.load_session(principal, session_id).await?;
        let file = self
            .metadata
            .get_file(session.file_id())
            .await?
            .ok_or(CoreError::FileGone)?;

        // Validates that every declared byte arrived.
        session.complete()?;

        self.objects
            .complete_multipart(file.object_key(), session.backend_upload_id())
            .await?;

        // The assembled object must match the declaration before the
        // row may advance.
        match self.objects.stat(file.object_key()).await? {
            Some(obj) if obj.len == file.size_bytes() => {}
            Some(obj) => {
                self.abort_backend(&session, file.object_key()).await;
                return Err(CoreError::SizeMismatch {
                    declared: file.size_bytes(),
                    actual: obj.len,
                });
            }
            None => return Err(CoreError::StorageUnavailable("assembled object missing".into())),
        }

        promote_to_stored(&self.metadata, &self.scheduler, &self.objects, &file).await?;
        self.metadata.update_session(&session).await?;

        let entry = stamp_ip(
            AuditEntry::new(AuditEvent::SessionClose, meta.correlation_id)
                .with_principal(principal.id())
                .with_resource(session_id)
                .with_metadata(json!({"status": "completed"})),
            meta,
        );
        audit_best_effort(&self.metadata, entry).await;

        tracing::info!(%session_id, file_id = %session.file_id(), "resumable session completed");
        Ok(session)
    }

    /// Aborts a session, discarding uploaded parts and failing the file
    pub async fn abort(
        &self,
        principal: &User,
        session_id: SessionId,
        meta: &RequestMeta,
    ) -> Result<(), CoreError> {
        let mut session = self.load_session(principal, session_id).await?;
        let file = self.metadata.get_file(session.file_id()).await?;

        if let Some(file) = &file {
            self.abort_backend(&session, file.object_key()).await;
            if let Err(e) = self
                .metadata
                .transition_state(file.id(), FileState::Pending, FileState::Failed)
                .await
            {
                tracing::warn!(file_id = %file.id(), error = %e, "failed to fail aborted upload");
            }
        }

        session.fail();
        self.metadata.update_session(&session).await?;

        let entry = stamp_ip(
            AuditEntry::new(AuditEvent::SessionClose, meta.correlation_id)
                .with_principal(principal.id())
                .with_resource(session_id)
                .failed()
                .with_metadata(json!({"status": "aborted"})),
            meta,
        );
        audit_best_effort(&self.metadata, entry).await;

        Ok(())
    }

    async fn load_session(
        &self,
        principal: &User,
        session_id: SessionId,
    ) -> Result<ResumableSession, CoreError> {
        let session = self
            .metadata
            .get_session(session_id)
            .await?
            .ok_or(CoreError::NotFound)?;
        if session.status() != SessionStatus::Active {
            return Err(CoreError::Conflict(format!(
                "session {} is {}",
                session_id,
                session.status()
            )));
        }
        // Ownership is checked against the file the session writes into.
        let file = self
            .metadata
            .get_file(session.file_id())
            .await?
            .ok_or(CoreError::FileGone)?;
        if !file.manageable_by(principal) {
            return Err(CoreError::Forbidden);
        }
        Ok(session)
    }

    async fn abort_backend(&self, session: &ResumableSession, key: &crate::domain::ObjectKey) {
        if let Err(e) = self
            .objects
            .abort_multipart(key, session.backend_upload_id())
            .await
        {
            tracing::warn!(session_id = %session.id(), error = %e, "failed to abort multipart upload");
        }
    }
}
