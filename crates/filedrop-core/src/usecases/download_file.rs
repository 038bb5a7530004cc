//! Download use case
//!
//! Recipients never authenticate; a valid token IS the authorization.
//! The database is consulted only to resolve the file and verify state,
//! expiry, and the password gate. The object streams outside any
//! transaction because `ready` is write-once from here on.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::domain::newtypes::FileId;
use crate::domain::{AuditEntry, AuditEvent, CoreError, FileRecord, FileState};
use crate::ports::{
    ByteStream, ILinkSigner, IMetadataStore, IObjectStore, IPasswordHasher, LinkClaims,
};

use super::{audit_best_effort, stamp_ip, RequestMeta};

/// A token-bearing download request
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub token: String,
    /// Submitted password, required when the file is gated
    pub password: Option<String>,
}

/// An authorized download, ready to stream
pub struct DownloadPayload {
    /// Snapshot of the file row at authorization time
    pub file: FileRecord,
    /// The verified token claims (the HTTP layer consumes the nonce for
    /// single-use links)
    pub claims: LinkClaims,
    /// Payload bytes
    pub body: ByteStream,
    /// Exact response length
    pub content_length: u64,
}

/// Use case for serving token-gated downloads
pub struct DownloadFileUseCase {
    metadata: Arc<dyn IMetadataStore>,
    objects: Arc<dyn IObjectStore>,
    signer: Arc<dyn ILinkSigner>,
    passwords: Arc<dyn IPasswordHasher>,
}

impl DownloadFileUseCase {
    /// Creates the use case with its collaborators
    pub fn new(
        metadata: Arc<dyn IMetadataStore>,
        objects: Arc<dyn IObjectStore>,
        signer: Arc<dyn ILinkSigner>,
        passwords: Arc<dyn IPasswordHasher>,
    ) -> Self {
        Self {
            metadata,
            objects,
            signer,
            passwords,
        }
    }

    /// Authorizes `request` and opens the payload stream
    ///
    /// # Errors
    ///
    /// `TokenInvalid`, `LinkExpired`, `FileGone`, `NotFound`, `NotReady`,
    /// `PasswordRequired`, `PasswordIncorrect` per the download protocol.
    pub async fn execute(
        &self,
        request: DownloadRequest,
        meta: &RequestMeta,
    ) -> Result<DownloadPayload, CoreError> {
        let now = Utc::now();

        // Step 1: token first; the database is never consulted for a
        // forged or expired token
        let claims = self.signer.verify(&request.token, now)?;

        // Step 2: resolve the row
        let file = match self.metadata.get_file(claims.file_id).await? {
            Some(file) => file,
            None => {
                self.audit_refusal(claims.file_id, meta, "file_gone").await;
                return Err(CoreError::FileGone);
            }
        };

        match file.state() {
            FileState::Ready => {}
            FileState::Failed => {
                // A failed file has no object; the link can never serve.
                self.audit_refusal(claims.file_id, meta, "failed_file").await;
                return Err(CoreError::NotFound);
            }
            _ => {
                self.audit_refusal(claims.file_id, meta, "not_ready").await;
                return Err(CoreError::NotReady);
            }
        }
        if file.is_expired(now) {
            self.audit_refusal(claims.file_id, meta, "expired_file").await;
            return Err(CoreError::FileGone);
        }

        // Step 3: password gate
        if let Some(stored_hash) = file.password_hash() {
            // The token must carry the salt of the current password
            // version; a rotation invalidates previously issued links.
            if claims.password_salt.as_ref() != file.password_salt() {
                return Err(CoreError::TokenInvalid);
            }
            let Some(password) = &request.password else {
                return Err(CoreError::PasswordRequired);
            };
            if !self.passwords.verify(password, stored_hash)? {
                self.audit_refusal(claims.file_id, meta, "bad_password").await;
                return Err(CoreError::PasswordIncorrect);
            }
        }

        // Step 4: open the object stream
        let download = match self.objects.get(file.object_key()).await {
            Ok(d) => d,
            Err(CoreError::NotFound) => {
                tracing::error!(
                    file_id = %file.id(),
                    key = %file.object_key(),
                    "ready file has no object"
                );
                return Err(CoreError::FileGone);
            }
            Err(e) => return Err(e),
        };

        let entry = stamp_ip(
            AuditEntry::new(AuditEvent::FileDownload, meta.correlation_id)
                .with_resource(file.id())
                .with_metadata(json!({"bytes": file.size_bytes()})),
            meta,
        );
        audit_best_effort(&self.metadata, entry).await;

        let content_length = file.size_bytes();
        Ok(DownloadPayload {
            file,
            claims,
            body: download.stream,
            content_length,
        })
    }

    /// Fire-and-forget statistics update after the stream opened
    pub async fn record_download(&self, file_id: FileId) -> Result<(), CoreError> {
        self.metadata.record_download(file_id, Utc::now()).await
    }

    async fn audit_refusal(&self, file_id: FileId, meta: &RequestMeta, reason: &str) {
        let entry = stamp_ip(
            AuditEntry::new(AuditEvent::FileDownload, meta.correlation_id)
                .with_resource(file_id)
                .failed()
                .with_metadata(json!({"reason": reason})),
            meta,
        );
        audit_best_effort(&self.metadata, entry).await;
    }
}
