//! Streaming upload use case
//!
//! Second phase of the two-phase upload: stream the body into the object
//! store under the reserved key, enforce the declared byte count, and
//! promote the row to `stored`. Any failure deletes the partial object
//! and lands the row in `failed`; the reservation is never left dangling
//! in `pending` with bytes attached.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;

use crate::domain::newtypes::FileId;
use crate::domain::{AuditEntry, AuditEvent, CoreError, FileRecord, FileState, User};
use crate::ports::{ByteStream, IHashScheduler, IMetadataStore, IObjectStore};

use super::{audit_best_effort, stamp_ip, RequestMeta};

/// Use case for ingesting an upload body
pub struct UploadFileUseCase {
    metadata: Arc<dyn IMetadataStore>,
    objects: Arc<dyn IObjectStore>,
    scheduler: Arc<dyn IHashScheduler>,
}

impl UploadFileUseCase {
    /// Creates the use case with its collaborators
    pub fn new(
        metadata: Arc<dyn IMetadataStore>,
        objects: Arc<dyn IObjectStore>,
        scheduler: Arc<dyn IHashScheduler>,
    ) -> Self {
        Self {
            metadata,
            objects,
            scheduler,
        }
    }

    /// Streams `body` into the object reserved for `file_id`
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown id
    /// - `Forbidden` when `principal` does not own the reservation
    /// - `Conflict` when the file is not `pending`
    /// - `SizeMismatch` when the body under- or overruns the declaration
    pub async fn execute(
        &self,
        principal: &User,
        file_id: FileId,
        body: ByteStream,
        meta: &RequestMeta,
    ) -> Result<FileRecord, CoreError> {
        // Step 1: load and guard the reservation
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
                "upload requires a pending file, found {}",
                file.state()
            )));
        }

        // Step 2: stream into the object store behind a hard byte limiter
        let declared = file.size_bytes();
        let counter = Arc::new(AtomicU64::new(0));
        let limited = limit_stream(body, declared, Arc::clone(&counter));

        let put_result = self.objects.put(file.object_key(), limited).await;

        let written = counter.load(Ordering::SeqCst);
        let outcome = match put_result {
            Ok(len) if len == declared => Ok(len),
            Ok(len) => Err(CoreError::SizeMismatch {
                declared,
                actual: len,
            }),
            Err(_) if written > declared => Err(CoreError::SizeMismatch {
                declared,
                actual: written,
            }),
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            self.fail_upload(&file).await;
            let entry = stamp_ip(
                AuditEntry::new(AuditEvent::FileUpload, meta.correlation_id)
                    .with_principal(principal.id())
                    .with_resource(file.id())
                    .failed()
                    .with_metadata(json!({"error": e.code()})),
                meta,
            );
            audit_best_effort(&self.metadata, entry).await;
            return Err(e);
        }

        // Step 3: promote to `stored` and hand off to the hash worker
        promote_to_stored(&self.metadata, &self.scheduler, &self.objects, &file).await?;

        let entry = stamp_ip(
            AuditEntry::new(AuditEvent::FileUpload, meta.correlation_id)
                .with_principal(principal.id())
                .with_resource(file.id())
                .with_metadata(json!({"bytes": declared})),
            meta,
        );
        audit_best_effort(&self.metadata, entry).await;

        tracing::info!(file_id = %file.id(), bytes = declared, "upload finalized");
        self.metadata
            .get_file(file_id)
            .await?
            .ok_or(CoreError::NotFound)
    }

    /// Deletes the partial object and lands the row in `failed`
    async fn fail_upload(&self, file: &FileRecord) {
        if let Err(e) = self.objects.delete(file.object_key()).await {
            tracing::warn!(file_id = %file.id(), error = %e, "failed to delete partial object");
        }
        if let Err(e) = self
            .metadata
            .transition_state(file.id(), FileState::Pending, FileState::Failed)
            .await
        {
            tracing::warn!(file_id = %file.id(), error = %e, "failed to fail upload row");
        }
    }
}

/// Promotes a freshly-written file to `stored` and schedules hashing
///
/// Shared by the single-shot and resumable upload paths. Queue overflow
/// reverts the file to `failed` and deletes the object: a `stored` row
/// with no worker coming would otherwise sit unverified forever.
pub(crate) async fn promote_to_stored(
    metadata: &Arc<dyn IMetadataStore>,
    scheduler: &Arc<dyn IHashScheduler>,
    objects: &Arc<dyn IObjectStore>,
    file: &FileRecord,
) -> Result<(), CoreError> {
    let applied = metadata
        .transition_state(file.id(), FileState::Pending, FileState::Stored)
        .await?;
    if !applied {
        // Raced with an abort or the reaper; the object must not survive.
        if let Err(e) = objects.delete(file.object_key()).await {
            tracing::warn!(file_id = %file.id(), error = %e, "failed to delete orphaned object");
        }
        return Err(CoreError::Conflict(
            "file left pending state during upload".to_string(),
        ));
    }

    if let Err(e) = scheduler.schedule(file.id()).await {
        tracing::error!(file_id = %file.id(), error = %e, "hash queue rejected job");
        if let Err(e) = objects.delete(file.object_key()).await {
            tracing::warn!(file_id = %file.id(), error = %e, "failed to delete object after queue overflow");
        }
        metadata
            .transition_state(file.id(), FileState::Stored, FileState::Failed)
            .await?;
        return Err(e);
    }
    Ok(())
}

/// Wraps `inner` so that consuming more than `limit` bytes yields an error
///
/// `counter` observes the true byte count even after the stream errors,
/// letting the caller distinguish an overrun from a transport failure.
fn limit_stream(inner: ByteStream, limit: u64, counter: Arc<AtomicU64>) -> ByteStream {
    Box::pin(inner.map(move |item| match item {
        Ok(chunk) => {
            let total = counter.fetch_add(chunk.len() as u64, Ordering::SeqCst) + chunk.len() as u64;
            if total > limit {
                Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "declared size exceeded",
                ))
            } else {
                Ok(chunk)
            }
        }
        Err(e) => Err(e),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;

    fn stream_of(chunks: Vec<&'static [u8]>) -> ByteStream {
        Box::pin(stream::iter(
            chunks.into_iter().map(|c| Ok(Bytes::from_static(c))),
        ))
    }

    #[tokio::test]
    async fn test_limit_stream_passes_exact_size() {
        let counter = Arc::new(AtomicU64::new(0));
        let limited = limit_stream(stream_of(vec![b"hello", b" ", b"world"]), 11, counter.clone());
        let chunks: Vec<_> = limited.collect().await;
        assert!(chunks.iter().all(|c| c.is_ok()));
        assert_eq!(counter.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn test_limit_stream_errors_on_overrun() {
        let counter = Arc::new(AtomicU64::new(0));
        let limited = limit_stream(stream_of(vec![b"hello", b" world"]), 5, counter.clone());
        let chunks: Vec<_> = limited.collect().await;
        assert!(chunks[0].is_ok());
        assert!(chunks[1].is_err());
        // The counter still saw every byte that arrived.
        assert_eq!(counter.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn test_limit_stream_zero_bytes() {
        let counter = Arc::new(AtomicU64::new(0));
        let limited = limit_stream(stream_of(vec![]), 0, counter.clone());
        let chunks: Vec<_> = limited.collect().await;
        assert!(chunks.is_empty());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
