//! Object store port (driven/secondary port)
//!
//! Put/Get/Delete/Stat of opaque object keys against an S3-compatible
//! backend, plus the multipart operations backing resumable sessions.
//! All payload I/O is streaming; implementations must never buffer a
//! whole object in memory.
//!
//! ## Design Notes
//!
//! - Adapter failures map to `CoreError::StorageUnavailable`; a missing
//!   object is `CoreError::NotFound` so callers can distinguish the two.
//! - `delete` is idempotent: deleting a missing key succeeds.
//! - Multipart completion lists uploaded parts backend-side, so sessions
//!   do not need to persist part receipts.

use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;

use crate::domain::newtypes::ObjectKey;
use crate::domain::CoreError;

/// Streaming payload bytes, as produced and consumed by the object store
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

/// Builds a [`ByteStream`] from an in-memory buffer; test and small-payload helper
pub fn bytestream_from(data: impl Into<Bytes>) -> ByteStream {
    Box::pin(futures::stream::once(futures::future::ready(Ok(
        data.into()
    ))))
}

/// An open download: the byte stream plus the object's length
pub struct ObjectDownload {
    /// Payload bytes
    pub stream: ByteStream,
    /// Object length in bytes
    pub len: u64,
}

/// Metadata returned by `stat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Object length in bytes
    pub len: u64,
}

/// Port trait for the private object store
#[async_trait::async_trait]
pub trait IObjectStore: Send + Sync {
    /// Streams a payload into the store under `key`, returning the byte
    /// count written
    ///
    /// On any error the partially-written object must not become
    /// visible; implementations abort in-flight multipart uploads.
    async fn put(&self, key: &ObjectKey, stream: ByteStream) -> Result<u64, CoreError>;

    /// Opens a streaming read of the object at `key`
    async fn get(&self, key: &ObjectKey) -> Result<ObjectDownload, CoreError>;

    /// Deletes the object at `key`; succeeds when already absent
    async fn delete(&self, key: &ObjectKey) -> Result<(), CoreError>;

    /// Returns object metadata, or `None` when absent
    async fn stat(&self, key: &ObjectKey) -> Result<Option<ObjectMeta>, CoreError>;

    /// Returns up to `limit` arbitrary keys, for the reaper's orphan scan
    async fn sample_keys(&self, limit: usize) -> Result<Vec<ObjectKey>, CoreError>;

    /// Starts a multipart upload for `key`, returning the backend upload id
    async fn create_multipart(&self, key: &ObjectKey) -> Result<String, CoreError>;

    /// Uploads one part of a multipart upload; part numbers are 1-based
    async fn upload_part(
        &self,
        key: &ObjectKey,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<(), CoreError>;

    /// Completes a multipart upload from the parts the backend has seen
    async fn complete_multipart(&self, key: &ObjectKey, upload_id: &str)
        -> Result<(), CoreError>;

    /// Aborts a multipart upload, discarding uploaded parts; idempotent
    async fn abort_multipart(&self, key: &ObjectKey, upload_id: &str) -> Result<(), CoreError>;

    /// Cheap connectivity probe used by deep readiness checks
    async fn ping(&self) -> Result<(), CoreError>;
}
