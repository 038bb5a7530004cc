//! Digest provider port (driven/secondary port)
//!
//! The documented contract of the external hashing component: given a
//! byte stream, produce the SHA-256 of the full payload as 64 lowercase
//! hex characters together with the exact byte count consumed.
//!
//! Implementations must stream - constant memory regardless of payload
//! size - and must read the stream to its end before reporting. An
//! implementation that fails mid-stream reports a transient error; it
//! never reports a digest for a partial read.

use crate::domain::newtypes::DigestHex;
use crate::domain::CoreError;

use super::object_store::ByteStream;

/// Result of digesting a stream to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestResult {
    /// SHA-256 of the payload, 64 lowercase hex chars
    pub digest: DigestHex,
    /// Exact number of bytes consumed
    pub bytes: u64,
}

/// Port trait for payload digesting
#[async_trait::async_trait]
pub trait IDigestProvider: Send + Sync {
    /// Consumes `stream` to the end and returns digest + byte count
    async fn digest(&self, stream: ByteStream) -> Result<DigestResult, CoreError>;
}
