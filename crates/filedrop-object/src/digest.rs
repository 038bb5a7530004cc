//! Streaming SHA-256 digest provider
//!
//! Fulfils the digest-provider contract: consume the stream to its end,
//! report the SHA-256 as 64 lowercase hex characters and the exact byte
//! count, in constant memory. A mid-stream failure is reported as a
//! transient storage error, never as a digest over a partial read.

use futures::StreamExt;
use sha2::{Digest, Sha256};

use filedrop_core::domain::{CoreError, DigestHex};
use filedrop_core::ports::{ByteStream, DigestResult, IDigestProvider};

/// SHA-256 implementation of the digest port
#[derive(Default)]
pub struct Sha256DigestProvider;

impl Sha256DigestProvider {
    /// Creates the provider
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl IDigestProvider for Sha256DigestProvider {
    async fn digest(&self, mut stream: ByteStream) -> Result<DigestResult, CoreError> {
        let mut hasher = Sha256::new();
        let mut bytes: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| CoreError::StorageUnavailable(format!("digest read: {e}")))?;
            bytes += chunk.len() as u64;
            hasher.update(&chunk);
        }

        let digest = DigestHex::new(hex::encode(hasher.finalize()))
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        Ok(DigestResult { digest, bytes })
    }
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
    async fn test_known_digest() {
        let provider = Sha256DigestProvider::new();
        let result = provider
            .digest(stream_of(vec![b"Hello", b" ", b"World"]))
            .await
            .unwrap();
        assert_eq!(result.bytes, 11);
        assert_eq!(
            result.digest.as_str(),
            "a591a6d40bf420404a011733cfb7b190d62c65bf0bcda32b57b277d9ad9f146e"
        );
    }

    #[tokio::test]
    async fn test_empty_stream_digest() {
        let provider = Sha256DigestProvider::new();
        let result = provider.digest(stream_of(vec![])).await.unwrap();
        assert_eq!(result.bytes, 0);
        // Well-known SHA-256 of the empty string.
        assert_eq!(
            result.digest.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn test_chunking_does_not_change_digest() {
        let provider = Sha256DigestProvider::new();
        let once = provider.digest(stream_of(vec![b"abcdef"])).await.unwrap();
        let provider = Sha256DigestProvider::new();
        let split = provider
            .digest(stream_of(vec![b"ab", b"cd", b"ef"]))
            .await
            .unwrap();
        assert_eq!(once.digest, split.digest);
        assert_eq!(once.bytes, split.bytes);
    }

    #[tokio::test]
    async fn test_stream_error_is_transient() {
        let provider = Sha256DigestProvider::new();
        let broken: ByteStream = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(std::io::ErrorKind::Other, "link down")),
        ]));
        let err = provider.digest(broken).await.unwrap_err();
        assert!(err.is_transient());
    }
}
