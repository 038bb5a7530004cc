//! In-memory object store
//!
//! Backend for tests and local smoke runs: the full port surface, no
//! network. Objects and in-flight multipart uploads live in concurrent
//! maps; "durability" is the lifetime of the process, which is exactly
//! what a test wants and nothing a deployment should use.

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::StreamExt;
use uuid::Uuid;

use filedrop_core::domain::newtypes::ObjectKey;
use filedrop_core::domain::CoreError;
use filedrop_core::ports::{
    bytestream_from, ByteStream, IObjectStore, ObjectDownload, ObjectMeta,
};

/// An in-flight multipart upload
struct MultipartState {
    key: String,
    parts: Vec<(i32, Bytes)>,
}

/// In-process implementation of the object store port
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: DashMap<String, Bytes>,
    multiparts: DashMap<String, MultipartState>,
}

impl InMemoryObjectStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects; test helper
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

#[async_trait::async_trait]
impl IObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &ObjectKey, mut stream: ByteStream) -> Result<u64, CoreError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| CoreError::StorageUnavailable(format!("stream read: {e}")))?;
            buf.extend_from_slice(&chunk);
        }
        let len = buf.len() as u64;
        self.objects.insert(key.as_str().to_string(), buf.freeze());
        Ok(len)
    }

    async fn get(&self, key: &ObjectKey) -> Result<ObjectDownload, CoreError> {
        match self.objects.get(key.as_str()) {
            Some(data) => Ok(ObjectDownload {
                len: data.len() as u64,
                stream: bytestream_from(data.clone()),
            }),
            None => Err(CoreError::NotFound),
        }
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), CoreError> {
        self.objects.remove(key.as_str());
        Ok(())
    }

    async fn stat(&self, key: &ObjectKey) -> Result<Option<ObjectMeta>, CoreError> {
        Ok(self
            .objects
            .get(key.as_str())
            .map(|data| ObjectMeta {
                len: data.len() as u64,
            }))
    }

    async fn sample_keys(&self, limit: usize) -> Result<Vec<ObjectKey>, CoreError> {
        let mut keys = Vec::new();
        for entry in self.objects.iter().take(limit) {
            keys.push(ObjectKey::new(entry.key().clone())?);
        }
        Ok(keys)
    }

    async fn create_multipart(&self, key: &ObjectKey) -> Result<String, CoreError> {
        let upload_id = Uuid::new_v4().to_string();
        self.multiparts.insert(
            upload_id.clone(),
            MultipartState {
                key: key.as_str().to_string(),
                parts: Vec::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _key: &ObjectKey,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<(), CoreError> {
        let mut state = self
            .multiparts
            .get_mut(upload_id)
            .ok_or(CoreError::NotFound)?;
        state.parts.retain(|(n, _)| *n != part_number);
        state.parts.push((part_number, data));
        Ok(())
    }

    async fn complete_multipart(
        &self,
        _key: &ObjectKey,
        upload_id: &str,
    ) -> Result<(), CoreError> {
        let (_, mut state) = self
            .multiparts
            .remove(upload_id)
            .ok_or(CoreError::NotFound)?;
        state.parts.sort_by_key(|(n, _)| *n);
        let mut buf = BytesMut::new();
        for (_, part) in &state.parts {
            buf.extend_from_slice(part);
        }
        self.objects.insert(state.key, buf.freeze());
        Ok(())
    }

    async fn abort_multipart(&self, _key: &ObjectKey, upload_id: &str) -> Result<(), CoreError> {
        self.multiparts.remove(upload_id);
        Ok(())
    }

    async fn ping(&self) -> Result<(), CoreError> {
        Ok(())
    }
}
