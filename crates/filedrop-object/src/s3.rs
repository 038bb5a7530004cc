//! S3-compatible object store adapter
//!
//! Targets AWS S3 and self-hosted S3 work-alikes (MinIO, Garage) through
//! the official SDK. Payloads stream both ways: uploads buffer at most
//! one part, downloads hand the SDK's byte stream straight through.
//!
//! Small payloads go up as a single PUT; anything beyond one part size
//! switches to a multipart upload that is aborted on any failure so no
//! partial object ever becomes visible.

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::primitives::ByteStream as SdkByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio_util::io::ReaderStream;

use filedrop_core::config::ObjectStoreConfig;
use filedrop_core::domain::newtypes::ObjectKey;
use filedrop_core::domain::CoreError;
use filedrop_core::ports::{ByteStream, IObjectStore, ObjectDownload, ObjectMeta};

/// Part size for streaming uploads. S3 requires at least 5 MiB for every
/// part but the last; 8 MiB balances memory against request count.
const PART_SIZE: usize = 8 * 1024 * 1024;

/// S3 implementation of the object store port
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Builds a client from the object-store configuration
    ///
    /// Credentials are static (from config); MinIO-style backends need
    /// `force_path_style`.
    pub fn from_config(config: &ObjectStoreConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "filedrop-config",
        );
        let sdk_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(config.endpoint.clone())
            .credentials_provider(credentials)
            .force_path_style(config.force_path_style)
            .build();
        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket.clone(),
        }
    }

    /// Wraps an existing client; used by tooling that shares SDK setup
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Uploads a fully-buffered small payload with a single PUT
    async fn put_single(&self, key: &ObjectKey, data: Bytes) -> Result<u64, CoreError> {
        let len = data.len() as u64;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .body(SdkByteStream::from(data))
            .send()
            .await
            .map_err(|e| storage_err("put_object", &e))?;
        Ok(len)
    }

    /// Streams a large payload through a multipart upload
    ///
    /// `first` is the already-buffered initial part; the remainder is
    /// drained from `stream` one part at a time. Aborts on any error.
    async fn put_multipart(
        &self,
        key: &ObjectKey,
        first: Bytes,
        mut stream: ByteStream,
    ) -> Result<u64, CoreError> {
        let upload_id = self.create_multipart(key).await?;

        let result = async {
            let mut completed: Vec<CompletedPart> = Vec::new();
            let mut total = 0u64;
            let mut part_number = 1i32;
            let mut buf = BytesMut::from(&first[..]);

            loop {
                // Ship full parts as they accumulate.
                while buf.len() >= PART_SIZE {
                    let part = buf.split_to(PART_SIZE).freeze();
                    total += part.len() as u64;
                    completed.push(self.ship_part(key, &upload_id, part_number, part).await?);
                    part_number += 1;
                }
                match stream.next().await {
                    Some(chunk) => {
                        let chunk = chunk.map_err(|e| {
                            CoreError::StorageUnavailable(format!("stream read: {e}"))
                        })?;
                        buf.extend_from_slice(&chunk);
                    }
                    None => break,
                }
            }
            // Final, possibly short, part.
            if !buf.is_empty() || part_number == 1 {
                let part = buf.freeze();
                total += part.len() as u64;
                completed.push(self.ship_part(key, &upload_id, part_number, part).await?);
            }

            self.client
                .complete_multipart_upload()
                .bucket(&self.bucket)
                .key(key.as_str())
                .upload_id(&upload_id)
                .multipart_upload(
                    CompletedMultipartUpload::builder()
                        .set_parts(Some(completed))
                        .build(),
                )
                .send()
                .await
                .map_err(|e| storage_err("complete_multipart_upload", &e))?;
            Ok(total)
        }
        .await;

        if result.is_err() {
            if let Err(abort) = self.abort_multipart(key, &upload_id).await {
                tracing::warn!(key = %key, error = %abort, "failed to abort multipart upload");
            }
        }
        result
    }

    async fn ship_part(
        &self,
        key: &ObjectKey,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<CompletedPart, CoreError> {
        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key.as_str())
            .upload_id(upload_id)
            .part_number(part_number)
            .body(SdkByteStream::from(data))
            .send()
            .await
            .map_err(|e| storage_err("upload_part", &e))?;
        Ok(CompletedPart::builder()
            .part_number(part_number)
            .set_e_tag(response.e_tag().map(str::to_string))
            .build())
    }
}

/// Formats an SDK failure onto the stable taxonomy
fn storage_err<E, R>(context: &str, err: &aws_sdk_s3::error::SdkError<E, R>) -> CoreError
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    CoreError::StorageUnavailable(format!("{context}: {}", DisplayErrorContext(err)))
}

#[async_trait::async_trait]
impl IObjectStore for S3ObjectStore {
    async fn put(&self, key: &ObjectKey, mut stream: ByteStream) -> Result<u64, CoreError> {
        // Buffer up to one part; if the stream ends first, a single PUT
        // suffices and no multipart upload is created at all.
        let mut buf = BytesMut::new();
        while buf.len() < PART_SIZE {
            match stream.next().await {
                Some(chunk) => {
                    let chunk = chunk
                        .map_err(|e| CoreError::StorageUnavailable(format!("stream read: {e}")))?;
                    buf.extend_from_slice(&chunk);
                }
                None => return self.put_single(key, buf.freeze()).await,
            }
        }
        self.put_multipart(key, buf.freeze(), stream).await
    }

    async fn get(&self, key: &ObjectKey) -> Result<ObjectDownload, CoreError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .send()
            .await
            .map_err(|e| match &e {
                aws_sdk_s3::error::SdkError::ServiceError(service)
                    if service.err().is_no_such_key() =>
                {
                    CoreError::NotFound
                }
                _ => storage_err("get_object", &e),
            })?;

        let len = output.content_length().unwrap_or(0).max(0) as u64;
        let reader = output.body.into_async_read();
        Ok(ObjectDownload {
            len,
            stream: Box::pin(ReaderStream::new(reader)),
        })
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), CoreError> {
        // S3 semantics: deleting a missing key succeeds.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .send()
            .await
            .map_err(|e| storage_err("delete_object", &e))?;
        Ok(())
    }

    async fn stat(&self, key: &ObjectKey) -> Result<Option<ObjectMeta>, CoreError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .send()
            .await
        {
            Ok(output) => Ok(Some(ObjectMeta {
                len: output.content_length().unwrap_or(0).max(0) as u64,
            })),
            Err(aws_sdk_s3::error::SdkError::ServiceError(service))
                if service.err().is_not_found() =>
            {
                Ok(None)
            }
            Err(e) => Err(storage_err("head_object", &e)),
        }
    }

    async fn sample_keys(&self, limit: usize) -> Result<Vec<ObjectKey>, CoreError> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .max_keys(limit as i32)
            .send()
            .await
            .map_err(|e| storage_err("list_objects_v2", &e))?;

        let mut keys = Vec::new();
        for object in output.contents() {
            if let Some(key) = object.key() {
                keys.push(ObjectKey::new(key)?);
            }
        }
        Ok(keys)
    }

    async fn create_multipart(&self, key: &ObjectKey) -> Result<String, CoreError> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key.as_str())
            .send()
            .await
            .map_err(|e| storage_err("create_multipart_upload", &e))?;
        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| CoreError::StorageUnavailable("backend returned no upload id".into()))
    }

    async fn upload_part(
        &self,
        key: &ObjectKey,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<(), CoreError> {
        self.ship_part(key, upload_id, part_number, data).await?;
        Ok(())
    }

    async fn complete_multipart(
        &self,
        key: &ObjectKey,
        upload_id: &str,
    ) -> Result<(), CoreError> {
        // Sessions do not persist part receipts; ask the backend what it
        // has seen and assemble from that.
        let mut completed: Vec<CompletedPart> = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_parts()
                .bucket(&self.bucket)
                .key(key.as_str())
                .upload_id(upload_id);
            if let Some(m) = &marker {
                request = request.part_number_marker(m.clone());
            }
            let page = request
                .send()
                .await
                .map_err(|e| storage_err("list_parts", &e))?;

            for part in page.parts() {
                completed.push(
                    CompletedPart::builder()
                        .set_part_number(part.part_number())
                        .set_e_tag(part.e_tag().map(str::to_string))
                        .build(),
                );
            }
            if page.is_truncated().unwrap_or(false) {
                marker = page.next_part_number_marker().map(str::to_string);
            } else {
                break;
            }
        }

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key.as_str())
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| storage_err("complete_multipart_upload", &e))?;
        Ok(())
    }

    async fn abort_multipart(&self, key: &ObjectKey, upload_id: &str) -> Result<(), CoreError> {
        match self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key.as_str())
            .upload_id(upload_id)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            // Aborting an unknown upload is a no-op, not a failure.
            Err(e) if e.code() == Some("NoSuchUpload") => Ok(()),
            Err(e) => Err(storage_err("abort_multipart_upload", &e)),
        }
    }

    async fn ping(&self) -> Result<(), CoreError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| storage_err("head_bucket", &e))?;
        Ok(())
    }
}
