//! Shared application state
//!
//! One `AppState` is built at startup and cloned (cheaply, all `Arc`s)
//! into every handler. It owns the use cases, the rate limiter, the
//! single-use registry, and the breaker handles surfaced by `/ready`.

use std::sync::Arc;

use chrono::Duration;

use filedrop_core::config::Config;
use filedrop_core::ports::{
    IHashScheduler, ILinkSigner, IMetadataStore, IObjectStore, IPasswordHasher,
};
use filedrop_core::usecases::{
    CleanupPolicy, CleanupUseCase, DeleteFileUseCase, DownloadFileUseCase, IssueLinkUseCase,
    QuotaUseCase, ReserveUploadUseCase, ResumableUploadUseCase, UploadFileUseCase,
};

use crate::breaker::CircuitBreaker;
use crate::rate_limit::RateLimiter;
use crate::single_use::NonceRegistry;

/// Handler-facing application state
#[derive(Clone)]
pub struct AppState {
    pub reserve: Arc<ReserveUploadUseCase>,
    pub upload: Arc<UploadFileUseCase>,
    pub resumable: Arc<ResumableUploadUseCase>,
    pub links: Arc<IssueLinkUseCase>,
    pub download: Arc<DownloadFileUseCase>,
    pub delete: Arc<DeleteFileUseCase>,
    pub quota: Arc<QuotaUseCase>,
    pub cleanup: Arc<CleanupUseCase>,

    pub metadata: Arc<dyn IMetadataStore>,
    pub objects: Arc<dyn IObjectStore>,
    pub limiter: Arc<RateLimiter>,
    pub nonces: Arc<NonceRegistry>,

    pub metadata_breaker: Arc<CircuitBreaker>,
    pub object_breaker: Arc<CircuitBreaker>,

    pub trusted_proxy: bool,
}

impl AppState {
    /// Wires the use cases over already-decorated port objects
    ///
    /// `metadata` and `objects` are expected to carry their circuit
    /// breakers already; the breaker handles are passed separately so
    /// `/ready` can report them.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        metadata: Arc<dyn IMetadataStore>,
        objects: Arc<dyn IObjectStore>,
        signer: Arc<dyn ILinkSigner>,
        passwords: Arc<dyn IPasswordHasher>,
        scheduler: Arc<dyn IHashScheduler>,
        metadata_breaker: Arc<CircuitBreaker>,
        object_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let reserve = Arc::new(ReserveUploadUseCase::new(
            Arc::clone(&metadata),
            Arc::clone(&passwords),
            config.upload.max_upload_bytes,
            Duration::seconds(config.upload.dedup_window_secs as i64),
        ));
        let upload = Arc::new(UploadFileUseCase::new(
            Arc::clone(&metadata),
            Arc::clone(&objects),
            Arc::clone(&scheduler),
        ));
        let resumable = Arc::new(ResumableUploadUseCase::new(
            Arc::clone(&metadata),
            Arc::clone(&objects),
            Arc::clone(&scheduler),
            config.upload.session_chunk_bytes,
        ));
        let links = Arc::new(IssueLinkUseCase::new(
            Arc::clone(&metadata),
            Arc::clone(&signer),
            config.link_base_url(),
            Duration::seconds(config.security.max_link_ttl_secs as i64),
        ));
        let download = Arc::new(DownloadFileUseCase::new(
            Arc::clone(&metadata),
            Arc::clone(&objects),
            Arc::clone(&signer),
            Arc::clone(&passwords),
        ));
        let delete = Arc::new(DeleteFileUseCase::new(
            Arc::clone(&metadata),
            Arc::clone(&objects),
        ));
        let quota = Arc::new(QuotaUseCase::new(Arc::clone(&metadata)));
        let cleanup = Arc::new(CleanupUseCase::new(
            Arc::clone(&metadata),
            Arc::clone(&objects),
            CleanupPolicy {
                max_age: Duration::seconds(config.cleanup.max_age_secs as i64),
                orphan_sample: config.cleanup.orphan_sample,
            },
        ));

        Self {
            reserve,
            upload,
            resumable,
            links,
            download,
            delete,
            quota,
            cleanup,
            metadata,
            objects,
            limiter: Arc::new(RateLimiter::new(config.rate_limits.clone())),
            nonces: Arc::new(NonceRegistry::new()),
            metadata_breaker,
            object_breaker,
            trusted_proxy: config.server.trusted_proxy,
        }
    }
}
