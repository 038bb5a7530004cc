//! Filedrop server
//!
//! Wires the hexagonal core to its adapters and exposes the HTTP API:
//! - axum router with per-class rate limiting and correlation ids
//! - bounded hash worker with single-flight and retry/backoff
//! - periodic cleanup reaper behind an advisory database lease
//! - circuit breakers decorating both stores
//!
//! The binary in `main.rs` owns process concerns (config, logging,
//! signals, exit codes); everything here is also driven directly by the
//! integration tests.

pub mod auth;
pub mod breaker;
pub mod error;
pub mod hash_worker;
pub mod rate_limit;
pub mod reaper;
pub mod routes;
pub mod single_use;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use filedrop_core::config::Config;
use filedrop_core::ports::{IMetadataStore, IObjectStore};
use filedrop_core::usecases::HashFileUseCase;
use filedrop_object::Sha256DigestProvider;
use filedrop_token::{Argon2PasswordHasher, HmacLinkSigner};

use breaker::{BreakeredMetadataStore, BreakeredObjectStore, CircuitBreaker};
use hash_worker::{hash_channel, HashWorker};
use reaper::Reaper;
use state::AppState;

/// A fully-wired application, ready to serve and to run its workers
pub struct App {
    pub state: AppState,
    pub hash_worker: HashWorker,
    pub reaper: Option<Reaper>,
    pub shutdown: CancellationToken,
}

/// Builds the application over raw (undecorated) store adapters
///
/// The config must already be validated; secrets reach the signer as-is.
pub fn build_app(
    config: &Config,
    raw_metadata: Arc<dyn IMetadataStore>,
    raw_objects: Arc<dyn IObjectStore>,
) -> App {
    let shutdown = CancellationToken::new();

    let metadata_breaker = Arc::new(CircuitBreaker::for_store("metadata"));
    let object_breaker = Arc::new(CircuitBreaker::for_store("object"));
    let metadata: Arc<dyn IMetadataStore> = Arc::new(BreakeredMetadataStore::new(
        raw_metadata,
        Arc::clone(&metadata_breaker),
    ));
    let objects: Arc<dyn IObjectStore> = Arc::new(BreakeredObjectStore::new(
        raw_objects,
        Arc::clone(&object_breaker),
    ));

    let signer = Arc::new(HmacLinkSigner::new(
        config.security.download_signing_secret.as_bytes().to_vec(),
    ));
    let passwords = Arc::new(Argon2PasswordHasher::new());
    let digests = Arc::new(Sha256DigestProvider::new());

    let hash_usecase = Arc::new(HashFileUseCase::new(
        Arc::clone(&metadata),
        Arc::clone(&objects),
        digests,
    ));
    let (scheduler, hash_worker) = hash_channel(
        hash_usecase,
        config.upload.hash_queue_depth,
        Duration::from_secs(config.upload.hash_enqueue_timeout_secs),
        shutdown.clone(),
    );

    let state = AppState::new(
        config,
        Arc::clone(&metadata),
        objects,
        signer,
        passwords,
        scheduler,
        metadata_breaker,
        object_breaker,
    );

    let reaper = config.cleanup.enabled.then(|| {
        Reaper::new(
            Arc::clone(&state.cleanup),
            metadata,
            Duration::from_secs(config.cleanup.interval_secs),
            shutdown.clone(),
        )
    });

    App {
        state,
        hash_worker,
        reaper,
        shutdown,
    }
}
