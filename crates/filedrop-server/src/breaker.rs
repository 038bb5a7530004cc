//! Circuit breakers for the backing stores
//!
//! A breaker trips after a threshold of transient failures inside a
//! rolling window and converts further calls into fast failures until a
//! half-open probe succeeds. Only transient errors count: a quota
//! refusal or a state conflict says nothing about dependency health.
//!
//! The breakers wrap the port objects as decorators, so neither the core
//! nor the adapters know they exist.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};

use filedrop_core::domain::newtypes::{FileId, ObjectKey, SessionId, UserId};
use filedrop_core::domain::{
    AuditEntry, CoreError, DigestHex, FileRecord, FileState, ResumableSession, User,
};
use filedrop_core::ports::{
    ByteStream, IMetadataStore, IObjectStore, ObjectDownload, ObjectMeta, ReserveOutcome,
};

/// Breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    /// Fast-failing until the cooldown elapses
    Open { until: Instant },
    /// One probe in flight; success closes, failure re-opens
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    /// Timestamps of recent transient failures
    failures: VecDeque<Instant>,
}

/// Rolling-window circuit breaker
pub struct CircuitBreaker {
    name: &'static str,
    threshold: usize,
    window: Duration,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a breaker that opens after `threshold` transient failures
    /// within `window`, fast-failing for `cooldown` before probing
    pub fn new(name: &'static str, threshold: usize, window: Duration, cooldown: Duration) -> Self {
        Self {
            name,
            threshold,
            window,
            cooldown,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: VecDeque::new(),
            }),
        }
    }

    /// The 5-failures-in-30s policy used for both stores
    pub fn for_store(name: &'static str) -> Self {
        Self::new(name, 5, Duration::from_secs(30), Duration::from_secs(30))
    }

    /// Returns true when a call may proceed (closed, or half-open probe)
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open { until } => {
                if Instant::now() >= until {
                    inner.state = BreakerState::HalfOpen;
                    tracing::info!(breaker = self.name, "circuit half-open, probing");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Records a successful call, closing the circuit
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        if inner.state != BreakerState::Closed {
            tracing::info!(breaker = self.name, "circuit closed");
        }
        inner.state = BreakerState::Closed;
        inner.failures.clear();
    }

    /// Records a transient failure, possibly opening the circuit
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker poisoned");
        let now = Instant::now();

        if inner.state == BreakerState::HalfOpen {
            // The probe failed; back to fast-failing.
            inner.state = BreakerState::Open {
                until: now + self.cooldown,
            };
            tracing::warn!(breaker = self.name, "probe failed, circuit re-opened");
            return;
        }

        inner.failures.push_back(now);
        while let Some(oldest) = inner.failures.front() {
            if now.duration_since(*oldest) > self.window {
                inner.failures.pop_front();
            } else {
                break;
            }
        }
        if inner.failures.len() >= self.threshold {
            inner.state = BreakerState::Open {
                until: now + self.cooldown,
            };
            tracing::warn!(
                breaker = self.name,
                failures = inner.failures.len(),
                "circuit opened"
            );
        }
    }

    /// Returns true when calls are currently fast-failed
    pub fn is_open(&self) -> bool {
        let inner = self.inner.lock().expect("breaker poisoned");
        matches!(inner.state, BreakerState::Open { until } if Instant::now() < until)
    }

    /// Classifies a call result: transient errors trip the breaker,
    /// business outcomes close it like successes do
    fn observe<T>(&self, result: Result<T, CoreError>) -> Result<T, CoreError> {
        match &result {
            Err(e) if e.is_transient() => self.record_failure(),
            _ => self.record_success(),
        }
        result
    }

    fn fast_fail(&self) -> CoreError {
        match self.name {
            "metadata" => CoreError::MetadataUnavailable("circuit open".into()),
            _ => CoreError::StorageUnavailable("circuit open".into()),
        }
    }
}

// ============================================================================
// Port decorators
// ============================================================================

/// Object store decorated with a circuit breaker
pub struct BreakeredObjectStore {
    inner: Arc<dyn IObjectStore>,
    breaker: Arc<CircuitBreaker>,
}

impl BreakeredObjectStore {
    pub fn new(inner: Arc<dyn IObjectStore>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }
}

macro_rules! guarded {
    ($self:ident, $call:expr) => {{
        if !$self.breaker.allow() {
            return Err($self.breaker.fast_fail());
        }
        $self.breaker.observe($call.await)
    }};
}

#[async_trait::async_trait]
impl IObjectStore for BreakeredObjectStore {
    async fn put(&self, key: &ObjectKey, stream: ByteStream) -> Result<u64, CoreError> {
        guarded!(self, self.inner.put(key, stream))
    }

    async fn get(&self, key: &ObjectKey) -> Result<ObjectDownload, CoreError> {
        guarded!(self, self.inner.get(key))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), CoreError> {
        guarded!(self, self.inner.delete(key))
    }

    async fn stat(&self, key: &ObjectKey) -> Result<Option<ObjectMeta>, CoreError> {
        guarded!(self, self.inner.stat(key))
    }

    async fn sample_keys(&self, limit: usize) -> Result<Vec<ObjectKey>, CoreError> {
        guarded!(self, self.inner.sample_keys(limit))
    }

    async fn create_multipart(&self, key: &ObjectKey) -> Result<String, CoreError> {
        guarded!(self, self.inner.create_multipart(key))
    }

    async fn upload_part(
        &self,
        key: &ObjectKey,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<(), CoreError> {
        guarded!(self, self.inner.upload_part(key, upload_id, part_number, data))
    }

    async fn complete_multipart(
        &self,
        key: &ObjectKey,
        upload_id: &str,
    ) -> Result<(), CoreError> {
        guarded!(self, self.inner.complete_multipart(key, upload_id))
    }

    async fn abort_multipart(&self, key: &ObjectKey, upload_id: &str) -> Result<(), CoreError> {
        guarded!(self, self.inner.abort_multipart(key, upload_id))
    }

    async fn ping(&self) -> Result<(), CoreError> {
        guarded!(self, self.inner.ping())
    }
}

/// Metadata store decorated with a circuit breaker
pub struct BreakeredMetadataStore {
    inner: Arc<dyn IMetadataStore>,
    breaker: Arc<CircuitBreaker>,
}

impl BreakeredMetadataStore {
    pub fn new(inner: Arc<dyn IMetadataStore>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }
}

#[async_trait::async_trait]
impl IMetadataStore for BreakeredMetadataStore {
    async fn reserve_file(
        &self,
        file: &FileRecord,
        owner: &User,
        dedup_window: chrono::Duration,
    ) -> Result<ReserveOutcome, CoreError> {
        guarded!(self, self.inner.reserve_file(file, owner, dedup_window))
    }

    async fn get_file(&self, id: FileId) -> Result<Option<FileRecord>, CoreError> {
        guarded!(self, self.inner.get_file(id))
    }

    async fn transition_state(
        &self,
        id: FileId,
        from: FileState,
        to: FileState,
    ) -> Result<bool, CoreError> {
        guarded!(self, self.inner.transition_state(id, from, to))
    }

    async fn record_digest(
        &self,
        id: FileId,
        digest: &DigestHex,
        digest_bytes: u64,
    ) -> Result<bool, CoreError> {
        guarded!(self, self.inner.record_digest(id, digest, digest_bytes))
    }

    async fn delete_file(&self, id: FileId) -> Result<Option<ObjectKey>, CoreError> {
        guarded!(self, self.inner.delete_file(id))
    }

    async fn record_download(&self, id: FileId, at: DateTime<Utc>) -> Result<(), CoreError> {
        guarded!(self, self.inner.record_download(id, at))
    }

    async fn file_exists_for_object(&self, key: &ObjectKey) -> Result<bool, CoreError> {
        guarded!(self, self.inner.file_exists_for_object(key))
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, CoreError> {
        guarded!(self, self.inner.get_user(id))
    }

    async fn upsert_user(&self, user: &User) -> Result<(), CoreError> {
        guarded!(self, self.inner.upsert_user(user))
    }

    async fn usage_for(&self, user: UserId) -> Result<u64, CoreError> {
        guarded!(self, self.inner.usage_for(user))
    }

    async fn insert_session(&self, session: &ResumableSession) -> Result<(), CoreError> {
        guarded!(self, self.inner.insert_session(session))
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<ResumableSession>, CoreError> {
        guarded!(self, self.inner.get_session(id))
    }

    async fn update_session(&self, session: &ResumableSession) -> Result<(), CoreError> {
        guarded!(self, self.inner.update_session(session))
    }

    async fn prune_terminal_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64, CoreError> {
        guarded!(self, self.inner.prune_terminal_sessions(cutoff))
    }

    async fn expired_files(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<FileRecord>, CoreError> {
        guarded!(self, self.inner.expired_files(now, limit))
    }

    async fn stale_files_in_state(
        &self,
        state: FileState,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<FileRecord>, CoreError> {
        guarded!(self, self.inner.stale_files_in_state(state, cutoff, limit))
    }

    async fn acquire_reaper_lease(
        &self,
        holder: &str,
        ttl: chrono::Duration,
    ) -> Result<bool, CoreError> {
        guarded!(self, self.inner.acquire_reaper_lease(holder, ttl))
    }

    async fn release_reaper_lease(&self, holder: &str) -> Result<(), CoreError> {
        guarded!(self, self.inner.release_reaper_lease(holder))
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), CoreError> {
        guarded!(self, self.inner.append_audit(entry))
    }

    async fn ping(&self) -> Result<(), CoreError> {
        guarded!(self, self.inner.ping())
    }
}
