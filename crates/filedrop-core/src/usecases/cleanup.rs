//! Cleanup (reaper) use case
//!
//! One sweep over the stores: expired files, abandoned `pending` rows,
//! aged-out `failed` rows, terminal sessions, and a sampled orphan scan.
//! Every deletion is idempotent and tolerates "not found" on either
//! store, so running a sweep twice back-to-back is a no-op the second
//! time. The advisory lease that keeps replicas from sweeping in
//! parallel is taken by the caller, not here.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use crate::domain::{AuditEntry, AuditEvent, CoreError, FileRecord, FileState};
use crate::ports::{IMetadataStore, IObjectStore};

use super::{audit_best_effort, RequestMeta};

/// Rows handled per category per sweep. Bounded so a huge backlog cannot
/// hold the reaper lease for an entire interval.
const SWEEP_BATCH: u32 = 500;

/// Reaper timing policy
#[derive(Debug, Clone, Copy)]
pub struct CleanupPolicy {
    /// Age after which `pending` rows are considered abandoned
    pub max_age: Duration,
    /// Objects sampled per pass by the orphan scan; 0 disables it
    pub orphan_sample: usize,
}

impl CleanupPolicy {
    /// `failed` rows are purged after seven times the pending max age
    pub fn failed_retention(&self) -> Duration {
        self.max_age * 7
    }

    /// Terminal sessions are pruned after seven days
    pub fn session_retention(&self) -> Duration {
        Duration::days(7)
    }
}

/// Counters for one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub expired_removed: u64,
    pub pending_failed: u64,
    pub failed_purged: u64,
    pub sessions_pruned: u64,
    pub orphans_removed: u64,
}

/// Use case for the periodic cleanup pass
pub struct CleanupUseCase {
    metadata: Arc<dyn IMetadataStore>,
    objects: Arc<dyn IObjectStore>,
    policy: CleanupPolicy,
}

impl CleanupUseCase {
    /// Creates the use case with its collaborators and policy
    pub fn new(
        metadata: Arc<dyn IMetadataStore>,
        objects: Arc<dyn IObjectStore>,
        policy: CleanupPolicy,
    ) -> Self {
        Self {
            metadata,
            objects,
            policy,
        }
    }

    /// Runs one sweep as of `now`
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepSummary, CoreError> {
        let mut summary = SweepSummary::default();
        let meta = RequestMeta::internal();

        // Step 1: expired files with auto_delete
        for file in self.metadata.expired_files(now, SWEEP_BATCH).await? {
            if self.remove_file(&file).await {
                summary.expired_removed += 1;
            }
        }

        // Step 2: abandoned pending rows -> failed (purged later by step 3)
        let pending_cutoff = now - self.policy.max_age;
        for file in self
            .metadata
            .stale_files_in_state(FileState::Pending, pending_cutoff, SWEEP_BATCH)
            .await?
        {
            // A partial object may exist if the uploader died mid-stream.
            if let Err(e) = self.objects.delete(file.object_key()).await {
                tracing::warn!(file_id = %file.id(), error = %e, "partial object delete failed");
            }
            match self
                .metadata
                .transition_state(file.id(), FileState::Pending, FileState::Failed)
                .await
            {
                Ok(true) => summary.pending_failed += 1,
                Ok(false) => {} // raced with the uploader; leave it be
                Err(e) => tracing::warn!(file_id = %file.id(), error = %e, "failed to expire pending row"),
            }
        }

        // Step 3: aged-out failed rows
        let failed_cutoff = now - self.policy.failed_retention();
        for file in self
            .metadata
            .stale_files_in_state(FileState::Failed, failed_cutoff, SWEEP_BATCH)
            .await?
        {
            if self.remove_file(&file).await {
                summary.failed_purged += 1;
            }
        }

        // Step 4: terminal resumable sessions
        let session_cutoff = now - self.policy.session_retention();
        summary.sessions_pruned = self.metadata.prune_terminal_sessions(session_cutoff).await?;

        // Step 5: sampled orphan scan
        if self.policy.orphan_sample > 0 {
            summary.orphans_removed = self.orphan_scan().await?;
        }

        let entry = AuditEntry::new(AuditEvent::ReaperSweep, meta.correlation_id).with_metadata(
            json!({
                "expired_removed": summary.expired_removed,
                "pending_failed": summary.pending_failed,
                "failed_purged": summary.failed_purged,
                "sessions_pruned": summary.sessions_pruned,
                "orphans_removed": summary.orphans_removed,
            }),
        );
        audit_best_effort(&self.metadata, entry).await;

        tracing::info!(
            expired = summary.expired_removed,
            pending_failed = summary.pending_failed,
            failed_purged = summary.failed_purged,
            sessions = summary.sessions_pruned,
            orphans = summary.orphans_removed,
            "reaper sweep complete"
        );
        Ok(summary)
    }

    /// Row first, then object; both tolerate concurrent removal
    async fn remove_file(&self, file: &FileRecord) -> bool {
        match self.metadata.delete_file(file.id()).await {
            Ok(Some(key)) => {
                if let Err(e) = self.objects.delete(&key).await {
                    tracing::warn!(file_id = %file.id(), key = %key, error = %e, "object delete deferred to orphan scan");
                }
                true
            }
            Ok(None) => false, // already gone
            Err(e) => {
                tracing::warn!(file_id = %file.id(), error = %e, "row delete failed");
                false
            }
        }
    }

    /// Samples object keys and deletes those no non-failed row references
    ///
    /// Safe against in-flight uploads because the `pending` row always
    /// commits before the first object byte is written.
    async fn orphan_scan(&self) -> Result<u64, CoreError> {
        let mut removed = 0;
        for key in self.objects.sample_keys(self.policy.orphan_sample).await? {
            match self.metadata.file_exists_for_object(&key).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!(%key, "removing orphaned object");
                    if self.objects.delete(&key).await.is_ok() {
                        removed += 1;
                    }
                }
                Err(e) => tracing::warn!(%key, error = %e, "orphan check failed"),
            }
        }
        Ok(removed)
    }
}
