//! Cleanup reaper loop
//!
//! Periodically runs the cleanup sweep while holding the advisory
//! database lease, so at most one replica sweeps at a time. A missed
//! lease is not an error: another replica is doing the work.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use filedrop_core::ports::IMetadataStore;
use filedrop_core::usecases::CleanupUseCase;

/// Lease TTL; generous against one sweep's runtime so a crashed holder
/// expires rather than wedging cleanup forever
const LEASE_TTL_SECS: i64 = 10 * 60;

/// The reaper task
pub struct Reaper {
    usecase: Arc<CleanupUseCase>,
    metadata: Arc<dyn IMetadataStore>,
    interval: Duration,
    /// Unique per process; the lease records who holds it
    holder: String,
    shutdown: CancellationToken,
}

impl Reaper {
    /// Creates a reaper sweeping every `interval`
    pub fn new(
        usecase: Arc<CleanupUseCase>,
        metadata: Arc<dyn IMetadataStore>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            usecase,
            metadata,
            interval,
            holder: format!("reaper-{}", Uuid::new_v4()),
            shutdown,
        }
    }

    /// Runs sweeps until cancelled
    pub async fn run(self) {
        tracing::info!(holder = %self.holder, interval_secs = self.interval.as_secs(), "reaper started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; a fresh deployment should
        // clean up promptly after a crash.
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => self.sweep_once().await,
            }
        }
        tracing::info!(holder = %self.holder, "reaper stopped");
    }

    async fn sweep_once(&self) {
        let acquired = match self
            .metadata
            .acquire_reaper_lease(&self.holder, chrono::Duration::seconds(LEASE_TTL_SECS))
            .await
        {
            Ok(acquired) => acquired,
            Err(e) => {
                tracing::warn!(error = %e, "lease acquisition failed, skipping sweep");
                return;
            }
        };
        if !acquired {
            tracing::debug!("another replica holds the reaper lease");
            return;
        }

        if let Err(e) = self.usecase.sweep(Utc::now()).await {
            tracing::error!(error = %e, "reaper sweep failed");
        }

        if let Err(e) = self.metadata.release_reaper_lease(&self.holder).await {
            tracing::warn!(error = %e, "lease release failed; it will expire on its own");
        }
    }
}
