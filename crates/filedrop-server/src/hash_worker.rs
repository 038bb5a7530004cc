//! Hash worker: bounded queue, single-flight, retry with backoff
//!
//! Upload finalization enqueues file ids through [`HashQueue`] (the
//! [`IHashScheduler`] implementation); a supervised worker task drains
//! the queue and drives [`HashFileUseCase`]. Concurrent triggers for the
//! same file collapse onto one in-flight computation via a keyed
//! single-flight map. Transient failures retry up to three times with
//! exponential backoff; permanent outcomes are final.
//!
//! [`IHashScheduler`]: filedrop_core::ports::IHashScheduler

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use filedrop_core::domain::newtypes::FileId;
use filedrop_core::domain::CoreError;
use filedrop_core::ports::IHashScheduler;
use filedrop_core::usecases::{HashFileUseCase, RequestMeta};

/// Attempts per job; the first is not a retry
const MAX_ATTEMPTS: u32 = 3;

/// Backoff before attempt N+1: 1s, 4s, 16s
fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(4u64.pow(attempt.min(2)))
}

/// Producer half: a bounded queue with a small enqueue timeout
///
/// Overflow is an error; the caller reverts the freshly-stored file to
/// `failed` rather than blocking the upload response on a full queue.
pub struct HashQueue {
    tx: mpsc::Sender<FileId>,
    enqueue_timeout: Duration,
}

#[async_trait::async_trait]
impl IHashScheduler for HashQueue {
    async fn schedule(&self, file_id: FileId) -> Result<(), CoreError> {
        self.tx
            .send_timeout(file_id, self.enqueue_timeout)
            .await
            .map_err(|_| CoreError::Internal("hash queue full or shut down".into()))
    }
}

/// Consumer half: the supervised worker loop
pub struct HashWorker {
    rx: mpsc::Receiver<FileId>,
    usecase: Arc<HashFileUseCase>,
    in_flight: Arc<DashMap<FileId, ()>>,
    shutdown: CancellationToken,
}

/// Builds the queue/worker pair
pub fn hash_channel(
    usecase: Arc<HashFileUseCase>,
    depth: usize,
    enqueue_timeout: Duration,
    shutdown: CancellationToken,
) -> (Arc<HashQueue>, HashWorker) {
    let (tx, rx) = mpsc::channel(depth);
    (
        Arc::new(HashQueue {
            tx,
            enqueue_timeout,
        }),
        HashWorker {
            rx,
            usecase,
            in_flight: Arc::new(DashMap::new()),
            shutdown,
        },
    )
}

impl HashWorker {
    /// Runs until cancellation, then drains what is already queued
    ///
    /// Jobs run concurrently; the single-flight map collapses duplicate
    /// ids onto the computation already running.
    pub async fn run(mut self) {
        tracing::info!("hash worker started");
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                job = self.rx.recv() => match job {
                    Some(file_id) => self.spawn_job(file_id),
                    None => break,
                },
            }
        }

        // Drain: producers error out once the channel closes, but jobs
        // already accepted still deserve their digest.
        self.rx.close();
        while let Some(file_id) = self.rx.recv().await {
            self.spawn_job(file_id);
        }
        tracing::info!("hash worker stopped");
    }

    fn spawn_job(&self, file_id: FileId) {
        // Single-flight: a concurrent trigger for the same file is a
        // duplicate, not new work.
        if self.in_flight.insert(file_id, ()).is_some() {
            tracing::debug!(%file_id, "hash already in flight, collapsing");
            return;
        }
        let usecase = Arc::clone(&self.usecase);
        let in_flight = Arc::clone(&self.in_flight);
        tokio::spawn(async move {
            run_job(usecase, file_id).await;
            in_flight.remove(&file_id);
        });
    }
}

/// One job: up to [`MAX_ATTEMPTS`] attempts with exponential backoff
async fn run_job(usecase: Arc<HashFileUseCase>, file_id: FileId) {
    let meta = RequestMeta::internal();
    for attempt in 0..MAX_ATTEMPTS {
        match usecase.execute(file_id, &meta).await {
            Ok(outcome) => {
                tracing::debug!(%file_id, ?outcome, "hash job finished");
                return;
            }
            Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                let delay = backoff(attempt);
                tracing::warn!(
                    %file_id,
                    attempt = attempt + 1,
                    delay_secs = delay.as_secs(),
                    error = %e,
                    "transient hash failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                // Out of retries (or permanent): leave the file in
                // `stored` for a later manual or reaper-driven retry.
                tracing::error!(%file_id, error = %e, "hash job gave up");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_progression() {
        assert_eq!(backoff(0), Duration::from_secs(1));
        assert_eq!(backoff(1), Duration::from_secs(4));
        assert_eq!(backoff(2), Duration::from_secs(16));
        // Clamped beyond the schedule.
        assert_eq!(backoff(9), Duration::from_secs(16));
    }
}
