//! Hash scheduling port (driving/primary port boundary)
//!
//! Upload finalization hands files to the hash worker through this
//! interface. The queue behind it is bounded: producers wait at most a
//! small timeout and treat overflow as an error, which reverts the
//! freshly-stored file to `failed` rather than leaving it stuck in
//! `stored` with no worker coming.

use crate::domain::newtypes::FileId;
use crate::domain::CoreError;

/// Port trait for enqueueing hash jobs
#[async_trait::async_trait]
pub trait IHashScheduler: Send + Sync {
    /// Enqueues `file_id` for digesting
    ///
    /// # Errors
    ///
    /// Returns an error when the queue is full after the bounded wait or
    /// the worker has shut down.
    async fn schedule(&self, file_id: FileId) -> Result<(), CoreError>;
}
