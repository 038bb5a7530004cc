//! Quota read use case
//!
//! Effective usage is the SUM of `size_bytes` over non-failed files.
//! The read is eventually consistent with respect to in-flight uploads;
//! enforcement happens only at reservation time.

use std::sync::Arc;

use crate::domain::{CoreError, QuotaStanding, User};
use crate::ports::IMetadataStore;

/// Use case for reading a user's quota standing
pub struct QuotaUseCase {
    metadata: Arc<dyn IMetadataStore>,
}

impl QuotaUseCase {
    /// Creates the use case with its collaborator
    pub fn new(metadata: Arc<dyn IMetadataStore>) -> Self {
        Self { metadata }
    }

    /// Returns `{used, limit}` for `principal`
    pub async fn execute(&self, principal: &User) -> Result<QuotaStanding, CoreError> {
        let used_bytes = self.metadata.usage_for(principal.id()).await?;
        Ok(QuotaStanding {
            used_bytes,
            limit_bytes: principal.storage_quota_bytes(),
        })
    }
}
