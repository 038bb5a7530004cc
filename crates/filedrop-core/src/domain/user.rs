//! User domain entity
//!
//! The lifecycle engine consumes a minimal view of a user: identity,
//! storage quota, and the admin flag. Registration, verification, and
//! credential handling live outside the core.

use serde::{Deserialize, Serialize};

use super::newtypes::UserId;

/// Minimal principal view consumed by the core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    id: UserId,
    /// Byte budget across non-failed files; `None` means unlimited
    storage_quota_bytes: Option<u64>,
    is_admin: bool,
}

impl User {
    /// Creates a user view
    pub fn new(id: UserId, storage_quota_bytes: Option<u64>, is_admin: bool) -> Self {
        Self {
            id,
            storage_quota_bytes,
            is_admin,
        }
    }

    /// Returns the user id
    pub fn id(&self) -> UserId {
        self.id
    }

    /// Returns the storage quota, or `None` for unlimited
    pub fn storage_quota_bytes(&self) -> Option<u64> {
        self.storage_quota_bytes
    }

    /// Returns true for administrative principals
    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    /// Checks whether a reservation of `requested` bytes fits on top of
    /// `used` bytes of effective usage
    ///
    /// At exactly the limit only a zero-byte reservation is admitted.
    pub fn admits(&self, used: u64, requested: u64) -> bool {
        match self.storage_quota_bytes {
            None => true,
            Some(quota) => match used.checked_add(requested) {
                Some(total) => total <= quota,
                None => false,
            },
        }
    }
}

/// Current quota standing for a user, as returned by the quota read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaStanding {
    /// Sum of `size_bytes` over non-failed files
    pub used_bytes: u64,
    /// Configured budget; `None` means unlimited
    pub limit_bytes: Option<u64>,
}
