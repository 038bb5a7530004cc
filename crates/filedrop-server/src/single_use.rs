//! Single-use link registry
//!
//! Single-use is a per-link opt-in: issuing such a link arms its nonce
//! here, and the first successful download consumes it. The registry is
//! a bounded in-process TTL set - entries never outlive their token, so
//! a restart can only make a single-use link unusable, never reusable
//! beyond its expiry.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Sweep the expired entries once the map grows past this
const PRUNE_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NonceState {
    Armed,
    Consumed,
}

struct NonceEntry {
    state: NonceState,
    /// Token expiry; the entry is garbage after this
    expires_at: DateTime<Utc>,
}

/// Outcome of presenting a nonce at download time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Not a single-use link; nothing to enforce
    NotSingleUse,
    /// First presentation; the download may proceed
    Consumed,
    /// The link was already used
    AlreadyConsumed,
}

/// In-process registry of armed and consumed nonces
#[derive(Default)]
pub struct NonceRegistry {
    entries: DashMap<[u8; 16], NonceEntry>,
}

impl NonceRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `nonce` as single-use until `expires_at`
    pub fn arm(&self, nonce: [u8; 16], expires_at: DateTime<Utc>) {
        self.maybe_prune();
        self.entries.insert(
            nonce,
            NonceEntry {
                state: NonceState::Armed,
                expires_at,
            },
        );
    }

    /// Presents `nonce` for consumption
    ///
    /// Atomic per nonce: of two concurrent presentations exactly one
    /// observes `Consumed`.
    pub fn consume(&self, nonce: &[u8; 16]) -> ConsumeOutcome {
        match self.entries.get_mut(nonce) {
            None => ConsumeOutcome::NotSingleUse,
            Some(mut entry) => match entry.state {
                NonceState::Armed => {
                    entry.state = NonceState::Consumed;
                    ConsumeOutcome::Consumed
                }
                NonceState::Consumed => ConsumeOutcome::AlreadyConsumed,
            },
        }
    }

    /// Number of live entries; test helper
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no entries are armed or consumed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops expired entries once the map is large enough to care
    fn maybe_prune(&self) {
        if self.entries.len() < PRUNE_THRESHOLD {
            return;
        }
        let now = Utc::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }
}
