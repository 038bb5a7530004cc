//! Per-principal, per-endpoint-class rate limiting
//!
//! Classic token buckets: tokens are consumed on each request and
//! refilled at a constant rate. Buckets are keyed by (principal,
//! endpoint class) and created lazily; there is no queueing - a request
//! that finds no token is rejected with retry-after metadata.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use filedrop_core::config::RateLimitsConfig;

/// Endpoint classes with independent budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    /// Session/credential endpoints
    Auth,
    /// Reservation and body ingestion
    Upload,
    /// Token-gated downloads
    Download,
    /// Administrative operations
    Admin,
    /// Everything else
    Default,
}

impl EndpointClass {
    /// Name used in logs and rejection bodies
    pub fn name(&self) -> &'static str {
        match self {
            EndpointClass::Auth => "auth",
            EndpointClass::Upload => "upload",
            EndpointClass::Download => "download",
            EndpointClass::Admin => "admin",
            EndpointClass::Default => "default",
        }
    }
}

/// Internal mutable state for a token bucket, protected by a Mutex
#[derive(Debug)]
struct TokenBucketInner {
    /// Current number of available tokens (fractional for smooth refill)
    tokens: f64,
    /// Timestamp of the last refill calculation
    last_refill: Instant,
}

/// Token bucket for one (principal, class) pair
///
/// Starts full at `burst` tokens and refills at `refill_rate` tokens per
/// second up to `burst`.
#[derive(Debug)]
pub struct TokenBucket {
    burst: u32,
    refill_rate: f64,
    inner: Mutex<TokenBucketInner>,
}

impl TokenBucket {
    /// Creates a bucket with the given burst capacity and refill rate
    pub fn new(burst: u32, refill_rate: f64) -> Self {
        Self {
            burst,
            refill_rate,
            inner: Mutex::new(TokenBucketInner {
                tokens: burst as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Attempts to take one token
    ///
    /// Returns `Ok(())` on success, or the duration until a token will
    /// be available.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut inner = self.inner.lock().expect("rate limit bucket poisoned");

        // Refill based on elapsed time, capped at burst.
        let now = Instant::now();
        let elapsed = now.duration_since(inner.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            inner.tokens = (inner.tokens + elapsed * self.refill_rate).min(self.burst as f64);
            inner.last_refill = now;
        }

        if inner.tokens >= 1.0 {
            inner.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - inner.tokens;
            Err(Duration::from_secs_f64(missing / self.refill_rate))
        }
    }
}

/// Lazily-populated registry of buckets keyed by (principal, class)
pub struct RateLimiter {
    config: RateLimitsConfig,
    buckets: DashMap<(String, EndpointClass), TokenBucket>,
}

impl RateLimiter {
    /// Creates a limiter over the configured class budgets
    pub fn new(config: RateLimitsConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    /// (burst, refill per second) for a class
    fn class_params(&self, class: EndpointClass) -> (u32, f64) {
        const MINUTE: f64 = 60.0;
        const HOUR: f64 = 3600.0;
        match class {
            EndpointClass::Auth => (self.config.auth_burst, self.config.auth_per_min as f64 / MINUTE),
            EndpointClass::Upload => (
                self.config.upload_burst,
                self.config.upload_per_hour as f64 / HOUR,
            ),
            EndpointClass::Download => (
                self.config.download_burst,
                self.config.download_per_hour as f64 / HOUR,
            ),
            EndpointClass::Admin => (
                self.config.admin_burst,
                self.config.admin_per_min as f64 / MINUTE,
            ),
            EndpointClass::Default => (
                self.config.default_burst,
                self.config.default_per_min as f64 / MINUTE,
            ),
        }
    }

    /// Takes one token for `principal` in `class`
    ///
    /// Returns the retry-after duration when the bucket is empty.
    pub fn check(&self, principal: &str, class: EndpointClass) -> Result<(), Duration> {
        let key = (principal.to_string(), class);
        let bucket = self.buckets.entry(key).or_insert_with(|| {
            let (burst, rate) = self.class_params(class);
            TokenBucket::new(burst, rate)
        });
        bucket.try_acquire()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_reject() {
        let bucket = TokenBucket::new(3, 1.0 / 60.0);
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());

        let retry_after = bucket.try_acquire().unwrap_err();
        assert!(retry_after > Duration::from_secs(30));
    }

    #[test]
    fn test_refill_restores_tokens() {
        // 10 tokens per second for a fast test.
        let bucket = TokenBucket::new(1, 10.0);
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_err());
        std::thread::sleep(Duration::from_millis(150));
        assert!(bucket.try_acquire().is_ok());
    }

    #[test]
    fn test_principals_are_isolated() {
        let limiter = RateLimiter::new(RateLimitsConfig {
            upload_burst: 1,
            upload_per_hour: 1,
            ..RateLimitsConfig::default()
        });
        assert!(limiter.check("alice", EndpointClass::Upload).is_ok());
        assert!(limiter.check("alice", EndpointClass::Upload).is_err());
        // Bob has his own bucket.
        assert!(limiter.check("bob", EndpointClass::Upload).is_ok());
    }

    #[test]
    fn test_classes_are_isolated() {
        let limiter = RateLimiter::new(RateLimitsConfig {
            upload_burst: 1,
            upload_per_hour: 1,
            ..RateLimitsConfig::default()
        });
        assert!(limiter.check("alice", EndpointClass::Upload).is_ok());
        assert!(limiter.check("alice", EndpointClass::Upload).is_err());
        // Exhausting upload does not touch download.
        assert!(limiter.check("alice", EndpointClass::Download).is_ok());
    }

    #[test]
    fn test_defaults_match_published_budgets() {
        let config = RateLimitsConfig::default();
        assert_eq!(config.auth_per_min, 10);
        assert_eq!(config.upload_per_hour, 20);
        assert_eq!(config.upload_burst, 5);
        assert_eq!(config.download_per_hour, 100);
        assert_eq!(config.admin_per_min, 50);
        assert_eq!(config.default_per_min, 100);
    }
}
