//! Per-identity rate limiting using the token bucket algorithm
//!
//! Each identity owns an independent bucket. Refill is computed lazily at
//! check time from the elapsed time, so no background task is needed.

use crate::config::RateLimitSettings;
use crate::errors::{AppError, Result};
use crate::metrics;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Token bucket parameters
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum tokens per identity
    pub capacity: u32,
    /// Tokens added per second
    pub refill_per_second: f64,
    /// When disabled every request is admitted
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_per_second: 1.0,
            enabled: true,
        }
    }
}

impl From<&RateLimitSettings> for RateLimitConfig {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            capacity: settings.capacity,
            refill_per_second: settings.refill_per_second,
            enabled: settings.enabled,
        }
    }
}

/// Successful admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admitted {
    /// Whole tokens left in the bucket after this request
    pub remaining: u32,
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(capacity: u32, now: Instant) -> Self {
        Self {
            tokens: f64::from(capacity),
            last_refill: now,
        }
    }

    /// Add `elapsed * rate` tokens, capped at capacity
    fn refill(&mut self, now: Instant, rate: f64, capacity: u32) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(f64::from(capacity));
        self.last_refill = now;
    }
}

/// Token-bucket admission control keyed by caller identity
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Create a new limiter
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        if config.capacity == 0 {
            return Err(AppError::configuration("rate limit capacity must be at least 1"));
        }
        if !(config.refill_per_second.is_finite() && config.refill_per_second > 0.0) {
            return Err(AppError::configuration("rate limit refill rate must be positive")
                .with_context("refill_per_second", config.refill_per_second));
        }

        Ok(Self {
            buckets: DashMap::new(),
            config,
        })
    }

    /// Withdraw one token for `identity`
    ///
    /// The bucket entry stays locked for the whole refill-and-withdraw step,
    /// so concurrent callers for the same identity never lose updates.
    pub fn check_rate_limit(&self, identity: &str) -> Result<Admitted> {
        if !self.config.enabled {
            return Ok(Admitted {
                remaining: self.config.capacity,
            });
        }

        let now = Instant::now();
        let capacity = self.config.capacity;
        let rate = self.config.refill_per_second;

        let mut bucket = self
            .buckets
            .entry(identity.to_string())
            .or_insert_with(|| Bucket::full(capacity, now));
        bucket.refill(now, rate, capacity);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            let remaining = bucket.tokens.floor() as u32;
            drop(bucket);

            debug!(identity, remaining, "Rate limit admitted");
            metrics::record_rate_limit(true);
            Ok(Admitted { remaining })
        } else {
            let retry_after_secs = (1.0 - bucket.tokens) / rate;
            drop(bucket);

            warn!(identity, retry_after_secs, "Rate limit exceeded");
            metrics::record_rate_limit(false);
            Err(AppError::rate_limited(identity, retry_after_secs))
        }
    }

    /// Whole tokens currently available to `identity`, without consuming any
    pub fn get_remaining(&self, identity: &str) -> u32 {
        if !self.config.enabled {
            return self.config.capacity;
        }

        match self.buckets.get(identity) {
            Some(bucket) => {
                let mut snapshot = *bucket;
                drop(bucket);
                snapshot.refill(Instant::now(), self.config.refill_per_second, self.config.capacity);
                snapshot.tokens.floor() as u32
            }
            None => self.config.capacity,
        }
    }

    /// Number of identities with a bucket
    pub fn tracked_identities(&self) -> usize {
        self.buckets.len()
    }

    /// Drop buckets that have refilled to capacity, returning how many were dropped
    ///
    /// A full bucket behaves exactly like a missing one, so removal never
    /// changes an admission decision.
    pub fn cleanup_idle(&self) -> usize {
        let now = Instant::now();
        let capacity = self.config.capacity;
        let rate = self.config.refill_per_second;

        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            bucket.refill(now, rate, capacity);
            bucket.tokens < f64::from(capacity)
        });
        let removed = before.saturating_sub(self.buckets.len());

        if removed > 0 {
            debug!(removed, remaining = self.buckets.len(), "Idle rate limit buckets removed");
        }
        removed
    }

    /// Forget `identity`, returning whether it had a bucket
    pub fn delete(&self, identity: &str) -> bool {
        self.buckets.remove(identity).is_some()
    }
}
