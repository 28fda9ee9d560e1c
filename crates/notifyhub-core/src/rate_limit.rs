//! Token-bucket rate limiter (§4.4): one bucket per platform, created
//! lazily on first use and guarded by `DashMap`'s per-shard locking (the
//! "double-checked lazy-init" §5 calls for).

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorLimiter};

/// `capacity` tokens refilling over `window` (§12 open question (b):
/// token-bucket refill semantics, not a sliding log).
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self { capacity, window }
    }

    fn quota(&self) -> Option<Quota> {
        let capacity = NonZeroU32::new(self.capacity)?;
        let period = self.window.checked_div(self.capacity)?;
        Quota::with_period(period).map(|q| q.allow_burst(capacity))
    }
}

type Bucket = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Holds per-platform buckets plus a fallback config applied to platforms
/// with no explicit entry. A platform with neither an explicit config nor a
/// fallback is unlimited.
pub struct RateLimiterRegistry {
    configs: HashMap<String, RateLimitConfig>,
    fallback: Option<RateLimitConfig>,
    buckets: DashMap<String, Arc<Bucket>>,
}

impl RateLimiterRegistry {
    pub fn new(configs: HashMap<String, RateLimitConfig>) -> Self {
        Self {
            configs,
            fallback: None,
            buckets: DashMap::new(),
        }
    }

    pub fn with_fallback(mut self, fallback: RateLimitConfig) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Non-blocking: `true` if a token was available and consumed, `false`
    /// if the platform's bucket is currently empty. A platform with no
    /// configured limit always returns `true`.
    pub fn try_consume(&self, platform: &str) -> bool {
        match self.bucket_for(platform) {
            Some(bucket) => bucket.check().is_ok(),
            None => true,
        }
    }

    /// The configured refill window for `platform` (falling back to the
    /// blanket config), used by the worker pool to pick a retry delay for
    /// a fail-fast `RateLimited` error (§7: "floor delay = bucket refill
    /// period").
    pub fn window_for(&self, platform: &str) -> Option<Duration> {
        self.configs
            .get(platform)
            .or(self.fallback.as_ref())
            .map(|c| c.window)
    }

    fn bucket_for(&self, platform: &str) -> Option<Arc<Bucket>> {
        if let Some(existing) = self.buckets.get(platform) {
            return Some(existing.clone());
        }
        let config = self.configs.get(platform).or(self.fallback.as_ref())?;
        let quota = config.quota()?;
        let bucket = self
            .buckets
            .entry(platform.to_string())
            .or_insert_with(|| Arc::new(GovernorLimiter::direct(quota)))
            .clone();
        Some(bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_platform_is_unlimited() {
        let registry = RateLimiterRegistry::new(HashMap::new());
        for _ in 0..100 {
            assert!(registry.try_consume("chat"));
        }
    }

    #[test]
    fn bucket_empties_then_refuses() {
        let mut configs = HashMap::new();
        configs.insert(
            "chat".to_string(),
            RateLimitConfig::new(2, Duration::from_secs(1)),
        );
        let registry = RateLimiterRegistry::new(configs);
        assert!(registry.try_consume("chat"));
        assert!(registry.try_consume("chat"));
        assert!(!registry.try_consume("chat"));
    }

    #[tokio::test]
    async fn bucket_refills_after_window() {
        let mut configs = HashMap::new();
        configs.insert(
            "chat".to_string(),
            RateLimitConfig::new(1, Duration::from_millis(50)),
        );
        let registry = RateLimiterRegistry::new(configs);
        assert!(registry.try_consume("chat"));
        assert!(!registry.try_consume("chat"));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(registry.try_consume("chat"));
    }

    #[test]
    fn fallback_applies_when_no_explicit_config() {
        let registry = RateLimiterRegistry::new(HashMap::new())
            .with_fallback(RateLimitConfig::new(1, Duration::from_secs(1)));
        assert!(registry.try_consume("sms"));
        assert!(!registry.try_consume("sms"));
    }
}
