//! Per-service token-bucket rate limiting.
//!
//! Each upstream publishes its own usage policy, so limiting is keyed by
//! logical service name. Buckets are `governor` limiters: tokens refill
//! continuously at `requests_per_second` up to `burst`, and a fresh bucket
//! starts full.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use governor::{clock::DefaultClock, Quota, RateLimiter};
use osmgate_core::{OsmConfig, RateLimit, UpstreamError};
use tokio::time::Instant;

/// Slowest refill accepted; smaller or invalid rates are clamped to it.
const MAX_REPLENISH_PERIOD: Duration = Duration::from_secs(3600);

type DirectRateLimiter =
    RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, DefaultClock>;

/// Build the quota for one service limit.
fn quota(limit: RateLimit) -> Quota {
    let burst = NonZeroU32::new(limit.burst).unwrap_or(NonZeroU32::MIN);
    let period = Duration::try_from_secs_f64(1.0 / limit.requests_per_second)
        .unwrap_or(MAX_REPLENISH_PERIOD)
        .min(MAX_REPLENISH_PERIOD);

    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX))
        .allow_burst(burst)
}

/// A single token bucket.
pub struct TokenBucket {
    limit: RateLimit,
    limiter: DirectRateLimiter,
}

impl TokenBucket {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            limiter: RateLimiter::direct(quota(limit)),
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Consume a token without waiting.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    /// Wait until a token is available, or until `deadline` passes.
    ///
    /// Returns `false` if the deadline fired first; no token is consumed then.
    pub async fn acquire(&self, deadline: Option<Instant>) -> bool {
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, self.limiter.until_ready())
                .await
                .is_ok(),
            None => {
                self.limiter.until_ready().await;
                true
            }
        }
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("limit", &self.limit)
            .finish()
    }
}

/// Registry of token buckets keyed by service name.
///
/// Unknown services are not limited.
#[derive(Debug, Default)]
pub struct RateLimiterRegistry {
    buckets: DashMap<String, Arc<TokenBucket>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with every service limit in `config`.
    pub fn from_config(config: &OsmConfig) -> Self {
        let registry = Self::new();
        for (service, limit) in config.rate_limits() {
            registry.reconfigure(service, limit);
        }
        registry
    }

    /// Replace the bucket for `service` with a fresh one.
    ///
    /// Waiters already holding the old bucket finish against it.
    pub fn reconfigure(&self, service: &str, limit: RateLimit) {
        tracing::debug!(
            service,
            rate = limit.requests_per_second,
            burst = limit.burst,
            "configured rate limit"
        );
        self.buckets
            .insert(service.to_string(), Arc::new(TokenBucket::new(limit)));
    }

    pub fn limit(&self, service: &str) -> Option<RateLimit> {
        self.buckets.get(service).map(|b| b.limit())
    }

    pub fn services(&self) -> Vec<String> {
        self.buckets.iter().map(|e| e.key().clone()).collect()
    }

    fn bucket(&self, service: &str) -> Option<Arc<TokenBucket>> {
        // Clone out so no map guard is held across an await.
        self.buckets.get(service).map(|b| Arc::clone(b.value()))
    }

    /// Block until `service` has a token, consuming it.
    ///
    /// Fails with [`UpstreamError::Timeout`] if `deadline` passes first.
    pub async fn wait(&self, service: &str, deadline: Option<Instant>) -> Result<(), UpstreamError> {
        let Some(bucket) = self.bucket(service) else {
            return Ok(());
        };

        if bucket.acquire(deadline).await {
            Ok(())
        } else {
            tracing::warn!(service, "deadline elapsed waiting for rate limit token");
            Err(UpstreamError::Timeout {
                service: service.to_string(),
            })
        }
    }

    /// Consume a token for `service` without waiting.
    pub fn try_acquire(&self, service: &str) -> bool {
        self.bucket(service).map_or(true, |b| b.try_acquire())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn millis(d: Duration) -> u64 {
        d.as_millis() as u64
    }

    #[tokio::test]
    async fn test_burst_then_block() {
        let registry = RateLimiterRegistry::new();
        registry.reconfigure("svc", RateLimit::new(20.0, 3));
        let start = Instant::now();

        for _ in 0..3 {
            registry.wait("svc", None).await.expect("burst token should succeed");
        }
        assert!(start.elapsed() < Duration::from_millis(25));

        // Fourth must wait for one refill at 20 tokens/sec.
        registry.wait("svc", None).await.expect("refill should succeed");
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(45), "waited {waited:?}");
        assert!(waited < Duration::from_secs(1), "waited {waited:?}");
    }

    #[tokio::test]
    async fn test_blocked_waiters_released_one_period_apart() {
        const BURST: u32 = 2;
        const BLOCKED: u64 = 4;
        const PERIOD_MS: u64 = 50;

        let registry = Arc::new(RateLimiterRegistry::new());
        registry.reconfigure("svc", RateLimit::new(20.0, BURST));
        let start = Instant::now();

        let handles: Vec<_> = (0..u64::from(BURST) + BLOCKED)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    registry.wait("svc", None).await.expect("token should arrive");
                    start.elapsed()
                })
            })
            .collect();

        let mut released = Vec::new();
        for handle in handles {
            released.push(handle.await.expect("task should not panic"));
        }
        released.sort();

        for early in &released[..BURST as usize] {
            assert!(*early < Duration::from_millis(25), "burst waited {early:?}");
        }
        for (n, at) in released[BURST as usize..].iter().enumerate() {
            let due = (n as u64 + 1) * PERIOD_MS;
            assert!(
                millis(*at) + 5 >= due,
                "waiter {n} released at {at:?}, before its token at {due}ms"
            );
            assert!(
                millis(*at) <= due + 200,
                "waiter {n} released at {at:?}, long after its token at {due}ms"
            );
        }
    }

    #[tokio::test]
    async fn test_deadline_before_refill_times_out() {
        let registry = RateLimiterRegistry::new();
        registry.reconfigure("svc", RateLimit::new(1.0, 1));
        registry.wait("svc", None).await.expect("first token");

        let start = Instant::now();
        let deadline = start + Duration::from_millis(50);
        let err = registry
            .wait("svc", Some(deadline))
            .await
            .expect_err("should time out");
        assert!(matches!(err, UpstreamError::Timeout { ref service } if service == "svc"));
        assert!(Instant::now() >= deadline);
        assert!(start.elapsed() < Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_unknown_service_is_not_limited() {
        let registry = RateLimiterRegistry::new();
        for _ in 0..100 {
            registry.wait("nowhere", None).await.expect("fail-open");
        }
        assert!(registry.try_acquire("nowhere"));
    }

    #[tokio::test]
    async fn test_tokens_capped_at_burst() {
        let bucket = TokenBucket::new(RateLimit::new(100.0, 2));
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());

        // Long enough for ten refills, but the bucket holds two.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[test]
    fn test_reconfigure_replaces_bucket() {
        let registry = RateLimiterRegistry::new();
        registry.reconfigure("svc", RateLimit::new(1.0, 1));
        assert!(registry.try_acquire("svc"));
        assert!(!registry.try_acquire("svc"));

        registry.reconfigure("svc", RateLimit::new(1.0, 5));
        assert_eq!(registry.limit("svc"), Some(RateLimit::new(1.0, 5)));
        for _ in 0..5 {
            assert!(registry.try_acquire("svc"));
        }
        assert!(!registry.try_acquire("svc"));
    }

    #[tokio::test]
    async fn test_waiter_finishes_against_replaced_bucket() {
        let registry = Arc::new(RateLimiterRegistry::new());
        registry.reconfigure("svc", RateLimit::new(20.0, 1));
        assert!(registry.try_acquire("svc"));

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.wait("svc", None).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The new bucket is untouched by the waiter still draining the old one.
        registry.reconfigure("svc", RateLimit::new(0.001, 2));
        waiter
            .await
            .expect("task should not panic")
            .expect("old bucket refills");
        assert!(registry.try_acquire("svc"));
        assert!(registry.try_acquire("svc"));
        assert!(!registry.try_acquire("svc"));
    }

    #[test]
    fn test_from_config_seeds_all_services() {
        let registry = RateLimiterRegistry::from_config(&OsmConfig::default());
        let mut services = registry.services();
        services.sort();
        assert_eq!(services, vec!["nominatim", "osrm", "overpass"]);
        assert_eq!(registry.limit("nominatim"), Some(RateLimit::new(1.0, 1)));
    }

    fn arb_slow_rate() -> impl Strategy<Value = f64> {
        prop_oneof![
            0.01f64..5.0,
            Just(0.0),
            Just(-1.0),
            Just(f64::NAN),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_fresh_bucket_admits_exactly_burst(rate in arb_slow_rate(), burst in 1u32..50) {
            let bucket = TokenBucket::new(RateLimit::new(rate, burst));
            let admitted = (0..burst + 5).filter(|_| bucket.try_acquire()).count();
            prop_assert_eq!(admitted, burst as usize);
        }

        #[test]
        fn prop_zero_burst_still_admits_one(rate in 0.01f64..5.0) {
            let bucket = TokenBucket::new(RateLimit::new(rate, 0));
            prop_assert!(bucket.try_acquire());
            prop_assert!(!bucket.try_acquire());
        }
    }
}
