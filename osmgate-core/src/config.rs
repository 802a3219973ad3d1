//! Configuration types
//!
//! Loaded from `OSMGATE_*` environment variables with defaults that respect
//! the public OpenStreetMap service usage policies.

use crate::{ConfigError, OsmError, OsmResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// SERVICE NAMES
// ============================================================================

/// Forward/reverse geocoding service.
pub const SERVICE_NOMINATIM: &str = "nominatim";
/// Spatial data query service.
pub const SERVICE_OVERPASS: &str = "overpass";
/// Routing service.
pub const SERVICE_OSRM: &str = "osrm";

pub const DEFAULT_USER_AGENT: &str = concat!("osmgate/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";

// ============================================================================
// SECTIONS
// ============================================================================

/// Token-bucket policy for one upstream service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Sustained refill rate in tokens per second.
    pub requests_per_second: f64,
    /// Bucket capacity.
    pub burst: u32,
}

impl RateLimit {
    pub const fn new(requests_per_second: f64, burst: u32) -> Self {
        Self {
            requests_per_second,
            burst,
        }
    }

    /// One request every `period`.
    pub fn every(period: Duration, burst: u32) -> Self {
        Self::new(1.0 / period.as_secs_f64(), burst)
    }
}

/// Retry policy for outbound requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Delay to wait before attempt number `attempt` (1-based; attempt 1 has none).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        if self.initial_backoff.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.powi(exponent);
        // Overflowing or NaN products saturate at the cap.
        Duration::try_from_secs_f64(self.initial_backoff.as_secs_f64() * factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

/// Capacity and lifetime of one cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Maximum number of entries; zero means unbounded.
    pub capacity: usize,
    /// Entry lifetime; zero means entries never expire.
    pub ttl: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            capacity: 512,
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

// ============================================================================
// MASTER CONFIG
// ============================================================================

/// Process-wide configuration, consumed once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OsmConfig {
    /// Identifying User-Agent sent on every upstream request.
    pub user_agent: String,
    pub nominatim_base_url: String,
    pub http_timeout: Duration,
    /// Overall deadline for one tool call, across every query and retry.
    pub call_timeout: Duration,

    // Rate limits per upstream service
    pub nominatim_rate: RateLimit,
    pub overpass_rate: RateLimit,
    pub osrm_rate: RateLimit,

    pub retry: RetryConfig,

    // Caches
    pub geocode_cache: CachePolicy,
    pub reverse_cache: CachePolicy,
    /// Background sweep period; zero disables the sweeper.
    pub sweep_interval: Duration,

    // Resolution pipeline
    /// Region appended to short queries when the caller gives none.
    pub default_region: String,
    /// Minimum importance for a candidate to be considered confident.
    pub min_importance: f64,
    /// Maximum candidates requested per forward lookup.
    pub search_limit: u32,
}

impl Default for OsmConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            nominatim_base_url: DEFAULT_NOMINATIM_URL.to_string(),
            http_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(60),
            // https://operations.osmfoundation.org/policies/nominatim/
            nominatim_rate: RateLimit::new(1.0, 1),
            overpass_rate: RateLimit::every(Duration::from_secs(30), 2),
            osrm_rate: RateLimit::every(Duration::from_millis(600), 5),
            retry: RetryConfig::default(),
            geocode_cache: CachePolicy::default(),
            reverse_cache: CachePolicy::default(),
            sweep_interval: Duration::from_secs(60),
            default_region: String::new(),
            min_importance: 0.4,
            search_limit: 3,
        }
    }
}

impl OsmConfig {
    /// Create OsmConfig from environment variables.
    ///
    /// Environment variables:
    /// - `OSMGATE_USER_AGENT`: User-Agent for upstream requests
    /// - `OSMGATE_NOMINATIM_URL`: geocoding service base URL
    /// - `OSMGATE_HTTP_TIMEOUT_SECS`: per-request timeout (default: 30)
    /// - `OSMGATE_CALL_TIMEOUT_SECS`: per-tool-call deadline (default: 60)
    /// - `OSMGATE_{NOMINATIM,OVERPASS,OSRM}_RPS` / `_BURST`: rate limits
    /// - `OSMGATE_MAX_ATTEMPTS`, `OSMGATE_INITIAL_BACKOFF_MS`: retry policy
    /// - `OSMGATE_CACHE_CAPACITY`, `OSMGATE_CACHE_TTL_SECS`: geocode cache
    /// - `OSMGATE_REVERSE_CACHE_CAPACITY`, `OSMGATE_REVERSE_CACHE_TTL_SECS`
    /// - `OSMGATE_SWEEP_INTERVAL_SECS`: background sweep period (default: 60)
    /// - `OSMGATE_DEFAULT_REGION`: region appended to short queries
    /// - `OSMGATE_MIN_IMPORTANCE`, `OSMGATE_SEARCH_LIMIT`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`OsmConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<f64>().ok());
        let parsed_u64 = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());
        let parsed_u32 = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u32>().ok());
        let rate = |prefix: &str, fallback: RateLimit| RateLimit {
            requests_per_second: parsed(&format!("OSMGATE_{prefix}_RPS"))
                .unwrap_or(fallback.requests_per_second),
            burst: parsed_u32(&format!("OSMGATE_{prefix}_BURST")).unwrap_or(fallback.burst),
        };
        let cache = |prefix: &str, fallback: CachePolicy| CachePolicy {
            capacity: parsed_u64(&format!("OSMGATE_{prefix}_CAPACITY"))
                .and_then(|c| usize::try_from(c).ok())
                .unwrap_or(fallback.capacity),
            ttl: parsed_u64(&format!("OSMGATE_{prefix}_TTL_SECS"))
                .map(Duration::from_secs)
                .unwrap_or(fallback.ttl),
        };

        Self {
            user_agent: lookup("OSMGATE_USER_AGENT").unwrap_or(defaults.user_agent),
            nominatim_base_url: lookup("OSMGATE_NOMINATIM_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.nominatim_base_url),
            http_timeout: parsed_u64("OSMGATE_HTTP_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
            call_timeout: parsed_u64("OSMGATE_CALL_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.call_timeout),
            nominatim_rate: rate("NOMINATIM", defaults.nominatim_rate),
            overpass_rate: rate("OVERPASS", defaults.overpass_rate),
            osrm_rate: rate("OSRM", defaults.osrm_rate),
            retry: RetryConfig {
                max_attempts: parsed_u32("OSMGATE_MAX_ATTEMPTS").unwrap_or(defaults.retry.max_attempts),
                initial_backoff: parsed_u64("OSMGATE_INITIAL_BACKOFF_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.initial_backoff),
                ..defaults.retry
            },
            geocode_cache: cache("CACHE", defaults.geocode_cache),
            reverse_cache: cache("REVERSE_CACHE", defaults.reverse_cache),
            sweep_interval: parsed_u64("OSMGATE_SWEEP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            default_region: lookup("OSMGATE_DEFAULT_REGION")
                .map(|r| r.trim().to_string())
                .unwrap_or(defaults.default_region),
            min_importance: parsed("OSMGATE_MIN_IMPORTANCE").unwrap_or(defaults.min_importance),
            search_limit: parsed_u32("OSMGATE_SEARCH_LIMIT").unwrap_or(defaults.search_limit),
        }
    }

    /// Rate limits keyed by service name, for seeding the limiter registry.
    pub fn rate_limits(&self) -> [(&'static str, RateLimit); 3] {
        [
            (SERVICE_NOMINATIM, self.nominatim_rate),
            (SERVICE_OVERPASS, self.overpass_rate),
            (SERVICE_OSRM, self.osrm_rate),
        ]
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_nominatim_url(mut self, url: impl Into<String>) -> Self {
        self.nominatim_base_url = url.into();
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_geocode_cache(mut self, policy: CachePolicy) -> Self {
        self.geocode_cache = policy;
        self
    }

    pub fn with_reverse_cache(mut self, policy: CachePolicy) -> Self {
        self.reverse_cache = policy;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_default_region(mut self, region: impl Into<String>) -> Self {
        self.default_region = region.into();
        self
    }

    pub fn with_rate_limit(mut self, service: &str, limit: RateLimit) -> Self {
        match service {
            SERVICE_NOMINATIM => self.nominatim_rate = limit,
            SERVICE_OVERPASS => self.overpass_rate = limit,
            SERVICE_OSRM => self.osrm_rate = limit,
            _ => {}
        }
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - user_agent is non-empty (required by the geocoding usage policy)
    /// - nominatim_base_url is an http(s) URL
    /// - every rate limit has a positive finite rate and a non-zero burst
    /// - retry policy has at least one attempt and a multiplier >= 1
    /// - min_importance in [0.0, 1.0] and search_limit > 0
    pub fn validate(&self) -> OsmResult<()> {
        if self.user_agent.trim().is_empty() {
            return Err(OsmError::Config(ConfigError::MissingRequired {
                field: "user_agent".to_string(),
            }));
        }

        if !(self.nominatim_base_url.starts_with("http://")
            || self.nominatim_base_url.starts_with("https://"))
        {
            return Err(invalid(
                "nominatim_base_url",
                &self.nominatim_base_url,
                "must be an http or https URL",
            ));
        }

        if self.http_timeout.is_zero() {
            return Err(invalid(
                "http_timeout",
                &format!("{:?}", self.http_timeout),
                "http_timeout must be positive",
            ));
        }

        if self.call_timeout.is_zero() {
            return Err(invalid(
                "call_timeout",
                &format!("{:?}", self.call_timeout),
                "call_timeout must be positive",
            ));
        }

        for (service, limit) in self.rate_limits() {
            if !limit.requests_per_second.is_finite() || limit.requests_per_second <= 0.0 {
                return Err(invalid(
                    &format!("{service}_rate.requests_per_second"),
                    &limit.requests_per_second.to_string(),
                    "rate must be a positive number",
                ));
            }
            if limit.burst == 0 {
                return Err(invalid(
                    &format!("{service}_rate.burst"),
                    "0",
                    "burst must be at least 1",
                ));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(invalid(
                "retry.max_attempts",
                "0",
                "at least one attempt is required",
            ));
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(invalid(
                "retry.backoff_multiplier",
                &self.retry.backoff_multiplier.to_string(),
                "backoff must not shrink between attempts",
            ));
        }

        if !(0.0..=1.0).contains(&self.min_importance) {
            return Err(invalid(
                "min_importance",
                &self.min_importance.to_string(),
                "min_importance must be between 0.0 and 1.0",
            ));
        }

        if self.search_limit == 0 {
            return Err(invalid(
                "search_limit",
                "0",
                "search_limit must be greater than 0",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> OsmError {
    OsmError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = OsmConfig::default();
        config.validate().expect("defaults should validate");
        assert_eq!(config.nominatim_rate, RateLimit::new(1.0, 1));
        assert!((config.overpass_rate.requests_per_second - 1.0 / 30.0).abs() < 1e-12);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.geocode_cache.capacity, 512);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = OsmConfig::from_lookup(lookup_from(&[
            ("OSMGATE_USER_AGENT", "tester/1.0 (ops@example.org)"),
            ("OSMGATE_NOMINATIM_URL", "http://localhost:8080/"),
            ("OSMGATE_NOMINATIM_RPS", "5"),
            ("OSMGATE_NOMINATIM_BURST", "3"),
            ("OSMGATE_CACHE_TTL_SECS", "60"),
            ("OSMGATE_DEFAULT_REGION", " Chiang Rai Thailand "),
            ("OSMGATE_SEARCH_LIMIT", "not-a-number"),
        ]));

        assert_eq!(config.user_agent, "tester/1.0 (ops@example.org)");
        assert_eq!(config.nominatim_base_url, "http://localhost:8080");
        assert_eq!(config.nominatim_rate, RateLimit::new(5.0, 3));
        assert_eq!(config.geocode_cache.ttl, Duration::from_secs(60));
        assert_eq!(config.default_region, "Chiang Rai Thailand");
        // Unparseable values fall back to defaults
        assert_eq!(config.search_limit, 3);
        config.validate().expect("overridden config should validate");
    }

    #[test]
    fn test_validate_rejects_empty_user_agent() {
        let config = OsmConfig::default().with_user_agent("  ");
        assert!(matches!(
            config.validate(),
            Err(OsmError::Config(ConfigError::MissingRequired { .. }))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_burst() {
        let config =
            OsmConfig::default().with_rate_limit(SERVICE_OSRM, RateLimit::new(1.0, 0));
        let err = config.validate().expect_err("zero burst is invalid");
        assert!(err.to_string().contains("osrm_rate.burst"));
    }

    #[test]
    fn test_validate_rejects_bad_url_and_importance() {
        let config = OsmConfig::default().with_nominatim_url("ftp://example.org");
        assert!(config.validate().is_err());

        let mut config = OsmConfig::default();
        config.min_importance = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_doubles() {
        let retry = RetryConfig::default();
        assert_eq!(retry.backoff_for(1), Duration::ZERO);
        assert_eq!(retry.backoff_for(2), Duration::from_millis(500));
        assert_eq!(retry.backoff_for(3), Duration::from_millis(1000));
        assert_eq!(retry.backoff_for(4), Duration::from_millis(2000));
    }

    #[test]
    fn test_backoff_capped() {
        let retry = RetryConfig {
            max_backoff: Duration::from_millis(700),
            ..RetryConfig::default()
        };
        assert_eq!(retry.backoff_for(5), Duration::from_millis(700));
    }

    #[test]
    fn test_backoff_saturates_for_large_attempts() {
        let config = OsmConfig::from_lookup(lookup_from(&[("OSMGATE_MAX_ATTEMPTS", "100")]));
        config.validate().expect("many attempts are allowed");

        let retry = &config.retry;
        assert_eq!(retry.backoff_for(100), retry.max_backoff);
        assert_eq!(retry.backoff_for(u32::MAX), retry.max_backoff);
        let mut previous = Duration::ZERO;
        for attempt in 1..=retry.max_attempts {
            let delay = retry.backoff_for(attempt);
            assert!(delay >= previous && delay <= retry.max_backoff);
            previous = delay;
        }
    }

    #[test]
    fn test_backoff_zero_initial_stays_zero() {
        let retry = RetryConfig {
            initial_backoff: Duration::ZERO,
            backoff_multiplier: f64::MAX,
            ..RetryConfig::default()
        };
        assert_eq!(retry.backoff_for(50), Duration::ZERO);
    }

    #[test]
    fn test_out_of_range_integers_fall_back_to_defaults() {
        let config = OsmConfig::from_lookup(lookup_from(&[
            ("OSMGATE_NOMINATIM_BURST", "4294967297"),
            ("OSMGATE_MAX_ATTEMPTS", "4294967296"),
            ("OSMGATE_SEARCH_LIMIT", "-1"),
        ]));
        assert_eq!(config.nominatim_rate.burst, 1);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.search_limit, 3);
    }
}
