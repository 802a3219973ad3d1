//! osmgate Test Utilities
//!
//! Centralized test infrastructure for the osmgate workspace:
//! - Mock geocoding service with call recording and scripted failures
//! - Proptest generators for geo types and configuration
//! - Test fixtures for common scenarios
//! - Custom assertions for structured failures

pub use osmgate_core::{
    Address, CachePolicy, FailureCode, Location, OsmConfig, Place, RateLimit, ResolutionFailure,
    RetryConfig, UpstreamError, SERVICE_NOMINATIM,
};
pub use osmgate_upstream::GeocodingService;

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

// ============================================================================
// MOCK GEOCODING SERVICE
// ============================================================================

/// In-memory geocoding service for tests.
///
/// Searches are matched on the lowercased, trimmed query. Unknown queries
/// return no results. Scripted one-shot failures are consumed before
/// anything else, in order, by whichever call comes next.
#[derive(Debug, Default)]
pub struct MockGeocodingService {
    results: Mutex<HashMap<String, Vec<Place>>>,
    failing: Mutex<HashMap<String, UpstreamError>>,
    reverse: Mutex<HashMap<String, Place>>,
    scripted: Mutex<VecDeque<UpstreamError>>,
    queries: Mutex<Vec<String>>,
    search_calls: AtomicUsize,
    reverse_calls: AtomicUsize,
    delay: Option<Duration>,
}

fn normalize(query: &str) -> String {
    query.trim().to_lowercase()
}

fn coordinate_key(latitude: f64, longitude: f64) -> String {
    format!("{:.5},{:.5}", latitude, longitude)
}

impl MockGeocodingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `query` with `places`.
    pub fn with_results(self, query: &str, places: Vec<Place>) -> Self {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(normalize(query), places);
        self
    }

    /// Always fail `query` with `error`.
    pub fn with_failure(self, query: &str, error: UpstreamError) -> Self {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(normalize(query), error);
        self
    }

    /// Answer a reverse lookup at this coordinate with `place`.
    pub fn with_reverse(self, latitude: f64, longitude: f64, place: Place) -> Self {
        self.reverse
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(coordinate_key(latitude, longitude), place);
        self
    }

    /// Fail the next call (search or reverse) with `error`.
    pub fn fail_next(self, error: UpstreamError) -> Self {
        self.scripted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn reverse_calls(&self) -> usize {
        self.reverse_calls.load(Ordering::SeqCst)
    }

    /// Every query received by `search`, in arrival order.
    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn take_scripted(&self) -> Option<UpstreamError> {
        self.scripted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

#[async_trait]
impl GeocodingService for MockGeocodingService {
    async fn search(&self, query: &str, limit: u32) -> Result<Vec<Place>, UpstreamError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(query.to_string());
        self.pause().await;

        if let Some(err) = self.take_scripted() {
            return Err(err);
        }

        let key = normalize(query);
        if let Some(err) = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Err(err.clone());
        }

        let mut places = self
            .results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
            .unwrap_or_default();
        places.truncate(limit as usize);
        Ok(places)
    }

    async fn reverse(&self, latitude: f64, longitude: f64) -> Result<Option<Place>, UpstreamError> {
        self.reverse_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        if let Some(err) = self.take_scripted() {
            return Err(err);
        }

        Ok(self
            .reverse
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&coordinate_key(latitude, longitude))
            .cloned())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for osmgate types.

    use super::*;
    use proptest::prelude::*;

    /// A valid coordinate.
    pub fn arb_location() -> impl Strategy<Value = Location> {
        (-90.0f64..=90.0, -180.0f64..=180.0).prop_map(|(latitude, longitude)| Location {
            latitude,
            longitude,
        })
    }

    /// A valid coordinate already rounded to 5 decimal places.
    pub fn arb_rounded_location() -> impl Strategy<Value = Location> {
        (-9_000_000i64..=9_000_000, -18_000_000i64..=18_000_000).prop_map(|(lat, lon)| {
            Location {
                latitude: lat as f64 / 1e5,
                longitude: lon as f64 / 1e5,
            }
        })
    }

    pub fn arb_route(max_points: usize) -> impl Strategy<Value = Vec<Location>> {
        prop::collection::vec(arb_rounded_location(), 0..max_points)
    }

    pub fn arb_importance() -> impl Strategy<Value = f64> {
        0.0f64..=1.0
    }

    pub fn arb_place() -> impl Strategy<Value = Place> {
        ("[A-Za-z ]{1,30}", arb_location(), arb_importance(), any::<u32>()).prop_map(
            |(name, location, importance, id)| Place {
                id: id.to_string(),
                name: name.clone(),
                location,
                address: Address {
                    formatted: name,
                    ..Default::default()
                },
                importance,
            },
        )
    }

    /// A free-text address, optionally with one parenthetical alias.
    pub fn arb_address() -> impl Strategy<Value = String> {
        (
            "[A-Za-z]{2,10}( [A-Za-z]{2,10}){0,3}",
            prop::option::of("[A-Za-z]{2,10}( [A-Za-z]{2,10}){0,2}"),
        )
            .prop_map(|(main, alias)| match alias {
                Some(alias) => format!("{main} ({alias})"),
                None => main,
            })
    }

    pub fn arb_rate_limit() -> impl Strategy<Value = RateLimit> {
        (0.01f64..100.0, 1u32..20).prop_map(|(rps, burst)| RateLimit::new(rps, burst))
    }

    pub fn arb_retry_config() -> impl Strategy<Value = RetryConfig> {
        (1u32..6, 1u64..2000, 1.0f64..4.0).prop_map(|(attempts, backoff_ms, multiplier)| {
            RetryConfig {
                max_attempts: attempts,
                initial_backoff: Duration::from_millis(backoff_ms),
                max_backoff: Duration::from_secs(30),
                backoff_multiplier: multiplier,
            }
        })
    }

    pub fn arb_valid_config() -> impl Strategy<Value = OsmConfig> {
        (
            arb_rate_limit(),
            arb_retry_config(),
            0usize..1024,
            0.0f64..=1.0,
            1u32..10,
        )
            .prop_map(|(rate, retry, capacity, min_importance, search_limit)| {
                let mut config = OsmConfig::default()
                    .with_rate_limit(SERVICE_NOMINATIM, rate)
                    .with_retry(retry)
                    .with_geocode_cache(CachePolicy {
                        capacity,
                        ttl: Duration::from_secs(3600),
                    });
                config.min_importance = min_importance;
                config.search_limit = search_limit;
                config
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;

    /// A place with the given name, coordinate and importance.
    pub fn place(name: &str, latitude: f64, longitude: f64, importance: f64) -> Place {
        Place {
            id: format!("{}", name.len() * 1000 + (importance * 100.0) as usize),
            name: name.to_string(),
            location: Location {
                latitude,
                longitude,
            },
            address: Address {
                formatted: name.to_string(),
                ..Default::default()
            },
            importance,
        }
    }

    /// The White Temple in Chiang Rai.
    pub fn white_temple() -> Place {
        let mut place = place("Wat Rong Khun, Chiang Rai, Thailand", 19.8243, 99.7630, 0.62);
        place.address.city = "Chiang Rai".to_string();
        place.address.country = "Thailand".to_string();
        place
    }

    /// The Blue Temple in Chiang Rai.
    pub fn blue_temple() -> Place {
        let mut place = place("Wat Rong Suea Ten, Chiang Rai, Thailand", 19.9237, 99.8410, 0.55);
        place.address.city = "Chiang Rai".to_string();
        place.address.country = "Thailand".to_string();
        place
    }

    /// Config for pipeline tests: no real rate limiting, short backoff, no sweeper.
    pub fn test_config() -> OsmConfig {
        OsmConfig::default()
            .with_user_agent("osmgate-tests/0.0 (tests@example.org)")
            .with_rate_limit(SERVICE_NOMINATIM, RateLimit::new(1000.0, 1000))
            .with_retry(RetryConfig {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(10),
                max_backoff: Duration::from_secs(1),
                backoff_multiplier: 2.0,
            })
            .with_sweep_interval(Duration::ZERO)
    }

    pub fn service_unavailable() -> UpstreamError {
        UpstreamError::Status {
            service: SERVICE_NOMINATIM.to_string(),
            status: 503,
            message: "Service Unavailable".to_string(),
        }
    }

    pub fn connection_reset() -> UpstreamError {
        UpstreamError::Transport {
            service: SERVICE_NOMINATIM.to_string(),
            message: "connection reset by peer".to_string(),
        }
    }

    pub fn malformed_reply() -> UpstreamError {
        UpstreamError::Parse {
            service: SERVICE_NOMINATIM.to_string(),
            reason: "expected value at line 1 column 1".to_string(),
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for structured failures and coordinates.

    use super::*;

    /// Assert that a result failed with the given code.
    #[track_caller]
    pub fn assert_failure_code<T: std::fmt::Debug>(
        result: &Result<T, ResolutionFailure>,
        code: FailureCode,
    ) {
        match result {
            Err(failure) => assert_eq!(
                failure.code, code,
                "Expected {code} failure, got {failure:?}"
            ),
            Ok(value) => panic!("Expected {code} failure, got Ok: {value:?}"),
        }
    }

    /// Assert that two locations agree within `tolerance` degrees.
    #[track_caller]
    pub fn assert_location_close(actual: &Location, expected: &Location, tolerance: f64) {
        assert!(
            (actual.latitude - expected.latitude).abs() <= tolerance
                && (actual.longitude - expected.longitude).abs() <= tolerance,
            "Expected {expected:?} within {tolerance}, got {actual:?}"
        );
    }

    /// Assert that two routes agree point by point within `tolerance` degrees.
    #[track_caller]
    pub fn assert_route_close(actual: &[Location], expected: &[Location], tolerance: f64) {
        assert_eq!(actual.len(), expected.len(), "route length differs");
        for (a, e) in actual.iter().zip(expected) {
            assert_location_close(a, e, tolerance);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
