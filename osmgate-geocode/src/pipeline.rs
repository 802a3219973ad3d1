//! Address resolution pipeline
//!
//! Sanitize the input, expand it into fallback queries, try them in order
//! through the cache and the request executor, and pick the best-ranked
//! candidate from the first query that returns anything.

use std::sync::Arc;

use osmgate_cache::TtlCache;
use osmgate_core::{
    validate_coordinates, FailureCode, OsmConfig, Place, ResolutionFailure, UpstreamError,
    ValidationError,
};
use osmgate_upstream::{GeocodingService, RateLimiterRegistry, RequestExecutor};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::ranking::{rank, select_best};
use crate::sanitize::{build_query_sequence, cache_key, reverse_cache_key};
use crate::suggestions::no_results_suggestions;

// ============================================================================
// TYPES
// ============================================================================

/// Tuning knobs for the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocoderSettings {
    /// Region applied to short queries when the caller gives none.
    pub default_region: String,
    pub min_importance: f64,
    /// Candidates requested per upstream search.
    pub search_limit: u32,
}

impl GeocoderSettings {
    pub fn from_config(config: &OsmConfig) -> Self {
        Self {
            default_region: config.default_region.clone(),
            min_importance: config.min_importance,
            search_limit: config.search_limit,
        }
    }
}

impl Default for GeocoderSettings {
    fn default() -> Self {
        Self::from_config(&OsmConfig::default())
    }
}

/// A successful forward resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// The selected best match.
    pub place: Place,
    /// Every candidate from the winning query, best first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<Place>,
    /// The fallback query that produced the candidates.
    pub matched_query: String,
}

// ============================================================================
// GEOCODER
// ============================================================================

/// Forward and reverse resolution against a [`GeocodingService`].
pub struct Geocoder {
    service: Arc<dyn GeocodingService>,
    search_executor: RequestExecutor<Vec<Place>>,
    reverse_executor: RequestExecutor<Option<Place>>,
    search_cache: Arc<TtlCache<String, Vec<Place>>>,
    reverse_cache: Arc<TtlCache<String, Place>>,
    settings: GeocoderSettings,
}

impl Geocoder {
    pub fn new(
        service: Arc<dyn GeocodingService>,
        limiter: Arc<RateLimiterRegistry>,
        config: &OsmConfig,
    ) -> Self {
        Self {
            service,
            search_executor: RequestExecutor::new(Arc::clone(&limiter), config.retry.clone()),
            reverse_executor: RequestExecutor::new(limiter, config.retry.clone()),
            search_cache: Arc::new(TtlCache::from_policy(&config.geocode_cache)),
            reverse_cache: Arc::new(TtlCache::from_policy(&config.reverse_cache)),
            settings: GeocoderSettings::from_config(config),
        }
    }

    pub fn settings(&self) -> &GeocoderSettings {
        &self.settings
    }

    pub fn search_cache(&self) -> &Arc<TtlCache<String, Vec<Place>>> {
        &self.search_cache
    }

    pub fn reverse_cache(&self) -> &Arc<TtlCache<String, Place>> {
        &self.reverse_cache
    }

    /// Resolve free text to the best matching place.
    ///
    /// `region` overrides the configured default region for this call.
    /// Every failure, including upstream ones, comes back as a
    /// [`ResolutionFailure`] carrying the original text.
    pub async fn resolve_address(
        &self,
        address: &str,
        region: Option<&str>,
        deadline: Option<Instant>,
    ) -> Result<Resolution, ResolutionFailure> {
        let original = address.trim();
        if original.is_empty() {
            return Err(ResolutionFailure::from_validation(
                &ValidationError::EmptyAddress,
                address,
            ));
        }

        let region = region
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(self.settings.default_region.as_str());
        let queries = build_query_sequence(original, region);
        tracing::info!(
            original_query = %original,
            region = %region,
            candidates = queries.len(),
            "resolving address"
        );

        let mut saw_empty = false;
        let mut last_error: Option<UpstreamError> = None;

        for query in &queries {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(self.timeout_failure(original));
            }

            let key = cache_key(query);
            if let Some(cached) = self.search_cache.get(&key) {
                tracing::debug!(query = %query, results = cached.len(), "cache hit");
                if let Some(resolution) = self.select(cached, query) {
                    return Ok(resolution);
                }
                saw_empty = true;
                continue;
            }

            tracing::info!(query = %query, "trying query");
            match self.search_upstream(&key, query, deadline).await {
                Ok(places) if places.is_empty() => {
                    tracing::info!(query = %query, "query returned no results");
                    saw_empty = true;
                }
                Ok(places) => {
                    tracing::info!(query = %query, results = places.len(), "query succeeded");
                    self.search_cache.set(key, places.clone());
                    if let Some(resolution) = self.select(places, query) {
                        return Ok(resolution);
                    }
                }
                Err(err @ (UpstreamError::Timeout { .. } | UpstreamError::Cancelled { .. })) => {
                    tracing::warn!(query = %query, error = %err, "resolution interrupted");
                    return Err(ResolutionFailure::from_upstream(&err, original));
                }
                Err(err) => {
                    tracing::error!(query = %query, error = %err, "query failed, trying next candidate");
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err) if !saw_empty => Err(ResolutionFailure::from_upstream(&err, original)),
            _ => {
                tracing::info!(original_query = %original, "all queries exhausted without results");
                Err(ResolutionFailure::new(
                    FailureCode::NoResults,
                    "No results found for the address",
                    original,
                    true,
                )
                .with_suggestions(no_results_suggestions(original)))
            }
        }
    }

    /// Resolve a coordinate to the place at that point.
    pub async fn resolve_coordinate(
        &self,
        latitude: f64,
        longitude: f64,
        deadline: Option<Instant>,
    ) -> Result<Place, ResolutionFailure> {
        let query = format!("lat: {:.6}, lon: {:.6}", latitude, longitude);
        if let Err(err) = validate_coordinates(latitude, longitude) {
            return Err(ResolutionFailure::from_validation(&err, query));
        }

        let key = reverse_cache_key(latitude, longitude);
        if let Some(place) = self.reverse_cache.get(&key) {
            tracing::debug!(key = %key, "cache hit");
            return Ok(place);
        }

        tracing::info!(latitude, longitude, "reverse geocoding coordinates");
        let service = Arc::clone(&self.service);
        let result = self
            .reverse_executor
            .execute(&key, self.service.service_name(), deadline, move || {
                let service = Arc::clone(&service);
                async move { service.reverse(latitude, longitude).await }
            })
            .await;

        match result {
            Ok(Some(place)) => {
                self.reverse_cache.set(key, place.clone());
                Ok(place)
            }
            Ok(None) => Err(ResolutionFailure::new(
                FailureCode::NoResults,
                "No place found at the given coordinates",
                query,
                true,
            )
            .with_suggestion("Check the coordinates are in decimal degrees with latitude first")),
            Err(err) => {
                tracing::error!(key = %key, error = %err, "reverse geocoding failed");
                Err(ResolutionFailure::from_upstream(&err, query))
            }
        }
    }

    async fn search_upstream(
        &self,
        key: &str,
        query: &str,
        deadline: Option<Instant>,
    ) -> Result<Vec<Place>, UpstreamError> {
        let service = Arc::clone(&self.service);
        let query = query.to_string();
        let limit = self.settings.search_limit;

        self.search_executor
            .execute(key, self.service.service_name(), deadline, move || {
                let service = Arc::clone(&service);
                let query = query.clone();
                async move { service.search(&query, limit).await }
            })
            .await
    }

    fn select(&self, mut candidates: Vec<Place>, query: &str) -> Option<Resolution> {
        rank(&mut candidates);
        let index = select_best(&candidates, self.settings.min_importance)?;
        let place = candidates[index].clone();

        tracing::info!(
            importance = place.importance,
            name = %place.name,
            confident = place.importance >= self.settings.min_importance,
            successful_query = %query,
            "selected best result"
        );

        Some(Resolution {
            place,
            candidates,
            matched_query: query.to_string(),
        })
    }

    fn timeout_failure(&self, original: &str) -> ResolutionFailure {
        ResolutionFailure::from_upstream(
            &UpstreamError::Timeout {
                service: self.service.service_name().to_string(),
            },
            original,
        )
    }
}

impl std::fmt::Debug for Geocoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Geocoder")
            .field("service", &self.service.service_name())
            .field("settings", &self.settings)
            .field("search_cache", &self.search_cache)
            .field("reverse_cache", &self.reverse_cache)
            .finish()
    }
}
