//! Owning runtime context
//!
//! Constructs the HTTP client, limiter registry, caches and their sweepers
//! once at startup and tears them down at shutdown. Nothing here is global:
//! two contexts never share state.

use std::sync::Arc;

use osmgate_cache::SweeperHandle;
use osmgate_core::{OsmConfig, OsmResult, RateLimit};
use osmgate_upstream::{GeocodingService, NominatimClient, RateLimiterRegistry};
use tokio::time::Instant;

use crate::pipeline::Geocoder;
use crate::tools::{self, CallToolRequest, CallToolResponse, Tool};

pub struct OsmContext {
    config: OsmConfig,
    limiter: Arc<RateLimiterRegistry>,
    geocoder: Arc<Geocoder>,
    sweepers: Vec<SweeperHandle>,
}

impl OsmContext {
    /// Build a context talking to the configured Nominatim instance.
    ///
    /// Must be called from within a tokio runtime (the cache sweepers are
    /// spawned here).
    pub fn from_config(config: OsmConfig) -> OsmResult<Self> {
        config.validate()?;
        let client = NominatimClient::from_config(&config)?;
        Self::with_service(config, Arc::new(client))
    }

    /// Build a context around an arbitrary geocoding service.
    pub fn with_service(config: OsmConfig, service: Arc<dyn GeocodingService>) -> OsmResult<Self> {
        config.validate()?;

        let limiter = Arc::new(RateLimiterRegistry::from_config(&config));
        let geocoder = Arc::new(Geocoder::new(service, Arc::clone(&limiter), &config));

        let mut sweepers = Vec::new();
        if !config.sweep_interval.is_zero() {
            sweepers.push(geocoder.search_cache().spawn_sweeper(config.sweep_interval));
            sweepers.push(geocoder.reverse_cache().spawn_sweeper(config.sweep_interval));
        }

        tracing::info!(
            nominatim_url = %config.nominatim_base_url,
            user_agent = %config.user_agent,
            cache_capacity = config.geocode_cache.capacity,
            sweep_interval_secs = config.sweep_interval.as_secs(),
            "osm context ready"
        );

        Ok(Self {
            config,
            limiter,
            geocoder,
            sweepers,
        })
    }

    pub fn config(&self) -> &OsmConfig {
        &self.config
    }

    pub fn geocoder(&self) -> &Arc<Geocoder> {
        &self.geocoder
    }

    pub fn limiter(&self) -> &Arc<RateLimiterRegistry> {
        &self.limiter
    }

    /// Replace the rate limit for one service at runtime.
    pub fn reconfigure_rate_limit(&self, service: &str, limit: RateLimit) {
        self.limiter.reconfigure(service, limit);
    }

    pub fn list_tools(&self) -> Vec<Tool> {
        tools::available_tools()
    }

    /// Run one tool call under the configured per-call deadline.
    pub async fn call_tool(&self, request: CallToolRequest) -> CallToolResponse {
        let deadline = Instant::now() + self.config.call_timeout;
        tools::call_tool(&self.geocoder, request, Some(deadline)).await
    }

    /// Stop the background sweepers.
    pub async fn shutdown(self) {
        for sweeper in self.sweepers {
            sweeper.shutdown().await;
        }
        let stats = self.geocoder.search_cache().stats();
        tracing::info!(
            hits = stats.hits,
            misses = stats.misses,
            hit_rate = stats.hit_rate(),
            "osm context shut down"
        );
    }
}

impl std::fmt::Debug for OsmContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OsmContext")
            .field("geocoder", &self.geocoder)
            .field("sweepers", &self.sweepers.len())
            .finish()
    }
}
