//! The geocoding service seam.

use async_trait::async_trait;
use osmgate_core::{Place, UpstreamError, SERVICE_NOMINATIM};

/// Forward and reverse geocoding against some upstream.
///
/// Implementations perform exactly one network round trip per call; rate
/// limiting, retries and coalescing are layered on by
/// [`crate::RequestExecutor`].
#[async_trait]
pub trait GeocodingService: Send + Sync {
    /// Logical service name used for rate limiting.
    fn service_name(&self) -> &str {
        SERVICE_NOMINATIM
    }

    /// Search for places matching free text, at most `limit` results.
    async fn search(&self, query: &str, limit: u32) -> Result<Vec<Place>, UpstreamError>;

    /// Find the place at a coordinate. `Ok(None)` means nothing is there.
    async fn reverse(&self, latitude: f64, longitude: f64) -> Result<Option<Place>, UpstreamError>;
}
