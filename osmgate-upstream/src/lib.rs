//! osmgate Upstream - outbound request plumbing
//!
//! Everything between "the pipeline wants an answer" and "bytes on the wire":
//! a per-service token-bucket limiter registry, a single-flight registry that
//! collapses concurrent identical requests, a retrying executor that ties the
//! two together, and the geocoding service seam with its Nominatim client.

pub mod executor;
pub mod nominatim;
pub mod rate_limit;
pub mod service;
pub mod singleflight;

pub use executor::RequestExecutor;
pub use nominatim::{NominatimAddress, NominatimClient, NominatimPlace};
pub use rate_limit::{RateLimiterRegistry, TokenBucket};
pub use service::GeocodingService;
pub use singleflight::SingleFlight;
