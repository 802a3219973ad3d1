//! osmgate Core - shared types for the OpenStreetMap resolution layer
//!
//! Everything here is plain data or pure functions: geographic primitives,
//! the error taxonomy every other crate reports through, process
//! configuration, and the encoded polyline codec consumed by routing output.

pub mod config;
pub mod error;
pub mod geo;
pub mod polyline;

pub use config::{
    CachePolicy, OsmConfig, RateLimit, RetryConfig, DEFAULT_NOMINATIM_URL, DEFAULT_USER_AGENT,
    SERVICE_NOMINATIM, SERVICE_OSRM, SERVICE_OVERPASS,
};
pub use error::{
    ConfigError, FailureCode, OsmError, OsmResult, PolylineError, ResolutionFailure,
    UpstreamError, ValidationError,
};
pub use geo::{
    haversine_distance, validate_coordinates, Address, BoundingBox, Location, Place,
    EARTH_RADIUS_METERS,
};
