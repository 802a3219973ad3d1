//! osmgate Geocode - address resolution for OpenStreetMap services
//!
//! Turns loosely formatted place descriptions into coordinates (and
//! coordinates back into places) while keeping the number of upstream calls
//! down: fallback queries are tried in order, answers are cached, concurrent
//! identical lookups are coalesced and every call is rate limited per
//! service.

pub mod context;
pub mod pipeline;
pub mod ranking;
pub mod sanitize;
pub mod suggestions;
pub mod tools;

pub use context::OsmContext;
pub use pipeline::{Geocoder, GeocoderSettings, Resolution};
pub use ranking::{rank, select_best};
pub use sanitize::{build_query_sequence, cache_key, ensure_region, reverse_cache_key, sanitize, Sanitized};
pub use suggestions::no_results_suggestions;
pub use tools::{available_tools, call_tool, CallToolRequest, CallToolResponse, ContentBlock, Tool};
