//! Nominatim forward/reverse geocoding provider

mod client;
mod types;

pub use client::NominatimClient;
pub use types::{places_from_results, NominatimAddress, NominatimPlace};
