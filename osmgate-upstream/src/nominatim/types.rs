//! Nominatim wire types

use osmgate_core::{Address, Location, Place, UpstreamError};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One result as returned by `/search` or `/reverse`.
///
/// Coordinates arrive as strings and `place_id` may be a number or a string
/// depending on the Nominatim version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NominatimPlace {
    #[serde(default)]
    pub place_id: JsonValue,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub lat: String,
    #[serde(default)]
    pub lon: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub importance: Option<f64>,
    #[serde(default)]
    pub address: NominatimAddress,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NominatimAddress {
    #[serde(default)]
    pub road: String,
    #[serde(default)]
    pub house_number: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub town: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub postcode: String,
}

impl NominatimPlace {
    /// Identifier as text, whichever form it arrived in.
    pub fn id(&self) -> String {
        match &self.place_id {
            JsonValue::Number(n) => n.to_string(),
            JsonValue::String(s) => s.clone(),
            _ => String::new(),
        }
    }

    /// Convert to a [`Place`]. `None` if the coordinates don't parse.
    pub fn to_place(&self) -> Option<Place> {
        let latitude: f64 = self.lat.trim().parse().ok()?;
        let longitude: f64 = self.lon.trim().parse().ok()?;
        if !latitude.is_finite() || !longitude.is_finite() {
            return None;
        }

        let city = if self.address.city.is_empty() {
            self.address.town.clone()
        } else {
            self.address.city.clone()
        };

        Some(Place {
            id: self.id(),
            name: self.display_name.clone(),
            location: Location {
                latitude,
                longitude,
            },
            address: Address {
                street: self.address.road.clone(),
                house_number: self.address.house_number.clone(),
                city,
                state: self.address.state.clone(),
                country: self.address.country.clone(),
                postal_code: self.address.postcode.clone(),
                formatted: self.display_name.clone(),
            },
            importance: self.importance.unwrap_or(0.0).clamp(0.0, 1.0),
        })
    }
}

/// Convert a `/search` reply, skipping results whose coordinates don't parse.
///
/// A non-empty reply in which nothing converts is a parse failure.
pub fn places_from_results(service: &str, raw: &[NominatimPlace]) -> Result<Vec<Place>, UpstreamError> {
    let places: Vec<Place> = raw
        .iter()
        .filter_map(|result| {
            let place = result.to_place();
            if place.is_none() {
                tracing::warn!(
                    service,
                    place_id = %result.id(),
                    lat = %result.lat,
                    lon = %result.lon,
                    "skipping result with unparsable coordinates"
                );
            }
            place
        })
        .collect();

    if places.is_empty() && !raw.is_empty() {
        return Err(UpstreamError::Parse {
            service: service.to_string(),
            reason: format!("none of {} results had valid coordinates", raw.len()),
        });
    }
    Ok(places)
}
