//! Geographic primitives shared by every layer.

use crate::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean Earth radius (WGS-84) in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Approximate meters per degree, good enough near the equator.
const METERS_PER_DEGREE: f64 = 111_000.0;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    /// Build a location, rejecting out-of-range coordinates.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ValidationError> {
        validate_coordinates(latitude, longitude)?;
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Great-circle distance to `other` in meters.
    pub fn distance_to(&self, other: &Location) -> f64 {
        haversine_distance(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// Check that a coordinate pair is within valid ranges.
///
/// Latitude is checked first, so a pair that is wrong on both axes reports
/// the latitude.
pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), ValidationError> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(ValidationError::InvalidLatitude { value: latitude });
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(ValidationError::InvalidLongitude { value: longitude });
    }
    Ok(())
}

/// Great-circle distance between two points in meters (haversine formula).
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_METERS * c
}

/// A structured postal address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub street: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub house_number: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub city: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub country: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub postal_code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub formatted: String,
}

/// A resolved place: one candidate produced from an upstream geocoding reply.
///
/// Immutable once built; `importance` is the upstream relevance score in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    pub location: Location,
    #[serde(default)]
    pub address: Address,
    #[serde(default)]
    pub importance: f64,
}

/// Geographic bounding box with southwest and northeast corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// An empty box: inverted bounds so the first point defines it.
    pub fn empty() -> Self {
        Self {
            min_lat: 90.0,
            min_lon: 180.0,
            max_lat: -90.0,
            max_lon: -180.0,
        }
    }

    /// Smallest box containing every given location.
    pub fn around<'a>(locations: impl IntoIterator<Item = &'a Location>) -> Self {
        let mut bbox = Self::empty();
        for location in locations {
            bbox.extend_with_point(location.latitude, location.longitude);
        }
        bbox
    }

    pub fn is_empty(&self) -> bool {
        self.min_lat > self.max_lat || self.min_lon > self.max_lon
    }

    pub fn extend_with_point(&mut self, latitude: f64, longitude: f64) {
        self.min_lat = self.min_lat.min(latitude);
        self.max_lat = self.max_lat.max(latitude);
        self.min_lon = self.min_lon.min(longitude);
        self.max_lon = self.max_lon.max(longitude);
    }

    /// Grow the box by roughly `meters` on every side, clamped to valid ranges.
    pub fn buffer(&mut self, meters: f64) {
        let degrees = meters / METERS_PER_DEGREE;
        self.min_lat = (self.min_lat - degrees).max(-90.0);
        self.max_lat = (self.max_lat + degrees).min(90.0);
        self.min_lon = (self.min_lon - degrees).max(-180.0);
        self.max_lon = (self.max_lon + degrees).min(180.0);
    }

    pub fn contains(&self, location: &Location) -> bool {
        (self.min_lat..=self.max_lat).contains(&location.latitude)
            && (self.min_lon..=self.max_lon).contains(&location.longitude)
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::empty()
    }
}

/// Overpass-style `(south,west,north,east)`.
impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:.6},{:.6},{:.6},{:.6})",
            self.min_lat, self.min_lon, self.max_lat, self.max_lon
        )
    }
}
