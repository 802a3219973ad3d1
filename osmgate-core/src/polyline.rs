//! Encoded polyline codec (5 decimal places of precision).
//!
//! This is the de facto route-geometry format used by routing services:
//! every coordinate is scaled by 1e5 and rounded, stored as a delta from the
//! previous point, zig-zag mapped to an unsigned value and emitted in 5-bit
//! groups, least significant first. Every group except the last has `0x20`
//! set, and every emitted byte is offset by 63 to land in printable ASCII.
//! Latitude always precedes longitude for the same point.

use crate::{Location, PolylineError};

/// Fixed-point scale for 5 decimal places.
const PRECISION: f64 = 1e5;
const BYTE_OFFSET: u8 = 63;
const CONTINUATION: u64 = 0x20;
const GROUP_MASK: u64 = 0x1f;

/// Encode points into a polyline string. An empty slice encodes to `""`.
pub fn encode(points: &[Location]) -> String {
    let mut out = String::with_capacity(points.len() * 6);
    let mut prev_lat = 0i64;
    let mut prev_lon = 0i64;

    for point in points {
        let lat = scale(point.latitude);
        let lon = scale(point.longitude);
        encode_value(lat - prev_lat, &mut out);
        encode_value(lon - prev_lon, &mut out);
        prev_lat = lat;
        prev_lon = lon;
    }

    out
}

/// Decode a polyline string. `""` decodes to an empty list.
///
/// Unlike a lenient decoder this rejects bytes outside the alphabet and
/// strings that stop mid-value or mid-point.
pub fn decode(encoded: &str) -> Result<Vec<Location>, PolylineError> {
    let bytes = encoded.as_bytes();
    let mut points = Vec::with_capacity(bytes.len() / 4);
    let mut index = 0;
    let mut lat = 0i64;
    let mut lon = 0i64;

    while index < bytes.len() {
        lat = accumulate(lat, bytes, &mut index)?;
        if index >= bytes.len() {
            return Err(PolylineError::Truncated { position: index });
        }
        lon = accumulate(lon, bytes, &mut index)?;

        points.push(Location {
            latitude: lat as f64 / PRECISION,
            longitude: lon as f64 / PRECISION,
        });
    }

    Ok(points)
}

fn scale(coordinate: f64) -> i64 {
    (coordinate * PRECISION).round() as i64
}

fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

fn encode_value(delta: i64, out: &mut String) {
    let mut value = zigzag(delta);
    while value >= CONTINUATION {
        out.push(char::from(
            (((value & GROUP_MASK) | CONTINUATION) as u8) + BYTE_OFFSET,
        ));
        value >>= 5;
    }
    out.push(char::from((value as u8) + BYTE_OFFSET));
}

/// Add the next delta to a running coordinate.
fn accumulate(current: i64, bytes: &[u8], index: &mut usize) -> Result<i64, PolylineError> {
    let position = *index;
    let delta = decode_value(bytes, index)?;
    current
        .checked_add(delta)
        .ok_or(PolylineError::Overflow { position })
}

fn decode_value(bytes: &[u8], index: &mut usize) -> Result<i64, PolylineError> {
    let start = *index;
    let mut result = 0u64;
    let mut shift = 0u32;

    loop {
        let Some(&byte) = bytes.get(*index) else {
            return Err(PolylineError::Truncated { position: *index });
        };
        if !(BYTE_OFFSET..=BYTE_OFFSET + 63).contains(&byte) {
            return Err(PolylineError::InvalidByte {
                position: *index,
                byte,
            });
        }
        if shift > 60 {
            return Err(PolylineError::Overflow { position: start });
        }

        let chunk = u64::from(byte - BYTE_OFFSET);
        *index += 1;
        result |= (chunk & GROUP_MASK) << shift;
        shift += 5;

        if chunk < CONTINUATION {
            return Ok(unzigzag(result));
        }
    }
}
