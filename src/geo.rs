//! Geometry and text primitives shared by every resolution stage.
//!
//! Pure functions with no I/O: great-circle distance, normalized edit-distance
//! similarity, and a few small coordinate helpers.

use serde::{Deserialize, Serialize};

/// Mean Earth radius used by the haversine formula, in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A WGS84 point. Construct through [`Coordinate::checked`] when the values
/// come from outside the crate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    /// Build a coordinate, rejecting NaN and out-of-range values.
    pub fn checked(lat: f64, lng: f64) -> Option<Self> {
        let c = Self { lat, lng };
        c.is_valid().then_some(c)
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Great-circle distance between two points in meters.
pub fn haversine_distance(a: Coordinate, b: Coordinate) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    // Rounding can push h a hair above 1.0 for antipodal points.
    2.0 * EARTH_RADIUS_M * h.clamp(0.0, 1.0).sqrt().asin()
}

/// `1 - levenshtein(a, b) / max(len(a), len(b))`, counted in chars.
///
/// Two empty strings are identical (1.0).
pub fn string_similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

/// Arithmetic mean of a point set. `None` for an empty set.
pub fn centroid(points: &[Coordinate]) -> Option<Coordinate> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let lat = points.iter().map(|p| p.lat).sum::<f64>() / n;
    let lng = points.iter().map(|p| p.lng).sum::<f64>() / n;
    Some(Coordinate { lat, lng })
}

/// Shift a point by a small local offset (meters north / east).
///
/// Flat-earth approximation; only meant for offsets of a few hundred meters.
pub fn offset_meters(origin: Coordinate, north_m: f64, east_m: f64) -> Coordinate {
    let d_lat = (north_m / EARTH_RADIUS_M).to_degrees();
    let cos_lat = origin.lat.to_radians().cos().max(1e-6);
    let d_lng = (east_m / (EARTH_RADIUS_M * cos_lat)).to_degrees();
    Coordinate {
        lat: (origin.lat + d_lat).clamp(-90.0, 90.0),
        lng: wrap_longitude(origin.lng + d_lng),
    }
}

fn wrap_longitude(lng: f64) -> f64 {
    if (-180.0..=180.0).contains(&lng) {
        lng
    } else {
        (lng + 180.0).rem_euclid(360.0) - 180.0
    }
}

/// Format as `37.5796° N, 126.9770° E`.
pub fn format_coords(lat: f64, lng: f64) -> String {
    let ns = if lat >= 0.0 { 'N' } else { 'S' };
    let ew = if lng >= 0.0 { 'E' } else { 'W' };
    format!("{:.4}\u{00B0} {}, {:.4}\u{00B0} {}", lat.abs(), ns, lng.abs(), ew)
}
