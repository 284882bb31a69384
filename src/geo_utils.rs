//! # Geographic Utilities
//!
//! Distance and length computations for captured walking routes.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two points, full precision |
//! | [`distance_display_meters`] | Same distance rounded to whole meters for display |
//! | [`path_length`] | Cumulative length of a route in meters |
//! | [`meters_to_degrees`] | Convert meters to approximate degrees at a latitude |
//! | [`to_line_string`] | Convert a route into a `geo::LineString` |
//!
//! ## Example
//!
//! ```rust
//! use backpath_capture::{GeoPoint, geo_utils};
//!
//! let route = vec![
//!     GeoPoint::new(52.5083, 5.4750),
//!     GeoPoint::new(52.5084, 5.4750),
//!     GeoPoint::new(52.5090, 5.4760),
//! ];
//!
//! let length = geo_utils::path_length(&route);
//! println!("Route length: {:.0}m", length);
//!
//! let step = geo_utils::distance_display_meters(&route[0], &route[1]);
//! assert_eq!(step, 11);
//! ```
//!
//! ## Algorithm Notes
//!
//! The haversine formula is evaluated on a sphere of radius 6,371,000 m. Sums are
//! kept in full `f64` precision; rounding only happens in
//! [`distance_display_meters`].
//!
//! Reference: [Haversine formula (Wikipedia)](https://en.wikipedia.org/wiki/Haversine_formula)

use geo::{Coord, LineString};
use crate::GeoPoint;

/// Sphere radius used for every distance in this crate.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

// =============================================================================
// Distance Functions
// =============================================================================

/// Great-circle distance between two points in meters.
///
/// Deterministic and total: identical points give exactly `0.0`. The accuracy
/// field of either point is ignored.
///
/// # Example
///
/// ```rust
/// use backpath_capture::{GeoPoint, geo_utils};
///
/// let a = GeoPoint::new(0.0, 0.0);
/// let b = GeoPoint::new(0.001, 0.0);
/// let d = geo_utils::haversine_distance(&a, &b);
/// assert!((d - 111.0).abs() < 1.0);
/// ```
#[inline]
pub fn haversine_distance(p1: &GeoPoint, p2: &GeoPoint) -> f64 {
    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();
    let d_lat = (p2.latitude - p1.latitude).to_radians();
    let d_lng = (p2.longitude - p1.longitude).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Distance rounded to the nearest whole meter, for display only.
///
/// Never feed this back into sums; use [`haversine_distance`] for that.
#[inline]
pub fn distance_display_meters(p1: &GeoPoint, p2: &GeoPoint) -> u64 {
    haversine_distance(p1, p2).round() as u64
}

/// Total length of a route in meters.
///
/// Sums the haversine distance between consecutive points. Empty or single-point
/// routes return 0.0.
///
/// # Example
///
/// ```rust
/// use backpath_capture::{GeoPoint, geo_utils};
///
/// let route = vec![
///     GeoPoint::new(52.5083, 5.4750),
///     GeoPoint::new(52.5084, 5.4750),
///     GeoPoint::new(52.5085, 5.4750),
/// ];
///
/// let length = geo_utils::path_length(&route);
/// let expected = geo_utils::haversine_distance(&route[0], &route[1])
///     + geo_utils::haversine_distance(&route[1], &route[2]);
/// assert_eq!(length, expected);
/// ```
pub fn path_length(points: &[GeoPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Convert meters to approximate degrees at a given latitude.
///
/// Uses the longitude scale, which is the larger of the two degree values, so
/// a square search box built with it always contains the true circle.
#[inline]
pub fn meters_to_degrees(meters: f64, latitude: f64) -> f64 {
    // At the equator, 1 degree ≈ 111,320 meters, shrinking with cos(latitude)
    let lat_rad = latitude.to_radians();
    let meters_per_degree = 111_320.0 * lat_rad.cos().max(0.1);
    meters / meters_per_degree
}

// =============================================================================
// Conversion
// =============================================================================

/// Build a `geo::LineString` (x = longitude, y = latitude) from a route.
///
/// Accuracy is not carried over.
pub fn to_line_string(points: &[GeoPoint]) -> LineString<f64> {
    LineString::new(
        points
            .iter()
            .map(|p| Coord { x: p.longitude, y: p.latitude })
            .collect(),
    )
}

// =============================================================================
// Unit Tests
// =============================================================================
