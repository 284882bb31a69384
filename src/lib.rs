//! # Backpath Capture
//!
//! GPS route capture and editing for on-site backpath surveys.
//!
//! This library provides:
//! - Live sampling of a walked route with accuracy and stillness filtering
//! - Manual correction of the captured route with undo/redo
//! - Path length from raw coordinates
//! - Street, house-number range and district resolution for the route endpoints
//!
//! ## Features
//!
//! - **`http`** - Enable the Nominatim reverse geocoder client
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use backpath_capture::{GeoPoint, RouteGeometry, RouteEditor, EditorConfig, geo_utils};
//!
//! // Route handed over by a stopped tracker
//! let geometry = RouteGeometry::from_points(vec![
//!     GeoPoint::with_accuracy(52.5083, 5.4750, 5.0),
//!     GeoPoint::with_accuracy(52.5084, 5.4750, 8.0),
//!     GeoPoint::with_accuracy(52.50845, 5.4750, 6.0),
//! ]);
//!
//! let mut editor = RouteEditor::new(geometry, EditorConfig::default());
//! editor.enter_edit_mode().unwrap();
//! editor.remove_at(1).unwrap();
//! editor.undo();
//! editor.save().unwrap();
//!
//! println!("{:.0}m", geo_utils::path_length(editor.points()));
//! ```

use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{CaptureError, Result};

pub mod geo_utils;

// Sample acceptance rules
pub mod filter;
pub use filter::{evaluate_sample, SampleReason, SampleVerdict};

pub mod tracker;
pub use tracker::{LocationSource, RouteTracker, TrackerConfig, TrackerState, TrackingSession};

pub mod geometry;
pub use geometry::{RouteGeometry, RouteHistory, RouteSnapshot};

pub mod editor;
pub use editor::{EditOutcome, EditorConfig, MapInteraction, RouteEditor};

pub mod resolver;
pub use resolver::{
    AddressLookup, DistrictRange, DistrictTable, LocationResolver, Resolution,
    ResolutionRequest, ResolvedLocation, ReverseGeocoder,
};

pub mod session;
pub use session::{CaptureConfig, CapturedRoute, SurveyCapture};

// HTTP module for reverse geocoding
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{GeocoderConfig, NominatimGeocoder};

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("BackpathRust")
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A geographic coordinate, optionally with the device-reported accuracy.
///
/// Tracker readings carry an accuracy radius in meters; manually placed or
/// moved points do not.
///
/// # Example
/// ```
/// use backpath_capture::GeoPoint;
/// let manual = GeoPoint::new(52.5083, 5.4750);
/// let reading = GeoPoint::with_accuracy(52.5083, 5.4750, 6.0);
/// assert_eq!(manual.accuracy, None);
/// assert_eq!(reading.accuracy, Some(6.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

impl GeoPoint {
    /// Create a point without accuracy (manual placement).
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude, accuracy: None }
    }

    /// Create a point as reported by a location source.
    pub fn with_accuracy(latitude: f64, longitude: f64, accuracy: f64) -> Self {
        Self { latitude, longitude, accuracy: Some(accuracy) }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

impl From<GeoPoint> for geo::Point<f64> {
    fn from(p: GeoPoint) -> Self {
        geo::Point::new(p.longitude, p.latitude)
    }
}

// ============================================================================
// FFI Exports (only when feature enabled)
// ============================================================================

#[cfg(feature = "ffi")]
mod ffi {
    use super::*;
    use log::debug;

    /// Great-circle distance in meters.
    #[uniffi::export]
    pub fn ffi_distance(a: GeoPoint, b: GeoPoint) -> f64 {
        geo_utils::haversine_distance(&a, &b)
    }

    /// Route length in meters (0 below two points).
    #[uniffi::export]
    pub fn ffi_path_length(points: Vec<GeoPoint>) -> f64 {
        init_logging();
        let length = geo_utils::path_length(&points);
        debug!("[BackpathRust] path_length: {} points -> {:.1}m", points.len(), length);
        length
    }

    /// Decide whether a live reading should be added after `last_accepted`.
    #[uniffi::export]
    pub fn ffi_evaluate_sample(candidate: GeoPoint, last_accepted: Option<GeoPoint>) -> SampleVerdict {
        evaluate_sample(&candidate, last_accepted.as_ref())
    }

    /// District name for a postal code from the bundled table.
    #[uniffi::export]
    pub fn ffi_lookup_district(postal_code: String) -> Option<String> {
        init_logging();
        DistrictTable::default().lookup(&postal_code).map(str::to_string)
    }

    /// Sampling interval the tracker uses by default, in milliseconds.
    #[uniffi::export]
    pub fn default_tracker_config_ms() -> u64 {
        TrackerConfig::default().sample_interval.as_millis() as u64
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_point_validation() {
        assert!(GeoPoint::new(52.5083, 5.4750).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, 181.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_geo_point_serde_omits_missing_accuracy() {
        let manual = serde_json::to_value(GeoPoint::new(52.5, 5.4)).unwrap();
        assert!(manual.get("accuracy").is_none());

        let reading: GeoPoint =
            serde_json::from_str(r#"{"latitude":52.5,"longitude":5.4,"accuracy":7.5}"#).unwrap();
        assert_eq!(reading, GeoPoint::with_accuracy(52.5, 5.4, 7.5));

        let without: GeoPoint = serde_json::from_str(r#"{"latitude":52.5,"longitude":5.4}"#).unwrap();
        assert_eq!(without.accuracy, None);
    }

    #[test]
    fn test_geo_point_into_geo() {
        let p: geo::Point<f64> = GeoPoint::new(52.5, 5.4).into();
        assert_eq!(p.x(), 5.4);
        assert_eq!(p.y(), 52.5);
    }
}
