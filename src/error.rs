//! Error type shared by every capture component.
//!
//! None of these are fatal to a capture session: callers either retry
//! (`LowAccuracyStart`), skip (`PositionUnavailable`), or keep the route
//! unchanged (`IndexOutOfRange`, `NotEditing`).

use thiserror::Error;

/// Errors raised while capturing, editing or resolving a route.
#[derive(Error, Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
#[cfg_attr(feature = "ffi", uniffi(flat_error))]
pub enum CaptureError {
    /// The first reading was too inaccurate to start tracking.
    #[error("first reading accuracy {accuracy:.1}m exceeds the start threshold, retry outdoors")]
    LowAccuracyStart { accuracy: f64 },

    /// The location source failed to deliver a reading.
    #[error("position unavailable: {0}")]
    PositionUnavailable(String),

    /// An edit referenced a point that does not exist.
    #[error("point index {index} out of range for route of {len} points")]
    IndexOutOfRange { index: u64, len: u64 },

    #[error("route is not in edit mode")]
    NotEditing,

    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The reverse geocoder rejected or could not answer a lookup.
    #[error("reverse geocoding failed: {0}")]
    GeocodeFailed(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CaptureError {
    pub(crate) fn index_out_of_range(index: usize, len: usize) -> Self {
        CaptureError::IndexOutOfRange {
            index: index as u64,
            len: len as u64,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CaptureError>;
