//! Acceptance filter for live location samples.
//!
//! A reading is checked against the last accepted point in three steps:
//!
//! 1. **Accuracy gate**: a reported accuracy worse than [`MAX_ACCURACY_METERS`]
//!    is rejected outright, whatever the movement. This keeps GPS drift spikes
//!    out of the route.
//! 2. **First point**: with nothing accepted yet, the reading is accepted.
//! 3. **Movement gate**: closer than [`STATIONARY_METERS`] to the last accepted
//!    point is "stationary"; anything further is accepted. Between
//!    [`STATIONARY_METERS`] and [`MOVED_METERS`] a reading is only kept when no
//!    newer candidate arrived in the same tick. The tracker delivers exactly one
//!    reading per tick, so the most recent candidate always wins.
//!
//! The thresholds are tuned for walking speed and are deliberately not part of
//! any configuration struct.

use serde::{Deserialize, Serialize};
use crate::geo_utils::haversine_distance;
use crate::GeoPoint;

/// Readings with a reported accuracy above this (meters) are rejected.
pub const MAX_ACCURACY_METERS: f64 = 15.0;

/// Readings closer than this (meters) to the last accepted point are stationary.
pub const STATIONARY_METERS: f64 = 3.0;

/// Readings further than this (meters) from the last accepted point have clearly moved.
pub const MOVED_METERS: f64 = 5.0;

/// Why a sample was accepted or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum SampleReason {
    /// No point had been accepted yet
    First,
    /// Reported accuracy exceeded [`MAX_ACCURACY_METERS`]
    LowAccuracy,
    /// Too close to the last accepted point
    Stationary,
    /// Far enough from the last accepted point
    Moved,
}

/// Outcome of [`evaluate_sample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct SampleVerdict {
    pub accepted: bool,
    pub reason: SampleReason,
}

impl SampleVerdict {
    fn accept(reason: SampleReason) -> Self {
        Self { accepted: true, reason }
    }

    fn reject(reason: SampleReason) -> Self {
        Self { accepted: false, reason }
    }
}

/// Returns true when the reading reports an accuracy worse than the gate allows.
///
/// Points without an accuracy (manually placed) always pass. A NaN accuracy
/// is treated as unknown quality and fails.
#[inline]
pub fn exceeds_accuracy_gate(point: &GeoPoint) -> bool {
    point.accuracy.is_some_and(|acc| acc.is_nan() || acc > MAX_ACCURACY_METERS)
}

/// Decide whether `candidate` should be appended after `last_accepted`.
///
/// Pure function: the caller owns the "last accepted" state and passes it in.
///
/// # Example
///
/// ```rust
/// use backpath_capture::{GeoPoint, filter::{evaluate_sample, SampleReason}};
///
/// let last = GeoPoint::with_accuracy(52.5083, 5.4750, 5.0);
/// let next = GeoPoint::with_accuracy(52.5084, 5.4750, 8.0); // ~11m north
///
/// let verdict = evaluate_sample(&next, Some(&last));
/// assert!(verdict.accepted);
/// assert_eq!(verdict.reason, SampleReason::Moved);
/// ```
pub fn evaluate_sample(candidate: &GeoPoint, last_accepted: Option<&GeoPoint>) -> SampleVerdict {
    if exceeds_accuracy_gate(candidate) {
        return SampleVerdict::reject(SampleReason::LowAccuracy);
    }

    let Some(last) = last_accepted else {
        return SampleVerdict::accept(SampleReason::First);
    };

    let moved = haversine_distance(candidate, last);
    if moved < STATIONARY_METERS {
        return SampleVerdict::reject(SampleReason::Stationary);
    }

    // Between STATIONARY_METERS and MOVED_METERS the single candidate of this
    // tick is the most recent one, so it is kept like any other movement.
    SampleVerdict::accept(SampleReason::Moved)
}
