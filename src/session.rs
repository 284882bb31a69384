//! Capture session: one backpath from the first GPS fix to the record handed
//! back to the survey form.
//!
//! ```text
//! start_tracking ──► RouteTracker ──stop_tracking──► RouteEditor ──finish──► CapturedRoute
//!                                         │                 │
//!                                         └── resolve ◄─────┘ (after stop and every save)
//! ```
//!
//! Lookups are issued eagerly on every qualifying change. Each one is tagged
//! with the route version it was computed for and dropped on arrival if the
//! route has changed since.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::editor::{EditorConfig, RouteEditor};
use crate::geometry::RouteSnapshot;
use crate::error::{CaptureError, Result};
use crate::resolver::{
    DistrictTable, LocationResolver, Resolution, ResolutionRequest, ResolvedLocation, ReverseGeocoder,
};
use crate::tracker::{LocationSource, RouteTracker, TrackerConfig, TrackerState};
use crate::GeoPoint;

/// Everything needed to set up a [`SurveyCapture`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub tracker: TrackerConfig,
    pub editor: EditorConfig,
    pub districts: DistrictTable,
}

/// The finished route with its derived fields, ready for the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[serde(rename_all = "camelCase")]
pub struct CapturedRoute {
    pub route: Vec<GeoPoint>,
    pub length_meters: f64,
    pub street: String,
    pub district: String,
    pub house_number_range: String,
}

/// Orchestrates tracker, editor and resolver for a single capture.
pub struct SurveyCapture<S: LocationSource, G: ReverseGeocoder> {
    tracker: RouteTracker<S>,
    editor: Option<RouteEditor>,
    resolver: LocationResolver<G>,
    editor_config: EditorConfig,
    location: ResolvedLocation,
    /// Route version `location` was computed for
    location_version: Option<u64>,
    /// Points `location` was computed for
    location_route: Option<RouteSnapshot>,
}

impl<S: LocationSource, G: ReverseGeocoder> SurveyCapture<S, G> {
    pub fn new(source: S, geocoder: G, config: CaptureConfig) -> Self {
        Self {
            tracker: RouteTracker::new(source, config.tracker),
            editor: None,
            resolver: LocationResolver::new(geocoder, config.districts),
            editor_config: config.editor,
            location: ResolvedLocation::default(),
            location_version: None,
            location_route: None,
        }
    }

    pub fn tracker(&self) -> &RouteTracker<S> {
        &self.tracker
    }

    pub fn tracker_state(&self) -> TrackerState {
        self.tracker.state()
    }

    /// Present once tracking has stopped.
    pub fn editor(&self) -> Option<&RouteEditor> {
        self.editor.as_ref()
    }

    pub fn editor_mut(&mut self) -> Option<&mut RouteEditor> {
        self.editor.as_mut()
    }

    /// Latest applied address fields.
    pub fn location(&self) -> &ResolvedLocation {
        &self.location
    }

    /// True when `location` belongs to the current route.
    pub fn location_is_current(&self) -> bool {
        match (&self.editor, self.location_version) {
            (Some(editor), Some(version)) => editor.geometry().version() == version,
            _ => false,
        }
    }

    pub async fn start_tracking(&mut self) -> Result<()> {
        self.tracker.start().await
    }

    /// Stop tracking, hand the route to a new editor and resolve its address.
    pub async fn stop_tracking(&mut self) -> Result<()> {
        let geometry = self.tracker.stop().await?;
        self.editor = Some(RouteEditor::new(geometry, self.editor_config.clone()));
        self.location = ResolvedLocation::default();
        self.location_version = None;
        self.location_route = None;
        self.refresh_location().await;
        Ok(())
    }

    /// Commit the edits and resolve the address of the saved route.
    pub async fn save_edits(&mut self) -> Result<()> {
        self.editor_or_err()?.save()?;
        self.refresh_location().await;
        Ok(())
    }

    /// Drop the edits. A location resolved for the restored route stays current.
    pub fn cancel_edits(&mut self) -> Result<()> {
        let resolved_for = self.location_route.clone();
        let editor = self.editor_or_err()?;
        editor.cancel()?;

        let geometry = editor.geometry();
        let version = geometry.version();
        let unchanged = resolved_for.is_some_and(|route| route.as_slice() == geometry.points());
        if unchanged {
            self.location_version = Some(version);
        }
        Ok(())
    }

    /// Request describing the current route, if it is complete.
    pub fn resolution_request(&self) -> Option<ResolutionRequest> {
        let geometry = self.editor.as_ref()?.geometry();
        ResolutionRequest::for_route(geometry.version(), geometry.points())
    }

    /// Apply a finished resolution unless the route moved on in the meantime.
    ///
    /// Returns whether it was applied.
    pub fn apply_resolution(&mut self, resolution: Resolution) -> bool {
        let current = self.editor.as_ref().map(|e| e.geometry().version());
        if current != Some(resolution.version) {
            debug!(
                "[SurveyCapture] dropping stale resolution v{} (route at {:?})",
                resolution.version, current
            );
            return false;
        }
        self.location = resolution.location;
        self.location_version = Some(resolution.version);
        self.location_route = self.editor.as_ref().map(|e| e.geometry().snapshot());
        true
    }

    /// Resolve the current route and apply the result. No-op below two points.
    pub async fn refresh_location(&mut self) -> bool {
        let Some(request) = self.resolution_request() else {
            return false;
        };
        let resolution = self.resolver.resolve_request(&request).await;
        self.apply_resolution(resolution)
    }

    /// Hand over the finished record and start over with a fresh route.
    ///
    /// Fails while still tracking, before any route exists, or in edit mode.
    pub async fn finish(&mut self) -> Result<CapturedRoute> {
        match self.editor.as_ref() {
            None => {
                return Err(CaptureError::InvalidState("no stopped route to finish".to_string()));
            }
            Some(editor) if editor.is_editing() => {
                return Err(CaptureError::InvalidState("save or cancel edits before finishing".to_string()));
            }
            Some(_) => {}
        }

        if !self.location_is_current() {
            self.refresh_location().await;
        }

        let geometry = self
            .editor
            .take()
            .map(RouteEditor::into_geometry)
            .ok_or_else(|| CaptureError::InvalidState("route disappeared".to_string()))?;
        let location = std::mem::take(&mut self.location);
        self.location_version = None;
        self.location_route = None;
        self.tracker.reset();

        let record = CapturedRoute {
            length_meters: geometry.length_meters(),
            route: geometry.to_vec(),
            street: location.street,
            district: location.district,
            house_number_range: location.house_number_range,
        };
        info!(
            "[SurveyCapture] finished: {} points, {:.0}m, '{}' {} ({})",
            record.route.len(),
            record.length_meters,
            record.street,
            record.house_number_range,
            record.district
        );
        Ok(record)
    }

    /// Drop the capture entirely, releasing the sampling task.
    pub fn abandon(&mut self) {
        self.tracker.reset();
        self.editor = None;
        self.location = ResolvedLocation::default();
        self.location_version = None;
        self.location_route = None;
    }

    fn editor_or_err(&mut self) -> Result<&mut RouteEditor> {
        self.editor
            .as_mut()
            .ok_or_else(|| CaptureError::InvalidState("no stopped route to edit".to_string()))
    }
}
