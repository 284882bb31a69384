//! # Route Editor
//!
//! Edit mode for a captured route. The editor owns the [`RouteGeometry`]
//! handed over by the tracker and adds:
//!
//! - an `original` snapshot that `cancel` and `reset_to_original` go back to,
//! - undo/redo through the geometry's history,
//! - the mapping from map interactions to point edits, with single-marker
//!   selection.
//!
//! ## Interaction mapping
//!
//! | Interaction | Effect |
//! |-------------|--------|
//! | Tap on empty map | append a manual point |
//! | Tap within `hit_radius_meters` of a marker (off by default) | same as tapping that marker |
//! | Tap on a marker that is not selected | select it (previous selection dropped) |
//! | Tap on the selected marker | remove that point |
//! | Drag end on a marker | move that point |
//!
//! Because an editor is only ever built from a stopped tracker's route, edit
//! mode and live tracking cannot overlap.

use log::{debug, info};
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, Result};
use crate::geo_utils::{haversine_distance, meters_to_degrees};
use crate::geometry::{RouteGeometry, RouteSnapshot};
use crate::GeoPoint;

/// Configuration for the edit-mode controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditorConfig {
    /// Map taps closer than this to a marker count as a tap on that marker
    /// (meters). Only for map views that cannot report marker taps themselves;
    /// 0 disables it so every map tap appends a point.
    /// Default: 0.0
    pub hit_radius_meters: f64,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self { hit_radius_meters: 0.0 }
    }
}

/// A map interaction forwarded by the surrounding UI.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MapInteraction {
    /// Tap somewhere on the map.
    Tap { latitude: f64, longitude: f64 },
    /// Tap on the marker of point `index`.
    MarkerTap { index: usize },
    /// A marker drag ended at a new position.
    MarkerDragEnd { index: usize, latitude: f64, longitude: f64 },
}

/// What [`RouteEditor::handle`] did with an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditOutcome {
    Inserted { index: usize },
    Moved { index: usize },
    Removed { index: usize },
    Selected { index: usize },
}

// =============================================================================
// Marker hit-testing
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct IndexedMarker {
    idx: usize,
    lat: f64,
    lng: f64,
}

impl RTreeObject for IndexedMarker {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lat, self.lng])
    }
}

impl PointDistance for IndexedMarker {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dlat = self.lat - point[0];
        let dlng = self.lng - point[1];
        dlat * dlat + dlng * dlng
    }
}

fn build_marker_tree(points: &[GeoPoint]) -> RTree<IndexedMarker> {
    let markers: Vec<IndexedMarker> = points
        .iter()
        .enumerate()
        .map(|(i, p)| IndexedMarker { idx: i, lat: p.latitude, lng: p.longitude })
        .collect();
    RTree::bulk_load(markers)
}

/// Index of the marker closest to `(latitude, longitude)` within `radius_meters`.
pub fn hit_test(points: &[GeoPoint], latitude: f64, longitude: f64, radius_meters: f64) -> Option<usize> {
    if points.is_empty() || radius_meters <= 0.0 {
        return None;
    }

    let tree = build_marker_tree(points);
    let tap = GeoPoint::new(latitude, longitude);
    // Degree box is a superset of the metric circle; haversine decides
    let radius_deg = meters_to_degrees(radius_meters, latitude);

    tree.locate_within_distance([latitude, longitude], radius_deg * radius_deg)
        .map(|m| (m.idx, haversine_distance(&tap, &points[m.idx])))
        .filter(|(_, meters)| *meters <= radius_meters)
        .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
        .map(|(idx, _)| idx)
}

// =============================================================================
// Route Editor
// =============================================================================

/// Edit-mode controller over a captured route.
#[derive(Debug, Clone)]
pub struct RouteEditor {
    geometry: RouteGeometry,
    original: RouteSnapshot,
    editing: bool,
    selected: Option<usize>,
    config: EditorConfig,
}

impl RouteEditor {
    pub fn new(geometry: RouteGeometry, config: EditorConfig) -> Self {
        let original = geometry.snapshot();
        Self {
            geometry,
            original,
            editing: false,
            selected: None,
            config,
        }
    }

    pub fn geometry(&self) -> &RouteGeometry {
        &self.geometry
    }

    pub fn into_geometry(self) -> RouteGeometry {
        self.geometry
    }

    pub fn points(&self) -> &[GeoPoint] {
        self.geometry.points()
    }

    /// The last committed route (what `cancel` returns to).
    pub fn original(&self) -> &[GeoPoint] {
        &self.original
    }

    pub fn is_editing(&self) -> bool {
        self.editing
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn can_undo(&self) -> bool {
        self.editing && self.geometry.history().can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.editing && self.geometry.history().can_redo()
    }

    // -------------------------------------------------------------------------
    // Edit mode lifecycle
    // -------------------------------------------------------------------------

    /// Snapshot the current route as `original` and start a fresh history.
    pub fn enter_edit_mode(&mut self) -> Result<()> {
        if self.editing {
            return Err(CaptureError::InvalidState("already in edit mode".to_string()));
        }
        self.original = self.geometry.snapshot();
        let base = self.geometry.snapshot();
        self.geometry.history_mut().reset_to(base);
        self.editing = true;
        self.selected = None;
        debug!("[RouteEditor] edit mode entered with {} points", self.original.len());
        Ok(())
    }

    /// Commit the current route as the new original and leave edit mode.
    pub fn save(&mut self) -> Result<()> {
        self.require_editing()?;
        self.original = self.geometry.snapshot();
        self.leave_edit_mode();
        info!("[RouteEditor] edits saved: {} points", self.original.len());
        Ok(())
    }

    /// Throw away every edit since entering edit mode and leave it.
    pub fn cancel(&mut self) -> Result<()> {
        self.require_editing()?;
        self.geometry.restore(self.original.clone());
        self.leave_edit_mode();
        debug!("[RouteEditor] edits cancelled");
        Ok(())
    }

    /// Go back to the original route but stay in edit mode.
    pub fn reset_to_original(&mut self) -> Result<()> {
        self.require_editing()?;
        self.geometry.restore(self.original.clone());
        let base = self.original.clone();
        self.geometry.history_mut().reset_to(base);
        self.selected = None;
        Ok(())
    }

    /// Step back one edit. No-op (false) when nothing is left to undo.
    pub fn undo(&mut self) -> bool {
        if !self.editing {
            return false;
        }
        let undone = self.geometry.undo();
        if undone {
            self.selected = None;
        }
        undone
    }

    pub fn redo(&mut self) -> bool {
        if !self.editing {
            return false;
        }
        let redone = self.geometry.redo();
        if redone {
            self.selected = None;
        }
        redone
    }

    // -------------------------------------------------------------------------
    // Point edits
    // -------------------------------------------------------------------------

    pub fn append(&mut self, point: GeoPoint) -> Result<usize> {
        self.require_editing()?;
        self.geometry.append(point);
        Ok(self.geometry.len() - 1)
    }

    pub fn insert_at(&mut self, index: usize, point: GeoPoint) -> Result<()> {
        self.require_editing()?;
        self.geometry.insert_at(index, point)?;
        self.selected = None;
        Ok(())
    }

    pub fn move_to(&mut self, index: usize, latitude: f64, longitude: f64) -> Result<()> {
        self.require_editing()?;
        self.geometry.move_to(index, latitude, longitude)
    }

    pub fn remove_at(&mut self, index: usize) -> Result<GeoPoint> {
        self.require_editing()?;
        let removed = self.geometry.remove_at(index)?;
        self.selected = None;
        Ok(removed)
    }

    // -------------------------------------------------------------------------
    // Selection & interactions
    // -------------------------------------------------------------------------

    /// Select a marker, replacing any previous selection. Geometry is untouched.
    pub fn select(&mut self, index: usize) -> Result<()> {
        self.require_editing()?;
        if index >= self.geometry.len() {
            return Err(CaptureError::index_out_of_range(index, self.geometry.len()));
        }
        self.selected = Some(index);
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    /// Apply one map interaction.
    pub fn handle(&mut self, interaction: MapInteraction) -> Result<EditOutcome> {
        self.require_editing()?;

        match interaction {
            MapInteraction::Tap { latitude, longitude } => {
                match hit_test(self.geometry.points(), latitude, longitude, self.config.hit_radius_meters) {
                    Some(index) => self.tap_marker(index),
                    None => {
                        let index = self.append(GeoPoint::new(latitude, longitude))?;
                        Ok(EditOutcome::Inserted { index })
                    }
                }
            }
            MapInteraction::MarkerTap { index } => self.tap_marker(index),
            MapInteraction::MarkerDragEnd { index, latitude, longitude } => {
                self.move_to(index, latitude, longitude)?;
                Ok(EditOutcome::Moved { index })
            }
        }
    }

    fn tap_marker(&mut self, index: usize) -> Result<EditOutcome> {
        if self.selected == Some(index) {
            self.remove_at(index)?;
            Ok(EditOutcome::Removed { index })
        } else {
            self.select(index)?;
            Ok(EditOutcome::Selected { index })
        }
    }

    fn require_editing(&self) -> Result<()> {
        if self.editing {
            Ok(())
        } else {
            Err(CaptureError::NotEditing)
        }
    }

    fn leave_edit_mode(&mut self) {
        self.geometry.history_mut().clear();
        self.editing = false;
        self.selected = None;
    }
}
