//! Mutable route geometry with snapshot-based undo/redo.
//!
//! Snapshots share structure through `Arc`: recording one is O(1) and the
//! actual copy only happens on the next `Arc::make_mut` inside a mutation.

use std::sync::Arc;
use log::debug;
use crate::error::{CaptureError, Result};
use crate::geo_utils::path_length;
use crate::GeoPoint;

/// Immutable, cheaply clonable view of a route at one point in time.
pub type RouteSnapshot = Arc<Vec<GeoPoint>>;

/// Undo/redo stacks of route snapshots.
///
/// The undo stack always keeps its first entry (the state edit mode started
/// from); every further entry is the route as it was right before one edit.
#[derive(Debug, Clone, Default)]
pub struct RouteHistory {
    undo_stack: Vec<RouteSnapshot>,
    redo_stack: Vec<RouteSnapshot>,
}

impl RouteHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything and start over from `base`.
    pub fn reset_to(&mut self, base: RouteSnapshot) {
        self.undo_stack.clear();
        self.undo_stack.push(base);
        self.redo_stack.clear();
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    /// Record the state before an edit. A new edit invalidates the redo stack.
    pub fn record(&mut self, snapshot: RouteSnapshot) {
        self.undo_stack.push(snapshot);
        self.redo_stack.clear();
    }

    /// Number of entries on the undo stack, including the base entry.
    pub fn len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undo_stack.is_empty()
    }

    /// Undo is possible while more than the base entry remains.
    pub fn can_undo(&self) -> bool {
        self.undo_stack.len() > 1
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Most recent entry, i.e. the route right before the latest edit.
    pub fn latest(&self) -> Option<&RouteSnapshot> {
        self.undo_stack.last()
    }

    /// Pop the latest undo entry and park `current` on the redo stack.
    /// Returns `None` (and keeps `current` out of the redo stack) when only
    /// the base entry is left.
    pub fn pop_undo_with_current(&mut self, current: RouteSnapshot) -> Option<RouteSnapshot> {
        if !self.can_undo() {
            return None;
        }
        let previous = self.undo_stack.pop()?;
        self.redo_stack.push(current);
        Some(previous)
    }

    /// Pop the latest redo entry and push `current` back onto the undo stack.
    pub fn pop_redo_with_current(&mut self, current: RouteSnapshot) -> Option<RouteSnapshot> {
        let next = self.redo_stack.pop()?;
        self.undo_stack.push(current);
        Some(next)
    }
}

/// The ordered points of a route plus its edit history.
///
/// Every mutating call records the current state first, which is what makes
/// undo work. [`version`](Self::version) increases on every change, including
/// undo, redo and restores, so derived data can be tagged with it.
#[derive(Debug, Clone, Default)]
pub struct RouteGeometry {
    points: RouteSnapshot,
    history: RouteHistory,
    version: u64,
}

impl RouteGeometry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap already captured points. History starts empty.
    pub fn from_points(points: Vec<GeoPoint>) -> Self {
        Self {
            points: Arc::new(points),
            history: RouteHistory::new(),
            version: 0,
        }
    }

    pub fn points(&self) -> &[GeoPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// A route needs at least two points before length and address mean anything.
    pub fn is_complete(&self) -> bool {
        self.points.len() >= 2
    }

    pub fn first(&self) -> Option<&GeoPoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&GeoPoint> {
        self.points.last()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Path length in meters (0 below two points).
    pub fn length_meters(&self) -> f64 {
        path_length(&self.points)
    }

    pub fn snapshot(&self) -> RouteSnapshot {
        Arc::clone(&self.points)
    }

    pub fn history(&self) -> &RouteHistory {
        &self.history
    }

    pub(crate) fn history_mut(&mut self) -> &mut RouteHistory {
        &mut self.history
    }

    /// Copy the points out, e.g. to hand them to a caller.
    pub fn to_vec(&self) -> Vec<GeoPoint> {
        self.points.as_ref().clone()
    }

    // -------------------------------------------------------------------------
    // Edits
    // -------------------------------------------------------------------------

    /// Add a point past the current end.
    pub fn append(&mut self, point: GeoPoint) {
        self.record_current();
        Arc::make_mut(&mut self.points).push(point);
        self.bump();
    }

    /// Insert a point before `index`; `index == len()` appends.
    pub fn insert_at(&mut self, index: usize, point: GeoPoint) -> Result<()> {
        if index > self.points.len() {
            return Err(CaptureError::index_out_of_range(index, self.points.len()));
        }
        self.record_current();
        Arc::make_mut(&mut self.points).insert(index, point);
        self.bump();
        Ok(())
    }

    /// Reposition an existing point. Manual moves carry no accuracy.
    pub fn move_to(&mut self, index: usize, latitude: f64, longitude: f64) -> Result<()> {
        if index >= self.points.len() {
            return Err(CaptureError::index_out_of_range(index, self.points.len()));
        }
        self.record_current();
        Arc::make_mut(&mut self.points)[index] = GeoPoint::new(latitude, longitude);
        self.bump();
        Ok(())
    }

    /// Delete the point at `index`, returning it.
    pub fn remove_at(&mut self, index: usize) -> Result<GeoPoint> {
        if index >= self.points.len() {
            return Err(CaptureError::index_out_of_range(index, self.points.len()));
        }
        self.record_current();
        let removed = Arc::make_mut(&mut self.points).remove(index);
        self.bump();
        Ok(removed)
    }

    /// Step back to the state before the latest edit.
    ///
    /// Returns false without touching the route when only the base entry is left.
    pub fn undo(&mut self) -> bool {
        let current = self.snapshot();
        match self.history.pop_undo_with_current(current) {
            Some(previous) => {
                self.points = previous;
                self.bump();
                debug!("[RouteGeometry] undo -> {} points (v{})", self.points.len(), self.version);
                true
            }
            None => false,
        }
    }

    /// Re-apply the most recently undone edit.
    pub fn redo(&mut self) -> bool {
        let current = self.snapshot();
        match self.history.pop_redo_with_current(current) {
            Some(next) => {
                self.points = next;
                self.bump();
                debug!("[RouteGeometry] redo -> {} points (v{})", self.points.len(), self.version);
                true
            }
            None => false,
        }
    }

    /// Replace the points without recording history.
    pub(crate) fn restore(&mut self, snapshot: RouteSnapshot) {
        self.points = snapshot;
        self.bump();
    }

    fn record_current(&mut self) {
        let current = self.snapshot();
        self.history.record(current);
    }

    fn bump(&mut self) {
        self.version = self.version.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_geometry() -> RouteGeometry {
        RouteGeometry::from_points(vec![
            GeoPoint::with_accuracy(52.5083, 5.4750, 5.0),
            GeoPoint::with_accuracy(52.5084, 5.4750, 8.0),
            GeoPoint::with_accuracy(52.50845, 5.4750, 6.0),
        ])
    }

    #[test]
    fn test_append_and_insert() {
        let mut geometry = sample_geometry();
        geometry.append(GeoPoint::new(52.5086, 5.4752));
        assert_eq!(geometry.len(), 4);
        assert_eq!(geometry.last().unwrap().latitude, 52.5086);

        geometry.insert_at(0, GeoPoint::new(52.5082, 5.4749)).unwrap();
        assert_eq!(geometry.first().unwrap().latitude, 52.5082);

        // Inserting at len() is the same as appending
        let len = geometry.len();
        geometry.insert_at(len, GeoPoint::new(52.5087, 5.4753)).unwrap();
        assert_eq!(geometry.len(), 6);
        assert_eq!(geometry.last().unwrap().longitude, 5.4753);
    }

    #[test]
    fn test_move_drops_accuracy() {
        let mut geometry = sample_geometry();
        geometry.move_to(1, 52.50841, 5.47505).unwrap();
        let moved = geometry.points()[1];
        assert_eq!(moved.latitude, 52.50841);
        assert_eq!(moved.longitude, 5.47505);
        assert_eq!(moved.accuracy, None);
    }

    #[test]
    fn test_out_of_range_edits_are_rejected_without_change() {
        let mut geometry = sample_geometry();
        let before = geometry.to_vec();
        let version = geometry.version();

        assert_eq!(
            geometry.remove_at(3),
            Err(CaptureError::IndexOutOfRange { index: 3, len: 3 })
        );
        assert!(geometry.move_to(10, 0.0, 0.0).is_err());
        assert!(geometry.insert_at(4, GeoPoint::new(0.0, 0.0)).is_err());

        assert_eq!(geometry.points(), before.as_slice());
        assert_eq!(geometry.version(), version);
        assert!(geometry.history().is_empty());
    }

    #[test]
    fn test_every_edit_records_previous_state() {
        let mut geometry = sample_geometry();
        let base = geometry.snapshot();
        geometry.history_mut().reset_to(base);

        geometry.remove_at(0).unwrap();
        assert_eq!(geometry.history().len(), 2);
        assert_eq!(geometry.history().latest().unwrap().len(), 3);

        geometry.append(GeoPoint::new(52.51, 5.48));
        assert_eq!(geometry.history().len(), 3);
        assert_eq!(geometry.history().latest().unwrap().len(), 2);
    }

    #[test]
    fn test_undo_steps_back_one_edit_at_a_time() {
        let mut geometry = sample_geometry();
        let base = geometry.snapshot();
        geometry.history_mut().reset_to(base);
        let original = geometry.to_vec();

        geometry.append(GeoPoint::new(52.5086, 5.4752));
        let after_first = geometry.to_vec();
        geometry.remove_at(0).unwrap();

        assert!(geometry.undo());
        assert_eq!(geometry.points(), after_first.as_slice());
        assert!(geometry.undo());
        assert_eq!(geometry.points(), original.as_slice());

        // Only the base entry remains
        assert!(!geometry.undo());
        assert_eq!(geometry.points(), original.as_slice());
        assert_eq!(geometry.history().len(), 1);
    }

    #[test]
    fn test_redo_reapplies_and_new_edit_clears_it() {
        let mut geometry = sample_geometry();
        let base = geometry.snapshot();
        geometry.history_mut().reset_to(base);

        geometry.remove_at(1).unwrap();
        let edited = geometry.to_vec();
        assert!(geometry.undo());
        assert!(geometry.history().can_redo());

        assert!(geometry.redo());
        assert_eq!(geometry.points(), edited.as_slice());
        assert!(!geometry.redo());

        assert!(geometry.undo());
        geometry.append(GeoPoint::new(52.6, 5.5));
        assert!(!geometry.history().can_redo());
    }

    #[test]
    fn test_snapshots_are_not_affected_by_later_edits() {
        let mut geometry = sample_geometry();
        let snap = geometry.snapshot();
        geometry.move_to(0, 1.0, 1.0).unwrap();
        assert_eq!(snap[0].latitude, 52.5083);
        assert_eq!(geometry.points()[0].latitude, 1.0);
    }

    #[test]
    fn test_version_tracks_changes() {
        let mut geometry = sample_geometry();
        let base = geometry.snapshot();
        geometry.history_mut().reset_to(base);
        assert_eq!(geometry.version(), 0);
        geometry.append(GeoPoint::new(52.6, 5.5));
        assert_eq!(geometry.version(), 1);
        geometry.undo();
        assert_eq!(geometry.version(), 2);
    }

    #[test]
    fn test_length_follows_edits() {
        let mut geometry = sample_geometry();
        let before = geometry.length_meters();
        geometry.remove_at(2).unwrap();
        assert!(geometry.length_meters() < before);
        assert!(geometry.is_complete());
        geometry.remove_at(0).unwrap();
        assert!(!geometry.is_complete());
        assert_eq!(geometry.length_meters(), 0.0);
    }
}
