//! Simulated backpath survey: walk, stop, correct the route, hand it over.
//!
//! Run with: cargo run --example walk_survey

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use backpath_capture::{
    AddressLookup, CaptureConfig, CaptureError, GeoPoint, LocationSource, MapInteraction, Result,
    ReverseGeocoder, SurveyCapture, TrackerConfig,
};

/// Replays a walk behind a row of houses in Lelystad, one reading per call.
struct ReplayedWalk {
    readings: Vec<GeoPoint>,
    cursor: AtomicUsize,
}

impl ReplayedWalk {
    fn new() -> Self {
        let readings = vec![
            GeoPoint::with_accuracy(52.50830, 5.47500, 5.0), // Start
            GeoPoint::with_accuracy(52.50831, 5.47500, 6.0), // Standing still
            GeoPoint::with_accuracy(52.50840, 5.47502, 7.0),
            GeoPoint::with_accuracy(52.50860, 5.47498, 40.0), // Multipath jump
            GeoPoint::with_accuracy(52.50852, 5.47505, 8.0),
            GeoPoint::with_accuracy(52.50866, 5.47510, 6.0),
            GeoPoint::with_accuracy(52.50880, 5.47515, 4.0), // End
        ];
        Self { readings, cursor: AtomicUsize::new(0) }
    }
}

impl LocationSource for ReplayedWalk {
    async fn current_position(&self) -> Result<GeoPoint> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.readings
            .get(i)
            .copied()
            .ok_or_else(|| CaptureError::PositionUnavailable("walk replay exhausted".to_string()))
    }
}

/// Numbers houses every ~10m going north from the start of the walk.
struct StreetNumbering;

impl ReverseGeocoder for StreetNumbering {
    async fn lookup(&self, latitude: f64, _longitude: f64) -> Result<AddressLookup> {
        let number = 2 + 2 * ((latitude - 52.5083) * 111_195.0 / 10.0).round().max(0.0) as u32;
        Ok(AddressLookup {
            street_name: Some("Stationsplein".to_string()),
            house_number: Some(number.to_string()),
            postal_code: Some("8232 CA".to_string()),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = CaptureConfig {
        tracker: TrackerConfig {
            sample_interval: Duration::from_millis(100),
            ..Default::default()
        },
        ..Default::default()
    };
    let mut capture = SurveyCapture::new(ReplayedWalk::new(), StreetNumbering, config);

    println!("Backpath Survey Demo\n");

    // 1. Walk the path
    capture.start_tracking().await?;
    tokio::time::sleep(Duration::from_millis(550)).await;
    println!("1. Tracking: {} points so far", capture.tracker().points().len());

    capture.stop_tracking().await?;
    let editor = capture.editor().ok_or(CaptureError::NotEditing)?;
    println!("2. Stopped with {} points", editor.points().len());
    for (i, p) in editor.points().iter().enumerate() {
        println!("   #{} ({:.5}, {:.5}) ±{:?}m", i, p.latitude, p.longitude, p.accuracy);
    }
    println!(
        "   {} {} ({})\n",
        capture.location().street,
        capture.location().house_number_range,
        capture.location().district
    );

    // 2. Correct the route on the map
    let editor = capture.editor_mut().ok_or(CaptureError::NotEditing)?;
    editor.enter_edit_mode()?;

    let outcome = editor.handle(MapInteraction::Tap { latitude: 52.50895, longitude: 5.47520 })?;
    println!("3. Tap past the end: {:?}", outcome);
    let outcome = editor.handle(MapInteraction::MarkerDragEnd { index: 1, latitude: 52.50842, longitude: 5.47500 })?;
    println!("   Drag marker 1: {:?}", outcome);
    println!("   Undo: {} ({} points)", editor.undo(), editor.points().len());
    let outcome = editor.handle(MapInteraction::MarkerTap { index: 0 })?;
    println!("   Tap marker 0: {:?}", outcome);

    capture.save_edits().await?;
    println!(
        "   Saved: {} {} ({})\n",
        capture.location().street,
        capture.location().house_number_range,
        capture.location().district
    );

    // 3. Hand the record to the survey form
    let record = capture.finish().await?;
    println!("4. Finished: {} points, {:.1}m", record.route.len(), record.length_meters);
    match serde_json::to_string_pretty(&record) {
        Ok(json) => println!("{}", json),
        Err(e) => println!("   Could not serialize record: {}", e),
    }

    Ok(())
}
