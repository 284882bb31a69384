//! Live route sampling.
//!
//! [`TrackingSession`] is the synchronous state of one capture (accepted
//! points, paused flag, last accepted point). [`RouteTracker`] drives it: it
//! takes the start reading, spawns a tokio task that polls the
//! [`LocationSource`] on a fixed interval, and on stop cancels that task and
//! appends a best-effort final reading.
//!
//! While tracking, the interval task is the only thing that mutates the route.
//! Stop and reset take the session out of the shared slot before anything
//! else, so a tick that is already in flight finds nothing to write to.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::{CaptureError, Result};
use crate::filter::{evaluate_sample, SampleReason, SampleVerdict};
use crate::geometry::RouteGeometry;
use crate::GeoPoint;

/// Platform location API, reduced to a single "where am I now" call.
///
/// Readings carry the device-reported accuracy. Failures (permission denied,
/// timeout, no fix) map to [`CaptureError::PositionUnavailable`].
pub trait LocationSource: Send + Sync + 'static {
    fn current_position(&self) -> impl Future<Output = Result<GeoPoint>> + Send;
}

/// Configuration for the sampling loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Time between two samples.
    /// Default: 3 seconds
    pub sample_interval: Duration,

    /// Consecutive failed reads after which the session reports itself paused.
    /// Default: 3
    pub failed_reads_before_pause: u32,
}

impl TrackerConfig {
    /// Reject settings the sampling loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sample_interval.is_zero() {
            return Err(CaptureError::Config("sample_interval must be non-zero".to_string()));
        }
        Ok(())
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(3),
            failed_reads_before_pause: 3,
        }
    }
}

/// Lifecycle of a [`RouteTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackerState {
    Idle,
    Tracking,
    Stopped,
}

// ============================================================================
// Tracking Session
// ============================================================================

/// State of one running capture.
#[derive(Debug, Clone)]
pub struct TrackingSession {
    route: Vec<GeoPoint>,
    last_accepted: Option<GeoPoint>,
    paused: bool,
    consecutive_failed_reads: u32,
    failed_reads_before_pause: u32,
}

impl TrackingSession {
    /// Seed a session with its first reading.
    ///
    /// Fails with [`CaptureError::LowAccuracyStart`] if the reading does not
    /// pass the accuracy gate.
    pub fn begin(first: GeoPoint, config: &TrackerConfig) -> Result<Self> {
        let verdict = evaluate_sample(&first, None);
        if !verdict.accepted {
            return Err(CaptureError::LowAccuracyStart {
                accuracy: first.accuracy.unwrap_or_default(),
            });
        }

        Ok(Self {
            route: vec![first],
            last_accepted: Some(first),
            paused: false,
            consecutive_failed_reads: 0,
            failed_reads_before_pause: config.failed_reads_before_pause,
        })
    }

    /// Run one reading through the filter and update the session.
    pub fn apply_reading(&mut self, reading: GeoPoint) -> SampleVerdict {
        self.consecutive_failed_reads = 0;
        let verdict = evaluate_sample(&reading, self.last_accepted.as_ref());

        if verdict.accepted {
            self.route.push(reading);
            self.last_accepted = Some(reading);
            self.paused = false;
        } else if verdict.reason == SampleReason::Stationary {
            self.paused = true;
        }

        verdict
    }

    /// Note a read that produced no reading. A run of them pauses the session.
    pub fn record_failed_read(&mut self) {
        self.consecutive_failed_reads = self.consecutive_failed_reads.saturating_add(1);
        if self.consecutive_failed_reads >= self.failed_reads_before_pause {
            self.paused = true;
        }
    }

    /// Close the session. The final reading, if any, is always appended so the
    /// route has a definite end point.
    pub fn finish(mut self, final_reading: Option<GeoPoint>) -> RouteGeometry {
        if let Some(point) = final_reading {
            self.route.push(point);
        }
        RouteGeometry::from_points(self.route)
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn points(&self) -> &[GeoPoint] {
        &self.route
    }

    pub fn last_accepted(&self) -> Option<&GeoPoint> {
        self.last_accepted.as_ref()
    }
}

// ============================================================================
// Route Tracker
// ============================================================================

type SharedSession = Arc<Mutex<Option<TrackingSession>>>;

fn lock_session(shared: &SharedSession) -> MutexGuard<'_, Option<TrackingSession>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drives a [`TrackingSession`] from a [`LocationSource`].
///
/// Must be used inside a tokio runtime; `start` spawns the sampling task.
pub struct RouteTracker<S: LocationSource> {
    source: Arc<S>,
    config: TrackerConfig,
    state: TrackerState,
    session: SharedSession,
    sampler: Option<JoinHandle<()>>,
}

impl<S: LocationSource> RouteTracker<S> {
    pub fn new(source: S, config: TrackerConfig) -> Self {
        Self {
            source: Arc::new(source),
            config,
            state: TrackerState::Idle,
            session: Arc::new(Mutex::new(None)),
            sampler: None,
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// True while tracking and the walker appears to be standing still.
    pub fn is_paused(&self) -> bool {
        lock_session(&self.session)
            .as_ref()
            .is_some_and(TrackingSession::is_paused)
    }

    /// Copy of the points accepted so far (empty unless tracking).
    pub fn points(&self) -> Vec<GeoPoint> {
        lock_session(&self.session)
            .as_ref()
            .map(|s| s.points().to_vec())
            .unwrap_or_default()
    }

    /// Begin tracking: idle → tracking.
    ///
    /// The first reading must pass the accuracy gate; otherwise the tracker
    /// stays idle and the caller should ask the user to retry outdoors.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != TrackerState::Idle {
            return Err(CaptureError::InvalidState(format!(
                "cannot start tracking from {:?}",
                self.state
            )));
        }
        self.config.validate()?;

        let first = self.source.current_position().await.map_err(|e| {
            warn!("[RouteTracker] start reading failed: {}", e);
            e
        })?;
        let session = TrackingSession::begin(first, &self.config).map_err(|e| {
            warn!("[RouteTracker] start refused: {}", e);
            e
        })?;

        *lock_session(&self.session) = Some(session);
        self.state = TrackerState::Tracking;
        self.sampler = Some(self.spawn_sampler());

        info!(
            "[RouteTracker] tracking started at ({:.5}, {:.5}), sampling every {:?}",
            first.latitude, first.longitude, self.config.sample_interval
        );
        Ok(())
    }

    /// Stop tracking: tracking → stopped.
    ///
    /// Cancels the sampling task, takes one final best-effort reading, and
    /// hands the captured route over as a [`RouteGeometry`].
    pub async fn stop(&mut self) -> Result<RouteGeometry> {
        if self.state != TrackerState::Tracking {
            return Err(CaptureError::InvalidState(format!(
                "cannot stop tracking from {:?}",
                self.state
            )));
        }

        self.cancel_sampler();
        let session = lock_session(&self.session)
            .take()
            .ok_or_else(|| CaptureError::InvalidState("tracking without a session".to_string()))?;
        self.state = TrackerState::Stopped;

        let final_reading = match self.source.current_position().await {
            Ok(point) => Some(point),
            Err(e) => {
                warn!("[RouteTracker] final reading failed, route ends at last accepted point: {}", e);
                None
            }
        };

        let geometry = session.finish(final_reading);
        info!(
            "[RouteTracker] tracking stopped: {} points, {:.0}m",
            geometry.len(),
            geometry.length_meters()
        );
        Ok(geometry)
    }

    /// Discard any route and return to idle. Allowed from every state.
    pub fn reset(&mut self) {
        self.cancel_sampler();
        lock_session(&self.session).take();
        if self.state != TrackerState::Idle {
            debug!("[RouteTracker] reset from {:?}", self.state);
        }
        self.state = TrackerState::Idle;
    }

    fn cancel_sampler(&mut self) {
        if let Some(handle) = self.sampler.take() {
            handle.abort();
        }
    }

    fn spawn_sampler(&self) -> JoinHandle<()> {
        let source = Arc::clone(&self.source);
        let shared = Arc::clone(&self.session);
        let period = self.config.sample_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let reading = source.current_position().await;

                let mut guard = lock_session(&shared);
                let Some(session) = guard.as_mut() else {
                    debug!("[RouteTracker] session gone, sampler exiting");
                    break;
                };

                match reading {
                    Ok(point) => {
                        let verdict = session.apply_reading(point);
                        debug!(
                            "[RouteTracker] sample ({:.6}, {:.6}) acc={:?} -> {:?}",
                            point.latitude, point.longitude, point.accuracy, verdict
                        );
                    }
                    Err(e) => {
                        debug!("[RouteTracker] skipped tick: {}", e);
                        session.record_failed_read();
                    }
                }
            }
        })
    }
}

impl<S: LocationSource> Drop for RouteTracker<S> {
    fn drop(&mut self) {
        self.cancel_sampler();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use crate::geo_utils::{haversine_distance, path_length};

    /// Location source replaying a fixed script; errors once exhausted.
    pub(crate) struct ScriptedSource {
        readings: Mutex<VecDeque<Result<GeoPoint>>>,
    }

    impl ScriptedSource {
        pub(crate) fn new(readings: Vec<Result<GeoPoint>>) -> Self {
            Self { readings: Mutex::new(readings.into()) }
        }
    }

    impl LocationSource for ScriptedSource {
        async fn current_position(&self) -> Result<GeoPoint> {
            let next = self.readings.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Err(CaptureError::PositionUnavailable("script exhausted".to_string())))
        }
    }

    fn unavailable() -> Result<GeoPoint> {
        Err(CaptureError::PositionUnavailable("no fix".to_string()))
    }

    pub(crate) fn walk_script() -> Vec<Result<GeoPoint>> {
        vec![
            Ok(GeoPoint::with_accuracy(52.5083, 5.4750, 5.0)),
            Ok(GeoPoint::with_accuracy(52.5084, 5.4750, 8.0)),
            Ok(GeoPoint::with_accuracy(52.5084, 5.4751, 20.0)),
            Ok(GeoPoint::with_accuracy(52.50845, 5.4750, 6.0)),
            // final reading taken by stop()
            Ok(GeoPoint::with_accuracy(52.50846, 5.4750, 4.0)),
        ]
    }

    #[test]
    fn test_session_rejects_inaccurate_start() {
        let first = GeoPoint::with_accuracy(52.5083, 5.4750, 25.0);
        let err = TrackingSession::begin(first, &TrackerConfig::default()).unwrap_err();
        assert_eq!(err, CaptureError::LowAccuracyStart { accuracy: 25.0 });
    }

    #[test]
    fn test_session_paused_on_stillness_and_resumed_on_movement() {
        let first = GeoPoint::with_accuracy(52.5083, 5.4750, 5.0);
        let mut session = TrackingSession::begin(first, &TrackerConfig::default()).unwrap();

        let verdict = session.apply_reading(GeoPoint::with_accuracy(52.50831, 5.4750, 5.0));
        assert_eq!(verdict.reason, SampleReason::Stationary);
        assert!(session.is_paused());
        assert_eq!(session.points().len(), 1);

        // Low accuracy neither adds a point nor changes the paused flag
        session.apply_reading(GeoPoint::with_accuracy(52.5090, 5.4750, 40.0));
        assert!(session.is_paused());
        assert_eq!(session.points().len(), 1);

        let verdict = session.apply_reading(GeoPoint::with_accuracy(52.5084, 5.4750, 5.0));
        assert!(verdict.accepted);
        assert!(!session.is_paused());
        assert_eq!(session.points().len(), 2);
    }

    #[test]
    fn test_session_compares_against_last_accepted_not_last_seen() {
        let first = GeoPoint::with_accuracy(52.5083, 5.4750, 5.0);
        let mut session = TrackingSession::begin(first, &TrackerConfig::default()).unwrap();

        // ~2.2m steps, each stationary relative to the first point...
        session.apply_reading(GeoPoint::with_accuracy(52.50832, 5.4750, 5.0));
        assert_eq!(session.points().len(), 1);
        // ...until the walker is ~4.4m away from it
        let verdict = session.apply_reading(GeoPoint::with_accuracy(52.50834, 5.4750, 5.0));
        assert!(verdict.accepted);
        assert_eq!(session.last_accepted().unwrap().latitude, 52.50834);
    }

    #[test]
    fn test_session_pauses_after_repeated_read_failures() {
        let config = TrackerConfig { failed_reads_before_pause: 2, ..Default::default() };
        let first = GeoPoint::with_accuracy(52.5083, 5.4750, 5.0);
        let mut session = TrackingSession::begin(first, &config).unwrap();

        session.record_failed_read();
        assert!(!session.is_paused());
        session.record_failed_read();
        assert!(session.is_paused());

        session.apply_reading(GeoPoint::with_accuracy(52.5084, 5.4750, 5.0));
        assert!(!session.is_paused());
        session.record_failed_read();
        assert!(!session.is_paused());
    }

    #[test]
    fn test_session_final_reading_always_appended() {
        let first = GeoPoint::with_accuracy(52.5083, 5.4750, 5.0);
        let session = TrackingSession::begin(first, &TrackerConfig::default()).unwrap();
        // 1m away and poorly located: would fail both gates as a tick
        let geometry = session.finish(Some(GeoPoint::with_accuracy(52.50831, 5.4750, 30.0)));
        assert_eq!(geometry.len(), 2);
        assert!(geometry.history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_walk_end_to_end() {
        let script = walk_script();
        let expected: Vec<GeoPoint> = [0, 1, 3, 4]
            .iter()
            .map(|&i| *script[i].as_ref().unwrap())
            .collect();

        let mut tracker = RouteTracker::new(ScriptedSource::new(script), TrackerConfig::default());
        tracker.start().await.unwrap();
        assert_eq!(tracker.state(), TrackerState::Tracking);

        // Three ticks at 3s, 6s and 9s
        tokio::time::sleep(Duration::from_millis(9_500)).await;
        assert_eq!(tracker.points().len(), 3);

        let geometry = tracker.stop().await.unwrap();
        assert_eq!(tracker.state(), TrackerState::Stopped);
        assert_eq!(geometry.points(), expected.as_slice());

        let segments = haversine_distance(&expected[0], &expected[1])
            + haversine_distance(&expected[1], &expected[2])
            + haversine_distance(&expected[2], &expected[3]);
        assert_eq!(geometry.length_meters(), segments);
        assert_eq!(geometry.length_meters(), path_length(&expected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_refuses_zero_interval() {
        let config = TrackerConfig { sample_interval: Duration::ZERO, ..Default::default() };
        assert!(config.validate().is_err());
        assert!(TrackerConfig::default().validate().is_ok());

        let mut tracker = RouteTracker::new(ScriptedSource::new(walk_script()), config);
        let err = tracker.start().await.unwrap_err();
        assert!(matches!(err, CaptureError::Config(_)));
        assert_eq!(tracker.state(), TrackerState::Idle);
        assert!(tracker.points().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_start_fails_on_low_accuracy() {
        let source = ScriptedSource::new(vec![Ok(GeoPoint::with_accuracy(52.5083, 5.4750, 18.0))]);
        let mut tracker = RouteTracker::new(source, TrackerConfig::default());

        let err = tracker.start().await.unwrap_err();
        assert!(matches!(err, CaptureError::LowAccuracyStart { .. }));
        assert_eq!(tracker.state(), TrackerState::Idle);
        assert!(tracker.points().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_start_fails_without_reading() {
        let mut tracker = RouteTracker::new(ScriptedSource::new(vec![unavailable()]), TrackerConfig::default());
        assert!(matches!(
            tracker.start().await,
            Err(CaptureError::PositionUnavailable(_))
        ));
        assert_eq!(tracker.state(), TrackerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_skips_failed_ticks_and_stop_is_best_effort() {
        let source = ScriptedSource::new(vec![
            Ok(GeoPoint::with_accuracy(52.5083, 5.4750, 5.0)),
            unavailable(),
            Ok(GeoPoint::with_accuracy(52.5084, 5.4750, 5.0)),
        ]);
        let mut tracker = RouteTracker::new(source, TrackerConfig::default());
        tracker.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(6_500)).await;
        assert_eq!(tracker.points().len(), 2);

        // Script is exhausted, so the final reading fails
        let geometry = tracker.stop().await.unwrap();
        assert_eq!(geometry.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_reports_pause_while_standing_still() {
        let source = ScriptedSource::new(vec![
            Ok(GeoPoint::with_accuracy(52.5083, 5.4750, 5.0)),
            Ok(GeoPoint::with_accuracy(52.50831, 5.4750, 5.0)),
        ]);
        let mut tracker = RouteTracker::new(source, TrackerConfig::default());
        tracker.start().await.unwrap();
        assert!(!tracker.is_paused());

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert!(tracker.is_paused());
        tracker.reset();
        assert!(!tracker.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_no_sampling_after_stop_or_reset() {
        let mut readings = walk_script();
        readings.push(Ok(GeoPoint::with_accuracy(52.5090, 5.4760, 5.0)));
        let mut tracker = RouteTracker::new(ScriptedSource::new(readings), TrackerConfig::default());

        tracker.start().await.unwrap();
        tracker.reset();
        assert_eq!(tracker.state(), TrackerState::Idle);

        // An orphaned sampler would consume readings from the script
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(tracker.points().is_empty());
        assert!(tracker.stop().await.is_err());

        // The next start picks up the very next scripted reading
        tracker.start().await.unwrap();
        assert_eq!(tracker.points()[0].latitude, 52.5084);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_state_transitions_are_checked() {
        let mut tracker = RouteTracker::new(ScriptedSource::new(walk_script()), TrackerConfig::default());
        assert!(tracker.stop().await.is_err());

        tracker.start().await.unwrap();
        assert!(matches!(tracker.start().await, Err(CaptureError::InvalidState(_))));

        tracker.stop().await.unwrap();
        assert!(tracker.start().await.is_err());
        tracker.reset();
        assert_eq!(tracker.state(), TrackerState::Idle);
    }
}
