//! Mutable guiding state shared between the acquisition loop and user commands.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::config::GuidingConfig;
use crate::detection::StarCandidate;
use crate::dither::DitherManager;
use crate::error::DetectionError;
use crate::selection::{SelectionEvent, StarSelector, TrackState};

/// Number of error samples kept per axis.
pub const HISTORY_CAPACITY: usize = 100;

/// Fixed-size error history; the oldest sample is evicted first.
#[derive(Debug, Clone, Default)]
pub struct ErrorHistory {
    samples: VecDeque<f64>,
}

impl ErrorHistory {
    pub fn push(&mut self, value: f64) {
        if self.samples.len() == HISTORY_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    pub fn rms(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum_sq: f64 = self.samples.iter().map(|v| v * v).sum();
        Some((sum_sq / self.samples.len() as f64).sqrt())
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Point-in-time copy of the session, safe to hand to other threads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: TrackState,
    pub reference: Option<(f64, f64)>,
    pub dither_offset: (f64, f64),
    pub calibrated: bool,
    pub guided_frames: u64,
    pub ra_rms_arcsec: Option<f64>,
    pub dec_rms_arcsec: Option<f64>,
}

/// Reference star, dither offset and guiding statistics for one session.
///
/// Reference and offset change together inside a single `&mut self` call, so
/// holders of the lock never see one without the other.
#[derive(Clone)]
pub struct GuidingSession {
    selector: StarSelector,
    dither: DitherManager,
    rng: StdRng,
    calibrated: bool,
    ra_history: ErrorHistory,
    dec_history: ErrorHistory,
    guided_frames: u64,
}

impl GuidingSession {
    pub fn new(config: &GuidingConfig) -> Self {
        let rng = match config.dither.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            selector: StarSelector::new(
                config.tracking.loss_radius_px,
                config.tracking.max_secondary_stars,
                config.tracking.manual_select_radius_px,
            ),
            dither: DitherManager::new(config.dither.max_pixels),
            rng,
            calibrated: false,
            ra_history: ErrorHistory::default(),
            dec_history: ErrorHistory::default(),
            guided_frames: 0,
        }
    }

    pub fn state(&self) -> TrackState {
        self.selector.state()
    }

    pub fn reference(&self) -> Option<(f64, f64)> {
        self.selector.reference()
    }

    pub fn dither_offset(&self) -> (f64, f64) {
        self.dither.offset()
    }

    /// Where the star should be: reference plus dither offset.
    pub fn target(&self) -> Option<(f64, f64)> {
        self.selector.reference().map(|r| self.dither.apply(r))
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn guided_frames(&self) -> u64 {
        self.guided_frames
    }

    pub fn ra_history(&self) -> &ErrorHistory {
        &self.ra_history
    }

    pub fn dec_history(&self) -> &ErrorHistory {
        &self.dec_history
    }

    /// Run selection for a frame. A fresh reference always starts without dither.
    pub fn observe(&mut self, candidates: &[StarCandidate]) -> SelectionEvent {
        let event = self.selector.observe(candidates, self.dither.offset());
        if matches!(
            event,
            SelectionEvent::Acquired { .. } | SelectionEvent::Reacquired { .. }
        ) {
            self.dither.reset();
        }
        event
    }

    /// Count a guided frame and dither if the cadence says so.
    /// Returns the new offset when it changed.
    pub fn advance_frame(&mut self, dither_interval: u64) -> Option<(f64, f64)> {
        self.guided_frames += 1;
        if DitherManager::is_due(self.guided_frames, dither_interval) {
            Some(self.dither.random_dither(&mut self.rng))
        } else {
            None
        }
    }

    pub fn record_error(&mut self, dx_arcsec: f64, dy_arcsec: f64) {
        self.ra_history.push(dx_arcsec);
        self.dec_history.push(dy_arcsec);
    }

    pub fn secondary_stars(&self, candidates: &[StarCandidate]) -> Vec<(f64, f64)> {
        self.selector.secondary_stars(candidates)
    }

    /// Drop the reference and the calibrated marker.
    pub fn reset(&mut self) {
        tracing::info!("Guiding session reset");
        self.selector.reset();
        self.dither.reset();
        self.calibrated = false;
    }

    /// Dither on demand; no effect without a reference.
    pub fn manual_dither(&mut self) -> Option<(f64, f64)> {
        self.selector.reference()?;
        Some(self.dither.random_dither(&mut self.rng))
    }

    pub fn select_star(
        &mut self,
        x: f64,
        y: f64,
        candidates: &[StarCandidate],
    ) -> Result<(f64, f64), DetectionError> {
        let star = self.selector.select_manual(x, y, candidates)?;
        self.dither.reset();
        Ok(star)
    }

    pub fn mark_calibrated(&mut self) {
        self.calibrated = true;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.selector.state(),
            reference: self.selector.reference(),
            dither_offset: self.dither.offset(),
            calibrated: self.calibrated,
            guided_frames: self.guided_frames,
            ra_rms_arcsec: self.ra_history.rms(),
            dec_rms_arcsec: self.dec_history.rms(),
        }
    }
}

/// Cloneable handle to a session behind one mutex.
#[derive(Clone)]
pub struct SharedSession(Arc<Mutex<GuidingSession>>);

impl SharedSession {
    pub fn new(session: GuidingSession) -> Self {
        Self(Arc::new(Mutex::new(session)))
    }

    /// Exclusive access for a compound update.
    pub fn lock(&self) -> MutexGuard<'_, GuidingSession> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn reset(&self) {
        self.lock().reset();
    }

    pub fn manual_dither(&self) -> Option<(f64, f64)> {
        self.lock().manual_dither()
    }

    pub fn select_star(
        &self,
        x: f64,
        y: f64,
        candidates: &[StarCandidate],
    ) -> Result<(f64, f64), DetectionError> {
        self.lock().select_star(x, y, candidates)
    }

    pub fn mark_calibrated(&self) {
        self.lock().mark_calibrated();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn config() -> GuidingConfig {
        let mut config = GuidingConfig::default();
        config.dither.seed = Some(5);
        config
    }

    fn candidate(x: f64, y: f64, mean: f64) -> StarCandidate {
        StarCandidate {
            centroid: (x, y),
            mean_intensity: mean,
            peak_intensity: mean,
            area: 10.0,
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = ErrorHistory::default();
        for i in 0..250 {
            history.push(i as f64);
        }
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history.iter().next(), Some(150.0));
        assert_eq!(history.iter().last(), Some(249.0));
    }

    #[test]
    fn test_rms() {
        let mut history = ErrorHistory::default();
        assert_eq!(history.rms(), None);
        history.push(3.0);
        history.push(-4.0);
        assert!((history.rms().unwrap() - (12.5f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_reacquire_resets_dither() {
        let mut session = GuidingSession::new(&config());
        session.observe(&[candidate(50.0, 50.0, 100.0)]);
        assert!(session.manual_dither().is_some());
        assert_ne!(session.dither_offset(), (0.0, 0.0));

        // Star vanishes, another appears far away.
        let event = session.observe(&[candidate(200.0, 10.0, 90.0)]);
        assert_eq!(event, SelectionEvent::Reacquired { reference: (200.0, 10.0) });
        assert_eq!(session.dither_offset(), (0.0, 0.0));
    }

    #[test]
    fn test_reset_clears_calibration() {
        let mut session = GuidingSession::new(&config());
        session.observe(&[candidate(50.0, 50.0, 100.0)]);
        session.mark_calibrated();
        session.reset();
        assert!(!session.is_calibrated());
        assert_eq!(session.reference(), None);
        assert_eq!(session.manual_dither(), None);
    }

    #[test]
    fn test_dither_cadence() {
        let mut cfg = config();
        cfg.dither.interval_frames = 3;
        let mut session = GuidingSession::new(&cfg);
        session.observe(&[candidate(50.0, 50.0, 100.0)]);
        assert_eq!(session.advance_frame(3), None);
        assert_eq!(session.advance_frame(3), None);
        let offset = session.advance_frame(3).unwrap();
        assert_eq!(session.target(), Some((50.0 + offset.0, 50.0 + offset.1)));
        assert_eq!(session.reference(), Some((50.0, 50.0)));
    }

    #[test]
    fn test_reference_and_offset_change_together() {
        let shared = SharedSession::new(GuidingSession::new(&config()));
        shared.lock().observe(&[candidate(50.0, 50.0, 100.0)]);
        let stars = vec![candidate(50.0, 50.0, 100.0), candidate(90.0, 90.0, 80.0)];

        let writer = {
            let shared = shared.clone();
            let stars = stars.clone();
            thread::spawn(move || {
                for i in 0..500 {
                    if i % 2 == 0 {
                        shared.manual_dither();
                    } else {
                        shared.select_star(90.0, 90.0, &stars).unwrap();
                        shared.select_star(50.0, 50.0, &stars).unwrap();
                    }
                }
            })
        };

        // A manual selection always zeroes the offset, and dithers never move the
        // reference, so any (reference, offset) pair observed must be consistent.
        for _ in 0..500 {
            let snap = shared.snapshot();
            let max = GuidingConfig::default().dither.max_pixels;
            assert!(snap.dither_offset.0.abs() <= max && snap.dither_offset.1.abs() <= max);
            assert!(snap.reference == Some((50.0, 50.0)) || snap.reference == Some((90.0, 90.0)));
            if snap.reference == Some((90.0, 90.0)) {
                assert_eq!(snap.dither_offset, (0.0, 0.0));
            }
        }
        writer.join().unwrap();
    }
}
