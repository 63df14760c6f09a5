//! The per-frame guiding cycle: detect, select, refine, correct, measure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::centroid::refine_centroid;
use crate::config::GuidingConfig;
use crate::controller::{Correction, GuidingController};
use crate::detection::{build_detector, StarDetector};
use crate::error::HardwareError;
use crate::frame::Frame;
use crate::hardware::{FrameSource, PulseDispatcher};
use crate::seeing::SeeingMetrics;
use crate::selection::SelectionEvent;
use crate::session::{GuidingSession, SharedSession};

/// What happened during one guiding cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub event: SelectionEvent,
    pub candidates: usize,
    pub refined: Option<(f64, f64)>,
    /// Reference plus dither offset at the time of the correction.
    pub target: Option<(f64, f64)>,
    /// `refined - target` in pixels.
    pub error_px: Option<(f64, f64)>,
    pub correction: Option<Correction>,
    /// Set when this cycle triggered a cadence dither.
    pub dithered: Option<(f64, f64)>,
    pub seeing: Option<SeeingMetrics>,
    pub secondary_stars: Vec<(f64, f64)>,
}

impl CycleReport {
    fn idle(event: SelectionEvent, candidates: usize) -> Self {
        Self {
            event,
            candidates,
            refined: None,
            target: None,
            error_px: None,
            correction: None,
            dithered: None,
            seeing: None,
            secondary_stars: Vec::new(),
        }
    }
}

/// Closed-loop guider wiring detection, selection, control and diagnostics.
pub struct Guider {
    config: GuidingConfig,
    detector: Box<dyn StarDetector>,
    controller: GuidingController,
    dispatcher: Arc<PulseDispatcher>,
    session: SharedSession,
}

impl Guider {
    pub fn new(config: GuidingConfig, dispatcher: Arc<PulseDispatcher>) -> Self {
        let detector = build_detector(config.detection.detector, config.detection.params.clone());
        let controller = GuidingController::new(
            config.plate_scale(),
            config.control.gain_ms_per_arcsec,
            config.control.axis_signs,
        );
        let session = SharedSession::new(GuidingSession::new(&config));
        Self {
            config,
            detector,
            controller,
            dispatcher,
            session,
        }
    }

    /// Handle for reset, manual dither and manual selection from other threads.
    pub fn session(&self) -> SharedSession {
        self.session.clone()
    }

    pub fn detector(&self) -> &dyn StarDetector {
        self.detector.as_ref()
    }

    pub fn controller(&self) -> &GuidingController {
        &self.controller
    }

    /// Run one cycle on `frame`.
    ///
    /// Frames without a usable star are not errors: the report simply carries no
    /// correction. Only a mount failure is returned as an error, and it leaves
    /// the session exactly as it was before the call.
    pub fn process_frame(&self, frame: &Frame) -> Result<CycleReport, HardwareError> {
        let half = self.config.tracking.region_half_size;
        let candidates = self.detector.detect(frame);

        // Changes are staged on a copy and committed once the correction went out.
        // The lock stays held so commands cannot slip in between.
        let mut session = self.session.lock();
        let mut next = GuidingSession::clone(&session);
        let event = next.observe(&candidates);
        let seed = match event {
            SelectionEvent::Acquired { reference } | SelectionEvent::Reacquired { reference } => {
                reference
            }
            SelectionEvent::Held { nearest } => nearest,
            SelectionEvent::Lost | SelectionEvent::NoCandidates => {
                tracing::debug!("No guide star this frame ({} candidates)", candidates.len());
                *session = next;
                return Ok(CycleReport::idle(event, candidates.len()));
            }
        };

        let refined = refine_centroid(frame, seed, half, self.config.tracking.noise_floor);
        let dithered = next.advance_frame(self.config.dither.interval_frames);
        let Some(target) = next.target() else {
            *session = next;
            return Ok(CycleReport::idle(event, candidates.len()));
        };
        let secondary = next.secondary_stars(&candidates);

        let error = (refined.0 - target.0, refined.1 - target.1);
        let correction = self.controller.guide(&self.dispatcher, error.0, error.1)?;
        next.record_error(correction.dx_arcsec, correction.dy_arcsec);
        *session = next;
        drop(session);

        let seeing = SeeingMetrics::measure(frame, refined, half);
        tracing::debug!(
            "Error ({:+.2}, {:+.2}) px = ({:+.2}\", {:+.2}\"), RA {:?}, Dec {:?}, \
             FWHM {:?}, SNR {:.1}",
            error.0,
            error.1,
            correction.dx_arcsec,
            correction.dy_arcsec,
            correction.ra,
            correction.dec,
            seeing.fwhm,
            seeing.snr
        );

        Ok(CycleReport {
            event,
            candidates: candidates.len(),
            refined: Some(refined),
            target: Some(target),
            error_px: Some(error),
            correction: Some(correction),
            dithered,
            seeing: Some(seeing),
            secondary_stars: secondary,
        })
    }

    /// Capture and process frames until `stop` is set, `max_frames` is reached,
    /// or the hardware fails. Calls `on_cycle` after every processed frame.
    pub fn run(
        &self,
        source: &mut dyn FrameSource,
        stop: &AtomicBool,
        max_frames: Option<u64>,
        mut on_cycle: impl FnMut(u64, &CycleReport),
    ) -> Result<u64, HardwareError> {
        let timeout = self.config.frame_timeout();
        let mut processed = 0u64;
        tracing::info!("Guiding started with {} detector", self.detector.name());
        while !stop.load(Ordering::Relaxed) && max_frames.map_or(true, |max| processed < max) {
            let frame = source.get_frame(timeout)?;
            let report = self.process_frame(&frame)?;
            processed += 1;
            on_cycle(processed, &report);
        }
        tracing::info!("Guiding stopped after {} frames", processed);
        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::Direction;
    use crate::test_util::{RecordingMount, ScriptedCamera, SyntheticFrame};

    fn config() -> GuidingConfig {
        let mut config = GuidingConfig::default();
        config.optics.plate_scale_override = Some(1.0);
        config.dither.seed = Some(17);
        config
    }

    fn star_at(x: f64, y: f64) -> Frame {
        SyntheticFrame::new(100, 100, 10.0).with_star(x, y, 200.0, 2.0).build()
    }

    #[test]
    fn test_first_frame_acquires_without_pulses() {
        let mount = RecordingMount::new();
        let log = mount.log();
        let guider = Guider::new(config(), Arc::new(PulseDispatcher::new(mount)));

        let report = guider.process_frame(&star_at(50.0, 50.0)).unwrap();
        assert!(matches!(report.event, SelectionEvent::Acquired { .. }));
        let (ex, ey) = report.error_px.unwrap();
        assert!(ex.abs() < 0.01 && ey.abs() < 0.01);
        assert!(log.pulses().is_empty());
        assert!(report.seeing.unwrap().fwhm.is_some());
    }

    #[test]
    fn test_drift_produces_correcting_pulses() {
        let mount = RecordingMount::new();
        let log = mount.log();
        let guider = Guider::new(config(), Arc::new(PulseDispatcher::new(mount)));

        guider.process_frame(&star_at(50.0, 50.0)).unwrap();
        let report = guider.process_frame(&star_at(51.0, 49.0)).unwrap();

        assert!(matches!(report.event, SelectionEvent::Held { .. }));
        let (ex, ey) = report.error_px.unwrap();
        assert!((ex - 1.0).abs() < 0.05 && (ey + 1.0).abs() < 0.05);

        let pulses = log.pulses();
        assert_eq!(pulses.len(), 2);
        assert_eq!(pulses[0].0, Direction::West);
        assert_eq!(pulses[1].0, Direction::North);
        assert!((95..=105).contains(&pulses[0].1));
    }

    #[test]
    fn test_empty_frame_skips_correction() {
        let mount = RecordingMount::new();
        let log = mount.log();
        let guider = Guider::new(config(), Arc::new(PulseDispatcher::new(mount)));

        guider.process_frame(&star_at(50.0, 50.0)).unwrap();
        let report = guider.process_frame(&Frame::filled(100, 100, 10.0).unwrap()).unwrap();
        assert_eq!(report.event, SelectionEvent::Lost);
        assert_eq!(report.correction, None);
        assert!(log.pulses().is_empty());
        assert_eq!(guider.session().snapshot().reference, None);
    }

    #[test]
    fn test_mount_failure_propagates() {
        let dispatcher = PulseDispatcher::new(RecordingMount::disconnected());
        let guider = Guider::new(config(), Arc::new(dispatcher));
        guider.process_frame(&star_at(50.0, 50.0)).unwrap();
        let err = guider.process_frame(&star_at(53.0, 50.0)).unwrap_err();
        assert_eq!(err, HardwareError::MountNotConnected);
        let (rx, ry) = guider.session().snapshot().reference.unwrap();
        assert!((rx - 50.0).abs() < 1e-6 && (ry - 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_failed_cycle_leaves_session_untouched() {
        let mut cfg = config();
        cfg.dither.interval_frames = 2;
        let dispatcher = PulseDispatcher::new(RecordingMount::disconnected());
        let guider = Guider::new(cfg, Arc::new(dispatcher));
        guider.process_frame(&star_at(50.0, 50.0)).unwrap();
        let before = guider.session().snapshot();
        assert_eq!(before.guided_frames, 1);

        // The second frame would be due for a dither, but the pulse fails.
        let err = guider.process_frame(&star_at(53.0, 50.0)).unwrap_err();
        assert_eq!(err, HardwareError::MountNotConnected);
        assert_eq!(guider.session().snapshot(), before);
        assert_eq!(guider.session().lock().ra_history().len(), 1);
    }

    #[test]
    fn test_run_stops_on_camera_failure() {
        let guider = Guider::new(config(), Arc::new(PulseDispatcher::new(RecordingMount::new())));
        let mut camera = ScriptedCamera::frames(vec![star_at(50.0, 50.0), star_at(50.5, 50.0)]);
        let stop = AtomicBool::new(false);
        let mut seen = 0;
        let result = guider.run(&mut camera, &stop, None, |_, _| seen += 1);
        assert!(matches!(result, Err(HardwareError::FrameTimeout(_))));
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_run_honours_frame_limit() {
        let guider = Guider::new(config(), Arc::new(PulseDispatcher::new(RecordingMount::new())));
        let mut camera = ScriptedCamera::frames((0..5).map(|_| star_at(50.0, 50.0)));
        let stop = AtomicBool::new(false);
        assert_eq!(guider.run(&mut camera, &stop, Some(3), |_, _| {}), Ok(3));
        assert_eq!(camera.requests, 3);
    }

    #[test]
    fn test_cadence_dither_moves_target() {
        let mut cfg = config();
        cfg.dither.interval_frames = 2;
        let guider = Guider::new(cfg, Arc::new(PulseDispatcher::new(RecordingMount::new())));

        guider.process_frame(&star_at(50.0, 50.0)).unwrap();
        let report = guider.process_frame(&star_at(50.0, 50.0)).unwrap();
        let offset = report.dithered.unwrap();
        let target = report.target.unwrap();
        assert!((target.0 - (50.0 + offset.0)).abs() < 0.01);
        assert!((target.1 - (50.0 + offset.1)).abs() < 0.01);
        // The star has not moved yet, so the error is the negated offset.
        let (ex, ey) = report.error_px.unwrap();
        assert!((ex + offset.0).abs() < 0.01 && (ey + offset.1).abs() < 0.01);
    }
}
