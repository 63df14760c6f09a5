//! End-to-end guiding scenarios across detection, selection, control and the session.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

use crate::centroid::refine_centroid;
use crate::config::GuidingConfig;
use crate::detection::{build_detector, DetectorKind, DetectionParams, StarDetector};
use crate::frame::Frame;
use crate::guider::Guider;
use crate::hardware::{Direction, PulseDispatcher};
use crate::selection::{SelectionEvent, TrackState};
use crate::simulator::{SimulatedRig, SimulationConfig};
use crate::test_util::{RecordingMount, SyntheticFrame};

fn config() -> GuidingConfig {
    let mut config = GuidingConfig::default();
    config.optics.plate_scale_override = Some(1.0);
    config.dither.seed = Some(3);
    config.dither.interval_frames = 0;
    config
}

fn star_at(x: f64, y: f64) -> Frame {
    SyntheticFrame::new(100, 100, 10.0).with_star(x, y, 200.0, 2.0).build()
}

fn recording_guider() -> (Guider, crate::test_util::PulseLog) {
    let mount = RecordingMount::new();
    let log = mount.log();
    (Guider::new(config(), Arc::new(PulseDispatcher::new(mount))), log)
}

#[test]
fn test_single_star_detected_and_refined_by_both_detectors() {
    let frame = star_at(50.0, 50.0);
    for kind in [DetectorKind::Statistical, DetectorKind::Fallback] {
        let detector = build_detector(kind, DetectionParams::default());
        let candidates = detector.detect(&frame);
        assert_eq!(candidates.len(), 1, "{} detector", detector.name());

        let approx = candidates[0].centroid;
        assert!((approx.0 - 50.0).abs() < 1.0 && (approx.1 - 50.0).abs() < 1.0);

        let (x, y) = refine_centroid(&frame, approx, 7, 20.0);
        assert!(
            (x - 50.0).abs() < 0.1 && (y - 50.0).abs() < 0.1,
            "{}: ({}, {})",
            detector.name(),
            x,
            y
        );
    }
}

#[test]
fn test_star_jump_reacquires_in_one_cycle() {
    let (guider, _) = recording_guider();
    guider.process_frame(&star_at(50.0, 50.0)).unwrap();

    let report = guider.process_frame(&star_at(70.0, 50.0)).unwrap();
    let SelectionEvent::Reacquired { reference } = report.event else {
        panic!("expected reacquisition, got {:?}", report.event);
    };
    assert!((reference.0 - 70.0).abs() < 0.5 && (reference.1 - 50.0).abs() < 0.5);
    assert!(matches!(guider.session().snapshot().state, TrackState::Tracking { .. }));

    let (ex, ey) = report.error_px.unwrap();
    assert!(ex.abs() < 0.1 && ey.abs() < 0.1);
}

#[test]
fn test_lost_star_comes_back() {
    let (guider, log) = recording_guider();
    guider.process_frame(&star_at(50.0, 50.0)).unwrap();

    let empty = Frame::filled(100, 100, 10.0).unwrap();
    assert_eq!(guider.process_frame(&empty).unwrap().event, SelectionEvent::Lost);
    assert_eq!(guider.process_frame(&empty).unwrap().event, SelectionEvent::Lost);
    assert_eq!(guider.session().snapshot().state, TrackState::Lost);

    let report = guider.process_frame(&star_at(52.0, 50.0)).unwrap();
    assert!(matches!(report.event, SelectionEvent::Reacquired { .. }));
    // The new reference is wherever the star reappeared, so nothing to correct.
    assert!(log.pulses().iter().all(|&(_, ms)| ms <= 5));
}

#[test]
fn test_reset_from_another_thread_forces_reacquisition() {
    let (guider, _) = recording_guider();
    guider.process_frame(&star_at(50.0, 50.0)).unwrap();
    guider.session().mark_calibrated();

    let session = guider.session();
    thread::spawn(move || session.reset()).join().unwrap();

    let snapshot = guider.session().snapshot();
    assert_eq!(snapshot.state, TrackState::NoReference);
    assert!(!snapshot.calibrated);

    let report = guider.process_frame(&star_at(55.0, 50.0)).unwrap();
    assert!(matches!(report.event, SelectionEvent::Acquired { .. }));
}

#[test]
fn test_manual_selection_switches_guide_star() {
    let (guider, _) = recording_guider();
    let frame = SyntheticFrame::new(100, 100, 10.0)
        .with_star(30.0, 30.0, 200.0, 2.0)
        .with_star(70.0, 70.0, 150.0, 2.0)
        .build();

    let first = guider.process_frame(&frame).unwrap();
    let SelectionEvent::Acquired { reference } = first.event else {
        panic!("expected acquisition, got {:?}", first.event);
    };
    assert!((reference.0 - 30.0).abs() < 0.5);
    assert_eq!(first.secondary_stars.len(), 1);

    let candidates = guider.detector().detect(&frame);
    let chosen = guider.session().select_star(68.0, 71.0, &candidates).unwrap();
    assert!((chosen.0 - 70.0).abs() < 0.5 && (chosen.1 - 70.0).abs() < 0.5);
    assert!(guider.session().select_star(5.0, 95.0, &candidates).is_err());

    let report = guider.process_frame(&frame).unwrap();
    let SelectionEvent::Held { nearest } = report.event else {
        panic!("expected to hold the chosen star, got {:?}", report.event);
    };
    assert!((nearest.0 - 70.0).abs() < 0.5);
    let secondary = report.secondary_stars;
    assert_eq!(secondary.len(), 1);
    assert!((secondary[0].0 - 30.0).abs() < 0.5);
}

#[test]
fn test_pulses_from_loop_and_manual_callers_never_overlap() {
    let mount = RecordingMount::new();
    let log = mount.log();
    let dispatcher = Arc::new(PulseDispatcher::new(mount));
    let guider = Guider::new(config(), Arc::clone(&dispatcher));

    let manual = {
        let dispatcher = Arc::clone(&dispatcher);
        thread::spawn(move || {
            for _ in 0..100 {
                dispatcher.dispatch(Direction::East, 5).unwrap();
            }
        })
    };
    for i in 0..40 {
        let x = if i % 2 == 0 { 50.0 } else { 51.5 };
        guider.process_frame(&star_at(x, 50.0)).unwrap();
    }
    manual.join().unwrap();

    assert_eq!(log.max_in_flight(), 1);
    assert!(log.pulses().len() >= 100);
}

#[test]
fn test_simulated_loop_follows_dithers() {
    let rig = SimulatedRig::new(SimulationConfig::default());
    let mut config = GuidingConfig::default();
    config.dither.interval_frames = 10;
    config.dither.seed = Some(9);
    let max = config.dither.max_pixels;
    let guider = Guider::new(config, Arc::new(PulseDispatcher::new(rig.mount())));

    let stop = AtomicBool::new(false);
    let mut reports = Vec::new();
    let processed = guider
        .run(&mut rig.camera(), &stop, Some(38), |_, report| reports.push(report.clone()))
        .unwrap();
    assert_eq!(processed, 38);

    let dithers: Vec<(f64, f64)> = reports.iter().filter_map(|r| r.dithered).collect();
    assert_eq!(dithers.len(), 3);
    for (dx, dy) in &dithers {
        assert!(dx.abs() <= max && dy.abs() <= max);
    }
    assert!(reports
        .iter()
        .all(|r| matches!(r.event, SelectionEvent::Acquired { .. } | SelectionEvent::Held { .. })));

    let last = reports.last().unwrap();
    let (ex, ey) = last.error_px.unwrap();
    assert!(ex.abs() < 0.5 && ey.abs() < 0.5, "error ({}, {})", ex, ey);

    let (sx, sy) = rig.star_position();
    let target = last.target.unwrap();
    assert!((sx - target.0).abs() < 0.6 && (sy - target.1).abs() < 0.6);
}
