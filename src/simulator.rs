//! A simulated sky, camera and mount for running the guiding pipeline offline.
//!
//! One star drifts at a constant rate and is pushed around by guide pulses at a
//! fixed rate. Time comes from a shared [`ManualClock`]: exposures and settle
//! delays advance it without real waiting.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, ManualClock};
use crate::error::HardwareError;
use crate::frame::Frame;
use crate::hardware::{Direction, FrameSource, Mount};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub width: usize,
    pub height: usize,
    pub background: f64,
    /// Peak-to-peak amplitude of uniform per-pixel noise.
    pub noise: f64,
    pub star_x: f64,
    pub star_y: f64,
    pub star_amplitude: f64,
    pub star_sigma: f64,
    /// Unguided drift in pixels per second.
    pub drift_x_px_per_sec: f64,
    pub drift_y_px_per_sec: f64,
    /// Star motion per millisecond of guide pulse.
    pub pulse_rate_px_per_ms: f64,
    /// Swap the response of east/west pulses, as after a meridian flip.
    pub reverse_ra: bool,
    pub reverse_dec: bool,
    pub exposure_secs: f64,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            background: 20.0,
            noise: 6.0,
            star_x: 160.0,
            star_y: 120.0,
            star_amplitude: 180.0,
            star_sigma: 1.8,
            drift_x_px_per_sec: 0.05,
            drift_y_px_per_sec: -0.02,
            pulse_rate_px_per_ms: 0.0065,
            reverse_ra: false,
            reverse_dec: false,
            exposure_secs: 2.0,
            seed: 1,
        }
    }
}

struct Sky {
    config: SimulationConfig,
    x: f64,
    y: f64,
    /// Clock reading up to which drift has been applied.
    drifted_until: Duration,
    rng: StdRng,
}

impl Sky {
    fn apply_drift(&mut self, now: Duration) {
        if now > self.drifted_until {
            let dt = (now - self.drifted_until).as_secs_f64();
            self.x += self.config.drift_x_px_per_sec * dt;
            self.y += self.config.drift_y_px_per_sec * dt;
            self.drifted_until = now;
        }
    }

    /// Unit star motion caused by a pulse in `direction`. West pushes the
    /// star towards -X and south towards -Y unless reversed.
    fn response(&self, direction: Direction) -> (f64, f64) {
        let ra = if self.config.reverse_ra { -1.0 } else { 1.0 };
        let dec = if self.config.reverse_dec { -1.0 } else { 1.0 };
        match direction {
            Direction::West => (-ra, 0.0),
            Direction::East => (ra, 0.0),
            Direction::South => (0.0, -dec),
            Direction::North => (0.0, dec),
        }
    }

    fn render(&mut self) -> anyhow::Result<Frame> {
        let c = &self.config;
        let (sx, sy) = (self.x, self.y);
        let two_s2 = 2.0 * c.star_sigma * c.star_sigma;
        let mut data = Vec::with_capacity(c.width * c.height);
        for y in 0..c.height {
            for x in 0..c.width {
                let dx = x as f64 - sx;
                let dy = y as f64 - sy;
                let star = c.star_amplitude * (-(dx * dx + dy * dy) / two_s2).exp();
                let noise = (self.rng.gen::<f64>() - 0.5) * c.noise;
                data.push((c.background + star + noise).clamp(0.0, 255.0));
            }
        }
        Frame::new(c.width, c.height, data)
    }
}

/// Shared state behind the simulated camera and mount.
#[derive(Clone)]
pub struct SimulatedRig {
    sky: Arc<Mutex<Sky>>,
    clock: Arc<ManualClock>,
}

impl SimulatedRig {
    pub fn new(config: SimulationConfig) -> Self {
        let sky = Sky {
            x: config.star_x,
            y: config.star_y,
            drifted_until: Duration::ZERO,
            rng: StdRng::seed_from_u64(config.seed),
            config,
        };
        Self {
            sky: Arc::new(Mutex::new(sky)),
            clock: Arc::new(ManualClock::new()),
        }
    }

    fn sky(&self) -> MutexGuard<'_, Sky> {
        self.sky.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn clock(&self) -> Arc<ManualClock> {
        Arc::clone(&self.clock)
    }

    /// True star position right now.
    pub fn star_position(&self) -> (f64, f64) {
        let now = self.clock.now();
        let mut sky = self.sky();
        sky.apply_drift(now);
        (sky.x, sky.y)
    }

    pub fn camera(&self) -> SimCamera {
        SimCamera { rig: self.clone() }
    }

    pub fn mount(&self) -> SimMount {
        SimMount {
            rig: self.clone(),
            connected: true,
        }
    }
}

/// Camera view of the simulated sky. Each frame costs one exposure of clock time.
pub struct SimCamera {
    rig: SimulatedRig,
}

impl FrameSource for SimCamera {
    fn get_frame(&mut self, timeout: Duration) -> Result<Frame, HardwareError> {
        let exposure_secs = self.rig.sky().config.exposure_secs;
        let exposure = Duration::try_from_secs_f64(exposure_secs.max(0.0))
            .map_err(|e| {
                HardwareError::CameraUnavailable(format!("exposure {} s: {}", exposure_secs, e))
            })?;
        if exposure > timeout {
            return Err(HardwareError::FrameTimeout(timeout.as_secs_f64()));
        }
        self.rig.clock.advance(exposure);
        let now = self.rig.clock.now();

        let mut sky = self.rig.sky();
        sky.apply_drift(now);
        sky.render()
            .map_err(|e| HardwareError::CameraUnavailable(e.to_string()))
    }
}

/// Mount that moves the simulated star immediately by `rate * duration`.
pub struct SimMount {
    rig: SimulatedRig,
    connected: bool,
}

impl SimMount {
    pub fn disconnect(&mut self) {
        self.connected = false;
    }
}

impl Mount for SimMount {
    fn pulse_guide(&mut self, direction: Direction, duration_ms: u32) -> Result<(), HardwareError> {
        if !self.connected {
            return Err(HardwareError::MountNotConnected);
        }
        let now = self.rig.clock.now();
        let mut sky = self.rig.sky();
        sky.apply_drift(now);
        let (ux, uy) = sky.response(direction);
        let distance = sky.config.pulse_rate_px_per_ms * duration_ms as f64;
        sky.x += ux * distance;
        sky.y += uy * distance;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationRoutine;
    use crate::config::GuidingConfig;
    use crate::controller::AxisSigns;
    use crate::detection::{DetectionParams, StatisticalDetector, StarDetector};
    use crate::guider::Guider;
    use crate::hardware::PulseDispatcher;
    use crate::polar_alignment::{analyze, PolarAlignment};
    use std::sync::atomic::AtomicBool;

    fn quiet() -> SimulationConfig {
        SimulationConfig {
            drift_x_px_per_sec: 0.0,
            drift_y_px_per_sec: 0.0,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn test_frames_show_the_star() {
        let rig = SimulatedRig::new(quiet());
        let frame = rig.camera().get_frame(Duration::from_secs(10)).unwrap();
        let candidates = StatisticalDetector::new(DetectionParams::default()).detect(&frame);
        assert_eq!(candidates.len(), 1);
        assert!((candidates[0].centroid.0 - 160.0).abs() < 0.3);
        assert_eq!(rig.clock().now(), Duration::from_secs(2));
    }

    #[test]
    fn test_pulse_moves_star() {
        let rig = SimulatedRig::new(quiet());
        let mut mount = rig.mount();
        mount.pulse_guide(Direction::West, 1000).unwrap();
        let (x, y) = rig.star_position();
        assert!((x - (160.0 - 6.5)).abs() < 1e-9);
        assert_eq!(y, 120.0);

        mount.disconnect();
        assert_eq!(mount.pulse_guide(Direction::East, 10), Err(HardwareError::MountNotConnected));
    }

    #[test]
    fn test_calibration_confirms_default_signs() {
        let rig = SimulatedRig::new(quiet());
        let dispatcher = PulseDispatcher::new(rig.mount());
        let detector = StatisticalDetector::new(DetectionParams::default());
        let routine = CalibrationRoutine::from_config(&GuidingConfig::default()).unwrap();

        let result = routine
            .run(&mut rig.camera(), &dispatcher, &detector, rig.clock().as_ref())
            .unwrap();
        assert_eq!(result.succeeded(), 4);
        assert_eq!(result.check_signs(&AxisSigns::default()), Some(true));
        let rate = result.rate_px_per_ms(Direction::East).unwrap();
        assert!((rate - 0.0065).abs() < 0.0005, "rate = {}", rate);
    }

    #[test]
    fn test_reversed_ra_fails_sign_check() {
        let rig = SimulatedRig::new(SimulationConfig {
            reverse_ra: true,
            ..quiet()
        });
        let dispatcher = PulseDispatcher::new(rig.mount());
        let detector = StatisticalDetector::new(DetectionParams::default());
        let routine = CalibrationRoutine::from_config(&GuidingConfig::default()).unwrap();
        let result = routine
            .run(&mut rig.camera(), &dispatcher, &detector, rig.clock().as_ref())
            .unwrap();
        assert_eq!(result.check_signs(&AxisSigns::default()), Some(false));
    }

    #[test]
    fn test_polar_alignment_measures_drift() {
        let rig = SimulatedRig::new(SimulationConfig {
            drift_x_px_per_sec: 0.04,
            drift_y_px_per_sec: -0.02,
            exposure_secs: 1.0,
            ..SimulationConfig::default()
        });
        let config = GuidingConfig::default();
        let samples = PolarAlignment::from_config(&config)
            .unwrap()
            .measure_drift(
                &mut rig.camera(),
                &StatisticalDetector::new(DetectionParams::default()),
                rig.clock().as_ref(),
            )
            .unwrap();
        assert!(samples.len() >= 20);

        let rate = analyze(&samples, 1.0).unwrap();
        assert!((rate.ra_px_per_sec - 0.04).abs() < 0.005, "ra = {}", rate.ra_px_per_sec);
        assert!((rate.dec_px_per_sec + 0.02).abs() < 0.005, "dec = {}", rate.dec_px_per_sec);
    }

    #[test]
    fn test_closed_loop_holds_star() {
        let rig = SimulatedRig::new(SimulationConfig::default());
        let mut config = GuidingConfig::default();
        config.dither.interval_frames = 0;
        let guider = Guider::new(config, Arc::new(PulseDispatcher::new(rig.mount())));

        let stop = AtomicBool::new(false);
        let mut last_error = (f64::MAX, f64::MAX);
        guider
            .run(&mut rig.camera(), &stop, Some(60), |_, report| {
                if let Some(e) = report.error_px {
                    last_error = e;
                }
            })
            .unwrap();

        // Unguided, the star would have drifted 6 px in x over 120 s.
        assert!(last_error.0.abs() < 1.0 && last_error.1.abs() < 1.0, "error {:?}", last_error);
        let (x, _) = rig.star_position();
        assert!((x - 160.0).abs() < 1.5, "x = {}", x);
    }
}
