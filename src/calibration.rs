//! Axis calibration: pulse each direction once and measure how far the star moves.
//!
//! The result is diagnostic. It is written out for the user and can be checked
//! against the configured sign policy, but it never retunes the controller.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;

use crate::centroid::refine_centroid;
use crate::clock::Clock;
use crate::config::{seconds, GuidingConfig};
use crate::controller::AxisSigns;
use crate::detection::{detect_brightest, StarDetector};
use crate::error::{CalibrationAxisError, HardwareError};
use crate::hardware::{Direction, FrameSource, PulseDispatcher};

/// Directions are calibrated in this order.
pub const CALIBRATION_ORDER: [Direction; 4] = [
    Direction::East,
    Direction::West,
    Direction::North,
    Direction::South,
];

/// Outcome for one direction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "AxisRecord")]
pub enum AxisCalibration {
    /// Star displacement in pixels caused by the test pulse.
    Measured { dx: f64, dy: f64 },
    Failed(CalibrationAxisError),
}

/// Persisted shape: `{dx, dy}` or `{dx: null, dy: null, error}`.
#[derive(Serialize)]
struct AxisRecord {
    dx: Option<f64>,
    dy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<AxisCalibration> for AxisRecord {
    fn from(axis: AxisCalibration) -> Self {
        match axis {
            AxisCalibration::Measured { dx, dy } => AxisRecord {
                dx: Some(dx),
                dy: Some(dy),
                error: None,
            },
            AxisCalibration::Failed(e) => AxisRecord {
                dx: None,
                dy: None,
                error: Some(e.to_string()),
            },
        }
    }
}

impl AxisCalibration {
    pub fn displacement(&self) -> Option<(f64, f64)> {
        match self {
            AxisCalibration::Measured { dx, dy } => Some((*dx, *dy)),
            AxisCalibration::Failed(_) => None,
        }
    }
}

/// One calibration run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationResult {
    /// RFC 3339 time the run finished.
    pub timestamp: String,
    pub pulse_ms: u32,
    pub axes: BTreeMap<Direction, AxisCalibration>,
}

impl CalibrationResult {
    pub fn axis(&self, direction: Direction) -> Option<&AxisCalibration> {
        self.axes.get(&direction)
    }

    pub fn succeeded(&self) -> usize {
        self.axes.values().filter(|a| a.displacement().is_some()).count()
    }

    /// Star speed in pixels per millisecond of pulse for one direction.
    pub fn rate_px_per_ms(&self, direction: Direction) -> Option<f64> {
        if self.pulse_ms == 0 {
            return None;
        }
        let (dx, dy) = self.axis(direction)?.displacement()?;
        Some(dx.hypot(dy) / self.pulse_ms as f64)
    }

    /// Whether the measured response agrees with `signs`.
    ///
    /// The controller answers a star at positive X with `positive_x`, so that
    /// pulse has to move the star towards negative X (and its opposite towards
    /// positive X); likewise for Y. Directions that failed are skipped; `None`
    /// means nothing could be checked.
    pub fn check_signs(&self, signs: &AxisSigns) -> Option<bool> {
        let mut checked = 0;
        let mut agrees = true;
        for (&direction, axis) in &self.axes {
            let Some((dx, dy)) = axis.displacement() else {
                continue;
            };
            let (moved, towards_negative) = if direction.is_ra() {
                (dx, direction == signs.positive_x)
            } else {
                (dy, direction == signs.positive_y)
            };
            let ok = if towards_negative { moved < 0.0 } else { moved > 0.0 };
            if !ok {
                tracing::warn!(
                    "{} pulse moved the star {:+.2} px along its axis, \
                     against the configured sign policy",
                    direction,
                    moved
                );
            }
            agrees &= ok;
            checked += 1;
        }
        (checked > 0).then_some(agrees)
    }

    pub fn save_json(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialise calibration result")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write calibration result: {}", path.display()))?;
        tracing::info!("Calibration saved to {}", path.display());
        Ok(())
    }
}

/// Pulse, settle, measure, for each direction in turn.
pub struct CalibrationRoutine {
    pulse_ms: u32,
    settle: Duration,
    half_size: usize,
    noise_floor: f64,
    frame_timeout: Duration,
}

impl CalibrationRoutine {
    pub fn new(
        pulse_ms: u32,
        settle: Duration,
        half_size: usize,
        noise_floor: f64,
        frame_timeout: Duration,
    ) -> Self {
        Self {
            pulse_ms,
            settle,
            half_size,
            noise_floor,
            frame_timeout,
        }
    }

    pub fn from_config(config: &GuidingConfig) -> anyhow::Result<Self> {
        Ok(Self::new(
            config.calibration.pulse_ms,
            seconds("calibration.settle_secs", config.calibration.settle_secs)?,
            config.tracking.region_half_size,
            config.tracking.noise_floor,
            config.frame_timeout(),
        ))
    }

    fn locate(
        &self,
        source: &mut dyn FrameSource,
        detector: &dyn StarDetector,
    ) -> Result<Option<(f64, f64)>, HardwareError> {
        let frame = source.get_frame(self.frame_timeout)?;
        Ok(detect_brightest(detector, &frame)
            .ok()
            .map(|approx| refine_centroid(&frame, approx, self.half_size, self.noise_floor)))
    }

    /// Calibrate one direction.
    ///
    /// The pulse is sent even when the reference frame has no star, so the
    /// mount ends up where a full run would leave it. Detection failures are
    /// recorded per axis; frame or mount failures abort.
    pub fn calibrate_axis(
        &self,
        direction: Direction,
        source: &mut dyn FrameSource,
        dispatcher: &PulseDispatcher,
        detector: &dyn StarDetector,
        clock: &dyn Clock,
    ) -> Result<AxisCalibration, HardwareError> {
        tracing::info!("Calibrating {} with {} ms pulse", direction, self.pulse_ms);
        let before = self.locate(source, detector)?;
        dispatcher.dispatch(direction, self.pulse_ms)?;
        clock.sleep(self.settle);
        let after = self.locate(source, detector)?;

        let result = match (before, after) {
            (None, _) => {
                AxisCalibration::Failed(CalibrationAxisError::ReferenceNotFound(direction))
            }
            (Some(_), None) => {
                AxisCalibration::Failed(CalibrationAxisError::DisplacedNotFound(direction))
            }
            (Some(a), Some(b)) => AxisCalibration::Measured {
                dx: b.0 - a.0,
                dy: b.1 - a.1,
            },
        };
        match &result {
            AxisCalibration::Measured { dx, dy } => {
                tracing::info!("{}: star moved dx={:.2} dy={:.2} px", direction, dx, dy)
            }
            AxisCalibration::Failed(e) => {
                tracing::warn!("{}: calibration failed: {}", direction, e)
            }
        }
        Ok(result)
    }

    /// Run all four directions.
    pub fn run(
        &self,
        source: &mut dyn FrameSource,
        dispatcher: &PulseDispatcher,
        detector: &dyn StarDetector,
        clock: &dyn Clock,
    ) -> Result<CalibrationResult, HardwareError> {
        let mut axes = BTreeMap::new();
        for direction in CALIBRATION_ORDER {
            let axis = self.calibrate_axis(direction, source, dispatcher, detector, clock)?;
            axes.insert(direction, axis);
        }
        let result = CalibrationResult {
            timestamp: chrono::Utc::now().to_rfc3339(),
            pulse_ms: self.pulse_ms,
            axes,
        };
        tracing::info!("Calibration complete: {}/4 directions measured", result.succeeded());
        Ok(result)
    }
}
