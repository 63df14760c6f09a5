use serde::{Deserialize, Serialize};

use crate::error::HardwareError;
use crate::hardware::{Direction, PulseDispatcher};

/// Mapping from positive angular error on each image axis to a pulse direction.
///
/// The default (positive X corrected with west, positive Y with south) is what
/// most setups need, but it depends on camera orientation and mount side of
/// pier. Calibration reports whether the measured response agrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisSigns {
    /// Pulse issued when the star sits at positive X of its target. Must be east or west.
    pub positive_x: Direction,
    /// Pulse issued when the star sits at positive Y of its target. Must be north or south.
    pub positive_y: Direction,
}

impl Default for AxisSigns {
    fn default() -> Self {
        Self {
            positive_x: Direction::West,
            positive_y: Direction::South,
        }
    }
}

impl AxisSigns {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.positive_x.is_ra(),
            "positive_x must be east or west, got {}",
            self.positive_x
        );
        anyhow::ensure!(
            !self.positive_y.is_ra(),
            "positive_y must be north or south, got {}",
            self.positive_y
        );
        Ok(())
    }

    pub fn ra_direction(&self, dx_arcsec: f64) -> Direction {
        if dx_arcsec > 0.0 {
            self.positive_x
        } else {
            self.positive_x.opposite()
        }
    }

    pub fn dec_direction(&self, dy_arcsec: f64) -> Direction {
        if dy_arcsec > 0.0 {
            self.positive_y
        } else {
            self.positive_y.opposite()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pulse {
    pub direction: Direction,
    pub duration_ms: u32,
}

/// One cycle's angular error and the pulses it calls for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Correction {
    pub dx_arcsec: f64,
    pub dy_arcsec: f64,
    pub ra: Option<Pulse>,
    pub dec: Option<Pulse>,
}

/// Proportional controller: pulse length = |angular error| x gain, truncated to whole ms.
#[derive(Debug, Clone, PartialEq)]
pub struct GuidingController {
    plate_scale: f64,
    gain: f64,
    signs: AxisSigns,
}

/// Truncates towards zero; anything under 1 ms is no pulse.
fn pulse_ms(arcsec: f64, gain: f64) -> u32 {
    let ms = (arcsec.abs() * gain).floor();
    if ms.is_finite() && ms >= 1.0 {
        ms.min(u32::MAX as f64) as u32
    } else {
        0
    }
}

impl GuidingController {
    /// `plate_scale` in arcsec/pixel, `gain` in ms of pulse per arcsec of error.
    pub fn new(plate_scale: f64, gain: f64, signs: AxisSigns) -> Self {
        Self {
            plate_scale,
            gain,
            signs,
        }
    }

    pub fn plate_scale(&self) -> f64 {
        self.plate_scale
    }

    pub fn signs(&self) -> AxisSigns {
        self.signs
    }

    /// Pulses for a pixel error of `(dx, dy)`, without touching the mount.
    pub fn compute(&self, dx_px: f64, dy_px: f64) -> Correction {
        let dx_arcsec = dx_px * self.plate_scale;
        let dy_arcsec = dy_px * self.plate_scale;

        let ra = match pulse_ms(dx_arcsec, self.gain) {
            0 => None,
            ms => Some(Pulse {
                direction: self.signs.ra_direction(dx_arcsec),
                duration_ms: ms,
            }),
        };
        let dec = match pulse_ms(dy_arcsec, self.gain) {
            0 => None,
            ms => Some(Pulse {
                direction: self.signs.dec_direction(dy_arcsec),
                duration_ms: ms,
            }),
        };

        Correction {
            dx_arcsec,
            dy_arcsec,
            ra,
            dec,
        }
    }

    /// Compute and dispatch the correction: RA first, then Dec, as two separate pulses.
    ///
    /// Returns as soon as the mount accepted the commands. A failed RA pulse
    /// stops the Dec pulse from being sent.
    pub fn guide(
        &self,
        dispatcher: &PulseDispatcher,
        dx_px: f64,
        dy_px: f64,
    ) -> Result<Correction, HardwareError> {
        let correction = self.compute(dx_px, dy_px);
        for pulse in [correction.ra, correction.dec].into_iter().flatten() {
            dispatcher.dispatch(pulse.direction, pulse.duration_ms)?;
        }
        Ok(correction)
    }
}
