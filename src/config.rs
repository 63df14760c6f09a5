use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::controller::AxisSigns;
use crate::detection::{DetectionParams, DetectorKind};

/// Arcseconds of sky per pixel for a focal length (mm) and pixel size (um).
pub fn plate_scale(focal_length_mm: f64, pixel_size_um: f64) -> f64 {
    206.265 * pixel_size_um / focal_length_mm
}

/// Convert a configured number of seconds, rejecting negative, non-finite and
/// out-of-range values instead of panicking.
pub fn seconds(name: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .with_context(|| format!("{} is not a usable duration: {} s", name, secs))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpticsConfig {
    pub focal_length_mm: f64,
    pub pixel_size_um: f64,
    /// Use this arcsec/pixel value instead of deriving it from the optics.
    pub plate_scale_override: Option<f64>,
}

impl Default for OpticsConfig {
    fn default() -> Self {
        Self {
            focal_length_mm: 430.0,
            pixel_size_um: 2.4,
            plate_scale_override: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Pulse milliseconds per arcsecond of error.
    pub gain_ms_per_arcsec: f64,
    pub axis_signs: AxisSigns,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            gain_ms_per_arcsec: 100.0,
            axis_signs: AxisSigns::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub loss_radius_px: f64,
    pub max_secondary_stars: usize,
    pub manual_select_radius_px: f64,
    /// Half width of the centroid / seeing region; 7 gives a 15 pixel box.
    pub region_half_size: usize,
    pub noise_floor: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            loss_radius_px: 10.0,
            max_secondary_stars: 8,
            manual_select_radius_px: 20.0,
            region_half_size: 7,
            noise_floor: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DetectionConfig {
    pub detector: DetectorKind,
    #[serde(flatten)]
    pub params: DetectionParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DitherConfig {
    pub max_pixels: f64,
    /// Dither every this many guided frames; 0 disables the cadence.
    pub interval_frames: u64,
    /// Seed for the dither generator; random when absent.
    pub seed: Option<u64>,
}

impl Default for DitherConfig {
    fn default() -> Self {
        Self {
            max_pixels: 5.0,
            interval_frames: 50,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub pulse_ms: u32,
    pub settle_secs: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            pulse_ms: 1000,
            settle_secs: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolarConfig {
    pub duration_secs: f64,
    pub interval_secs: f64,
}

impl Default for PolarConfig {
    fn default() -> Self {
        Self {
            duration_secs: 120.0,
            interval_secs: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub frame_timeout_secs: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self { frame_timeout_secs: 10.0 }
    }
}

/// Everything tunable, threaded explicitly into each component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GuidingConfig {
    pub optics: OpticsConfig,
    pub control: ControlConfig,
    pub tracking: TrackingConfig,
    pub detection: DetectionConfig,
    pub dither: DitherConfig,
    pub calibration: CalibrationConfig,
    pub polar: PolarConfig,
    pub camera: CameraConfig,
}

impl GuidingConfig {
    /// Read a JSON config; missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn plate_scale(&self) -> f64 {
        self.optics
            .plate_scale_override
            .unwrap_or_else(|| plate_scale(self.optics.focal_length_mm, self.optics.pixel_size_um))
    }

    /// Saturates on values `validate` would reject.
    pub fn frame_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.camera.frame_timeout_secs.max(0.0))
            .unwrap_or(Duration::MAX)
    }

    pub fn validate(&self) -> Result<()> {
        let scale = self.plate_scale();
        anyhow::ensure!(
            scale.is_finite() && scale > 0.0,
            "Plate scale must be positive (focal length {} mm, pixel size {} um)",
            self.optics.focal_length_mm,
            self.optics.pixel_size_um
        );
        anyhow::ensure!(
            self.control.gain_ms_per_arcsec >= 0.0,
            "Gain must not be negative: {}",
            self.control.gain_ms_per_arcsec
        );
        self.control.axis_signs.validate()?;
        anyhow::ensure!(self.tracking.loss_radius_px > 0.0, "Loss radius must be positive");
        anyhow::ensure!(self.dither.max_pixels >= 0.0, "Dither amplitude must not be negative");
        seconds("calibration.settle_secs", self.calibration.settle_secs)?;
        seconds("polar.duration_secs", self.polar.duration_secs)?;
        let interval = seconds("polar.interval_secs", self.polar.interval_secs)?;
        anyhow::ensure!(!interval.is_zero(), "polar.interval_secs must be positive");
        seconds("camera.frame_timeout_secs", self.camera.frame_timeout_secs)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::DetectionThreshold;
    use crate::hardware::Direction;

    #[test]
    fn test_plate_scale() {
        // 430 mm with 2.4 um pixels.
        assert!((plate_scale(430.0, 2.4) - 1.15125).abs() < 1e-4);
        assert!((GuidingConfig::default().plate_scale() - 1.15125).abs() < 1e-4);

        let mut config = GuidingConfig::default();
        config.optics.plate_scale_override = Some(2.0);
        assert_eq!(config.plate_scale(), 2.0);
    }

    #[test]
    fn test_defaults() {
        let config = GuidingConfig::default();
        assert_eq!(config.control.gain_ms_per_arcsec, 100.0);
        assert_eq!(config.tracking.loss_radius_px, 10.0);
        assert_eq!(config.tracking.region_half_size, 7);
        assert_eq!(config.dither.interval_frames, 50);
        assert_eq!(config.calibration.pulse_ms, 1000);
        assert_eq!(config.polar.duration_secs, 120.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{
            "control": {
                "gain_ms_per_arcsec": 80,
                "axis_signs": { "positive_x": "east", "positive_y": "north" }
            },
            "detection": {
                "detector": "fallback",
                "threshold": { "kind": "sigma_above_background", "value": 4.0 }
            }
        }"#;
        let config: GuidingConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.control.gain_ms_per_arcsec, 80.0);
        assert_eq!(config.control.axis_signs.positive_x, Direction::East);
        assert_eq!(config.detection.detector, DetectorKind::Fallback);
        assert_eq!(
            config.detection.params.threshold,
            DetectionThreshold::SigmaAboveBackground(4.0)
        );
        assert_eq!(config.detection.params.fwhm, 3.0);
        assert_eq!(config.tracking, TrackingConfig::default());
    }

    #[test]
    fn test_validation_rejects_bad_signs() {
        let mut config = GuidingConfig::default();
        config.control.axis_signs.positive_y = Direction::West;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_unusable_durations() {
        for bad in [1e300, f64::INFINITY, f64::NAN, -1.0] {
            let mut config = GuidingConfig::default();
            config.polar.interval_secs = bad;
            let err = config.validate().unwrap_err();
            assert!(format!("{:#}", err).contains("polar.interval_secs"), "{}", bad);

            let mut config = GuidingConfig::default();
            config.calibration.settle_secs = bad;
            assert!(config.validate().is_err(), "{}", bad);
        }

        let mut config = GuidingConfig::default();
        config.polar.interval_secs = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_huge_timeout_saturates() {
        let mut config = GuidingConfig::default();
        config.camera.frame_timeout_secs = 1e300;
        assert_eq!(config.frame_timeout(), Duration::MAX);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_reports_path() {
        let err = GuidingConfig::from_file(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(format!("{:#}", err).contains("/definitely/not/here.json"));
    }
}
