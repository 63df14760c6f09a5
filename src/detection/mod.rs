//! Star candidate extraction.
//!
//! Two interchangeable strategies produce the same [`StarCandidate`] shape:
//! - [`StatisticalDetector`]: sigma-clipped background estimate followed by a
//!   zero-sum Gaussian matched filter tuned to the expected FWHM (DAOFIND style).
//! - [`FallbackDetector`]: 3x3 median denoise, percent-of-peak or Otsu
//!   binarisation, connected components and first intensity moments.
//!
//! The strategy is picked once when the guider is built ([`build_detector`]),
//! never per frame. Candidate lists are unordered; only [`brightest`] and
//! [`nearest`] give ordering guarantees.

pub mod fallback;
pub mod statistical;

use serde::{Deserialize, Serialize};

use crate::error::DetectionError;
use crate::frame::Frame;

pub use fallback::FallbackDetector;
pub use statistical::StatisticalDetector;

/// A star-like blob found in one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StarCandidate {
    /// Centroid (x, y) in frame pixel coordinates.
    pub centroid: (f64, f64),
    /// Mean frame intensity over the blob's pixels.
    pub mean_intensity: f64,
    /// Brightest frame pixel in the blob.
    pub peak_intensity: f64,
    /// Blob area in pixels.
    pub area: f64,
}

impl StarCandidate {
    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        (self.centroid.0 - x).hypot(self.centroid.1 - y)
    }
}

/// How the detection threshold is derived from the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum DetectionThreshold {
    /// `k` sigma above the sigma-clipped background.
    SigmaAboveBackground(f64),
    /// Percentage of the frame's peak above background.
    PercentOfPeak(f64),
    /// Histogram based (Otsu) binarisation; the statistical detector uses 5 sigma.
    Auto,
}

impl std::str::FromStr for DetectionThreshold {
    type Err = String;

    /// Accepts `auto`, `<k>sigma` or `<p>%`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s == "auto" {
            return Ok(DetectionThreshold::Auto);
        }
        if let Some(k) = s.strip_suffix("sigma") {
            return k
                .trim()
                .parse()
                .map(DetectionThreshold::SigmaAboveBackground)
                .map_err(|_| format!("Invalid sigma threshold: {}", s));
        }
        if let Some(p) = s.strip_suffix('%') {
            return p
                .trim()
                .parse()
                .map(DetectionThreshold::PercentOfPeak)
                .map_err(|_| format!("Invalid percent threshold: {}", s));
        }
        Err(format!("Unknown threshold '{}': use auto, <k>sigma or <p>%", s))
    }
}

/// Detection inputs shared by both strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParams {
    pub threshold: DetectionThreshold,
    /// Expected point-spread FWHM in pixels.
    pub fwhm: f64,
    /// Candidates need `mean_intensity > min_brightness`.
    pub min_brightness: Option<f64>,
    /// Candidates need `mean_intensity < max_brightness`.
    pub max_brightness: Option<f64>,
    /// Candidates need `peak_intensity < saturation`.
    pub saturation: f64,
}

impl Default for DetectionParams {
    /// Tuned for 8-bit guide cameras.
    fn default() -> Self {
        Self {
            threshold: DetectionThreshold::PercentOfPeak(10.0),
            fwhm: 3.0,
            min_brightness: Some(60.0),
            max_brightness: Some(250.0),
            saturation: 245.0,
        }
    }
}

impl DetectionParams {
    /// Shared post-filter: brightness window, saturation ceiling, `area > 2`.
    pub fn accepts(&self, candidate: &StarCandidate) -> bool {
        let above_min = self.min_brightness.map_or(true, |min| candidate.mean_intensity > min);
        let below_max = self.max_brightness.map_or(true, |max| candidate.mean_intensity < max);
        above_min && below_max && candidate.peak_intensity < self.saturation && candidate.area > 2.0
    }
}

/// A candidate extraction strategy.
pub trait StarDetector: Send + Sync {
    /// Extract candidates from a frame. An empty list is a valid result.
    fn detect(&self, frame: &Frame) -> Vec<StarCandidate>;

    fn name(&self) -> &'static str;
}

/// Which detector implementation to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    #[default]
    Statistical,
    Fallback,
}

impl std::str::FromStr for DetectorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "statistical" | "dao" => Ok(DetectorKind::Statistical),
            "fallback" | "contour" => Ok(DetectorKind::Fallback),
            _ => Err(format!("Unknown detector: {}. Valid options: statistical, fallback", s)),
        }
    }
}

/// Build the configured detector.
pub fn build_detector(kind: DetectorKind, params: DetectionParams) -> Box<dyn StarDetector> {
    tracing::debug!("Using {:?} star detector with {:?}", kind, params.threshold);
    match kind {
        DetectorKind::Statistical => Box::new(StatisticalDetector::new(params)),
        DetectorKind::Fallback => Box::new(FallbackDetector::new(params)),
    }
}

/// Candidate with the highest mean intensity; ties go to the first one seen.
pub fn brightest(candidates: &[StarCandidate]) -> Result<&StarCandidate, DetectionError> {
    let mut best: Option<&StarCandidate> = None;
    for candidate in candidates {
        match best {
            Some(b) if candidate.mean_intensity <= b.mean_intensity => {}
            _ => best = Some(candidate),
        }
    }
    best.ok_or(DetectionError::Empty)
}

/// Candidate closest to `(x, y)`, if any lies within `max_distance` (inclusive).
pub fn nearest(
    candidates: &[StarCandidate],
    x: f64,
    y: f64,
    max_distance: f64,
) -> Result<&StarCandidate, DetectionError> {
    candidates
        .iter()
        .map(|c| (c, c.distance_to(x, y)))
        .filter(|(_, d)| *d <= max_distance)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(c, _)| c)
        .ok_or(DetectionError::NothingNear { x, y, max_distance })
}

/// Detect and return the brightest candidate's centroid.
pub fn detect_brightest(
    detector: &dyn StarDetector,
    frame: &Frame,
) -> Result<(f64, f64), DetectionError> {
    let candidates = detector.detect(frame);
    brightest(&candidates).map(|c| c.centroid)
}
