use std::collections::BTreeMap;

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::contrast::otsu_level;
use imageproc::filter::median_filter;
use imageproc::region_labelling::{connected_components, Connectivity};

use super::{DetectionParams, DetectionThreshold, StarCandidate, StarDetector};
use crate::frame::Frame;
use crate::stats::sigma_clipped_stats;

/// Threshold and component detector for when the statistical path is not wanted.
///
/// Works on an 8-bit copy of the frame (scaled down if the frame exceeds 255)
/// so the median filter and Otsu level come straight from `imageproc`. Candidate
/// statistics are taken from the unfiltered frame values.
pub struct FallbackDetector {
    params: DetectionParams,
}

#[derive(Default)]
struct Component {
    pixels: usize,
    weight: f64,
    sum_x: f64,
    sum_y: f64,
    sum_intensity: f64,
    peak_intensity: f64,
}

impl FallbackDetector {
    pub fn new(params: DetectionParams) -> Self {
        Self { params }
    }

    /// 8-bit rendition and the factor used to get there.
    fn to_gray(frame: &Frame) -> (GrayImage, f64) {
        let max = frame.max();
        let scale = if max > 255.0 { 255.0 / max } else { 1.0 };
        let img = ImageBuffer::from_fn(frame.width() as u32, frame.height() as u32, |x, y| {
            let v = frame.get(x as usize, y as usize) * scale;
            Luma([v.round().clamp(0.0, 255.0) as u8])
        });
        (img, scale)
    }

    /// Binarisation level in the 8-bit domain; pixels strictly above it are foreground.
    fn level(&self, frame: &Frame, blurred: &GrayImage, scale: f64) -> u8 {
        let level = match self.params.threshold {
            DetectionThreshold::PercentOfPeak(p) => p / 100.0 * frame.max() * scale,
            DetectionThreshold::SigmaAboveBackground(k) => {
                let stats = sigma_clipped_stats(frame.data(), 3.0, 5);
                (stats.median + k * stats.std_dev) * scale
            }
            DetectionThreshold::Auto => otsu_level(blurred) as f64,
        };
        level.floor().clamp(0.0, 255.0) as u8
    }
}

impl StarDetector for FallbackDetector {
    fn detect(&self, frame: &Frame) -> Vec<StarCandidate> {
        let (gray, scale) = Self::to_gray(frame);
        let blurred = median_filter(&gray, 1, 1);
        let level = self.level(frame, &blurred, scale);

        let binary: GrayImage = ImageBuffer::from_fn(blurred.width(), blurred.height(), |x, y| {
            if blurred.get_pixel(x, y)[0] > level {
                Luma([255u8])
            } else {
                Luma([0u8])
            }
        });
        let labels = connected_components(&binary, Connectivity::Eight, Luma([0u8]));

        let mut components: BTreeMap<u32, Component> = BTreeMap::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label[0];
            if label == 0 {
                continue;
            }
            let intensity = frame.get(x as usize, y as usize);
            let c = components.entry(label).or_insert_with(|| Component {
                peak_intensity: f64::NEG_INFINITY,
                ..Component::default()
            });
            c.pixels += 1;
            c.weight += intensity;
            c.sum_x += intensity * x as f64;
            c.sum_y += intensity * y as f64;
            c.sum_intensity += intensity;
            c.peak_intensity = c.peak_intensity.max(intensity);
        }

        let found = components.len();
        let candidates: Vec<StarCandidate> = components
            .into_values()
            .filter(|c| c.weight > 0.0)
            .map(|c| StarCandidate {
                centroid: (c.sum_x / c.weight, c.sum_y / c.weight),
                mean_intensity: c.sum_intensity / c.pixels as f64,
                peak_intensity: c.peak_intensity,
                area: c.pixels as f64,
            })
            .filter(|c| self.params.accepts(c))
            .collect();

        tracing::debug!(
            "Fallback detector: level={} scale={:.4} components={} accepted={}",
            level,
            scale,
            found,
            candidates.len()
        );
        candidates
    }

    fn name(&self) -> &'static str {
        "fallback"
    }
}
