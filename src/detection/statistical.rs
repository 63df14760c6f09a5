use super::{DetectionParams, DetectionThreshold, StarCandidate, StarDetector};
use crate::frame::Frame;
use crate::stats::sigma_clipped_stats;

/// Sigma used for background clipping.
const CLIP_SIGMA: f64 = 3.0;
const CLIP_ITERATIONS: usize = 5;
/// `k` applied when the threshold is left on automatic.
const AUTO_SIGMA: f64 = 5.0;

/// Matched-filter detector working on the background-subtracted frame.
///
/// The kernel is a zero-sum Gaussian normalised so that convolving a Gaussian
/// star of amplitude `A` (and the configured FWHM) yields `A`; the convolution
/// threshold is therefore the same pixel-level threshold used for footprints.
pub struct StatisticalDetector {
    params: DetectionParams,
    kernel: MatchedKernel,
}

struct MatchedKernel {
    radius: usize,
    weights: Vec<f64>,
}

impl MatchedKernel {
    fn for_fwhm(fwhm: f64) -> Self {
        let sigma = (fwhm / 2.3548).max(0.5);
        let radius = ((1.5 * sigma).ceil() as usize).max(2);
        let size = 2 * radius + 1;

        let inv_2s2 = 1.0 / (2.0 * sigma * sigma);
        let mut weights: Vec<f64> = (0..size * size)
            .map(|i| {
                let dx = (i % size) as f64 - radius as f64;
                let dy = (i / size) as f64 - radius as f64;
                (-(dx * dx + dy * dy) * inv_2s2).exp()
            })
            .collect();

        let kmean = weights.iter().sum::<f64>() / weights.len() as f64;
        weights.iter_mut().for_each(|w| *w -= kmean);
        let energy: f64 = weights.iter().map(|w| w * w).sum();
        weights.iter_mut().for_each(|w| *w /= energy);

        Self { radius, weights }
    }

    fn size(&self) -> usize {
        2 * self.radius + 1
    }

    /// Convolve the interior of `image`; a `radius` wide border stays at zero.
    fn convolve(&self, image: &[f64], width: usize, height: usize) -> Vec<f64> {
        let r = self.radius;
        let size = self.size();
        let mut out = vec![0.0; width * height];
        if width < size || height < size {
            return out;
        }
        for y in r..height - r {
            for x in r..width - r {
                let mut sum = 0.0;
                for ky in 0..size {
                    let row = (y + ky - r) * width;
                    let krow = ky * size;
                    for kx in 0..size {
                        sum += image[row + x + kx - r] * self.weights[krow + kx];
                    }
                }
                out[y * width + x] = sum;
            }
        }
        out
    }
}

impl StatisticalDetector {
    pub fn new(params: DetectionParams) -> Self {
        let kernel = MatchedKernel::for_fwhm(params.fwhm);
        Self { params, kernel }
    }

    /// Pixel-level threshold above background.
    fn threshold(&self, background: f64, noise: f64, peak: f64) -> f64 {
        match self.params.threshold {
            DetectionThreshold::SigmaAboveBackground(k) => k * noise,
            DetectionThreshold::PercentOfPeak(p) => p / 100.0 * (peak - background),
            DetectionThreshold::Auto => AUTO_SIGMA * noise,
        }
    }

    /// Local maxima of the filtered image above `threshold`, strongest first,
    /// with weaker peaks inside the kernel radius of a stronger one dropped.
    fn find_peaks(
        &self,
        conv: &[f64],
        width: usize,
        height: usize,
        threshold: f64,
    ) -> Vec<(usize, usize)> {
        let r = self.kernel.radius;
        if width < 2 * r + 3 || height < 2 * r + 3 {
            return Vec::new();
        }

        let mut peaks: Vec<(usize, usize, f64)> = Vec::new();
        for y in r + 1..height - r - 1 {
            for x in r + 1..width - r - 1 {
                let c = conv[y * width + x];
                if c <= threshold {
                    continue;
                }
                let mut is_max = true;
                'neighbours: for ny in y - 1..=y + 1 {
                    for nx in x - 1..=x + 1 {
                        if (nx, ny) == (x, y) {
                            continue;
                        }
                        let n = conv[ny * width + nx];
                        // Break plateaus towards the first pixel in scan order.
                        if n > c || (n == c && (ny, nx) < (y, x)) {
                            is_max = false;
                            break 'neighbours;
                        }
                    }
                }
                if is_max {
                    peaks.push((x, y, c));
                }
            }
        }

        peaks.sort_by(|a, b| b.2.total_cmp(&a.2));
        let min_sep_sq = (r * r) as f64;
        let mut kept: Vec<(usize, usize)> = Vec::with_capacity(peaks.len());
        for (x, y, _) in peaks {
            let suppressed = kept.iter().any(|&(kx, ky)| {
                let dx = x as f64 - kx as f64;
                let dy = y as f64 - ky as f64;
                dx * dx + dy * dy < min_sep_sq
            });
            if !suppressed {
                kept.push((x, y));
            }
        }
        kept
    }
}

/// Accumulates the 8-connected footprint grown from one peak.
struct Footprint {
    flux: f64,
    sum_x: f64,
    sum_y: f64,
    sum_intensity: f64,
    peak_intensity: f64,
    pixels: usize,
}

impl StarDetector for StatisticalDetector {
    fn detect(&self, frame: &Frame) -> Vec<StarCandidate> {
        let (width, height) = (frame.width(), frame.height());
        let stats = sigma_clipped_stats(frame.data(), CLIP_SIGMA, CLIP_ITERATIONS);
        let threshold = self.threshold(stats.median, stats.std_dev, frame.max());
        if !(threshold.is_finite() && threshold > 0.0) {
            tracing::debug!("Statistical detector: flat frame, nothing to detect");
            return Vec::new();
        }

        let residual: Vec<f64> = frame.data().iter().map(|&v| v - stats.median).collect();
        let conv = self.kernel.convolve(&residual, width, height);
        let peaks = self.find_peaks(&conv, width, height, threshold);

        // Pixels already claimed by a brighter peak's footprint.
        let mut claimed = vec![false; width * height];
        let mut candidates = Vec::new();
        let mut stack = Vec::new();

        for (px, py) in &peaks {
            let seed = py * width + px;
            if claimed[seed] || residual[seed] <= threshold {
                continue;
            }

            let mut fp = Footprint {
                flux: 0.0,
                sum_x: 0.0,
                sum_y: 0.0,
                sum_intensity: 0.0,
                peak_intensity: f64::NEG_INFINITY,
                pixels: 0,
            };
            claimed[seed] = true;
            stack.push(seed);
            while let Some(idx) = stack.pop() {
                let (x, y) = (idx % width, idx / width);
                let value = residual[idx];
                let intensity = frame.data()[idx];
                fp.flux += value;
                fp.sum_x += value * x as f64;
                fp.sum_y += value * y as f64;
                fp.sum_intensity += intensity;
                fp.peak_intensity = fp.peak_intensity.max(intensity);
                fp.pixels += 1;

                for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
                    for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                        let n = ny * width + nx;
                        if !claimed[n] && residual[n] > threshold {
                            claimed[n] = true;
                            stack.push(n);
                        }
                    }
                }
            }

            if fp.flux <= 0.0 {
                continue;
            }
            candidates.push(StarCandidate {
                centroid: (fp.sum_x / fp.flux, fp.sum_y / fp.flux),
                mean_intensity: fp.sum_intensity / fp.pixels as f64,
                peak_intensity: fp.peak_intensity,
                area: fp.pixels as f64,
            });
        }

        let found = candidates.len();
        candidates.retain(|c| self.params.accepts(c));
        tracing::debug!(
            "Statistical detector: background={:.2} noise={:.2} threshold={:.2} \
             peaks={} footprints={} accepted={}",
            stats.median,
            stats.std_dev,
            threshold,
            peaks.len(),
            found,
            candidates.len()
        );
        candidates
    }

    fn name(&self) -> &'static str {
        "statistical"
    }
}
