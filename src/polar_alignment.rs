//! Drift-method polar alignment: watch an unguided star and fit its drift rate.

use std::time::Duration;

use serde::Serialize;

use crate::centroid::refine_centroid;
use crate::clock::Clock;
use crate::config::{seconds, GuidingConfig};
use crate::detection::{detect_brightest, StarDetector};
use crate::error::{DriftAnalysisError, PolarAlignError};
use crate::hardware::FrameSource;

/// Star position relative to the starting reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DriftSample {
    pub elapsed_secs: f64,
    pub dx: f64,
    pub dy: f64,
}

/// Least-squares drift rate on each axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DriftRate {
    pub ra_px_per_sec: f64,
    pub dec_px_per_sec: f64,
    pub ra_arcsec_per_sec: f64,
    pub dec_arcsec_per_sec: f64,
    pub samples: usize,
}

/// Slope of the ordinary least-squares line through `(t, v)`.
fn ols_slope(t: &[f64], v: &[f64]) -> Option<f64> {
    let n = t.len() as f64;
    let t_mean = t.iter().sum::<f64>() / n;
    let v_mean = v.iter().sum::<f64>() / n;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (ti, vi) in t.iter().zip(v) {
        sxy += (ti - t_mean) * (vi - v_mean);
        sxx += (ti - t_mean) * (ti - t_mean);
    }
    (sxx > 0.0).then(|| sxy / sxx)
}

/// Fit drift rates to `samples`; `plate_scale` converts to arcsec/second.
pub fn analyze(samples: &[DriftSample], plate_scale: f64) -> Result<DriftRate, DriftAnalysisError> {
    if samples.is_empty() {
        return Err(DriftAnalysisError::NoData);
    }
    if samples.len() < 2 {
        return Err(DriftAnalysisError::Degenerate(samples.len()));
    }
    let t: Vec<f64> = samples.iter().map(|s| s.elapsed_secs).collect();
    let dx: Vec<f64> = samples.iter().map(|s| s.dx).collect();
    let dy: Vec<f64> = samples.iter().map(|s| s.dy).collect();

    let (Some(ra), Some(dec)) = (ols_slope(&t, &dx), ols_slope(&t, &dy)) else {
        return Err(DriftAnalysisError::Degenerate(samples.len()));
    };
    Ok(DriftRate {
        ra_px_per_sec: ra,
        dec_px_per_sec: dec,
        ra_arcsec_per_sec: ra * plate_scale,
        dec_arcsec_per_sec: dec * plate_scale,
        samples: samples.len(),
    })
}

pub struct PolarAlignment {
    duration: Duration,
    interval: Duration,
    half_size: usize,
    noise_floor: f64,
    frame_timeout: Duration,
}

impl PolarAlignment {
    pub fn new(
        duration: Duration,
        interval: Duration,
        half_size: usize,
        noise_floor: f64,
        frame_timeout: Duration,
    ) -> Self {
        Self {
            duration,
            interval,
            half_size,
            noise_floor,
            frame_timeout,
        }
    }

    pub fn from_config(config: &GuidingConfig) -> anyhow::Result<Self> {
        Ok(Self::new(
            seconds("polar.duration_secs", config.polar.duration_secs)?,
            seconds("polar.interval_secs", config.polar.interval_secs)?,
            config.tracking.region_half_size,
            config.tracking.noise_floor,
            config.frame_timeout(),
        ))
    }

    /// Sample the star every interval for the configured duration.
    ///
    /// Frames without a detectable star are skipped, so fewer than
    /// `duration / interval` samples may come back. A missing star in the very
    /// first frame, or any camera failure, aborts.
    pub fn measure_drift(
        &self,
        source: &mut dyn FrameSource,
        detector: &dyn StarDetector,
        clock: &dyn Clock,
    ) -> Result<Vec<DriftSample>, PolarAlignError> {
        let frame = source.get_frame(self.frame_timeout)?;
        let approx = detect_brightest(detector, &frame).map_err(PolarAlignError::NoReference)?;
        let reference = refine_centroid(&frame, approx, self.half_size, self.noise_floor);
        tracing::info!(
            "Drift measurement from ({:.2}, {:.2}) for {:.0} s every {:.1} s",
            reference.0,
            reference.1,
            self.duration.as_secs_f64(),
            self.interval.as_secs_f64()
        );

        let mut samples = Vec::new();
        if self.interval.is_zero() {
            tracing::warn!("Zero sampling interval, no drift samples taken");
            return Ok(samples);
        }

        let start = clock.now();
        while clock.now() - start < self.duration {
            clock.sleep(self.interval);
            let frame = source.get_frame(self.frame_timeout)?;
            let elapsed = (clock.now() - start).as_secs_f64();
            match detect_brightest(detector, &frame) {
                Ok(approx) => {
                    let c = refine_centroid(&frame, approx, self.half_size, self.noise_floor);
                    let sample = DriftSample {
                        elapsed_secs: elapsed,
                        dx: c.0 - reference.0,
                        dy: c.1 - reference.1,
                    };
                    tracing::debug!(
                        "t={:.1}s drift dx={:.2} dy={:.2} px",
                        sample.elapsed_secs,
                        sample.dx,
                        sample.dy
                    );
                    samples.push(sample);
                }
                Err(e) => tracing::debug!("t={:.1}s sample skipped: {}", elapsed, e),
            }
        }
        Ok(samples)
    }
}
