//! Seeing diagnostics: PSF width from a 2D Gaussian fit and a simple SNR.
//!
//! Both work on the same square region around the refined centroid. A failed
//! fit leaves the FWHM unavailable; it never interrupts guiding.

use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use crate::error::FitError;
use crate::frame::{Frame, Roi};
use crate::stats;

/// FWHM of a Gaussian in units of sigma, `2 * sqrt(2 * ln 2)`.
pub const SIGMA_TO_FWHM: f64 = 2.3548;

const N_PARAMS: usize = 6;

/// Axis-aligned elliptical Gaussian on a constant pedestal.
///
/// Parameter order: `[amplitude, x0, y0, sigma_x, sigma_y, offset]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GaussianModel {
    pub amplitude: f64,
    pub x0: f64,
    pub y0: f64,
    pub sigma_x: f64,
    pub sigma_y: f64,
    pub offset: f64,
}

impl GaussianModel {
    fn from_params(p: &[f64]) -> Self {
        Self {
            amplitude: p[0],
            x0: p[1],
            y0: p[2],
            sigma_x: p[3],
            sigma_y: p[4],
            offset: p[5],
        }
    }

    fn to_params(self) -> [f64; N_PARAMS] {
        [self.amplitude, self.x0, self.y0, self.sigma_x, self.sigma_y, self.offset]
    }

    pub fn value(&self, x: f64, y: f64) -> f64 {
        self.offset + self.amplitude * self.shape(x, y)
    }

    fn shape(&self, x: f64, y: f64) -> f64 {
        let dx = x - self.x0;
        let dy = y - self.y0;
        let ex = dx * dx / (2.0 * self.sigma_x * self.sigma_x);
        let ey = dy * dy / (2.0 * self.sigma_y * self.sigma_y);
        (-(ex + ey)).exp()
    }

    /// Partial derivatives of `value` with respect to each parameter.
    fn gradient(&self, x: f64, y: f64) -> [f64; N_PARAMS] {
        let e = self.shape(x, y);
        let dx = x - self.x0;
        let dy = y - self.y0;
        let sx2 = self.sigma_x * self.sigma_x;
        let sy2 = self.sigma_y * self.sigma_y;
        let ae = self.amplitude * e;
        [
            e,
            ae * dx / sx2,
            ae * dy / sy2,
            ae * dx * dx / (sx2 * self.sigma_x),
            ae * dy * dy / (sy2 * self.sigma_y),
            1.0,
        ]
    }

    /// Mean of the per-axis FWHM values.
    pub fn fwhm(&self) -> f64 {
        (SIGMA_TO_FWHM * self.sigma_x.abs() + SIGMA_TO_FWHM * self.sigma_y.abs()) / 2.0
    }
}

/// Outcome of a successful fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianFit {
    pub model: GaussianModel,
    pub iterations: usize,
    pub sum_sq: f64,
}

/// Damped Gauss-Newton least squares for [`GaussianModel`].
pub struct LevenbergMarquardt {
    max_iterations: usize,
    /// Relative change in the residual sum of squares that counts as converged.
    tolerance: f64,
    initial_lambda: f64,
    lambda_factor: f64,
    max_lambda: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-9,
            initial_lambda: 1e-3,
            lambda_factor: 10.0,
            max_lambda: 1e10,
        }
    }
}

fn sum_sq(model: &GaussianModel, points: &[(f64, f64)], values: &[f64]) -> f64 {
    points
        .iter()
        .zip(values)
        .map(|(&(x, y), &v)| {
            let r = v - model.value(x, y);
            r * r
        })
        .sum()
}

impl LevenbergMarquardt {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn fit(
        &self,
        points: &[(f64, f64)],
        values: &[f64],
        initial: GaussianModel,
    ) -> Result<GaussianFit, FitError> {
        let n = points.len().min(values.len());
        if n < N_PARAMS {
            return Err(FitError::InsufficientData { points: n, params: N_PARAMS });
        }
        let (points, values) = (&points[..n], &values[..n]);

        let mut model = initial;
        let mut lambda = self.initial_lambda;
        let mut current = sum_sq(&model, points, values);
        if !current.is_finite() {
            return Err(FitError::DidNotConverge("non-finite residuals at initial guess".into()));
        }

        let mut jacobian = DMatrix::<f64>::zeros(n, N_PARAMS);
        let mut residuals = DVector::<f64>::zeros(n);

        for iteration in 1..=self.max_iterations {
            // Exact fit, nothing left to improve.
            if current <= f64::EPSILON * n as f64 {
                return Ok(GaussianFit { model, iterations: iteration, sum_sq: current });
            }

            for (i, (&(x, y), &v)) in points.iter().zip(values).enumerate() {
                residuals[i] = v - model.value(x, y);
                for (j, g) in model.gradient(x, y).iter().enumerate() {
                    jacobian[(i, j)] = *g;
                }
            }
            let jt = jacobian.transpose();
            let jtj = &jt * &jacobian;
            let jtr = &jt * &residuals;

            let params = model.to_params();
            loop {
                let mut h = jtj.clone();
                for k in 0..N_PARAMS {
                    h[(k, k)] += lambda * jtj[(k, k)].max(1e-12);
                }

                let step = h.lu().solve(&jtr);
                if let Some(delta) = step {
                    let mut trial = [0.0; N_PARAMS];
                    for k in 0..N_PARAMS {
                        trial[k] = params[k] + delta[k];
                    }
                    // Keep widths strictly positive.
                    trial[3] = trial[3].abs().max(1e-3);
                    trial[4] = trial[4].abs().max(1e-3);
                    let candidate = GaussianModel::from_params(&trial);
                    let error = sum_sq(&candidate, points, values);

                    if error.is_finite() && error < current {
                        let improvement = (current - error) / current;
                        model = candidate;
                        current = error;
                        lambda = (lambda / self.lambda_factor).max(1e-12);
                        if improvement < self.tolerance {
                            return Ok(GaussianFit {
                                model,
                                iterations: iteration,
                                sum_sq: current,
                            });
                        }
                        break;
                    }
                }

                lambda *= self.lambda_factor;
                if lambda > self.max_lambda {
                    // No downhill step left: a local minimum, unless nothing was ever accepted.
                    if iteration > 1 {
                        return Ok(GaussianFit { model, iterations: iteration, sum_sq: current });
                    }
                    return Err(FitError::DidNotConverge(
                        "damping exhausted without progress".into(),
                    ));
                }
            }
        }

        Err(FitError::DidNotConverge(format!(
            "no convergence after {} iterations",
            self.max_iterations
        )))
    }
}

/// Fit a Gaussian to the region around `centroid` and return the mean FWHM in pixels.
///
/// The initial guess follows the usual recipe: amplitude `max - min`, centre at
/// the middle of the region, sigma 2 on both axes, offset `min`.
pub fn measure_fwhm(
    frame: &Frame,
    centroid: (f64, f64),
    half_size: usize,
) -> Result<f64, FitError> {
    let roi = Roi::around(frame, centroid.0, centroid.1, half_size);
    let values = frame.region_values(&roi);
    let (w, h) = (roi.width(), roi.height());
    if values.len() < N_PARAMS {
        return Err(FitError::InsufficientData { points: values.len(), params: N_PARAMS });
    }

    let points: Vec<(f64, f64)> = (0..h)
        .flat_map(|y| (0..w).map(move |x| (x as f64, y as f64)))
        .collect();
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let initial = GaussianModel {
        amplitude: max - min,
        x0: w as f64 / 2.0,
        y0: h as f64 / 2.0,
        sigma_x: 2.0,
        sigma_y: 2.0,
        offset: min,
    };

    let fit = LevenbergMarquardt::default().fit(&points, &values, initial)?;
    let m = fit.model;
    if !(m.amplitude > 0.0) {
        return Err(FitError::DidNotConverge(format!("non-positive amplitude {:.3}", m.amplitude)));
    }
    let fwhm = m.fwhm();
    if !fwhm.is_finite() || m.sigma_x.max(m.sigma_y) > (w.max(h) as f64) * 2.0 {
        return Err(FitError::DidNotConverge(format!("implausible width {:.3} px", fwhm)));
    }
    tracing::trace!(
        "Gaussian fit: amp={:.2} centre=({:.2}, {:.2}) sigma=({:.3}, {:.3}) iterations={}",
        m.amplitude,
        m.x0 + roi.x0 as f64,
        m.y0 + roi.y0 as f64,
        m.sigma_x,
        m.sigma_y,
        fit.iterations
    );
    Ok(fwhm)
}

/// `(peak - median) / max(std, 1)` over the region around `centroid`.
pub fn measure_snr(frame: &Frame, centroid: (f64, f64), half_size: usize) -> f64 {
    let roi = Roi::around(frame, centroid.0, centroid.1, half_size);
    let values = frame.region_values(&roi);
    let peak = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let noise = stats::std_dev(&values).max(1.0);
    (peak - stats::median(&values)) / noise
}

/// Per-cycle seeing diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeeingMetrics {
    /// Mean FWHM in pixels, `None` when the fit did not converge.
    pub fwhm: Option<f64>,
    pub snr: f64,
}

impl SeeingMetrics {
    pub fn measure(frame: &Frame, centroid: (f64, f64), half_size: usize) -> Self {
        let fwhm = match measure_fwhm(frame, centroid, half_size) {
            Ok(fwhm) => Some(fwhm),
            Err(e) => {
                tracing::debug!("FWHM unavailable: {}", e);
                None
            }
        };
        Self {
            fwhm,
            snr: measure_snr(frame, centroid, half_size),
        }
    }
}
