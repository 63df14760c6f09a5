use bumpalo::Bump;

/// Background statistics after iterative outlier rejection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClippedStats {
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    /// Number of samples that survived clipping.
    pub retained: usize,
}

/// Median of an already sorted slice. Empty input gives 0.
fn sorted_median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        0.0
    } else if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

/// Median of arbitrary values, sorted in a scratch arena.
pub fn median(values: &[f64]) -> f64 {
    let arena = Bump::new();
    let mut sorted = bumpalo::vec![in &arena];
    sorted.extend_from_slice(values);
    sorted.sort_by(|a: &f64, b: &f64| a.total_cmp(b));
    sorted_median(&sorted)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divides by N).
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|&v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Sigma-clipped mean, median and standard deviation.
///
/// Each iteration rejects samples further than `sigma * std` from the current
/// median; stops after `max_iterations` or when nothing more is rejected.
pub fn sigma_clipped_stats(values: &[f64], sigma: f64, max_iterations: usize) -> ClippedStats {
    let arena = Bump::new();
    let mut kept = bumpalo::vec![in &arena];
    kept.extend(values.iter().copied().filter(|v| v.is_finite()));
    kept.sort_by(|a: &f64, b: &f64| a.total_cmp(b));

    for _ in 0..max_iterations {
        if kept.is_empty() {
            break;
        }
        let center = sorted_median(&kept);
        let spread = std_dev(&kept);
        if spread <= 0.0 {
            break;
        }
        let lo = center - sigma * spread;
        let hi = center + sigma * spread;
        let before = kept.len();
        kept.retain(|v| *v >= lo && *v <= hi);
        if kept.len() == before {
            break;
        }
    }

    ClippedStats {
        mean: mean(&kept),
        median: sorted_median(&kept),
        std_dev: std_dev(&kept),
        retained: kept.len(),
    }
}
