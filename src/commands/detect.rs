use anyhow::Result;
use std::path::Path;

use guidestar::config::GuidingConfig;
use guidestar::detection::{build_detector, DetectionThreshold, DetectorKind, StarCandidate};
use guidestar::frame::Frame;

pub fn detect_stars(
    config: &GuidingConfig,
    path: &Path,
    detector: Option<DetectorKind>,
    threshold: Option<DetectionThreshold>,
    fwhm: Option<f64>,
    format: &str,
) -> Result<()> {
    let frame = Frame::load(path)?;

    let kind = detector.unwrap_or(config.detection.detector);
    let mut params = config.detection.params.clone();
    if let Some(threshold) = threshold {
        params.threshold = threshold;
    }
    if let Some(fwhm) = fwhm {
        params.fwhm = fwhm;
    }
    let detector = build_detector(kind, params);

    let mut candidates = detector.detect(&frame);
    candidates.sort_by(|a, b| b.mean_intensity.total_cmp(&a.mean_intensity));
    tracing::info!(
        "{}: {} candidates with {} detector",
        path.display(),
        candidates.len(),
        detector.name()
    );

    match format.to_lowercase().as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&candidates)?),
        _ => print_table(path, &frame, &candidates),
    }
    Ok(())
}

fn print_table(path: &Path, frame: &Frame, candidates: &[StarCandidate]) {
    println!("{} ({}x{})", path.display(), frame.width(), frame.height());
    if candidates.is_empty() {
        println!("No star candidates found.");
        return;
    }
    println!("{:<4} {:>9} {:>9} {:>8} {:>8} {:>6}", "#", "X", "Y", "Mean", "Peak", "Area");
    println!("{}", "-".repeat(49));
    for (i, c) in candidates.iter().enumerate() {
        println!(
            "{:<4} {:>9.2} {:>9.2} {:>8.1} {:>8.1} {:>6.0}",
            i + 1,
            c.centroid.0,
            c.centroid.1,
            c.mean_intensity,
            c.peak_intensity,
            c.area
        );
    }
}
