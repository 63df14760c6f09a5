use anyhow::Result;
use serde::Serialize;
use std::path::Path;

use guidestar::centroid::refine_centroid;
use guidestar::config::GuidingConfig;
use guidestar::frame::Frame;
use guidestar::seeing::SeeingMetrics;

#[derive(Serialize)]
struct Measurement {
    approx: (f64, f64),
    refined: (f64, f64),
    fwhm_px: Option<f64>,
    fwhm_arcsec: Option<f64>,
    snr: f64,
}

pub fn measure_star(
    config: &GuidingConfig,
    path: &Path,
    x: f64,
    y: f64,
    format: &str,
) -> Result<()> {
    let frame = Frame::load(path)?;
    let half = config.tracking.region_half_size;

    let refined = refine_centroid(&frame, (x, y), half, config.tracking.noise_floor);
    let seeing = SeeingMetrics::measure(&frame, refined, half);
    let plate_scale = config.plate_scale();
    let measurement = Measurement {
        approx: (x, y),
        refined,
        fwhm_px: seeing.fwhm,
        fwhm_arcsec: seeing.fwhm.map(|f| f * plate_scale),
        snr: seeing.snr,
    };

    match format.to_lowercase().as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&measurement)?),
        _ => {
            println!("Star near ({:.1}, {:.1}) in {}", x, y, path.display());
            println!("  Centroid: ({:.3}, {:.3})", refined.0, refined.1);
            match (measurement.fwhm_px, measurement.fwhm_arcsec) {
                (Some(px), Some(arcsec)) => println!("  FWHM:     {:.2} px ({:.2}\")", px, arcsec),
                _ => println!("  FWHM:     fit did not converge"),
            }
            println!("  SNR:      {:.1}", measurement.snr);
        }
    }
    Ok(())
}
