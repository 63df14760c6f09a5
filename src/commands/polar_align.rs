use anyhow::Result;
use guidestar::config::GuidingConfig;
use guidestar::detection::build_detector;
use guidestar::polar_alignment::{analyze, PolarAlignment};
use guidestar::simulator::SimulatedRig;

use super::simulation_config;
use crate::cli::SkyOptions;

pub fn run_polar_alignment(
    mut config: GuidingConfig,
    duration: Option<f64>,
    interval: Option<f64>,
    sky: &SkyOptions,
    format: &str,
) -> Result<()> {
    if let Some(duration) = duration {
        config.polar.duration_secs = duration;
    }
    if let Some(interval) = interval {
        config.polar.interval_secs = interval;
    }
    config.validate()?;

    let rig = SimulatedRig::new(simulation_config(sky, &config));
    let detector = build_detector(config.detection.detector, config.detection.params.clone());
    let assistant = PolarAlignment::from_config(&config)?;
    let clock = rig.clock();
    let samples = assistant.measure_drift(&mut rig.camera(), detector.as_ref(), clock.as_ref())?;
    let rate = analyze(&samples, config.plate_scale())?;

    match format.to_lowercase().as_str() {
        "json" => {
            let out = serde_json::json!({ "samples": samples, "rate": rate });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        _ => {
            println!("{} samples over {:.0} s", rate.samples, config.polar.duration_secs);
            println!(
                "RA drift:  {:+.4} px/s ({:+.3}\"/s)",
                rate.ra_px_per_sec, rate.ra_arcsec_per_sec
            );
            println!(
                "Dec drift: {:+.4} px/s ({:+.3}\"/s)",
                rate.dec_px_per_sec, rate.dec_arcsec_per_sec
            );
        }
    }
    Ok(())
}
