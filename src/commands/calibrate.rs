use anyhow::Result;
use std::path::Path;

use guidestar::calibration::{AxisCalibration, CalibrationRoutine, CALIBRATION_ORDER};
use guidestar::config::GuidingConfig;
use guidestar::detection::build_detector;
use guidestar::hardware::PulseDispatcher;
use guidestar::simulator::SimulatedRig;

use super::simulation_config;
use crate::cli::SkyOptions;

pub fn run_calibration(
    config: &GuidingConfig,
    output: Option<&Path>,
    sky: &SkyOptions,
    format: &str,
) -> Result<()> {
    let rig = SimulatedRig::new(simulation_config(sky, config));
    let dispatcher = PulseDispatcher::new(rig.mount());
    let detector = build_detector(config.detection.detector, config.detection.params.clone());
    let routine = CalibrationRoutine::from_config(config)?;

    let clock = rig.clock();
    let result = routine.run(&mut rig.camera(), &dispatcher, detector.as_ref(), clock.as_ref())?;
    let signs_agree = result.check_signs(&config.control.axis_signs);

    if let Some(path) = output {
        result.save_json(path)?;
    }

    match format.to_lowercase().as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => {
            println!("Calibration at {} ({} ms pulses)", result.timestamp, result.pulse_ms);
            println!("{:<6} {:>9} {:>9} {:>12}", "Dir", "dX px", "dY px", "px/ms");
            println!("{}", "-".repeat(39));
            for direction in CALIBRATION_ORDER {
                match result.axis(direction) {
                    Some(AxisCalibration::Measured { dx, dy }) => println!(
                        "{:<6} {:>+9.2} {:>+9.2} {:>12.5}",
                        direction,
                        dx,
                        dy,
                        result.rate_px_per_ms(direction).unwrap_or(0.0)
                    ),
                    Some(AxisCalibration::Failed(e)) => println!("{:<6} failed: {}", direction, e),
                    None => println!("{:<6} not measured", direction),
                }
            }
            match signs_agree {
                Some(true) => println!("Mount response matches the configured axis signs."),
                Some(false) => {
                    println!("WARNING: mount response contradicts the configured axis signs.")
                }
                None => println!("No direction succeeded; axis signs unchecked."),
            }
        }
    }
    Ok(())
}
