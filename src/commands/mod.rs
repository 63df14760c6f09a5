pub mod calibrate;
pub mod detect;
pub mod measure;
pub mod plate_scale;
pub mod polar_align;
pub mod simulate;

pub use calibrate::run_calibration;
pub use detect::detect_stars;
pub use measure::measure_star;
pub use plate_scale::show_plate_scale;
pub use polar_align::run_polar_alignment;
pub use simulate::run_simulation;

use guidestar::config::GuidingConfig;
use guidestar::simulator::SimulationConfig;

use crate::cli::SkyOptions;

/// Simulated rig settings from the defaults and any command-line overrides.
fn simulation_config(sky: &SkyOptions, config: &GuidingConfig) -> SimulationConfig {
    let mut sim = SimulationConfig::default();
    if let Some(v) = sky.drift_x {
        sim.drift_x_px_per_sec = v;
    }
    if let Some(v) = sky.drift_y {
        sim.drift_y_px_per_sec = v;
    }
    if let Some(v) = sky.pulse_rate {
        sim.pulse_rate_px_per_ms = v;
    }
    if let Some(v) = sky.noise {
        sim.noise = v;
    }
    sim.reverse_ra = sky.reverse_ra;
    sim.reverse_dec = sky.reverse_dec;
    if let Some(seed) = sky.seed.or(config.dither.seed) {
        sim.seed = seed;
    }
    sim
}
