use clap::Parser;
use tracing_subscriber::EnvFilter;

use guidestar::config::GuidingConfig;

mod cli;
mod commands;

use cli::{Cli, Commands};
use commands::*;

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = GuidingConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Detect {
            file,
            detector,
            threshold,
            fwhm,
            format,
        } => {
            detect_stars(&config, &file, detector, threshold, fwhm, &format)?;
        }
        Commands::Measure { file, x, y, format } => {
            measure_star(&config, &file, x, y, &format)?;
        }
        Commands::PlateScale {
            focal_length,
            pixel_size,
        } => {
            show_plate_scale(focal_length, pixel_size)?;
        }
        Commands::Simulate {
            frames,
            dither_interval,
            sky,
            format,
        } => {
            run_simulation(config, frames, dither_interval, &sky, &format)?;
        }
        Commands::Calibrate { output, sky, format } => {
            run_calibration(&config, output.as_deref(), &sky, &format)?;
        }
        Commands::PolarAlign {
            duration,
            interval,
            sky,
            format,
        } => {
            run_polar_alignment(config, duration, interval, &sky, &format)?;
        }
    }

    Ok(())
}
