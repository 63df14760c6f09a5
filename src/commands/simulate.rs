use anyhow::Result;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use guidestar::config::GuidingConfig;
use guidestar::guider::{CycleReport, Guider};
use guidestar::hardware::PulseDispatcher;
use guidestar::simulator::SimulatedRig;

use super::simulation_config;
use crate::cli::SkyOptions;

pub fn run_simulation(
    mut config: GuidingConfig,
    frames: u64,
    dither_interval: Option<u64>,
    sky: &SkyOptions,
    format: &str,
) -> Result<()> {
    let sim = simulation_config(sky, &config);
    if let Some(interval) = dither_interval {
        config.dither.interval_frames = interval;
    }
    config.dither.seed = Some(sim.seed);

    let rig = SimulatedRig::new(sim);
    let guider = Guider::new(config, Arc::new(PulseDispatcher::new(rig.mount())));
    let json = format.eq_ignore_ascii_case("json");

    if !json {
        println!(
            "{:>5} {:<11} {:>8} {:>8} {:>8} {:>8} {:>11} {:>11} {:>6} {:>6}",
            "Frame", "Event", "X", "Y", "dX\"", "dY\"", "RA", "Dec", "FWHM", "SNR"
        );
        println!("{}", "-".repeat(92));
    }

    let stop = AtomicBool::new(false);
    let mut camera = rig.camera();
    let processed = guider.run(&mut camera, &stop, Some(frames), |n, report| {
        if json {
            match serde_json::to_string(report) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("Failed to serialise cycle {}: {}", n, e),
            }
        } else {
            print_row(n, report);
        }
    })?;

    let snapshot = guider.session().snapshot();
    let (true_x, true_y) = rig.star_position();
    if json {
        println!("{}", serde_json::to_string(&snapshot)?);
    } else {
        println!();
        println!("Guided {} frames, final star position ({:.2}, {:.2})", processed, true_x, true_y);
        match (snapshot.ra_rms_arcsec, snapshot.dec_rms_arcsec) {
            (Some(ra), Some(dec)) => println!("RMS error: RA {:.2}\"  Dec {:.2}\"", ra, dec),
            _ => println!("RMS error: no guided frames"),
        }
    }
    Ok(())
}

fn event_name(report: &CycleReport) -> &'static str {
    use guidestar::selection::SelectionEvent::*;
    match report.event {
        Acquired { .. } => "acquired",
        Held { .. } => "tracking",
        Lost => "lost",
        Reacquired { .. } => "reacquired",
        NoCandidates => "no-stars",
    }
}

fn print_row(n: u64, report: &CycleReport) {
    let (x, y) = report.refined.unwrap_or((f64::NAN, f64::NAN));
    let pulse = |p: Option<guidestar::controller::Pulse>| match p {
        Some(p) => format!("{} {}ms", p.direction, p.duration_ms),
        None => "-".to_string(),
    };
    let (dx, dy, ra, dec) = match &report.correction {
        Some(c) => (c.dx_arcsec, c.dy_arcsec, pulse(c.ra), pulse(c.dec)),
        None => (f64::NAN, f64::NAN, "-".to_string(), "-".to_string()),
    };
    let fwhm = report
        .seeing
        .and_then(|s| s.fwhm)
        .map_or_else(|| "-".to_string(), |f| format!("{:.2}", f));
    let snr = report
        .seeing
        .map_or_else(|| "-".to_string(), |s| format!("{:.0}", s.snr));
    println!(
        "{:>5} {:<11} {:>8.2} {:>8.2} {:>+8.2} {:>+8.2} {:>11} {:>11} {:>6} {:>6}",
        n,
        event_name(report),
        x,
        y,
        dx,
        dy,
        ra,
        dec,
        fwhm,
        snr
    );
    if let Some((ox, oy)) = report.dithered {
        println!("      dither to ({:+.2}, {:+.2}) px", ox, oy);
    }
}
