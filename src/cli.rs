use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use guidestar::detection::{DetectionThreshold, DetectorKind};

#[derive(Parser)]
#[command(name = "guidestar")]
#[command(about = "Closed-loop telescope autoguiding and drift alignment", long_about = None)]
pub struct Cli {
    /// JSON configuration file; defaults are used when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Detect star candidates in a FITS or raster image
    Detect {
        /// Image file (FITS, PNG, JPEG, TIFF)
        file: PathBuf,

        /// Detector strategy (statistical, fallback)
        #[arg(short, long)]
        detector: Option<DetectorKind>,

        /// Threshold: "auto", "<k>sigma" or "<p>%"
        #[arg(short, long)]
        threshold: Option<DetectionThreshold>,

        /// Expected star FWHM in pixels
        #[arg(long)]
        fwhm: Option<f64>,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Refine a star position and measure its FWHM and SNR
    Measure {
        /// Image file (FITS, PNG, JPEG, TIFF)
        file: PathBuf,

        /// Approximate X position in pixels
        x: f64,

        /// Approximate Y position in pixels
        y: f64,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Compute the plate scale in arcseconds per pixel
    PlateScale {
        /// Focal length in millimetres
        focal_length: f64,

        /// Pixel size in micrometres
        pixel_size: f64,
    },

    /// Guide a simulated star through the full closed loop
    Simulate {
        /// Number of frames to guide
        #[arg(short = 'n', long, default_value = "100")]
        frames: u64,

        /// Dither every N guided frames (0 disables)
        #[arg(long)]
        dither_interval: Option<u64>,

        #[command(flatten)]
        sky: SkyOptions,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Run the four-direction calibration against the simulated rig
    Calibrate {
        /// Write the calibration record to this JSON file
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        sky: SkyOptions,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Measure unguided drift on the simulated rig and fit drift rates
    PolarAlign {
        /// Measurement duration in seconds
        #[arg(long)]
        duration: Option<f64>,

        /// Sampling interval in seconds
        #[arg(long)]
        interval: Option<f64>,

        #[command(flatten)]
        sky: SkyOptions,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },
}

/// Simulated sky knobs shared by the rig-driven commands.
#[derive(Args, Debug, Clone)]
pub struct SkyOptions {
    /// Unguided drift along X in pixels per second
    #[arg(long, allow_hyphen_values = true)]
    pub drift_x: Option<f64>,

    /// Unguided drift along Y in pixels per second
    #[arg(long, allow_hyphen_values = true)]
    pub drift_y: Option<f64>,

    /// Star motion per millisecond of guide pulse
    #[arg(long)]
    pub pulse_rate: Option<f64>,

    /// Peak-to-peak background noise
    #[arg(long)]
    pub noise: Option<f64>,

    /// Mount responds to east/west pulses the other way round
    #[arg(long)]
    pub reverse_ra: bool,

    /// Mount responds to north/south pulses the other way round
    #[arg(long)]
    pub reverse_dec: bool,

    /// Random seed for sensor noise and dithering
    #[arg(long)]
    pub seed: Option<u64>,
}
