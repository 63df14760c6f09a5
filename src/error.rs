use thiserror::Error;

use crate::hardware::Direction;

/// No qualifying star candidate in a frame.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
    /// Detection ran but nothing passed the candidate filters.
    #[error("no qualifying star candidate in frame")]
    Empty,

    /// A manual pick found no candidate close enough to the requested point.
    #[error("no star within {max_distance:.1} px of ({x:.1}, {y:.1})")]
    NothingNear {
        /// Requested X position.
        x: f64,
        /// Requested Y position.
        y: f64,
        /// Search radius in pixels.
        max_distance: f64,
    },
}

/// PSF fit failures. Seeing metrics degrade to "unavailable" on any of these.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    /// Fewer samples in the region than free parameters.
    #[error("not enough pixels for PSF fit: {points} points for {params} parameters")]
    InsufficientData { points: usize, params: usize },

    /// Optimizer ran out of iterations or produced a non-physical model.
    #[error("PSF fit did not converge: {0}")]
    DidNotConverge(String),
}

/// Frame source or mount problems. Fatal to the invoking operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HardwareError {
    /// Frame did not arrive within the timeout.
    #[error("timed out waiting for camera frame after {0:.1} s")]
    FrameTimeout(f64),

    /// Camera is disconnected or not initialised.
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),

    /// Mount refused the pulse because it is not connected.
    #[error("mount not connected")]
    MountNotConnected,

    /// Mount driver rejected the pulse command.
    #[error("mount rejected {direction} pulse of {duration_ms} ms: {reason}")]
    PulseRejected {
        direction: Direction,
        duration_ms: u32,
        reason: String,
    },
}

/// Per-axis calibration failure. Non-fatal: the remaining axes still run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationAxisError {
    /// No star found in the frame captured before the test pulse.
    #[error("no star detected before the {0} pulse")]
    ReferenceNotFound(Direction),

    /// No star found in the frame captured after settling.
    #[error("no star detected after the {0} pulse")]
    DisplacedNotFound(Direction),
}

/// Drift regression could not be computed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriftAnalysisError {
    /// No samples were collected.
    #[error("no drift data collected")]
    NoData,

    /// Samples exist but do not span any time (single sample or identical timestamps).
    #[error("drift samples do not span enough time for a regression ({0} samples)")]
    Degenerate(usize),
}

/// Polar-alignment procedure failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolarAlignError {
    #[error(transparent)]
    Hardware(#[from] HardwareError),

    /// The initial reference frame had no usable star.
    #[error("no reference star for drift measurement: {0}")]
    NoReference(DetectionError),
}
