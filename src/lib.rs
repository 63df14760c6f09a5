//! Closed-loop autoguiding for telescope mounts.
//!
//! Each guide frame flows through [`detection`], [`selection`], [`centroid`]
//! and [`controller`]; [`guider::Guider`] wires the cycle together. Calibration,
//! drift-method polar alignment and seeing diagnostics sit alongside.

pub mod calibration;
pub mod centroid;
pub mod clock;
pub mod config;
pub mod controller;
pub mod detection;
pub mod dither;
pub mod error;
pub mod frame;
pub mod guider;
pub mod hardware;
pub mod polar_alignment;
pub mod seeing;
pub mod selection;
pub mod session;
pub mod simulator;
pub mod stats;

#[cfg(test)]
mod test_guiding;
#[cfg(test)]
mod test_util;

pub use config::GuidingConfig;
pub use frame::Frame;
pub use guider::{CycleReport, Guider};
