//! Collaborator seams: the camera that supplies frames and the mount that
//! accepts guide pulses.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::HardwareError;
use crate::frame::Frame;

/// Guide pulse direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
    ];

    pub fn opposite(self) -> Self {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
        }
    }

    /// East and west move the RA axis, north and south the Dec axis.
    pub fn is_ra(self) -> bool {
        matches!(self, Direction::East | Direction::West)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::South => "south",
            Direction::East => "east",
            Direction::West => "west",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "north" | "n" => Ok(Direction::North),
            "south" | "s" => Ok(Direction::South),
            "east" | "e" => Ok(Direction::East),
            "west" | "w" => Ok(Direction::West),
            _ => Err(format!("Invalid direction '{}'. Must be one of north, south, east, west", s)),
        }
    }
}

/// Mount driver accepting timed guide pulses.
///
/// Pulses are fire-and-forget: `pulse_guide` returns once the command is
/// accepted, not when the physical move completes.
pub trait Mount: Send {
    fn pulse_guide(&mut self, direction: Direction, duration_ms: u32) -> Result<(), HardwareError>;

    fn is_connected(&self) -> bool;
}

/// Anything that can hand over the next camera frame.
pub trait FrameSource: Send {
    fn get_frame(&mut self, timeout: Duration) -> Result<Frame, HardwareError>;
}

/// Single point through which every pulse reaches the mount.
///
/// The guiding loop, calibration and manual commands all share one dispatcher,
/// so two pulses are never issued concurrently.
pub struct PulseDispatcher {
    mount: Mutex<Box<dyn Mount>>,
}

impl PulseDispatcher {
    pub fn new(mount: impl Mount + 'static) -> Self {
        Self {
            mount: Mutex::new(Box::new(mount)),
        }
    }

    pub fn dispatch(&self, direction: Direction, duration_ms: u32) -> Result<(), HardwareError> {
        // A panic in another caller cannot leave a pulse half-issued, so a poisoned
        // lock is still usable.
        let mut mount = self.mount.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !mount.is_connected() {
            tracing::warn!(
                "Dropping {} pulse of {} ms: mount not connected",
                direction,
                duration_ms
            );
            return Err(HardwareError::MountNotConnected);
        }
        tracing::debug!("Pulse {} {} ms", direction, duration_ms);
        mount.pulse_guide(direction, duration_ms)
    }

    pub fn is_connected(&self) -> bool {
        self.mount
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_connected()
    }
}
