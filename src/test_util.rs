//! Synthetic frames and scripted hardware for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::prelude::*;

use crate::error::HardwareError;
use crate::frame::Frame;
use crate::hardware::{Direction, FrameSource, Mount};

#[derive(Debug, Clone, Copy)]
struct SyntheticStar {
    x: f64,
    y: f64,
    amplitude: f64,
    sigma_x: f64,
    sigma_y: f64,
}

/// Builder for a background plus Gaussian stars, optionally with uniform noise.
///
/// Noise follows `(u - 0.5) * level` with `u` uniform in `[0, 1)`, seeded so
/// frames are reproducible.
#[derive(Debug, Clone)]
pub struct SyntheticFrame {
    width: usize,
    height: usize,
    background: f64,
    stars: Vec<SyntheticStar>,
    noise: Option<(f64, u64)>,
}

impl SyntheticFrame {
    pub fn new(width: usize, height: usize, background: f64) -> Self {
        Self {
            width,
            height,
            background,
            stars: Vec::new(),
            noise: None,
        }
    }

    pub fn with_star(self, x: f64, y: f64, amplitude: f64, sigma: f64) -> Self {
        self.with_elliptical_star(x, y, amplitude, sigma, sigma)
    }

    pub fn with_elliptical_star(
        mut self,
        x: f64,
        y: f64,
        amplitude: f64,
        sigma_x: f64,
        sigma_y: f64,
    ) -> Self {
        self.stars.push(SyntheticStar {
            x,
            y,
            amplitude,
            sigma_x,
            sigma_y,
        });
        self
    }

    pub fn with_noise(mut self, level: f64, seed: u64) -> Self {
        self.noise = Some((level, seed));
        self
    }

    pub fn build(&self) -> Frame {
        let mut rng = self.noise.map(|(_, seed)| StdRng::seed_from_u64(seed));
        let mut data = Vec::with_capacity(self.width * self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                let mut value = self.background;
                for s in &self.stars {
                    let dx = x as f64 - s.x;
                    let dy = y as f64 - s.y;
                    let ex = dx * dx / (2.0 * s.sigma_x * s.sigma_x);
                    let ey = dy * dy / (2.0 * s.sigma_y * s.sigma_y);
                    value += s.amplitude * (-(ex + ey)).exp();
                }
                if let (Some(rng), Some((level, _))) = (rng.as_mut(), self.noise) {
                    value += (rng.gen::<f64>() - 0.5) * level;
                }
                data.push(value);
            }
        }
        Frame::new(self.width, self.height, data).unwrap()
    }
}

/// Camera that replays a fixed script of frames and failures.
pub struct ScriptedCamera {
    script: VecDeque<Result<Frame, HardwareError>>,
    pub requests: usize,
}

impl ScriptedCamera {
    pub fn new(script: impl IntoIterator<Item = Result<Frame, HardwareError>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            requests: 0,
        }
    }

    pub fn frames(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self::new(frames.into_iter().map(Ok))
    }
}

impl FrameSource for ScriptedCamera {
    fn get_frame(&mut self, timeout: Duration) -> Result<Frame, HardwareError> {
        self.requests += 1;
        self.script
            .pop_front()
            .unwrap_or(Err(HardwareError::FrameTimeout(timeout.as_secs_f64())))
    }
}

#[derive(Default)]
struct PulseLogInner {
    pulses: Mutex<Vec<(Direction, u32)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Shared view of everything a [`RecordingMount`] received.
#[derive(Clone, Default)]
pub struct PulseLog(Arc<PulseLogInner>);

impl PulseLog {
    pub fn pulses(&self) -> Vec<(Direction, u32)> {
        self.0.pulses.lock().unwrap().clone()
    }

    /// Highest number of overlapping `pulse_guide` calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.0.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Mount double that records pulses instead of moving anything.
pub struct RecordingMount {
    connected: bool,
    log: PulseLog,
}

impl RecordingMount {
    pub fn new() -> Self {
        Self {
            connected: true,
            log: PulseLog::default(),
        }
    }

    pub fn disconnected() -> Self {
        Self {
            connected: false,
            log: PulseLog::default(),
        }
    }

    pub fn log(&self) -> PulseLog {
        self.log.clone()
    }
}

impl Mount for RecordingMount {
    fn pulse_guide(&mut self, direction: Direction, duration_ms: u32) -> Result<(), HardwareError> {
        let inner = &self.log.0;
        let now = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_micros(50));
        inner.pulses.lock().unwrap().push((direction, duration_ms));
        inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
