use rand::Rng;

/// Random offset applied on top of the guide reference.
#[derive(Debug, Clone, PartialEq)]
pub struct DitherManager {
    max_pixels: f64,
    offset: (f64, f64),
}

impl DitherManager {
    pub fn new(max_pixels: f64) -> Self {
        Self {
            max_pixels,
            offset: (0.0, 0.0),
        }
    }

    pub fn max_pixels(&self) -> f64 {
        self.max_pixels
    }

    pub fn offset(&self) -> (f64, f64) {
        self.offset
    }

    /// Draw a new offset, each axis uniform in `[-max, max]`.
    pub fn random_dither<R: Rng>(&mut self, rng: &mut R) -> (f64, f64) {
        let max = self.max_pixels;
        self.offset = if max > 0.0 && max.is_finite() {
            (rng.gen_range(-max..=max), rng.gen_range(-max..=max))
        } else {
            (0.0, 0.0)
        };
        tracing::info!("Dither offset ({:.2}, {:.2}) px", self.offset.0, self.offset.1);
        self.offset
    }

    /// `position + offset`; the stored reference itself is never moved.
    pub fn apply(&self, position: (f64, f64)) -> (f64, f64) {
        (position.0 + self.offset.0, position.1 + self.offset.1)
    }

    pub fn reset(&mut self) {
        self.offset = (0.0, 0.0);
    }

    /// Whether the guided-frame counter has reached a dither point.
    pub fn is_due(frame_count: u64, interval: u64) -> bool {
        interval > 0 && frame_count > 0 && frame_count % interval == 0
    }
}
