use crate::frame::{Frame, Roi};

/// Sub-pixel intensity-weighted centroid around `approx`.
///
/// Pixels in the `2 * half_size + 1` box (clipped to the frame) that exceed
/// `noise_floor` contribute with weight `value - noise_floor`, at their absolute
/// frame coordinates. A region with no weight returns `approx` unchanged
/// (clamped into the frame), so the result always lies inside the region.
pub fn refine_centroid(
    frame: &Frame,
    approx: (f64, f64),
    half_size: usize,
    noise_floor: f64,
) -> (f64, f64) {
    let roi = Roi::around(frame, approx.0, approx.1, half_size);

    let mut total = 0.0;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    for y in roi.y0..roi.y1 {
        for x in roi.x0..roi.x1 {
            let value = frame.get(x, y);
            if value > noise_floor {
                let w = value - noise_floor;
                total += w;
                sum_x += w * x as f64;
                sum_y += w * y as f64;
            }
        }
    }

    if total > 0.0 && total.is_finite() {
        (sum_x / total, sum_y / total)
    } else {
        (
            approx.0.clamp(0.0, (frame.width() - 1) as f64),
            approx.1.clamp(0.0, (frame.height() - 1) as f64),
        )
    }
}
