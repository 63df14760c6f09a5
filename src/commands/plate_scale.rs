use anyhow::Result;

use guidestar::config::plate_scale;

pub fn show_plate_scale(focal_length_mm: f64, pixel_size_um: f64) -> Result<()> {
    anyhow::ensure!(
        focal_length_mm > 0.0 && pixel_size_um > 0.0,
        "Focal length and pixel size must be positive"
    );
    let scale = plate_scale(focal_length_mm, pixel_size_um);
    println!(
        "{:.3} arcsec/pixel ({} mm focal length, {} um pixels)",
        scale, focal_length_mm, pixel_size_um
    );
    Ok(())
}
