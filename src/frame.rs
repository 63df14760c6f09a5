use anyhow::{Context, Result};
use fitrs::{Fits, FitsData, FitsDataArray};
use std::path::Path;

/// Single-channel intensity frame, row-major.
///
/// Frames are immutable once built and owned by the cycle that captured them.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: usize,
    height: usize,
    data: Vec<f64>,
}

impl Frame {
    pub fn new(width: usize, height: usize, data: Vec<f64>) -> Result<Self> {
        anyhow::ensure!(width > 0 && height > 0, "Frame must not be empty ({}x{})", width, height);
        anyhow::ensure!(
            data.len() == width * height,
            "Pixel data length ({}) does not match width*height ({}x{}={})",
            data.len(),
            width,
            height,
            width * height
        );
        Ok(Self { width, height, data })
    }

    /// Build a frame by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> f64) -> Result<Self> {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self::new(width, height, data)
    }

    pub fn filled(width: usize, height: usize, value: f64) -> Result<Self> {
        Self::new(width, height, vec![value; width * height])
    }

    pub fn from_u8(width: usize, height: usize, data: &[u8]) -> Result<Self> {
        Self::new(width, height, data.iter().map(|&v| v as f64).collect())
    }

    pub fn from_u16(width: usize, height: usize, data: &[u16]) -> Result<Self> {
        Self::new(width, height, data.iter().map(|&v| v as f64).collect())
    }

    /// Collapse interleaved multi-channel pixels to luminance.
    ///
    /// 1 and 2 channels keep the first channel (luma, luma+alpha); 3 and 4 channels
    /// are treated as RGB(A) with Rec.601 weights.
    pub fn from_channels(
        width: usize,
        height: usize,
        channels: usize,
        data: &[f64],
    ) -> Result<Self> {
        anyhow::ensure!(
            data.len() == width * height * channels,
            "Interleaved data length ({}) does not match {}x{}x{}",
            data.len(),
            width,
            height,
            channels
        );
        let luminance = match channels {
            1 | 2 => data.chunks_exact(channels).map(|px| px[0]).collect(),
            3 | 4 => data
                .chunks_exact(channels)
                .map(|px| 0.299 * px[0] + 0.587 * px[1] + 0.114 * px[2])
                .collect(),
            n => anyhow::bail!("Unsupported channel count: {}", n),
        };
        Self::new(width, height, luminance)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.data[y * self.width + x]
    }

    pub fn max(&self) -> f64 {
        self.data.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Pixel values inside a region, row by row.
    pub fn region_values(&self, roi: &Roi) -> Vec<f64> {
        let mut values = Vec::with_capacity(roi.width() * roi.height());
        for y in roi.y0..roi.y1 {
            values.extend_from_slice(&self.data[y * self.width + roi.x0..y * self.width + roi.x1]);
        }
        values
    }

    /// Load a frame from disk, picking the decoder from the file extension.
    pub fn load(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "fits" | "fit" | "fts" => Self::from_fits(path),
            _ => Self::from_image(path),
        }
    }

    /// Load the primary HDU of a FITS file, applying BZERO/BSCALE.
    ///
    /// Three-axis cubes are treated as planar RGB and collapsed to luminance.
    pub fn from_fits(path: &Path) -> Result<Self> {
        let fits = Fits::open(path)
            .with_context(|| format!("Failed to open FITS file: {}", path.display()))?;

        let hdu = fits
            .get(0)
            .ok_or_else(|| anyhow::anyhow!("No primary HDU found in FITS file"))?;

        let int_header = |key: &str| -> Result<usize> {
            match hdu.value(key) {
                Some(fitrs::HeaderValue::IntegerNumber(n)) => Ok(*n as usize),
                Some(_) => Err(anyhow::anyhow!("{} is not an integer", key)),
                None => Err(anyhow::anyhow!("Missing {} header", key)),
            }
        };
        let float_header = |key: &str, default: f64| -> f64 {
            match hdu.value(key) {
                Some(fitrs::HeaderValue::IntegerNumber(n)) => *n as f64,
                Some(fitrs::HeaderValue::RealFloatingNumber(f)) => *f,
                _ => default,
            }
        };

        let naxis = int_header("NAXIS")?;
        if naxis < 2 {
            return Err(anyhow::anyhow!(
                "FITS file does not contain 2D image data (NAXIS={})",
                naxis
            ));
        }
        let width = int_header("NAXIS1")?;
        let height = int_header("NAXIS2")?;
        let planes = if naxis >= 3 { int_header("NAXIS3")? } else { 1 };
        let bzero = float_header("BZERO", 0.0);
        let bscale = float_header("BSCALE", 1.0);

        let raw: Vec<f64> = match hdu.read_data() {
            FitsData::Characters(_) => {
                return Err(anyhow::anyhow!("FITS file contains character data, not image data"));
            }
            FitsData::IntegersI32(FitsDataArray { data, .. }) => data
                .iter()
                .map(|&x| x.map_or(0.0, |v| v as f64))
                .collect(),
            FitsData::IntegersU32(FitsDataArray { data, .. }) => data
                .iter()
                .map(|&x| x.map_or(0.0, |v| v as f64))
                .collect(),
            FitsData::FloatingPoint32(FitsDataArray { data, .. }) => {
                data.iter().map(|&x| x as f64).collect()
            }
            FitsData::FloatingPoint64(FitsDataArray { data, .. }) => data.iter().copied().collect(),
        };

        let plane_len = width * height;
        if raw.len() < plane_len * planes {
            return Err(anyhow::anyhow!(
                "Data size mismatch: expected {} pixels, got {}",
                plane_len * planes,
                raw.len()
            ));
        }

        let physical = |v: f64| bzero + bscale * v;
        let data: Vec<f64> = if planes >= 3 {
            (0..plane_len)
                .map(|i| {
                    0.299 * physical(raw[i])
                        + 0.587 * physical(raw[plane_len + i])
                        + 0.114 * physical(raw[2 * plane_len + i])
                })
                .collect()
        } else {
            raw[..plane_len].iter().map(|&v| physical(v)).collect()
        };

        Self::new(width, height, data)
    }

    /// Load a raster image (PNG, TIFF, JPEG, ...) as luminance at its native bit depth.
    pub fn from_image(path: &Path) -> Result<Self> {
        use image::ColorType;

        let img = image::open(path)
            .with_context(|| format!("Failed to open image: {}", path.display()))?;
        let (width, height) = (img.width() as usize, img.height() as usize);

        let data: Vec<f64> = match img.color() {
            ColorType::L16 | ColorType::La16 | ColorType::Rgb16 | ColorType::Rgba16 => {
                img.to_luma16().as_raw().iter().map(|&v| v as f64).collect()
            }
            ColorType::Rgb32F | ColorType::Rgba32F => {
                img.to_luma32f().as_raw().iter().map(|&v| v as f64).collect()
            }
            _ => img.to_luma8().as_raw().iter().map(|&v| v as f64).collect(),
        };

        Self::new(width, height, data)
    }
}

/// Square region of interest clipped to frame bounds. `x1`/`y1` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize,
    pub y1: usize,
    clipped: bool,
}

impl Roi {
    /// Region of `2 * half_size + 1` pixels per side centred on the nearest pixel
    /// to `(cx, cy)`. The centre is clamped into the frame first, so the region is
    /// never empty.
    pub fn around(frame: &Frame, cx: f64, cy: f64, half_size: usize) -> Self {
        let (w, h) = (frame.width(), frame.height());
        let cx = cx.clamp(0.0, (w - 1) as f64).round() as usize;
        let cy = cy.clamp(0.0, (h - 1) as f64).round() as usize;

        let x0 = cx.saturating_sub(half_size);
        let y0 = cy.saturating_sub(half_size);
        let x1 = (cx + half_size + 1).min(w);
        let y1 = (cy + half_size + 1).min(h);
        let clipped = cx < half_size
            || cy < half_size
            || cx + half_size + 1 > w
            || cy + half_size + 1 > h;

        Self { x0, y0, x1, y1, clipped }
    }

    pub fn width(&self) -> usize {
        self.x1 - self.x0
    }

    pub fn height(&self) -> usize {
        self.y1 - self.y0
    }

    /// True when the frame edge cut the requested square short.
    pub fn is_clipped(&self) -> bool {
        self.clipped
    }

    /// Whether a sub-pixel position lies on the region's pixels. Pixel `i` spans
    /// `[i - 0.5, i + 0.5]`.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x0 as f64 - 0.5
            && x <= self.x1 as f64 - 0.5
            && y >= self.y0 as f64 - 0.5
            && y <= self.y1 as f64 - 0.5
    }
}
