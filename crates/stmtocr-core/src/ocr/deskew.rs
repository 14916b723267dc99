//! Skew detection and correction of scanned pages.

use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use tracing::{debug, trace};

use crate::error::PipelineError;
use crate::models::config::DeskewConfig;

/// Gray level below which a pixel counts as ink.
const INK_THRESHOLD: u8 = 128;

/// Pages with less ink than this share are not analysed.
const MIN_INK_RATIO: f32 = 0.02;

/// Smallest side, in pixels, worth analysing.
const MIN_SIDE: u32 = 50;

/// Detects and removes page rotation.
pub trait Deskewer: Send + Sync {
    /// Slope of the text lines in degrees, positive when lines descend to the
    /// right. `None` when the page is straight or cannot be analysed.
    fn detect_skew(&self, image: &DynamicImage) -> Option<f32>;

    /// Rotate so that lines with the given slope become horizontal.
    fn rotate(&self, image: &DynamicImage, angle: f32) -> DynamicImage;
}

/// Projection-profile skew detector.
///
/// Ink pixels are binned by their offset along each candidate angle; the
/// angle whose bins are sharpest (largest sum of squared counts) wins.
#[derive(Debug, Clone)]
pub struct ProjectionDeskewer {
    config: DeskewConfig,
}

impl ProjectionDeskewer {
    pub fn new(config: DeskewConfig) -> Self {
        Self { config }
    }

    fn candidates(&self) -> Vec<f32> {
        let step = self.config.angle_step.max(0.01);
        let steps = (self.config.max_angle.abs() / step).floor() as i32;
        // Ordered by distance from zero so ties keep the smaller angle.
        let mut angles = vec![0.0];
        for i in 1..=steps {
            angles.push(-(i as f32) * step);
            angles.push(i as f32 * step);
        }
        angles
    }

    fn downscale(&self, image: &DynamicImage) -> GrayImage {
        let longest = image.width().max(image.height());
        let target = self.config.detection_size.max(MIN_SIDE);
        if longest > target {
            image.resize(target, target, FilterType::Triangle).to_luma8()
        } else {
            image.to_luma8()
        }
    }
}

impl Default for ProjectionDeskewer {
    fn default() -> Self {
        Self::new(DeskewConfig::default())
    }
}

impl Deskewer for ProjectionDeskewer {
    fn detect_skew(&self, image: &DynamicImage) -> Option<f32> {
        let gray = self.downscale(image);
        let (w, h) = gray.dimensions();
        if w < MIN_SIDE || h < MIN_SIDE {
            return None;
        }

        let ink: Vec<(f32, f32)> = gray
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0[0] < INK_THRESHOLD)
            .map(|(x, y, _)| (x as f32, y as f32))
            .collect();

        if (ink.len() as f32) < MIN_INK_RATIO * (w * h) as f32 {
            trace!("Too little ink for skew detection ({} pixels)", ink.len());
            return None;
        }

        let max_tan = self.config.max_angle.abs().to_radians().tan();
        let offset = (w as f32 * max_tan).ceil() + 1.0;
        let bins = h as usize + 2 * offset as usize + 2;
        let mut histogram = vec![0u32; bins];

        let mut best = (0.0f32, f64::NEG_INFINITY);
        for angle in self.candidates() {
            let tan = angle.to_radians().tan();
            histogram.iter_mut().for_each(|b| *b = 0);

            for &(x, y) in &ink {
                let bin = (y - x * tan + offset).round();
                if bin >= 0.0 && (bin as usize) < bins {
                    histogram[bin as usize] += 1;
                }
            }

            let score: f64 = histogram.iter().map(|&c| (c as f64) * (c as f64)).sum();
            if score > best.1 {
                best = (angle, score);
            }
        }

        let angle = best.0;
        debug!("Detected skew angle {:.2} degrees", angle);
        (angle.abs() >= self.config.min_angle && angle != 0.0).then_some(angle)
    }

    fn rotate(&self, image: &DynamicImage, angle: f32) -> DynamicImage {
        let source = image.to_rgb8();
        let (w, h) = source.dimensions();
        let (sin, cos) = angle.to_radians().sin_cos();
        let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);

        let rotated = RgbImage::from_fn(w, h, |x, y| {
            let dx = x as f32 + 0.5 - cx;
            let dy = y as f32 + 0.5 - cy;
            let sx = cx + dx * cos - dy * sin - 0.5;
            let sy = cy + dx * sin + dy * cos - 0.5;
            bilinear(&source, sx, sy)
        });

        DynamicImage::ImageRgb8(rotated)
    }
}

/// Sample with bilinear interpolation; outside the image is white.
fn bilinear(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = image.dimensions();
    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);

    let texel = |px: f32, py: f32| -> [f32; 3] {
        if px < 0.0 || py < 0.0 || px >= w as f32 || py >= h as f32 {
            [255.0; 3]
        } else {
            let p = image.get_pixel(px as u32, py as u32).0;
            [p[0] as f32, p[1] as f32, p[2] as f32]
        }
    };

    let (a, b) = (texel(x0, y0), texel(x0 + 1.0, y0));
    let (c, d) = (texel(x0, y0 + 1.0), texel(x0 + 1.0, y0 + 1.0));

    let mut out = [0u8; 3];
    for i in 0..3 {
        let top = a[i] + (b[i] - a[i]) * fx;
        let bottom = c[i] + (d[i] - c[i]) * fx;
        out[i] = (top + (bottom - top) * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// A page after skew correction.
#[derive(Debug, Clone)]
pub struct PageCorrection {
    /// Angle that was corrected, 0 when the page was left as is.
    pub angle: f32,
    pub image: DynamicImage,
}

/// Runs a [`Deskewer`] on pages and saves the result for inspection.
pub struct DeskewAdapter {
    deskewer: Box<dyn Deskewer>,
    enabled: bool,
}

impl DeskewAdapter {
    pub fn new(deskewer: Box<dyn Deskewer>, enabled: bool) -> Self {
        Self { deskewer, enabled }
    }

    /// Straighten a page. Never fails: degenerate input comes back unchanged
    /// with angle 0.
    pub fn correct(&self, image: DynamicImage) -> PageCorrection {
        if !self.enabled {
            return PageCorrection { angle: 0.0, image };
        }

        match self.deskewer.detect_skew(&image) {
            Some(angle) if angle.is_finite() && angle != 0.0 => {
                debug!("Correcting skew of {:.2} degrees", angle);
                let image = self.deskewer.rotate(&image, angle);
                PageCorrection { angle, image }
            }
            _ => PageCorrection { angle: 0.0, image },
        }
    }

    /// Save the corrected page as `<dir>/corrected_<source file name>`.
    pub fn save(&self, correction: &PageCorrection, dir: &Path, source: &Path) -> Result<PathBuf, PipelineError> {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "page.png".to_string());
        let path = dir.join(format!("corrected_{name}"));

        let persistence = |reason: String| PipelineError::Persistence {
            path: path.clone(),
            reason,
        };

        fs::create_dir_all(dir).map_err(|e| persistence(e.to_string()))?;
        DynamicImage::ImageRgb8(correction.image.to_rgb8())
            .save(&path)
            .map_err(|e| persistence(e.to_string()))?;

        debug!("Saved corrected image to {}", path.display());
        Ok(path)
    }
}
