//! HSV segmentation of the corrected fixture view
//!
//! Pins are picked out by color. Lighting and reflectance differ across a
//! physical fixture, so the frame is split into two zones along one axis
//! and each zone is thresholded with its own HSV range and cleanup:
//! - 8-bit HSV with hue in 0..180 and saturation/value in 0..=255
//! - inclusive per-channel range test
//! - optional morphological opening with a disc kernel

use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{dilate, erode};
use serde::{Deserialize, Serialize};

/// Mask value for selected pixels
pub const MASK_ON: u8 = 255;

/// Axis along which the frame is split into two color zones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SplitAxis {
    /// Split across the width (left / right zones)
    #[default]
    Width,
    /// Split across the height (top / bottom zones)
    Height,
}

/// Which side of the split the primary zone configuration covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ZoneSide {
    /// Pixels before the split position (left or top)
    Leading,
    /// Pixels at or after the split position (right or bottom)
    #[default]
    Trailing,
}

/// Where and how the frame is divided into two color zones
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ZoneSplit {
    #[serde(default)]
    pub axis: SplitAxis,

    /// Split position as a fraction of the axis length (0.0 to 1.0)
    pub ratio: f64,

    #[serde(default)]
    pub primary_side: ZoneSide,
}

impl Default for ZoneSplit {
    fn default() -> Self {
        Self {
            axis: SplitAxis::Width,
            ratio: 0.5,
            primary_side: ZoneSide::Trailing,
        }
    }
}

impl ZoneSplit {
    /// Pixel index of the split along the configured axis
    pub fn position(&self, width: u32, height: u32) -> u32 {
        let extent = match self.axis {
            SplitAxis::Width => width,
            SplitAxis::Height => height,
        };
        ((extent as f64 * self.ratio) as u32).min(extent)
    }

    /// Whether pixel (x, y) belongs to the primary zone
    #[inline]
    fn is_primary(&self, x: u32, y: u32, split: u32) -> bool {
        let coord = match self.axis {
            SplitAxis::Width => x,
            SplitAxis::Height => y,
        };
        let trailing = coord >= split;
        match self.primary_side {
            ZoneSide::Trailing => trailing,
            ZoneSide::Leading => !trailing,
        }
    }
}

/// Inclusive HSV bounds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HsvRange {
    /// Lower bound as [h, s, v]
    pub lower: [u8; 3],
    /// Upper bound as [h, s, v]
    pub upper: [u8; 3],
}

impl HsvRange {
    pub fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    #[inline]
    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|c| self.lower[c] <= hsv[c] && hsv[c] <= self.upper[c])
    }
}

impl Default for HsvRange {
    /// A broad green band, the usual pin paint
    fn default() -> Self {
        Self {
            lower: [35, 43, 46],
            upper: [77, 255, 255],
        }
    }
}

/// Threshold and cleanup settings for one color zone
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColorZoneConfig {
    #[serde(default)]
    pub range: HsvRange,

    /// Diameter of the disc used for opening
    #[serde(default = "default_kernel_size")]
    pub open_kernel_size: u32,

    /// Opening passes; 0 disables morphology
    #[serde(default = "default_iterations")]
    pub open_iterations: u32,
}

fn default_kernel_size() -> u32 { 5 }
fn default_iterations() -> u32 { 1 }

impl Default for ColorZoneConfig {
    fn default() -> Self {
        Self {
            range: HsvRange::default(),
            open_kernel_size: default_kernel_size(),
            open_iterations: default_iterations(),
        }
    }
}

/// Convert one RGB pixel to 8-bit HSV (hue halved into 0..180)
#[inline]
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = rgb.map(|c| c as f32);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let s = if max > 0.0 { 255.0 * delta / max } else { 0.0 };

    let mut h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    let h = (h / 2.0).round() as u16 % 180;
    [h as u8, s.round().clamp(0.0, 255.0) as u8, max as u8]
}

/// Binary mask of pixels inside `zone.range`, opened `zone.open_iterations` times.
pub fn hsv_mask(frame: &RgbImage, zone: &ColorZoneConfig) -> GrayImage {
    let mut mask = GrayImage::new(frame.width(), frame.height());
    for (x, y, pixel) in frame.enumerate_pixels() {
        if zone.range.contains(rgb_to_hsv(pixel.0)) {
            mask.put_pixel(x, y, Luma([MASK_ON]));
        }
    }

    if zone.open_iterations > 0 {
        mask = open_disc(mask, zone.open_kernel_size, zone.open_iterations);
    }
    mask
}

/// Morphological opening: `iterations` erosions followed by as many dilations.
///
/// The kernel is the L2 disc of radius `kernel_size / 2`. It is slightly
/// narrower than an OpenCV ellipse of the same size: at size 5 the (±2, ±1)
/// offsets are left out.
fn open_disc(mask: GrayImage, kernel_size: u32, iterations: u32) -> GrayImage {
    let radius = (kernel_size / 2).min(u8::MAX as u32) as u8;
    if radius == 0 {
        return mask;
    }

    let mut out = mask;
    for _ in 0..iterations {
        out = erode(&out, Norm::L2, radius);
    }
    for _ in 0..iterations {
        out = dilate(&out, Norm::L2, radius);
    }
    out
}

/// Segment `frame` with `primary` on one side of `split` and `secondary` on the other.
pub fn dual_zone_mask(
    frame: &RgbImage,
    split: &ZoneSplit,
    primary: &ColorZoneConfig,
    secondary: &ColorZoneConfig,
) -> GrayImage {
    let (width, height) = frame.dimensions();
    let position = split.position(width, height);

    // Each zone is opened over the whole frame before being cut to its side.
    let primary_mask = hsv_mask(frame, primary);
    let secondary_mask = hsv_mask(frame, secondary);

    GrayImage::from_fn(width, height, |x, y| {
        if split.is_primary(x, y, position) {
            *primary_mask.get_pixel(x, y)
        } else {
            *secondary_mask.get_pixel(x, y)
        }
    })
}
