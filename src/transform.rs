//! Perspective correction of the fixture view
//!
//! The four taught corners of the fixture are ordered and the quadrilateral
//! they enclose is rectified into an axis-aligned rectangle whose size is
//! the mean of opposite edge lengths.

use image::{ImageBuffer, Pixel};
use nalgebra::{SMatrix, SVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// An integer pixel position in the raw camera frame
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Vertex {
    pub x: i32,
    pub y: i32,
}

impl Vertex {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    #[inline]
    fn to_f64(self) -> (f64, f64) {
        (self.x as f64, self.y as f64)
    }

    fn distance(self, other: Vertex) -> f64 {
        let dx = other.x as f64 - self.x as f64;
        let dy = other.y as f64 - self.y as f64;
        dx.hypot(dy)
    }
}

/// Order four corners as top-left, top-right, bottom-right, bottom-left.
///
/// Returns `None` unless exactly four points are given.
pub fn sort_vertexes(points: &[Vertex]) -> Option<[Vertex; 4]> {
    let mut by_y: [Vertex; 4] = points.try_into().ok()?;
    by_y.sort_by_key(|p| p.y);

    let (top_left, top_right) = if by_y[0].x < by_y[1].x {
        (by_y[0], by_y[1])
    } else {
        (by_y[1], by_y[0])
    };
    let (bottom_left, bottom_right) = if by_y[2].x < by_y[3].x {
        (by_y[2], by_y[3])
    } else {
        (by_y[3], by_y[2])
    };

    Some([top_left, top_right, bottom_right, bottom_left])
}

/// Size of the rectified canvas for an ordered quad: the mean of the top and
/// bottom edges by the mean of the left and right edges, rounded down.
pub fn target_size(quad: &[Vertex; 4]) -> (u32, u32) {
    let [tl, tr, br, bl] = *quad;
    let width = (tl.distance(tr) + bl.distance(br)) / 2.0;
    let height = (tl.distance(bl) + tr.distance(br)) / 2.0;
    (width as u32, height as u32)
}

/// Rectify the region enclosed by `points` into an axis-aligned frame.
///
/// Anything other than a usable four-point quad leaves the frame untouched,
/// so a corrupt taught quad never stops the line.
pub fn perspective_transform<P>(
    frame: &ImageBuffer<P, Vec<u8>>,
    points: &[Vertex],
) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let Some(quad) = sort_vertexes(points) else {
        warn!("Expected 4 quad corners, got {}; skipping correction", points.len());
        return frame.clone();
    };

    match PerspectiveTransform::from_quad(&quad, frame.width(), frame.height()) {
        Some(transform) => transform.warp(frame),
        None => {
            warn!("Degenerate quad {:?}; skipping correction", quad);
            frame.clone()
        }
    }
}

/// Largest corrected frame a quad may produce
const MAX_OUTPUT_PIXELS: u64 = 1 << 28;

/// Perspective transformation matrix (3x3 homography)
#[derive(Debug, Clone)]
pub struct PerspectiveTransform {
    /// Row-major source-to-destination matrix
    matrix: [f64; 9],
    /// Destination-to-source matrix used for resampling
    inverse: [f64; 9],
    src_width: u32,
    src_height: u32,
    dst_width: u32,
    dst_height: u32,
}

impl PerspectiveTransform {
    /// Map an ordered quad onto a rectangle of its own mean edge lengths.
    pub fn from_quad(quad: &[Vertex; 4], src_width: u32, src_height: u32) -> Option<Self> {
        let (dst_width, dst_height) = target_size(quad);
        if dst_width == 0 || dst_height == 0 {
            return None;
        }
        if dst_width as u64 * dst_height as u64 > MAX_OUTPUT_PIXELS {
            warn!("Quad {:?} would rectify to {}x{}", quad, dst_width, dst_height);
            return None;
        }

        let src = quad.map(Vertex::to_f64);
        let w = dst_width as f64;
        let h = dst_height as f64;
        let dst = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];

        debug!("Rectifying {:?} into {}x{}", quad, dst_width, dst_height);
        Self::compute(src, dst, src_width, src_height, dst_width, dst_height)
    }

    /// Compute the perspective transform from 4 source points to 4 destination points
    pub fn compute(
        src: [(f64, f64); 4],
        dst: [(f64, f64); 4],
        src_width: u32,
        src_height: u32,
        dst_width: u32,
        dst_height: u32,
    ) -> Option<Self> {
        let matrix = compute_homography(src, dst)?;
        let inverse = compute_homography(dst, src)?;

        Some(Self {
            matrix,
            inverse,
            src_width,
            src_height,
            dst_width,
            dst_height,
        })
    }

    /// Transform a point from source to destination coordinates
    #[inline]
    pub fn transform_point(&self, x: f64, y: f64) -> (f64, f64) {
        apply_homography(&self.matrix, x, y)
    }

    /// Transform a point from destination to source coordinates (inverse)
    #[inline]
    pub fn inverse_transform_point(&self, x: f64, y: f64) -> (f64, f64) {
        apply_homography(&self.inverse, x, y)
    }

    /// Resample `src` into a new buffer of the destination size.
    pub fn warp<P>(&self, src: &ImageBuffer<P, Vec<u8>>) -> ImageBuffer<P, Vec<u8>>
    where
        P: Pixel<Subpixel = u8>,
    {
        let channels = P::CHANNEL_COUNT as usize;
        let mut dst = ImageBuffer::<P, Vec<u8>>::new(self.dst_width, self.dst_height);
        let src_stride = src.width() as usize * channels;
        let dst_stride = self.dst_width as usize * channels;

        let source = Source {
            data: src.as_raw(),
            stride: src_stride,
            width: src.width().min(self.src_width) as usize,
            height: src.height().min(self.src_height) as usize,
            channels,
        };
        self.warp_image(&source, &mut dst, dst_stride);
        dst
    }

    /// Bilinear resampling of every destination pixel
    fn warp_image(&self, src: &Source<'_>, dst: &mut [u8], dst_stride: usize) {
        let dst_w = self.dst_width as usize;
        let dst_h = self.dst_height as usize;
        let channels = src.channels;

        for dst_y in 0..dst_h {
            for dst_x in 0..dst_w {
                let (src_x, src_y) = self.inverse_transform_point(dst_x as f64, dst_y as f64);
                let pixel = bilinear_sample(src, src_x, src_y);

                let dst_offset = dst_y * dst_stride + dst_x * channels;
                dst[dst_offset..dst_offset + channels].copy_from_slice(&pixel[..channels]);
            }
        }
    }
}

/// Borrowed raw view of a source frame
struct Source<'a> {
    data: &'a [u8],
    stride: usize,
    width: usize,
    height: usize,
    channels: usize,
}

/// Compute a 3x3 homography from 4 point correspondences (DLT with h33 = 1)
fn compute_homography(src: [(f64, f64); 4], dst: [(f64, f64); 4]) -> Option<[f64; 9]> {
    // Two equations per correspondence (x,y) -> (x',y'):
    //   h1 x + h2 y + h3 - x' x h7 - x' y h8 = x'
    //   h4 x + h5 y + h6 - y' x h7 - y' y h8 = y'
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for (i, (&(x, y), &(xp, yp))) in src.iter().zip(dst.iter()).enumerate() {
        let row1 = i * 2;
        let row2 = row1 + 1;

        a[(row1, 0)] = x;
        a[(row1, 1)] = y;
        a[(row1, 2)] = 1.0;
        a[(row1, 6)] = -xp * x;
        a[(row1, 7)] = -xp * y;
        b[row1] = xp;

        a[(row2, 3)] = x;
        a[(row2, 4)] = y;
        a[(row2, 5)] = 1.0;
        a[(row2, 6)] = -yp * x;
        a[(row2, 7)] = -yp * y;
        b[row2] = yp;
    }

    let h = a.lu().solve(&b)?;
    if h.iter().any(|v| !v.is_finite()) {
        return None;
    }

    Some([h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0])
}

/// Apply a homography matrix to a point
#[inline]
fn apply_homography(h: &[f64; 9], x: f64, y: f64) -> (f64, f64) {
    let w = h[6] * x + h[7] * y + h[8];
    if w.abs() < 1e-10 {
        return (x, y);
    }
    let xp = (h[0] * x + h[1] * y + h[2]) / w;
    let yp = (h[3] * x + h[4] * y + h[5]) / w;
    (xp, yp)
}

/// Bilinear interpolation sampling; points more than half a pixel outside
/// the source read as black.
#[inline]
fn bilinear_sample(src: &Source<'_>, x: f64, y: f64) -> [u8; 4] {
    let mut result = [0u8; 4];
    if src.width == 0 || src.height == 0 {
        return result;
    }

    let max_x = (src.width - 1) as f64;
    let max_y = (src.height - 1) as f64;
    if x < -0.5 || y < -0.5 || x > max_x + 0.5 || y > max_y + 0.5 {
        return result;
    }

    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(src.width - 1);
    let y1 = (y0 + 1).min(src.height - 1);

    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let channels = src.channels;
    let at = |px: usize, py: usize, c: usize| -> f64 {
        src.data
            .get(py * src.stride + px * channels + c)
            .copied()
            .unwrap_or(0) as f64
    };

    for (c, out) in result.iter_mut().enumerate().take(channels.min(4)) {
        let value = at(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
            + at(x1, y0, c) * fx * (1.0 - fy)
            + at(x0, y1, c) * (1.0 - fx) * fy
            + at(x1, y1, c) * fx * fy;

        *out = value.round().clamp(0.0, 255.0) as u8;
    }

    result
}
