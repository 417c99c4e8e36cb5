//! Per-cell pin / hole classification of a segmentation mask

use image::GrayImage;
use tracing::debug;

use crate::color::MASK_ON;
use crate::division::AxisDivision;
use crate::grid::{PinState, PinsGrid};

/// Inset pixel rectangle of one grid cell, inclusive of `left`/`top` and
/// exclusive of `right`/`bottom`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRegion {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl CellRegion {
    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    /// Intersection with an image of the given size
    fn clipped(&self, width: u32, height: u32) -> CellRegion {
        CellRegion {
            left: self.left.clamp(0, width as i32),
            top: self.top.clamp(0, height as i32),
            right: self.right.clamp(0, width as i32),
            bottom: self.bottom.clamp(0, height as i32),
        }
    }
}

/// Region of cell (`row`, `column`) shrunk on every side by `shift` times
/// the cell extent (truncated to whole pixels).
pub fn cell_region(
    x_div: &AxisDivision,
    y_div: &AxisDivision,
    row: usize,
    column: usize,
    shift: f64,
) -> CellRegion {
    let (x1, x2) = x_div.bounds(column);
    let (y1, y2) = y_div.bounds(row);
    let x_pad = (shift * (x2 - x1) as f64) as i32;
    let y_pad = (shift * (y2 - y1) as f64) as i32;

    CellRegion {
        left: x1 + x_pad,
        top: y1 + y_pad,
        right: x2 - x_pad,
        bottom: y2 - y_pad,
    }
}

/// Fraction of "on" pixels of `mask` inside `region`, or `None` when the
/// region does not overlap the mask.
pub fn area_fraction(mask: &GrayImage, region: &CellRegion) -> Option<f64> {
    let r = region.clipped(mask.width(), mask.height());
    if r.is_empty() {
        return None;
    }

    let mut total = 0u64;
    for y in r.top..r.bottom {
        for x in r.left..r.right {
            total += mask.get_pixel(x as u32, y as u32).0[0] as u64;
        }
    }
    let area = (r.width() as u64 * r.height() as u64) as f64;
    Some(total as f64 / (area * MASK_ON as f64))
}

/// Classify every cell of the grid spanned by `x_div` and `y_div`.
///
/// Cells start as pins and become holes when their mask fraction exceeds
/// `threshold`. Cells whose inset region is empty stay pins.
pub fn classify(
    mask: &GrayImage,
    x_div: &AxisDivision,
    y_div: &AxisDivision,
    shift: f64,
    threshold: f64,
) -> PinsGrid {
    let rows = y_div.cells();
    let columns = x_div.cells();
    let mut grid = PinsGrid::filled(rows, columns, PinState::Pin);

    for row in 0..rows {
        for column in 0..columns {
            let region = cell_region(x_div, y_div, row, column, shift);
            match area_fraction(mask, &region) {
                Some(fraction) if fraction > threshold => {
                    grid.set(row, column, PinState::Null);
                }
                Some(_) => {}
                None => debug!("Cell ({}, {}) has an empty region {:?}", row, column, region),
            }
        }
    }

    grid
}
