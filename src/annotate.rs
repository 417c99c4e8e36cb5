//! Diagnostic overlays on corrected frames
//!
//! Every function draws on a copy; the input frame is never modified.
//! Cell rectangles use the same inset as classification so the overlay
//! shows exactly the measured regions.

use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::classify::{cell_region, CellRegion};
use crate::color::{SplitAxis, ZoneSplit};
use crate::compare::CellLocation;
use crate::division::AxisDivision;
use crate::grid::{PinState, PinsGrid};

pub const VERTICAL_LINE_COLOR: Rgb<u8> = Rgb([238, 130, 238]);
pub const HORIZONTAL_LINE_COLOR: Rgb<u8> = Rgb([0, 255, 127]);
pub const CELL_OUTLINE_COLOR: Rgb<u8> = Rgb([255, 69, 0]);
pub const ERROR_PINS_COLOR: Rgb<u8> = Rgb([46, 139, 87]);
pub const ERROR_NULL_COLOR: Rgb<u8> = Rgb([65, 105, 225]);
pub const ZONE_LINE_COLOR: Rgb<u8> = Rgb([255, 215, 0]);

const LINE_THICKNESS: u32 = 2;
const ZONE_LINE_THICKNESS: u32 = 4;

/// Weights for `alpha * frame + beta * highlight`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Blend {
    pub alpha: f32,
    pub beta: f32,
}

impl Default for Blend {
    fn default() -> Self {
        Self { alpha: 1.0, beta: 0.5 }
    }
}

/// Full-height band of `thickness` pixels centered on column `x`
fn vertical_band(x: i32, height: u32, thickness: u32) -> Rect {
    Rect::at(x - (thickness / 2) as i32, 0).of_size(thickness, height.max(1))
}

/// Full-width band of `thickness` pixels centered on row `y`
fn horizontal_band(y: i32, width: u32, thickness: u32) -> Rect {
    Rect::at(0, y - (thickness / 2) as i32).of_size(width.max(1), thickness)
}

/// Inclusive rectangle covering a cell region; `None` when it has no pixels
fn region_rect(region: &CellRegion) -> Option<Rect> {
    if region.right < region.left || region.bottom < region.top {
        return None;
    }
    let width = (region.right - region.left + 1) as u32;
    let height = (region.bottom - region.top + 1) as u32;
    Some(Rect::at(region.left, region.top).of_size(width, height))
}

/// Grid lines at every cut: vertical in violet, horizontal in green
pub fn draw_division(frame: &RgbImage, x_div: &AxisDivision, y_div: &AxisDivision) -> RgbImage {
    let mut copy = frame.clone();
    let (width, height) = copy.dimensions();

    for &x in x_div.positions() {
        let band = vertical_band(x, height, LINE_THICKNESS);
        draw_filled_rect_mut(&mut copy, band, VERTICAL_LINE_COLOR);
    }
    for &y in y_div.positions() {
        let band = horizontal_band(y, width, LINE_THICKNESS);
        draw_filled_rect_mut(&mut copy, band, HORIZONTAL_LINE_COLOR);
    }
    copy
}

/// Keep only the masked pixels of `frame`, optionally marking the zone split
pub fn draw_color_extract(
    frame: &RgbImage,
    mask: &GrayImage,
    split: Option<&ZoneSplit>,
) -> RgbImage {
    let mut copy = RgbImage::from_fn(frame.width(), frame.height(), |x, y| {
        let m = mask.get_pixel(x, y).0[0];
        let p = frame.get_pixel(x, y).0;
        Rgb([p[0] & m, p[1] & m, p[2] & m])
    });

    if let Some(split) = split {
        let (width, height) = copy.dimensions();
        let position = split.position(width, height) as i32;
        let band = match split.axis {
            SplitAxis::Width => vertical_band(position, height, ZONE_LINE_THICKNESS),
            SplitAxis::Height => horizontal_band(position, width, ZONE_LINE_THICKNESS),
        };
        draw_filled_rect_mut(&mut copy, band, ZONE_LINE_COLOR);
    }
    copy
}

/// Outline every cell the classifier did not mark as a pin
pub fn draw_cell_outlines(
    frame: &RgbImage,
    grid: &PinsGrid,
    x_div: &AxisDivision,
    y_div: &AxisDivision,
    shift: f64,
) -> RgbImage {
    let mut copy = frame.clone();

    for (row, column, state) in grid.iter() {
        if state == PinState::Pin {
            continue;
        }
        let region = cell_region(x_div, y_div, row, column, shift);
        let Some(outer) = region_rect(&region) else {
            continue;
        };
        draw_hollow_rect_mut(&mut copy, outer, CELL_OUTLINE_COLOR);
        if outer.width() > 2 && outer.height() > 2 {
            let inner = Rect::at(outer.left() + 1, outer.top() + 1)
                .of_size(outer.width() - 2, outer.height() - 2);
            draw_hollow_rect_mut(&mut copy, inner, CELL_OUTLINE_COLOR);
        }
    }
    copy
}

/// Highlight `locations` with filled rectangles blended over the frame
pub fn draw_err_location(
    frame: &RgbImage,
    x_div: &AxisDivision,
    y_div: &AxisDivision,
    locations: &[CellLocation],
    color: Rgb<u8>,
    shift: f64,
    blend: Blend,
) -> RgbImage {
    let mut mark = RgbImage::new(frame.width(), frame.height());
    for &(column, row) in locations {
        let region = cell_region(x_div, y_div, row, column, shift);
        if let Some(rect) = region_rect(&region) {
            draw_filled_rect_mut(&mut mark, rect, color);
        }
    }

    RgbImage::from_fn(frame.width(), frame.height(), |x, y| {
        let base = frame.get_pixel(x, y).0;
        let over = mark.get_pixel(x, y).0;
        Rgb(std::array::from_fn(|c| {
            (blend.alpha * base[c] as f32 + blend.beta * over[c] as f32)
                .round()
                .clamp(0.0, 255.0) as u8
        }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{ZoneSide, MASK_ON};
    use crate::division::get_sorted_division;
    use image::Luma;

    fn gray_frame() -> RgbImage {
        RgbImage::from_pixel(40, 20, Rgb([100, 100, 100]))
    }

    #[test]
    fn test_division_lines_drawn_on_copy() {
        let frame = gray_frame();
        let x_div = get_sorted_division(2, 0, 40);
        let y_div = get_sorted_division(1, 0, 20);
        let drawn = draw_division(&frame, &x_div, &y_div);

        assert_eq!(frame.get_pixel(20, 10), &Rgb([100, 100, 100]));
        assert_eq!(drawn.get_pixel(20, 10), &VERTICAL_LINE_COLOR);
        assert_eq!(drawn.get_pixel(10, 0), &HORIZONTAL_LINE_COLOR);
        assert_eq!(drawn.get_pixel(10, 10), &Rgb([100, 100, 100]));
    }

    #[test]
    fn test_color_extract_masks_pixels() {
        let frame = gray_frame();
        let mask = GrayImage::from_fn(40, 20, |x, _| Luma([if x < 10 { MASK_ON } else { 0 }]));
        let out = draw_color_extract(&frame, &mask, None);
        assert_eq!(out.get_pixel(5, 5), &Rgb([100, 100, 100]));
        assert_eq!(out.get_pixel(30, 5), &Rgb([0, 0, 0]));

        let split = ZoneSplit {
            axis: SplitAxis::Width,
            ratio: 0.5,
            primary_side: ZoneSide::Trailing,
        };
        let out = draw_color_extract(&frame, &mask, Some(&split));
        assert_eq!(out.get_pixel(20, 5), &ZONE_LINE_COLOR);
    }

    #[test]
    fn test_outlines_only_for_holes() {
        let frame = gray_frame();
        let x_div = get_sorted_division(2, 0, 40);
        let y_div = get_sorted_division(1, 0, 20);
        let mut grid = PinsGrid::filled(1, 2, PinState::Pin);
        grid.set(0, 1, PinState::Null);

        let out = draw_cell_outlines(&frame, &grid, &x_div, &y_div, 0.2);
        // hole cell spans x 20..40, inset by 4 -> outline starts at x = 24, y = 4
        assert_eq!(out.get_pixel(24, 10), &CELL_OUTLINE_COLOR);
        assert_eq!(out.get_pixel(25, 10), &CELL_OUTLINE_COLOR);
        assert_eq!(out.get_pixel(30, 10), &Rgb([100, 100, 100]));
        assert_eq!(out.get_pixel(4, 10), &Rgb([100, 100, 100]));
    }

    #[test]
    fn test_error_highlight_blends() {
        let frame = gray_frame();
        let x_div = get_sorted_division(2, 0, 40);
        let y_div = get_sorted_division(1, 0, 20);

        let out = draw_err_location(
            &frame,
            &x_div,
            &y_div,
            &[(0, 0)],
            Rgb([200, 0, 40]),
            0.2,
            Blend::default(),
        );
        assert_eq!(out.get_pixel(10, 10), &Rgb([200, 100, 120]));
        assert_eq!(out.get_pixel(30, 10), &Rgb([100, 100, 100]));
        assert_eq!(frame.get_pixel(10, 10), &Rgb([100, 100, 100]));
    }
}
