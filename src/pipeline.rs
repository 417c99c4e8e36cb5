//! End-to-end detection on a single frame
//!
//! `online` is the teach/preview path: it only shows what the classifier
//! sees. `offline` compares against the taught reference and produces the
//! verdict, the annotated frame and the record to persist.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::annotate::{
    draw_cell_outlines, draw_color_extract, draw_division, draw_err_location, Blend,
    ERROR_NULL_COLOR, ERROR_PINS_COLOR,
};
use crate::camera::Side;
use crate::classify::classify;
use crate::color::dual_zone_mask;
use crate::compare::{match_grids, Mismatch};
use crate::config::ProcessParameters;
use crate::division::AxisDivision;
use crate::error::{PinError, Result, SinkError};
use crate::grid::{PinsGrid, ReferenceGrid};
use crate::transform::perspective_transform;

/// Where and by whom a frame was captured
#[derive(Debug, Clone, Default)]
pub struct DetectionContext {
    pub part: String,
    pub line: String,
    pub location: String,
    /// Side of the fixture the capturing camera looks from
    pub side: Side,
    /// Side the reference grid was taught from
    pub reference_side: Side,
    pub user: Option<String>,
}

/// Persisted outcome of one offline detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DetectionRecord {
    pub part: String,
    pub line: String,
    pub location: String,
    pub result: bool,
    /// Serialized mismatch coordinates, only on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Unix time in milliseconds
    pub when: u64,
}

/// Everything `offline` produces for one frame
#[derive(Debug, Clone)]
pub struct Detection {
    pub passed: bool,
    /// Observed grid
    pub pins: PinsGrid,
    pub mismatch: Mismatch,
    pub annotated: RgbImage,
    pub record: DetectionRecord,
}

/// Receiver of detection results: persistence first, then display.
pub trait DetectionSink {
    fn record(
        &mut self,
        record: &DetectionRecord,
        origin: &RgbImage,
        annotated: &RgbImage,
    ) -> std::result::Result<(), SinkError>;

    fn show_result(
        &mut self,
        passed: bool,
        annotated: &RgbImage,
    ) -> std::result::Result<(), SinkError>;
}

/// Intermediate products shared by both paths
struct Stages {
    corrected: RgbImage,
    mask: image::GrayImage,
    x_div: AxisDivision,
    y_div: AxisDivision,
    pins: PinsGrid,
}

fn run_stages(frame: &RgbImage, params: &ProcessParameters) -> Stages {
    let corrected = perspective_transform(frame, &params.corners);
    let mask = dual_zone_mask(
        &corrected,
        &params.split,
        &params.primary_zone,
        &params.secondary_zone,
    );
    let x_div = params.x_axis.division();
    let y_div = params.y_axis.division();
    let pins = classify(
        &mask,
        &x_div,
        &y_div,
        params.classify.shift,
        params.classify.mean_threshold,
    );
    debug!(
        "Classified {}x{} grid on {}x{} corrected frame",
        pins.rows(),
        pins.columns(),
        corrected.width(),
        corrected.height()
    );

    Stages {
        corrected,
        mask,
        x_div,
        y_div,
        pins,
    }
}

/// Preview of the segmentation: extracted colors, grid lines and the
/// outlines of every cell classified as a hole.
pub fn online(frame: &RgbImage, params: &ProcessParameters) -> RgbImage {
    let s = run_stages(frame, params);
    let extract = draw_color_extract(&s.corrected, &s.mask, Some(&params.split));
    let lines = draw_division(&extract, &s.x_div, &s.y_div);
    draw_cell_outlines(&lines, &s.pins, &s.x_div, &s.y_div, params.classify.shift)
}

/// Classify `frame` and compare it against `reference` as seen from the
/// capturing camera's side.
pub fn offline(
    frame: &RgbImage,
    params: &ProcessParameters,
    reference: &ReferenceGrid,
    context: &DetectionContext,
) -> Result<Detection> {
    let s = run_stages(frame, params);
    let expected = reference.oriented_for(context.side, context.reference_side);
    let mismatch = match_grids(&s.pins, &expected)?;
    let passed = mismatch.passed();

    let annotated = if passed {
        s.corrected
    } else {
        let shift = params.classify.shift;
        let blend = Blend::default();
        let marked = draw_err_location(
            &s.corrected,
            &s.x_div,
            &s.y_div,
            &mismatch.err_pins,
            ERROR_PINS_COLOR,
            shift,
            blend,
        );
        draw_err_location(
            &marked,
            &s.x_div,
            &s.y_div,
            &mismatch.err_null,
            ERROR_NULL_COLOR,
            shift,
            blend,
        )
    };

    let record = DetectionRecord {
        part: context.part.clone(),
        line: context.line.clone(),
        location: context.location.clone(),
        result: passed,
        error: (!passed).then(|| mismatch.to_error_json()),
        user: context.user.clone(),
        when: unix_millis(),
    };

    info!(
        "Detection {} {} {}: {} ({} unexpected pins, {} missing pins)",
        context.part,
        context.line,
        context.location,
        if passed { "OK" } else { "NG" },
        mismatch.err_pins.len(),
        mismatch.err_null.len()
    );

    Ok(Detection {
        passed,
        pins: s.pins,
        mismatch,
        annotated,
        record,
    })
}

/// Run `offline` and hand the outcome to `sink`: the record first, then the
/// verdict for display.
pub fn offline_with_sink<S>(
    frame: &RgbImage,
    params: &ProcessParameters,
    reference: &ReferenceGrid,
    context: &DetectionContext,
    sink: &mut S,
) -> Result<Detection>
where
    S: DetectionSink + ?Sized,
{
    let detection = offline(frame, params, reference, context)?;
    sink.record(&detection.record, frame, &detection.annotated)
        .map_err(PinError::Sink)?;
    sink.show_result(detection.passed, &detection.annotated)
        .map_err(PinError::Sink)?;
    Ok(detection)
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{ColorZoneConfig, HsvRange};
    use crate::division::AxisConfig;
    use crate::grid::PinState;
    use crate::transform::Vertex;
    use image::Rgb;

    const GREEN: Rgb<u8> = Rgb([0, 200, 0]);
    const GREY: Rgb<u8> = Rgb([128, 128, 128]);

    /// 3x2 grid of 20 px cells; green (visible fixture) means a hole.
    fn frame_with_holes(holes: &[(u32, u32)]) -> RgbImage {
        RgbImage::from_fn(60, 40, |x, y| {
            if holes.contains(&(x / 20, y / 20)) {
                GREEN
            } else {
                GREY
            }
        })
    }

    fn params() -> ProcessParameters {
        let zone = ColorZoneConfig {
            range: HsvRange::new([35, 43, 46], [77, 255, 255]),
            open_kernel_size: 0,
            open_iterations: 0,
        };
        ProcessParameters {
            corners: vec![
                Vertex::new(0, 0),
                Vertex::new(60, 0),
                Vertex::new(60, 40),
                Vertex::new(0, 40),
            ],
            primary_zone: zone,
            secondary_zone: zone,
            x_axis: AxisConfig::new(3, 0, 60),
            y_axis: AxisConfig::new(2, 0, 40),
            ..ProcessParameters::default()
        }
    }

    fn reference_with_holes(holes: &[(usize, usize)]) -> ReferenceGrid {
        let mut grid = PinsGrid::filled(2, 3, PinState::Pin);
        for &(column, row) in holes {
            grid.set(row, column, PinState::Null);
        }
        ReferenceGrid::new("XXX", "5-100", grid)
    }

    fn context() -> DetectionContext {
        DetectionContext {
            part: "XXX".to_string(),
            line: "5-100".to_string(),
            location: "RIGHT".to_string(),
            user: Some("op1".to_string()),
            ..DetectionContext::default()
        }
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<&'static str>,
        fail_record: bool,
    }

    impl DetectionSink for Recorder {
        fn record(
            &mut self,
            _record: &DetectionRecord,
            _origin: &RgbImage,
            _annotated: &RgbImage,
        ) -> std::result::Result<(), SinkError> {
            self.calls.push("record");
            if self.fail_record {
                return Err("disk full".into());
            }
            Ok(())
        }

        fn show_result(
            &mut self,
            _passed: bool,
            _annotated: &RgbImage,
        ) -> std::result::Result<(), SinkError> {
            self.calls.push("show");
            Ok(())
        }
    }

    #[test]
    fn test_matching_frame_passes() {
        let frame = frame_with_holes(&[(1, 0)]);
        let reference = reference_with_holes(&[(1, 0)]);
        let detection = offline(&frame, &params(), &reference, &context()).unwrap();

        assert!(detection.passed);
        assert_eq!(detection.pins.get(0, 1), PinState::Null);
        assert_eq!(detection.pins.count(PinState::Null), 1);
        assert_eq!(detection.record.error, None);
        assert_eq!(detection.record.user.as_deref(), Some("op1"));
        assert_eq!(detection.annotated.dimensions(), (60, 40));
    }

    #[test]
    fn test_missing_pin_is_reported_and_highlighted() {
        let frame = frame_with_holes(&[(1, 0), (2, 1)]);
        let reference = reference_with_holes(&[(1, 0)]);
        let detection = offline(&frame, &params(), &reference, &context()).unwrap();

        assert!(!detection.passed);
        assert_eq!(detection.mismatch.err_null, vec![(2, 1)]);
        assert!(detection.mismatch.err_pins.is_empty());
        assert!(detection.record.error.as_deref().unwrap().contains("ErrorNullLocation"));
        // centre of the flagged cell is no longer the plain corrected colour
        assert_ne!(detection.annotated.get_pixel(50, 30), frame.get_pixel(50, 30));
        assert_eq!(detection.annotated.get_pixel(10, 10), frame.get_pixel(10, 10));
    }

    #[test]
    fn test_reference_is_mirrored_for_opposite_side() {
        let frame = frame_with_holes(&[(0, 1)]);
        let reference = reference_with_holes(&[(0, 0)]);
        let mut ctx = context();

        ctx.side = Side::Right;
        assert!(!offline(&frame, &params(), &reference, &ctx).unwrap().passed);

        ctx.side = Side::Left;
        assert!(offline(&frame, &params(), &reference, &ctx).unwrap().passed);
    }

    #[test]
    fn test_wrong_reference_shape_is_an_error() {
        let frame = frame_with_holes(&[]);
        let reference = ReferenceGrid::new("XXX", "5-100", PinsGrid::filled(3, 3, PinState::Pin));
        assert!(matches!(
            offline(&frame, &params(), &reference, &context()),
            Err(PinError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_sink_sees_record_then_show() {
        let frame = frame_with_holes(&[]);
        let mut sink = Recorder::default();
        let reference = reference_with_holes(&[]);
        offline_with_sink(&frame, &params(), &reference, &context(), &mut sink).unwrap();
        assert_eq!(sink.calls, ["record", "show"]);
    }

    #[test]
    fn test_sink_failure_propagates() {
        let frame = frame_with_holes(&[]);
        let mut sink = Recorder {
            fail_record: true,
            ..Recorder::default()
        };
        let reference = reference_with_holes(&[]);
        let err = offline_with_sink(&frame, &params(), &reference, &context(), &mut sink)
            .unwrap_err();
        assert!(matches!(err, PinError::Sink(_)));
        assert_eq!(sink.calls, ["record"]);
    }

    #[test]
    fn test_online_preview_keeps_corrected_size() {
        let frame = frame_with_holes(&[(0, 0)]);
        let preview = online(&frame, &params());
        assert_eq!(preview.dimensions(), (60, 40));
        // grey pixels are masked out of the extract
        assert_eq!(preview.get_pixel(50, 10), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_record_field_names() {
        let record = DetectionRecord {
            part: "XXX".to_string(),
            line: "5-100".to_string(),
            location: "LEFT".to_string(),
            result: true,
            error: None,
            user: None,
            when: 1,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"Part":"XXX","Line":"5-100","Location":"LEFT","Result":true,"When":1}"#
        );
    }
}
