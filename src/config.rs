//! Configuration management for pinscan
//!
//! A station file (TOML) holds the cameras, the process parameters taught
//! for each (camera, part) pair, the taught reference grids and where
//! detection records go. Process parameters can also arrive as the flat
//! key/value record used by the teach workflow.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::camera::{enumerate_cameras, CameraIdentity, Side};
use crate::color::{ColorZoneConfig, HsvRange, SplitAxis, ZoneSide, ZoneSplit};
use crate::division::AxisConfig;
use crate::error::PinError;
use crate::grid::ReferenceGrid;
use crate::transform::Vertex;

/// Cell inset and decision threshold
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ClassifyConfig {
    /// Fraction of the cell extent trimmed from every side (0.0 to <0.5)
    pub shift: f64,
    /// Mask fraction above which a cell is a hole
    pub mean_threshold: f64,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            shift: 0.2,
            mean_threshold: 0.01,
        }
    }
}

/// All tunables of one detection, read-only while detecting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessParameters {
    /// Fixture corners in the raw frame, any order
    pub corners: Vec<Vertex>,

    #[serde(default)]
    pub split: ZoneSplit,

    /// Zone configuration applied on `split.primary_side`
    #[serde(default)]
    pub primary_zone: ColorZoneConfig,

    /// Zone configuration applied on the other side
    #[serde(default)]
    pub secondary_zone: ColorZoneConfig,

    #[serde(default)]
    pub x_axis: AxisConfig,

    #[serde(default)]
    pub y_axis: AxisConfig,

    #[serde(default)]
    pub classify: ClassifyConfig,
}

impl Default for ProcessParameters {
    fn default() -> Self {
        Self {
            corners: vec![
                Vertex::new(0, 0),
                Vertex::new(500, 0),
                Vertex::new(500, 500),
                Vertex::new(0, 500),
            ],
            split: ZoneSplit::default(),
            primary_zone: ColorZoneConfig::default(),
            secondary_zone: ColorZoneConfig::default(),
            x_axis: AxisConfig::default(),
            y_axis: AxisConfig::default(),
            classify: ClassifyConfig::default(),
        }
    }
}

impl ProcessParameters {
    /// Reject configurations that would make classification meaningless.
    ///
    /// A malformed quad is only logged: correction falls back to the raw
    /// frame at detection time.
    pub fn validate(&self) -> std::result::Result<(), PinError> {
        if self.corners.len() != 4 {
            warn!(
                "Process parameters hold {} corners; frames will not be corrected",
                self.corners.len()
            );
        }

        if !(0.0..=1.0).contains(&self.split.ratio) {
            return Err(PinError::invalid("split.ratio", self.split.ratio));
        }

        let shift = self.classify.shift;
        if !(0.0..0.5).contains(&shift) {
            return Err(PinError::invalid("classify.shift", shift));
        }
        if !self.classify.mean_threshold.is_finite() {
            return Err(PinError::invalid("classify.mean_threshold", self.classify.mean_threshold));
        }

        for (name, axis) in [("x_axis", &self.x_axis), ("y_axis", &self.y_axis)] {
            if axis.count == 0 {
                return Err(PinError::invalid(format!("{}.count", name), axis.count));
            }
            let division = axis.division();
            for cell in 0..division.cells() {
                let (start, end) = division.bounds(cell);
                let extent = end - start;
                let pad = (shift * extent as f64) as i32;
                if extent - 2 * pad <= 0 {
                    return Err(PinError::invalid(
                        format!("{}.cell[{}]", name, cell),
                        format!("{}..{} has no pixels left after inset", start, end),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Parse and validate a flat key/value record (JSON object)
    pub fn from_flat_json(json: &str) -> Result<Self> {
        let flat: FlatParameters =
            serde_json::from_str(json).context("Failed to parse flat process parameters")?;
        let params = ProcessParameters::from(flat);
        params.validate()?;
        Ok(params)
    }
}

/// Flat process parameter record as exchanged with the teach workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatParameters {
    #[serde(rename = "P1X")]
    pub p1x: i32,
    #[serde(rename = "P1Y")]
    pub p1y: i32,
    #[serde(rename = "P2X")]
    pub p2x: i32,
    #[serde(rename = "P2Y")]
    pub p2y: i32,
    #[serde(rename = "P3X")]
    pub p3x: i32,
    #[serde(rename = "P3Y")]
    pub p3y: i32,
    #[serde(rename = "P4X")]
    pub p4x: i32,
    #[serde(rename = "P4Y")]
    pub p4y: i32,

    /// 0 splits across the width, anything else across the height
    #[serde(rename = "MaskRegionDirection")]
    pub mask_region_direction: i32,
    #[serde(rename = "MaskRegionRatio")]
    pub mask_region_ratio: f64,
    /// 0 puts the primary zone after the split, anything else before it
    #[serde(rename = "SuperGreenMaskRegion")]
    pub super_green_mask_region: i32,

    #[serde(rename = "HLower")]
    pub h_lower: u8,
    #[serde(rename = "HUpper")]
    pub h_upper: u8,
    #[serde(rename = "SLower")]
    pub s_lower: u8,
    #[serde(rename = "SUpper")]
    pub s_upper: u8,
    #[serde(rename = "VLower")]
    pub v_lower: u8,
    #[serde(rename = "VUpper")]
    pub v_upper: u8,
    #[serde(rename = "OpenKernelSize")]
    pub open_kernel_size: u32,
    #[serde(rename = "OpenIterations")]
    pub open_iterations: u32,

    #[serde(rename = "HLower_2")]
    pub h_lower_2: u8,
    #[serde(rename = "HUpper_2")]
    pub h_upper_2: u8,
    #[serde(rename = "SLower_2")]
    pub s_lower_2: u8,
    #[serde(rename = "SUpper_2")]
    pub s_upper_2: u8,
    #[serde(rename = "VLower_2")]
    pub v_lower_2: u8,
    #[serde(rename = "VUpper_2")]
    pub v_upper_2: u8,
    #[serde(rename = "OpenKernelSize_2")]
    pub open_kernel_size_2: u32,
    #[serde(rename = "OpenIterations_2")]
    pub open_iterations_2: u32,

    #[serde(rename = "XNumber")]
    pub x_number: usize,
    #[serde(rename = "XMini")]
    pub x_mini: i32,
    #[serde(rename = "XMaxi")]
    pub x_maxi: i32,
    #[serde(rename = "YNumber")]
    pub y_number: usize,
    #[serde(rename = "YMini")]
    pub y_mini: i32,
    #[serde(rename = "YMaxi")]
    pub y_maxi: i32,

    #[serde(rename = "SectionShift")]
    pub section_shift: f64,
    #[serde(rename = "SectionMeanThreshold")]
    pub section_mean_threshold: f64,
}

impl From<FlatParameters> for ProcessParameters {
    fn from(f: FlatParameters) -> Self {
        Self {
            corners: vec![
                Vertex::new(f.p1x, f.p1y),
                Vertex::new(f.p2x, f.p2y),
                Vertex::new(f.p3x, f.p3y),
                Vertex::new(f.p4x, f.p4y),
            ],
            split: ZoneSplit {
                axis: if f.mask_region_direction == 0 {
                    SplitAxis::Width
                } else {
                    SplitAxis::Height
                },
                ratio: f.mask_region_ratio,
                primary_side: if f.super_green_mask_region == 0 {
                    ZoneSide::Trailing
                } else {
                    ZoneSide::Leading
                },
            },
            primary_zone: ColorZoneConfig {
                range: HsvRange::new(
                    [f.h_lower, f.s_lower, f.v_lower],
                    [f.h_upper, f.s_upper, f.v_upper],
                ),
                open_kernel_size: f.open_kernel_size,
                open_iterations: f.open_iterations,
            },
            secondary_zone: ColorZoneConfig {
                range: HsvRange::new(
                    [f.h_lower_2, f.s_lower_2, f.v_lower_2],
                    [f.h_upper_2, f.s_upper_2, f.v_upper_2],
                ),
                open_kernel_size: f.open_kernel_size_2,
                open_iterations: f.open_iterations_2,
            },
            x_axis: AxisConfig::new(f.x_number, f.x_mini, f.x_maxi),
            y_axis: AxisConfig::new(f.y_number, f.y_mini, f.y_maxi),
            classify: ClassifyConfig {
                shift: f.section_shift,
                mean_threshold: f.section_mean_threshold,
            },
        }
    }
}

/// Process parameters taught for one part seen by one camera
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessProfile {
    /// Serial number or label of the camera
    pub camera: String,
    pub part: String,
    pub parameters: ProcessParameters,
}

/// Teach workflow settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TeachConfig {
    /// Side of the fixture reference grids are taught from
    #[serde(default)]
    pub reference_side: Side,
}

/// Where detection records and frames are written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordsConfig {
    pub directory: PathBuf,
    /// Also keep the uncorrected camera frame
    #[serde(default = "default_save_origin")]
    pub save_origin: bool,
}

fn default_save_origin() -> bool { true }

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("records"),
            save_origin: true,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub teach: TeachConfig,

    #[serde(default)]
    pub records: RecordsConfig,

    #[serde(default)]
    pub cameras: Vec<CameraIdentity>,

    #[serde(default)]
    pub profiles: Vec<ProcessProfile>,

    #[serde(default)]
    pub references: Vec<ReferenceGrid>,
}

impl Config {
    /// Load configuration from a file, or create default if it doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", path))?;
            config.validate()?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            tracing::info!("Created default configuration at {:?}", path);
            Ok(config)
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate every process profile
    pub fn validate(&self) -> Result<()> {
        for profile in &self.profiles {
            profile.parameters.validate().with_context(|| {
                format!("Invalid parameters for camera {} part {}", profile.camera, profile.part)
            })?;
        }
        Ok(())
    }

    /// Pin inspection cameras of this station
    pub fn pins_cameras(&self) -> Vec<CameraIdentity> {
        enumerate_cameras(&self.cameras)
    }

    pub fn camera(&self, key: &str) -> Option<&CameraIdentity> {
        self.cameras.iter().find(|c| c.answers_to(key))
    }

    /// Parameters taught for `part` on `camera`
    pub fn parameters_for(
        &self,
        camera: &CameraIdentity,
        part: &str,
    ) -> Option<&ProcessParameters> {
        self.profiles
            .iter()
            .find(|p| p.part == part && camera.answers_to(&p.camera))
            .map(|p| &p.parameters)
    }

    pub fn reference_for(&self, part: &str, line: &str) -> Option<&ReferenceGrid> {
        self.references.iter().find(|r| r.matches(part, line))
    }

    /// Insert or replace the reference for the same part and line
    pub fn upsert_reference(&mut self, reference: ReferenceGrid) {
        match self
            .references
            .iter_mut()
            .find(|r| r.matches(&reference.part, &reference.line))
        {
            Some(existing) => *existing = reference,
            None => self.references.push(reference),
        }
    }

    /// Number of profiles per camera, for start-up logging
    pub fn profile_counts(&self) -> HashMap<&str, usize> {
        let mut counts = HashMap::new();
        for profile in &self.profiles {
            *counts.entry(profile.camera.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{PinState, PinsGrid};

    const FLAT: &str = r#"{
        "P1X": 10, "P1Y": 12, "P2X": 600, "P2Y": 8, "P3X": 610, "P3Y": 400, "P4X": 4, "P4Y": 390,
        "MaskRegionDirection": 1, "MaskRegionRatio": 0.4, "SuperGreenMaskRegion": 0,
        "HLower": 35, "HUpper": 77, "SLower": 43, "SUpper": 255, "VLower": 46, "VUpper": 255,
        "OpenKernelSize": 5, "OpenIterations": 1,
        "HLower_2": 30, "HUpper_2": 90, "SLower_2": 20, "SUpper_2": 255,
        "VLower_2": 20, "VUpper_2": 200,
        "OpenKernelSize_2": 3, "OpenIterations_2": 0,
        "XNumber": 27, "XMini": 74, "XMaxi": 1103, "YNumber": 13, "YMini": 658, "YMaxi": 61,
        "SectionShift": 0.2, "SectionMeanThreshold": 0.01
    }"#;

    #[test]
    fn test_flat_parameters_mapping() {
        let params = ProcessParameters::from_flat_json(FLAT).unwrap();
        assert_eq!(params.corners[2], Vertex::new(610, 400));
        assert_eq!(params.split.axis, SplitAxis::Height);
        assert_eq!(params.split.primary_side, ZoneSide::Trailing);
        assert_eq!(params.primary_zone.range.lower, [35, 43, 46]);
        assert_eq!(params.secondary_zone.range.upper, [90, 255, 200]);
        assert_eq!(params.secondary_zone.open_iterations, 0);
        assert_eq!(params.x_axis, AxisConfig::new(27, 74, 1103));
        assert_eq!(params.y_axis.division().first(), Some(61));
        assert_eq!(params.classify.shift, 0.2);
    }

    #[test]
    fn test_default_parameters_are_valid() {
        assert!(ProcessParameters::default().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_degenerate_values() {
        let mut params = ProcessParameters::default();
        params.x_axis.count = 0;
        assert!(matches!(params.validate(), Err(PinError::InvalidParameter { .. })));

        let mut params = ProcessParameters::default();
        params.classify.shift = 0.5;
        assert!(params.validate().is_err());

        let mut params = ProcessParameters::default();
        params.split.ratio = 1.5;
        assert!(params.validate().is_err());

        // more cells than pixels leaves zero-width cells
        let mut params = ProcessParameters::default();
        params.y_axis = AxisConfig::new(10, 0, 5);
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_malformed_quad_is_not_a_validation_error() {
        let mut params = ProcessParameters::default();
        params.corners.truncate(3);
        assert!(params.validate().is_ok());
    }

    fn camera(serial: &str) -> CameraIdentity {
        CameraIdentity {
            device_index: 0,
            serial_number: serial.to_string(),
            role: "PINS".to_string(),
            line: "5-100".to_string(),
            location: "RIGHT".to_string(),
            side: Side::Left,
            uid: String::new(),
            model_name: String::new(),
        }
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("station.toml");

        let mut config = Config::default();
        config.cameras.push(camera("1921680030042528"));
        config.profiles.push(ProcessProfile {
            camera: "1921680030042528".to_string(),
            part: "XXX".to_string(),
            parameters: ProcessParameters::default(),
        });
        config.upsert_reference(ReferenceGrid::new(
            "XXX",
            "5-100",
            PinsGrid::filled(2, 3, PinState::Pin),
        ));
        config.save(&path).unwrap();

        let loaded = Config::load_or_create(&path).unwrap();
        let cam = loaded.camera("1921680030042528").unwrap();
        assert_eq!(cam.side, Side::Left);
        assert!(loaded.parameters_for(cam, "XXX").is_some());
        assert!(loaded.parameters_for(cam, "YYY").is_none());
        assert_eq!(
            loaded.reference_for("XXX", "5-100").unwrap().grid.dimensions(),
            (2, 3)
        );
    }

    #[test]
    fn test_load_or_create_writes_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("station.toml");
        let config = Config::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert!(config.cameras.is_empty());
        assert_eq!(config.teach.reference_side, Side::Right);
    }

    #[test]
    fn test_upsert_replaces_same_part_and_line() {
        let mut config = Config::default();
        let pins = PinsGrid::filled(1, 1, PinState::Pin);
        config.upsert_reference(ReferenceGrid::new("A", "L", pins.clone()));
        let nulls = PinsGrid::filled(2, 2, PinState::Null);
        config.upsert_reference(ReferenceGrid::new("A", "L", nulls));
        config.upsert_reference(ReferenceGrid::new("B", "L", pins));
        assert_eq!(config.references.len(), 2);
        assert_eq!(config.reference_for("A", "L").unwrap().grid.dimensions(), (2, 2));
        assert_eq!(config.profile_counts().len(), 0);
    }
}
