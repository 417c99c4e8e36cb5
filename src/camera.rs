//! Camera identities configured for a station
//!
//! Acquisition itself lives outside this crate. What the inspection needs
//! is where each camera sits: its production line, location and the side
//! of the fixture it looks at, which decides whether the taught reference
//! must be mirrored.

use serde::{Deserialize, Serialize};

/// Side of the fixture a camera looks from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    #[default]
    Right,
    Left,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Right => "RIGHT",
            Side::Left => "LEFT",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role assigned to pin inspection cameras
pub const PINS_ROLE: &str = "PINS";

/// A configured camera and where it is mounted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraIdentity {
    /// Enumeration index reported by the acquisition layer
    pub device_index: u32,
    pub serial_number: String,
    #[serde(default = "default_role")]
    pub role: String,
    pub line: String,
    /// Which end of the line the camera station sits at
    pub location: String,
    pub side: Side,
    /// Free-form operator label
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub model_name: String,
}

fn default_role() -> String {
    PINS_ROLE.to_string()
}

impl CameraIdentity {
    pub fn is_pins_camera(&self) -> bool {
        self.role.eq_ignore_ascii_case(PINS_ROLE)
    }

    /// Whether the camera's serial number or label matches `key`
    pub fn answers_to(&self, key: &str) -> bool {
        self.serial_number == key || (!self.uid.is_empty() && self.uid == key)
    }
}

/// Pin inspection cameras among `cameras`, ordered by enumeration index.
///
/// The returned list is owned by the caller; nothing is cached here.
pub fn enumerate_cameras(cameras: &[CameraIdentity]) -> Vec<CameraIdentity> {
    let mut found: Vec<CameraIdentity> = cameras
        .iter()
        .filter(|c| c.is_pins_camera())
        .cloned()
        .collect();
    found.sort_by_key(|c| c.device_index);
    found
}
