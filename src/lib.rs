//! pinscan - camera-based pin presence inspection
//!
//! A camera looks at a fixture plate carrying a regular grid of pin
//! positions. Each frame is rectified, segmented by color (the fixture
//! surface shows through where a pin is missing), divided into cells and
//! classified cell by cell. The resulting grid is compared with the grid
//! taught for the part, and the verdict, an annotated frame and a record
//! are handed to a [`pipeline::DetectionSink`].

pub mod annotate;
pub mod camera;
pub mod classify;
pub mod color;
pub mod compare;
pub mod config;
pub mod division;
pub mod error;
pub mod grid;
pub mod pipeline;
pub mod transform;
pub mod worker;

pub use camera::{CameraIdentity, Side};
pub use config::{Config, ProcessParameters};
pub use error::{PinError, Result};
pub use grid::{PinState, PinsGrid, ReferenceGrid};
pub use pipeline::{
    offline, offline_with_sink, online, Detection, DetectionContext, DetectionRecord,
    DetectionSink,
};
pub use worker::{CameraWorker, Job};
