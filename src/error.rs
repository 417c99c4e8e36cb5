//! Error types for the pin inspection core

use thiserror::Error;

/// Result type alias for pinscan operations
pub type Result<T> = std::result::Result<T, PinError>;

/// Boxed error returned by detection sinks
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum PinError {
    /// Observed and reference grids do not share the same shape
    #[error(
        "grid dimension mismatch: observed {observed_rows}x{observed_columns}, \
         reference {reference_rows}x{reference_columns}"
    )]
    DimensionMismatch {
        observed_rows: usize,
        observed_columns: usize,
        reference_rows: usize,
        reference_columns: usize,
    },

    /// A process parameter is out of its valid range
    #[error("invalid parameter: {parameter} = {value}")]
    InvalidParameter { parameter: String, value: String },

    /// A serialized reference grid could not be decoded
    #[error("invalid reference grid: {reason}")]
    InvalidReference { reason: String },

    /// A card contains a symbol that is not a pin code
    #[error("unknown pin code {code:?} at row {row}, column {column}")]
    UnknownCode { code: char, row: usize, column: usize },

    /// The display or record sink failed
    #[error("detection sink failed")]
    Sink(#[source] SinkError),

    /// The camera worker is no longer accepting frames
    #[error("camera worker {camera} has stopped")]
    WorkerStopped { camera: String },
}

impl PinError {
    pub(crate) fn invalid(parameter: impl Into<String>, value: impl ToString) -> Self {
        PinError::InvalidParameter {
            parameter: parameter.into(),
            value: value.to_string(),
        }
    }
}
