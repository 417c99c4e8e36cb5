//! Comparison of an observed grid against its taught reference

use serde::{Deserialize, Serialize};

use crate::error::{PinError, Result};
use crate::grid::{PinState, PinsGrid};

/// Grid position as (column, row)
pub type CellLocation = (usize, usize);

/// Cells that disagree with the reference, in row-major order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    /// Observed pin where the reference expects a hole
    #[serde(rename = "ErrorPinsLocation")]
    pub err_pins: Vec<CellLocation>,
    /// Observed hole where the reference expects a pin
    #[serde(rename = "ErrorNullLocation")]
    pub err_null: Vec<CellLocation>,
}

impl Mismatch {
    pub fn passed(&self) -> bool {
        self.err_pins.is_empty() && self.err_null.is_empty()
    }

    pub fn len(&self) -> usize {
        self.err_pins.len() + self.err_null.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passed()
    }

    /// Structured error coordinates for the detection record
    pub fn to_error_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Diff `observed` against `reference`.
///
/// Both grids must have the same shape. Reference cells marked free or
/// dowel never count as mismatches.
pub fn match_grids(observed: &PinsGrid, reference: &PinsGrid) -> Result<Mismatch> {
    if observed.dimensions() != reference.dimensions() {
        return Err(PinError::DimensionMismatch {
            observed_rows: observed.rows(),
            observed_columns: observed.columns(),
            reference_rows: reference.rows(),
            reference_columns: reference.columns(),
        });
    }

    let mut mismatch = Mismatch::default();
    for (row, column, seen) in observed.iter() {
        match (seen, reference.get(row, column)) {
            (PinState::Pin, PinState::Null) => mismatch.err_pins.push((column, row)),
            (PinState::Null, PinState::Pin) => mismatch.err_null.push((column, row)),
            _ => {}
        }
    }

    Ok(mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Side;
    use crate::grid::ReferenceGrid;

    fn checker(rows: usize, columns: usize, offset: usize) -> PinsGrid {
        let mut grid = PinsGrid::filled(rows, columns, PinState::Pin);
        for row in 0..rows {
            for column in 0..columns {
                if (row * 3 + column + offset) % 4 == 0 {
                    grid.set(row, column, PinState::Null);
                }
            }
        }
        grid
    }

    #[test]
    fn test_identical_grids_pass() {
        let grid = checker(4, 7, 1);
        let mismatch = match_grids(&grid, &grid).unwrap();
        assert!(mismatch.passed());
        assert_eq!(mismatch.len(), 0);
    }

    #[test]
    fn test_all_null_against_all_pin() {
        let reference = PinsGrid::filled(3, 3, PinState::Pin);
        let observed = PinsGrid::filled(3, 3, PinState::Null);
        let mismatch = match_grids(&observed, &reference).unwrap();

        assert!(mismatch.err_pins.is_empty());
        assert_eq!(mismatch.err_null.len(), 9);
        assert_eq!(mismatch.err_null[0], (0, 0));
        assert_eq!(mismatch.err_null[1], (1, 0));
        assert_eq!(mismatch.err_null[8], (2, 2));
        assert!(!mismatch.passed());
    }

    #[test]
    fn test_swapped_arguments_swap_lists() {
        let a = checker(5, 6, 0);
        let b = checker(5, 6, 2);
        let ab = match_grids(&a, &b).unwrap();
        let ba = match_grids(&b, &a).unwrap();
        assert!(!ab.passed());
        assert_eq!(ab.err_pins, ba.err_null);
        assert_eq!(ab.err_null, ba.err_pins);
    }

    #[test]
    fn test_dimension_mismatch_is_an_error() {
        let observed = PinsGrid::filled(3, 4, PinState::Pin);
        let reference = PinsGrid::filled(4, 3, PinState::Pin);
        let err = match_grids(&observed, &reference).unwrap_err();
        assert!(matches!(
            err,
            PinError::DimensionMismatch { observed_rows: 3, reference_rows: 4, .. }
        ));
    }

    #[test]
    fn test_free_and_dowel_never_mismatch() {
        let mut reference = PinsGrid::filled(1, 2, PinState::Free);
        reference.set(0, 1, PinState::Dowel);
        let pins = PinsGrid::filled(1, 2, PinState::Pin);
        let holes = PinsGrid::filled(1, 2, PinState::Null);
        assert!(match_grids(&pins, &reference).unwrap().passed());
        assert!(match_grids(&holes, &reference).unwrap().passed());
    }

    #[test]
    fn test_mirrored_reference_scenario() {
        let mut taught = PinsGrid::filled(3, 1, PinState::Null);
        taught.set(0, 0, PinState::Pin);
        let reference = ReferenceGrid::new("XXX", "5-100", taught);

        let mut observed = PinsGrid::filled(3, 1, PinState::Null);
        observed.set(2, 0, PinState::Pin);

        let unmirrored = reference.oriented_for(Side::Right, Side::Right);
        assert!(!match_grids(&observed, &unmirrored).unwrap().passed());

        let mirrored = reference.oriented_for(Side::Left, Side::Right);
        assert!(match_grids(&observed, &mirrored).unwrap().passed());
    }

    #[test]
    fn test_error_json_layout() {
        let mismatch = Mismatch {
            err_pins: vec![(1, 2)],
            err_null: vec![],
        };
        assert_eq!(
            mismatch.to_error_json(),
            r#"{"ErrorPinsLocation":[[1,2]],"ErrorNullLocation":[]}"#
        );
    }
}
