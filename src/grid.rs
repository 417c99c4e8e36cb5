//! Pin state grids and taught reference patterns
//!
//! Grids are stored row-major. A taught reference travels as a base64 blob
//! (one byte per cell) plus its row and column counts, and can be imported
//! from a text card of pin codes drawn by the process engineer.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::camera::Side;
use crate::error::{PinError, Result};

/// State of one grid position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinState {
    /// A pin is present
    Pin,
    /// A hole, no pin
    Null,
    /// Either a pin or a hole is acceptable (manual edits only)
    Free,
    /// A locating dowel (manual edits only)
    Dowel,
}

impl PinState {
    pub fn code(&self) -> char {
        match self {
            PinState::Pin => '●',
            PinState::Null => '×',
            PinState::Free => '○',
            PinState::Dowel => '◎',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        match code {
            '●' => Some(PinState::Pin),
            '×' => Some(PinState::Null),
            '○' => Some(PinState::Free),
            '◎' => Some(PinState::Dowel),
            _ => None,
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            PinState::Pin => 1,
            PinState::Null => 2,
            PinState::Free => 3,
            PinState::Dowel => 4,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(PinState::Pin),
            2 => Some(PinState::Null),
            3 => Some(PinState::Free),
            4 => Some(PinState::Dowel),
            _ => None,
        }
    }
}

/// A rows x columns grid of pin states
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinsGrid {
    rows: usize,
    columns: usize,
    cells: Vec<PinState>,
}

impl PinsGrid {
    pub fn filled(rows: usize, columns: usize, state: PinState) -> Self {
        Self {
            rows,
            columns,
            cells: vec![state; rows * columns],
        }
    }

    /// Build a grid from row-major cells
    pub fn from_rows(rows: Vec<Vec<PinState>>) -> Result<Self> {
        let columns = rows.first().map_or(0, Vec::len);
        if let Some(row) = rows.iter().position(|r| r.len() != columns) {
            return Err(PinError::InvalidReference {
                reason: format!("row {} has {} cells, expected {}", row, rows[row].len(), columns),
            });
        }
        Ok(Self {
            rows: rows.len(),
            columns,
            cells: rows.into_iter().flatten().collect(),
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.rows, self.columns)
    }

    #[inline]
    pub fn get(&self, row: usize, column: usize) -> PinState {
        self.cells[row * self.columns + column]
    }

    #[inline]
    pub fn set(&mut self, row: usize, column: usize, state: PinState) {
        self.cells[row * self.columns + column] = state;
    }

    /// Cells as (row, column, state) in row-major order
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, PinState)> + '_ {
        let columns = self.columns.max(1);
        self.cells
            .iter()
            .enumerate()
            .map(move |(i, &state)| (i / columns, i % columns, state))
    }

    pub fn count(&self, state: PinState) -> usize {
        self.cells.iter().filter(|&&s| s == state).count()
    }

    /// Flip the grid upside down (row order reversed)
    pub fn mirror_rows(&self) -> Self {
        let cells = self
            .cells
            .chunks(self.columns.max(1))
            .rev()
            .flatten()
            .copied()
            .collect();
        Self {
            rows: self.rows,
            columns: self.columns,
            cells,
        }
    }

    /// Rotate a quarter turn clockwise
    pub fn rotate_clockwise(&self) -> Self {
        let mut out = Self::filled(self.columns, self.rows, PinState::Pin);
        for (row, column, state) in self.iter() {
            out.set(column, self.rows - 1 - row, state);
        }
        out
    }

    /// Rotate a quarter turn counter-clockwise
    pub fn rotate_counter_clockwise(&self) -> Self {
        let mut out = Self::filled(self.columns, self.rows, PinState::Pin);
        for (row, column, state) in self.iter() {
            out.set(self.columns - 1 - column, row, state);
        }
        out
    }

    /// Encode the cells for transport alongside the row and column counts
    pub fn to_blob(&self) -> String {
        let bytes: Vec<u8> = self.cells.iter().map(|s| s.to_byte()).collect();
        STANDARD.encode(bytes)
    }

    /// Decode a blob produced by [`PinsGrid::to_blob`]
    pub fn from_blob(blob: &str, rows: usize, columns: usize) -> Result<Self> {
        let bytes = STANDARD.decode(blob.trim()).map_err(|e| PinError::InvalidReference {
            reason: format!("blob is not base64: {}", e),
        })?;
        if (rows == 0) != (columns == 0) {
            return Err(PinError::InvalidReference {
                reason: format!("{}x{} grid has an empty dimension", rows, columns),
            });
        }
        let expected = rows.checked_mul(columns).ok_or_else(|| PinError::InvalidReference {
            reason: format!("{}x{} grid is too large", rows, columns),
        })?;
        if bytes.len() != expected {
            return Err(PinError::InvalidReference {
                reason: format!(
                    "blob holds {} cells, expected {}x{}",
                    bytes.len(),
                    rows,
                    columns
                ),
            });
        }

        let cells = bytes
            .iter()
            .enumerate()
            .map(|(i, &b)| {
                PinState::from_byte(b).ok_or_else(|| PinError::InvalidReference {
                    reason: format!("cell {} has unknown state byte {}", i, b),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rows, columns, cells })
    }

    /// Parse a card of pin codes, one grid row per non-empty line
    pub fn from_codes(card: &str) -> Result<Self> {
        let mut rows = Vec::new();
        for (row, line) in card.lines().filter(|l| !l.trim().is_empty()).enumerate() {
            let cells = line
                .chars()
                .filter(|c| !c.is_whitespace())
                .enumerate()
                .map(|(column, code)| {
                    PinState::from_code(code).ok_or(PinError::UnknownCode { code, row, column })
                })
                .collect::<Result<Vec<_>>>()?;
            rows.push(cells);
        }
        Self::from_rows(rows)
    }

    /// Render the grid as a card of pin codes
    pub fn to_codes(&self) -> String {
        let mut out = String::with_capacity(self.rows * (self.columns * 4 + 1));
        for row in self.cells.chunks(self.columns.max(1)) {
            out.extend(row.iter().map(PinState::code));
            out.push('\n');
        }
        out
    }
}

/// A taught reference pattern for one part on one production line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoredReference", into = "StoredReference")]
pub struct ReferenceGrid {
    pub part: String,
    pub line: String,
    pub grid: PinsGrid,
}

impl ReferenceGrid {
    pub fn new(part: impl Into<String>, line: impl Into<String>, grid: PinsGrid) -> Self {
        Self {
            part: part.into(),
            line: line.into(),
            grid,
        }
    }

    /// Import a card drawn from the operator's viewpoint. The card is turned
    /// a quarter towards the taught reference side.
    pub fn from_card(
        part: impl Into<String>,
        line: impl Into<String>,
        card: &str,
        reference_side: Side,
    ) -> Result<Self> {
        let drawn = PinsGrid::from_codes(card)?;
        let grid = match reference_side {
            Side::Right => drawn.rotate_clockwise(),
            Side::Left => drawn.rotate_counter_clockwise(),
        };
        Ok(Self::new(part, line, grid))
    }

    /// The reference as seen by a camera on `side`; mirrored when that is
    /// not the side the pattern was taught from.
    pub fn oriented_for(&self, side: Side, reference_side: Side) -> PinsGrid {
        if side == reference_side {
            self.grid.clone()
        } else {
            self.grid.mirror_rows()
        }
    }

    pub fn matches(&self, part: &str, line: &str) -> bool {
        self.part == part && self.line == line
    }
}

/// Serialized form of a reference grid
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredReference {
    part: String,
    line: String,
    rows: usize,
    columns: usize,
    pins_map: String,
}

impl TryFrom<StoredReference> for ReferenceGrid {
    type Error = PinError;

    fn try_from(stored: StoredReference) -> Result<Self> {
        let grid = PinsGrid::from_blob(&stored.pins_map, stored.rows, stored.columns)?;
        Ok(Self::new(stored.part, stored.line, grid))
    }
}

impl From<ReferenceGrid> for StoredReference {
    fn from(reference: ReferenceGrid) -> Self {
        Self {
            rows: reference.grid.rows(),
            columns: reference.grid.columns(),
            pins_map: reference.grid.to_blob(),
            part: reference.part,
            line: reference.line,
        }
    }
}
