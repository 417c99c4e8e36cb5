//! Grid cut positions along one axis of the corrected frame

use serde::{Deserialize, Serialize};

/// Monotonic cut positions defining `len() - 1` cells along one axis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisDivision(Vec<i32>);

impl AxisDivision {
    /// Number of cells between the cuts
    pub fn cells(&self) -> usize {
        self.0.len().saturating_sub(1)
    }

    /// Start and end position of cell `index`
    pub fn bounds(&self, index: usize) -> (i32, i32) {
        (self.0[index], self.0[index + 1])
    }

    pub fn positions(&self) -> &[i32] {
        &self.0
    }

    pub fn first(&self) -> Option<i32> {
        self.0.first().copied()
    }

    pub fn last(&self) -> Option<i32> {
        self.0.last().copied()
    }
}

/// Evenly spaced cuts from `min(lo, hi)` to `max(lo, hi)` producing `count` cells.
pub fn get_sorted_division(count: usize, lo: i32, hi: i32) -> AxisDivision {
    let (lo, hi) = if lo > hi { (hi, lo) } else { (lo, hi) };
    if count == 0 {
        return AxisDivision(vec![lo]);
    }

    let span = (hi - lo) as f64;
    let positions = (0..=count)
        .map(|i| lo + (span * i as f64 / count as f64).round() as i32)
        .collect();
    AxisDivision(positions)
}

/// Taught grid geometry for one axis
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AxisConfig {
    /// Number of cells along the axis
    pub count: usize,
    pub min: i32,
    pub max: i32,
}

impl AxisConfig {
    pub fn new(count: usize, min: i32, max: i32) -> Self {
        Self { count, min, max }
    }

    pub fn division(&self) -> AxisDivision {
        get_sorted_division(self.count, self.min, self.max)
    }
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            count: 10,
            min: 0,
            max: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_division() {
        let div = get_sorted_division(5, 0, 10);
        assert_eq!(div.positions(), &[0, 2, 4, 6, 8, 10]);
        assert_eq!(div.cells(), 5);
        assert_eq!(div.bounds(2), (4, 6));
    }

    #[test]
    fn test_reversed_bounds_are_swapped() {
        assert_eq!(get_sorted_division(4, 100, 20), get_sorted_division(4, 20, 100));
    }

    #[test]
    fn test_division_endpoints_and_monotonicity() {
        let cases = [(1, 0, 0), (3, 7, 8), (27, 74, 1103), (13, 658, 61), (9, -40, 17)];
        for (count, lo, hi) in cases {
            let div = get_sorted_division(count, lo, hi);
            let positions = div.positions();
            assert_eq!(positions.len(), count + 1);
            assert_eq!(div.first(), Some(lo.min(hi)));
            assert_eq!(div.last(), Some(lo.max(hi)));
            assert!(positions.windows(2).all(|w| w[0] <= w[1]), "{positions:?}");
        }
    }

    #[test]
    fn test_zero_count_has_no_cells() {
        let div = get_sorted_division(0, 5, 1);
        assert_eq!(div.positions(), &[1]);
        assert_eq!(div.cells(), 0);
    }

    #[test]
    fn test_axis_config_division() {
        let axis = AxisConfig::new(2, 10, 0);
        assert_eq!(axis.division().positions(), &[0, 5, 10]);
    }
}
