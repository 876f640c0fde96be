//! Synthetic field generators.
//!
//! These produce the analytic patterns used for archived test datasets so
//! that any point can be checked against a closed form. All generators
//! return values laid out `[level][y][x]` on a [`GridSpec`].

use fieldio_common::grid::level_count;
use fieldio_common::GridSpec;

fn pattern(grid: &GridSpec, levels: i32, f: impl Fn(f64, f64) -> f64) -> Vec<f64> {
    let mut data = Vec::with_capacity(level_count(levels) * grid.len());
    for _ in 0..level_count(levels) {
        for row in 0..grid.ny {
            let lat = grid.y_at(row).to_radians();
            for col in 0..grid.nx {
                let lon = grid.x_at(col).to_radians();
                data.push(f(lat, lon));
            }
        }
    }
    data
}

/// Air temperature in K: `280 + 20 sin(lat) cos(lon)`.
///
/// # Example
///
/// ```
/// use fieldio_common::GridSpec;
/// use test_utils::air_temperature;
///
/// let grid = GridSpec::global(5, 3);
/// let data = air_temperature(&grid, -1);
/// assert_eq!(data.len(), 15);
/// // equator row is exactly 280 K
/// assert!((data[5] - 280.0).abs() < 1e-9);
/// ```
pub fn air_temperature(grid: &GridSpec, levels: i32) -> Vec<f64> {
    pattern(grid, levels, |lat, lon| 280.0 + 20.0 * lat.sin() * lon.cos())
}

/// The same value at every point.
pub fn constant_field(grid: &GridSpec, levels: i32, value: f64) -> Vec<f64> {
    vec![value; level_count(levels) * grid.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_air_temperature_range() {
        let grid = GridSpec::global(20, 20);
        let tas = air_temperature(&grid, 3);
        assert_eq!(tas.len(), 1200);
        assert!(tas.iter().all(|v| (260.0 - 1e-9..=300.0 + 1e-9).contains(v)));
    }

    #[test]
    fn test_constant_field_spans_levels() {
        let grid = GridSpec::global(3, 2);
        assert_eq!(constant_field(&grid, 2, 1.5), vec![1.5; 12]);
        assert_eq!(constant_field(&grid, -1, 0.0).len(), 6);
    }
}
