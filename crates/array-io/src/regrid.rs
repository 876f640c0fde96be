//! Horizontal regridding between regular lat/lon grids.
//!
//! Target points are located in the source grid by fractional index; points
//! outside the source extent come back as NaN.

use std::ops::Range;

use fieldio_common::{Decomposition, GridSpec};

use crate::error::{ArrayIoError, Result};
use crate::types::Slab;

/// Maps one level of a field from one grid to another.
pub trait Regridder: Send + Sync {
    fn regrid(&self, source: &GridSpec, target: &GridSpec, values: &[f64]) -> Result<Vec<f64>>;
}

/// Bilinear interpolation between the four surrounding source points.
#[derive(Debug, Clone, Copy, Default)]
pub struct BilinearRegridder;

/// Value of the nearest source point.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestRegridder;

impl Regridder for BilinearRegridder {
    fn regrid(&self, source: &GridSpec, target: &GridSpec, values: &[f64]) -> Result<Vec<f64>> {
        resample(source, target, values, bilinear_interpolate)
    }
}

impl Regridder for NearestRegridder {
    fn regrid(&self, source: &GridSpec, target: &GridSpec, values: &[f64]) -> Result<Vec<f64>> {
        resample(source, target, values, nearest_interpolate)
    }
}

/// Run `regridder` and check it produced one value per target point.
pub(crate) fn checked_regrid(
    regridder: &dyn Regridder,
    source: &GridSpec,
    target: &GridSpec,
    values: &[f64],
) -> Result<Vec<f64>> {
    let out = regridder.regrid(source, target, values)?;
    if out.len() != target.len() {
        return Err(ArrayIoError::Regrid(format!(
            "regridder returned {} values for {} target points",
            out.len(),
            target.len()
        )));
    }
    Ok(out)
}

/// Map one process's slice of `grid` onto the part of `file` it writes.
///
/// Every file point belongs to the slice holding its nearest grid row and
/// column. Points past an edge the slice shares with a neighbour take that
/// edge's coordinate; points past the edge of `grid` itself come back NaN.
/// Returns `None` when the slice owns no file points.
pub(crate) fn regrid_slice(
    regridder: &dyn Regridder,
    grid: &GridSpec,
    decomposition: &Decomposition,
    file: &GridSpec,
    levels: usize,
    values: &[f64],
) -> Result<Option<(Slab, Vec<f64>)>> {
    let local = decomposition.local_grid(grid);
    let y_axis = Axis::new(file.first_y, file.dy, file.ny, grid.first_y, grid.dy, grid.ny);
    let x_axis = Axis::new(file.first_x, file.dx, file.nx, grid.first_x, grid.dx, grid.nx);
    let (rows, row_runs) = y_axis.runs(&decomposition.y);
    let (cols, col_runs) = x_axis.runs(&decomposition.x);
    if local.is_empty() || rows.is_empty() || cols.is_empty() {
        return Ok(None);
    }

    let (ny, nx) = (rows.len(), cols.len());
    let mut out = vec![f64::NAN; levels * ny * nx];
    for (level, source) in values.chunks(local.len()).take(levels).enumerate() {
        let base = level * ny * nx;
        for row_run in &row_runs {
            for col_run in &col_runs {
                let block = GridSpec::new(
                    col_run.len,
                    row_run.len,
                    col_run.first,
                    row_run.first,
                    col_run.step,
                    row_run.step,
                );
                let block_values = checked_regrid(regridder, &local, &block, source)?;
                for (r, chunk) in block_values.chunks(col_run.len).enumerate() {
                    let dst = base + (row_run.start + r) * nx + col_run.start;
                    out[dst..dst + col_run.len].copy_from_slice(chunk);
                }
            }
        }
    }

    Ok(Some((Slab { levels, x: cols, y: rows }, out)))
}

/// One file axis against the matching grid axis.
struct Axis {
    file_first: f64,
    file_step: f64,
    file_n: usize,
    grid_first: f64,
    grid_step: f64,
    grid_n: usize,
}

/// Consecutive file points with regular coordinates: `len` points from
/// offset `start` of the owned range, at `first + k * step`.
#[derive(Debug, Clone, PartialEq)]
struct Run {
    start: usize,
    len: usize,
    first: f64,
    step: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Before,
    Inside,
    After,
}

impl Axis {
    fn new(file_first: f64, file_step: f64, file_n: usize, grid_first: f64, grid_step: f64, grid_n: usize) -> Self {
        Self {
            file_first,
            file_step,
            file_n,
            grid_first,
            grid_step,
            grid_n,
        }
    }

    /// Position of file point `i` on the grid axis, in grid index units.
    fn grid_index(&self, i: usize) -> f64 {
        if self.grid_n <= 1 || self.grid_step == 0.0 {
            return 0.0;
        }
        (self.file_first + i as f64 * self.file_step - self.grid_first) / self.grid_step
    }

    fn nearest(&self, i: usize) -> usize {
        let last = self.grid_n.saturating_sub(1) as f64;
        self.grid_index(i).round().clamp(0.0, last) as usize
    }

    /// File points owned by grid slice `slice`, and their coordinate runs.
    fn runs(&self, slice: &Range<usize>) -> (Range<usize>, Vec<Run>) {
        let owned: Vec<usize> = (0..self.file_n)
            .filter(|&i| slice.contains(&self.nearest(i)))
            .collect();
        let (Some(&first), Some(&last)) = (owned.first(), owned.last()) else {
            return (0..0, Vec::new());
        };

        let lower_edge = self.grid_first + slice.start as f64 * self.grid_step;
        let upper_edge = self.grid_first + (slice.end - 1) as f64 * self.grid_step;

        let mut runs: Vec<(Side, Run)> = Vec::new();
        for (offset, i) in (first..=last).enumerate() {
            let index = self.grid_index(i);
            let side = if slice.start > 0 && index < slice.start as f64 {
                Side::Before
            } else if slice.end < self.grid_n && index > (slice.end - 1) as f64 {
                Side::After
            } else {
                Side::Inside
            };

            match runs.last_mut() {
                Some((last_side, run)) if *last_side == side => run.len += 1,
                _ => {
                    let (coord, step) = match side {
                        Side::Before => (lower_edge, 0.0),
                        Side::After => (upper_edge, 0.0),
                        Side::Inside => (self.file_first + i as f64 * self.file_step, self.file_step),
                    };
                    runs.push((
                        side,
                        Run {
                            start: offset,
                            len: 1,
                            first: coord,
                            step,
                        },
                    ));
                }
            }
        }

        (first..last + 1, runs.into_iter().map(|(_, run)| run).collect())
    }
}

fn resample(
    source: &GridSpec,
    target: &GridSpec,
    values: &[f64],
    sample: fn(&[f64], usize, usize, f64, f64) -> f64,
) -> Result<Vec<f64>> {
    if values.len() != source.len() {
        return Err(ArrayIoError::Regrid(format!(
            "expected {} source values, got {}",
            source.len(),
            values.len()
        )));
    }
    if source.is_empty() {
        return Err(ArrayIoError::Regrid("empty source grid".to_string()));
    }

    let mut output = vec![f64::NAN; target.len()];
    for row in 0..target.ny {
        let Some(sy) = fractional_index(target.y_at(row), source.first_y, source.dy, source.ny)
        else {
            continue;
        };
        for col in 0..target.nx {
            if let Some(sx) = fractional_index(target.x_at(col), source.first_x, source.dx, source.nx)
            {
                output[row * target.nx + col] = sample(values, source.nx, source.ny, sx, sy);
            }
        }
    }
    Ok(output)
}

/// Position of `coord` along an axis in index units, or `None` when it
/// falls outside the axis.
fn fractional_index(coord: f64, first: f64, step: f64, count: usize) -> Option<f64> {
    const EPS: f64 = 1e-9;
    if step == 0.0 {
        return ((coord - first).abs() < EPS).then_some(0.0);
    }
    let idx = (coord - first) / step;
    let last = (count - 1) as f64;
    if idx < -EPS || idx > last + EPS {
        return None;
    }
    Some(idx.clamp(0.0, last))
}

fn nearest_interpolate(data: &[f64], width: usize, height: usize, x: f64, y: f64) -> f64 {
    let col = x.round() as usize;
    let row = y.round() as usize;

    if col >= width || row >= height {
        return f64::NAN;
    }

    data[row * width + col]
}

fn bilinear_interpolate(data: &[f64], width: usize, height: usize, x: f64, y: f64) -> f64 {
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;

    if x0 >= width || y0 >= height {
        return f64::NAN;
    }

    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let xf = x - x0 as f64;
    let yf = y - y0 as f64;

    let v00 = data[y0 * width + x0];
    let v10 = data[y0 * width + x1];
    let v01 = data[y1 * width + x0];
    let v11 = data[y1 * width + x1];

    if v00.is_nan() || v10.is_nan() || v01.is_nan() || v11.is_nan() {
        return f64::NAN;
    }

    let top = v00 * (1.0 - xf) + v10 * xf;
    let bottom = v01 * (1.0 - xf) + v11 * xf;
    top * (1.0 - yf) + bottom * yf
}
