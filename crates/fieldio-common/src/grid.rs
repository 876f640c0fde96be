//! Global grid shape and per-process decomposition slices.

use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Specification of a regular lat/lon grid.
///
/// Values are stored row-major: `y` rows of `x` points, levels outermost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    /// Number of points in X (longitude) direction
    pub nx: usize,
    /// Number of points in Y (latitude) direction
    pub ny: usize,
    /// First grid point longitude
    pub first_x: f64,
    /// First grid point latitude
    pub first_y: f64,
    /// Grid resolution in X direction (degrees)
    pub dx: f64,
    /// Grid resolution in Y direction (degrees)
    pub dy: f64,
}

impl GridSpec {
    pub fn new(nx: usize, ny: usize, first_x: f64, first_y: f64, dx: f64, dy: f64) -> Self {
        Self {
            nx,
            ny,
            first_x,
            first_y,
            dx,
            dy,
        }
    }

    /// A grid spanning the globe with `nx` by `ny` points, matching the
    /// coordinate layout of the archived test datasets.
    pub fn global(nx: usize, ny: usize) -> Self {
        let dx = if nx > 1 { 360.0 / (nx - 1) as f64 } else { 0.0 };
        let dy = if ny > 1 { 180.0 / (ny - 1) as f64 } else { 0.0 };
        Self::new(nx, ny, -180.0, -90.0, dx, dy)
    }

    /// Longitude of column `i`.
    pub fn x_at(&self, i: usize) -> f64 {
        self.first_x + i as f64 * self.dx
    }

    /// Latitude of row `j`.
    pub fn y_at(&self, j: usize) -> f64 {
        self.first_y + j as f64 * self.dy
    }

    /// Total number of grid points per level.
    pub fn len(&self) -> usize {
        self.nx * self.ny
    }

    pub fn is_empty(&self) -> bool {
        self.nx == 0 || self.ny == 0
    }

    /// Whether two grids have the same shape and coordinates.
    pub fn same_layout(&self, other: &GridSpec) -> bool {
        const EPS: f64 = 1e-9;
        self.nx == other.nx
            && self.ny == other.ny
            && (self.first_x - other.first_x).abs() < EPS
            && (self.first_y - other.first_y).abs() < EPS
            && (self.dx - other.dx).abs() < EPS
            && (self.dy - other.dy).abs() < EPS
    }
}

/// One process's slice of the global grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decomposition {
    /// Rank of this process in the decomposition.
    pub rank: usize,
    /// Number of processes sharing the grid.
    pub size: usize,
    /// Column range owned by this process.
    pub x: Range<usize>,
    /// Row range owned by this process.
    pub y: Range<usize>,
}

impl Decomposition {
    /// The whole grid owned by a single process.
    pub fn whole(grid: &GridSpec) -> Self {
        Self {
            rank: 0,
            size: 1,
            x: 0..grid.nx,
            y: 0..grid.ny,
        }
    }

    /// Split the rows of `grid` into `size` contiguous blocks; earlier ranks
    /// take one extra row when the split is uneven.
    pub fn block_rows(grid: &GridSpec, rank: usize, size: usize) -> Option<Self> {
        if size == 0 || rank >= size {
            return None;
        }
        let base = grid.ny / size;
        let extra = grid.ny % size;
        let start = rank * base + rank.min(extra);
        let count = base + usize::from(rank < extra);

        Some(Self {
            rank,
            size,
            x: 0..grid.nx,
            y: start..start + count,
        })
    }

    pub fn nx(&self) -> usize {
        self.x.len()
    }

    pub fn ny(&self) -> usize {
        self.y.len()
    }

    /// Number of local values for a field with `levels` vertical levels
    /// (`-1` or `0` meaning a single-level field).
    pub fn local_len(&self, levels: i32) -> usize {
        level_count(levels) * self.nx() * self.ny()
    }

    /// Whether this slice lies inside `grid`.
    pub fn fits(&self, grid: &GridSpec) -> bool {
        self.x.start <= self.x.end
            && self.y.start <= self.y.end
            && self.x.end <= grid.nx
            && self.y.end <= grid.ny
            && self.rank < self.size
    }

    /// Whether this slice covers all of `grid`.
    pub fn covers(&self, grid: &GridSpec) -> bool {
        self.x == (0..grid.nx) && self.y == (0..grid.ny)
    }

    /// The slice as a grid of its own, with `grid`'s coordinates.
    pub fn local_grid(&self, grid: &GridSpec) -> GridSpec {
        GridSpec::new(
            self.nx(),
            self.ny(),
            grid.x_at(self.x.start),
            grid.y_at(self.y.start),
            grid.dx,
            grid.dy,
        )
    }

    /// Extract this slice from a full-grid field laid out `[level][y][x]`.
    pub fn extract(&self, grid: &GridSpec, levels: i32, full: &[f64]) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.local_len(levels));
        for lev in 0..level_count(levels) {
            let level_base = lev * grid.len();
            for row in self.y.clone() {
                let row_base = level_base + row * grid.nx;
                out.extend_from_slice(&full[row_base + self.x.start..row_base + self.x.end]);
            }
        }
        out
    }
}

/// Number of stored levels for a vertical-level count (`-1` = 2-D).
pub fn level_count(levels: i32) -> usize {
    if levels <= 0 {
        1
    } else {
        levels as usize
    }
}
