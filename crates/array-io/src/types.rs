//! Core types for hyperslab transfer.

use std::ops::Range;

use fieldio_common::grid::level_count;
use fieldio_common::{Decomposition, FieldDescriptor, GridSpec};

/// A rectangular region of one time record: all `levels`, rows `y`,
/// columns `x`. Values are laid out `[level][y][x]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slab {
    pub levels: usize,
    pub x: Range<usize>,
    pub y: Range<usize>,
}

impl Slab {
    /// The slice owned by `decomp`.
    pub fn local(decomp: &Decomposition, levels: usize) -> Self {
        Self {
            levels,
            x: decomp.x.clone(),
            y: decomp.y.clone(),
        }
    }

    /// The whole of `grid`.
    pub fn full(grid: &GridSpec, levels: usize) -> Self {
        Self {
            levels,
            x: 0..grid.nx,
            y: 0..grid.ny,
        }
    }

    /// Number of values in the slab.
    pub fn len(&self) -> usize {
        self.levels * self.x.len() * self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shape and coordinates of a variable as stored in a file.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableLayout {
    pub nx: usize,
    pub ny: usize,
    /// Stored level count (1 for single-level variables).
    pub levels: usize,
    /// Number of time records.
    pub records: usize,
    /// Coordinates, when the file records them.
    pub grid: Option<GridSpec>,
}

impl VariableLayout {
    /// Whether a transfer against `target` can proceed without regridding.
    pub fn matches(&self, target: &GridSpec) -> bool {
        self.nx == target.nx
            && self.ny == target.ny
            && self.grid.map_or(true, |g| g.same_layout(target))
    }

    /// The file grid, falling back to a global layout of the same shape.
    pub fn source_grid(&self) -> GridSpec {
        self.grid.unwrap_or_else(|| GridSpec::global(self.nx, self.ny))
    }

    pub fn describe(&self) -> String {
        format!("{}x{}x{}", self.levels, self.ny, self.nx)
    }
}

/// Everything needed to create a variable on first write.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableSpec {
    /// On-disk variable name.
    pub name: String,
    pub units: String,
    pub long_name: String,
    /// Vertical-level count; `-1` for single-level variables.
    pub levels: i32,
    /// Global grid the variable is stored on.
    pub grid: GridSpec,
}

impl VariableSpec {
    pub fn for_field(name: impl Into<String>, field: &FieldDescriptor, grid: GridSpec) -> Self {
        Self {
            name: name.into(),
            units: field.units.clone(),
            long_name: field.long_name.clone(),
            levels: field.levels,
            grid,
        }
    }

    pub fn level_count(&self) -> usize {
        level_count(self.levels)
    }

    pub fn is_layered(&self) -> bool {
        self.levels > 0
    }
}

pub(crate) fn describe_grid(grid: &GridSpec, levels: usize) -> String {
    format!("{}x{}x{}", levels, grid.ny, grid.nx)
}
