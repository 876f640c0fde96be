//! Array file backends.
//!
//! The adapter talks to files through these traits so the access discipline
//! (collective sessions, handle caching, retries, regridding) stays
//! independent of the storage format.

pub mod zarr;

use std::path::Path;

use chrono::{DateTime, Utc};
use fieldio_common::AccessMode;

use crate::error::Result;
use crate::types::{Slab, VariableLayout, VariableSpec};

/// Opens datasets.
pub trait DatasetBackend {
    /// Open the dataset at `path`. Read mode fails when it does not exist;
    /// write mode creates it.
    fn open(&self, path: &Path, mode: AccessMode) -> Result<Box<dyn Dataset>>;
}

/// An open array file: a time axis plus named variables laid out
/// `[time, (level), y, x]`.
pub trait Dataset {
    fn path(&self) -> &Path;

    /// Times of every record in the file.
    fn time_axis(&mut self) -> Result<Vec<DateTime<Utc>>>;

    /// Layout of a variable, or `None` if the file does not hold it.
    fn variable_layout(&mut self, variable: &str) -> Result<Option<VariableLayout>>;

    /// Read `slab` of record `time_index`.
    fn read_slab(&mut self, variable: &str, time_index: usize, slab: &Slab) -> Result<Vec<f64>>;

    /// Write `slab` of the record at `time`, appending a record (and
    /// creating the variable) when needed.
    fn write_slab(
        &mut self,
        variable: &VariableSpec,
        time: DateTime<Utc>,
        slab: &Slab,
        values: &[f64],
    ) -> Result<()>;

    /// Index of the record at `time`, if any (one-second tolerance).
    fn find_record(&mut self, time: DateTime<Utc>) -> Result<Option<usize>> {
        Ok(self
            .time_axis()?
            .iter()
            .position(|t| (*t - time).num_milliseconds().abs() < 1_000))
    }
}
