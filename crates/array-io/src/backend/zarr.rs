//! Zarr V3 directory-store backend.
//!
//! A dataset is a directory holding one array per variable plus a 1-D
//! `time` array whose `units` attribute follows the CF convention
//! (`"seconds since 1970-01-01 00:00:00"`). Variables are stored
//! `[time, (level), y, x]` as float64 with NaN fill, one chunk per time
//! record and full horizontal extent per chunk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fieldio_common::{AccessMode, GridSpec, TimeUnits};
use serde_json::{json, Map, Value};
use tracing::debug;
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

use crate::backend::{Dataset, DatasetBackend};
use crate::config::ArrayIoConfig;
use crate::error::{ArrayIoError, Result};
use crate::types::{Slab, VariableLayout, VariableSpec};

/// Name of the time coordinate array.
pub const TIME_VARIABLE: &str = "time";

/// Opens Zarr V3 datasets on the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct ZarrBackend {
    config: ArrayIoConfig,
}

impl ZarrBackend {
    pub fn new(config: ArrayIoConfig) -> Self {
        Self { config }
    }
}

impl DatasetBackend for ZarrBackend {
    fn open(&self, path: &Path, mode: AccessMode) -> Result<Box<dyn Dataset>> {
        match mode {
            AccessMode::Read => {
                if !path.is_dir() {
                    return Err(ArrayIoError::open(path, "no such dataset"));
                }
            }
            AccessMode::Write => {
                std::fs::create_dir_all(path).map_err(|e| ArrayIoError::open(path, e.to_string()))?;
            }
        }

        let store =
            FilesystemStore::new(path).map_err(|e| ArrayIoError::open(path, e.to_string()))?;
        debug!(path = %path.display(), %mode, "Opened zarr dataset");

        Ok(Box::new(ZarrDataset {
            path: path.to_path_buf(),
            store: Arc::new(store),
            time_chunk: self.config.time_chunk.max(1) as u64,
            times: None,
        }))
    }
}

/// An open Zarr dataset.
pub struct ZarrDataset {
    path: PathBuf,
    store: Arc<FilesystemStore>,
    time_chunk: u64,
    /// Cached time axis; dropped before every write.
    times: Option<(TimeUnits, Vec<DateTime<Utc>>)>,
}

impl ZarrDataset {
    fn exists(&self, variable: &str) -> bool {
        self.path.join(variable).join("zarr.json").is_file()
    }

    fn open_array(&self, variable: &str) -> Result<Array<FilesystemStore>> {
        Array::open(self.store.clone(), &node_path(variable))
            .map_err(|e| ArrayIoError::read(&self.path, variable, e.to_string()))
    }

    /// Build (but do not store) array metadata with the fieldio conventions.
    fn build_array(
        &self,
        variable: &str,
        shape: Vec<u64>,
        chunk_shape: Vec<u64>,
        attrs: Map<String, Value>,
    ) -> Result<Array<FilesystemStore>> {
        let chunk_grid: zarrs::array::ChunkGrid = chunk_shape
            .try_into()
            .map_err(|e| ArrayIoError::Config(format!("{:?}", e)))?;

        let mut binding = ArrayBuilder::new(
            shape,
            DataType::Float64,
            chunk_grid,
            FillValue::from(f64::NAN),
        );
        binding
            .attributes(attrs)
            .build(self.store.clone(), &node_path(variable))
            .map_err(|e| ArrayIoError::write(&self.path, variable, e.to_string()))
    }

    fn read_time_axis(&self) -> Result<(TimeUnits, Vec<DateTime<Utc>>)> {
        if !self.exists(TIME_VARIABLE) {
            return Ok((TimeUnits::unix_seconds(), Vec::new()));
        }

        let array = self.open_array(TIME_VARIABLE)?;
        let units = match array.attributes().get("units").and_then(|v| v.as_str()) {
            Some(raw) => TimeUnits::parse(raw).map_err(|e| {
                ArrayIoError::invalid_layout(&self.path, TIME_VARIABLE, e.to_string())
            })?,
            None => TimeUnits::unix_seconds(),
        };

        let len = array.shape().first().copied().unwrap_or(0);
        if len == 0 {
            return Ok((units, Vec::new()));
        }

        let subset = ArraySubset::new_with_start_shape(vec![0], vec![len])
            .map_err(|e| ArrayIoError::read(&self.path, TIME_VARIABLE, e.to_string()))?;
        let offsets: Vec<f64> = array
            .retrieve_array_subset_elements(&subset)
            .map_err(|e| ArrayIoError::read(&self.path, TIME_VARIABLE, e.to_string()))?;

        let times = offsets.into_iter().map(|o| units.from_offset(o)).collect();
        Ok((units, times))
    }

    fn cached_time_axis(&mut self) -> Result<&(TimeUnits, Vec<DateTime<Utc>>)> {
        let axis = match self.times.take() {
            Some(axis) => axis,
            None => self.read_time_axis()?,
        };
        Ok(self.times.insert(axis))
    }

    /// Index of the record at `time`, appending one to the time axis if the
    /// file has none yet.
    fn ensure_record(&mut self, time: DateTime<Utc>) -> Result<usize> {
        self.times = None;
        if let Some(index) = self.find_record(time)? {
            return Ok(index);
        }

        let (units, mut times) = self.read_time_axis()?;
        let index = times.len();

        let mut attrs = Map::new();
        attrs.insert("units".to_string(), json!(units.to_string()));
        attrs.insert("long_name".to_string(), json!("time"));
        attrs.insert("_ARRAY_DIMENSIONS".to_string(), json!([TIME_VARIABLE]));

        let array = self.build_array(
            TIME_VARIABLE,
            vec![index as u64 + 1],
            vec![self.time_chunk],
            attrs,
        )?;
        array
            .store_metadata()
            .map_err(|e| ArrayIoError::write(&self.path, TIME_VARIABLE, e.to_string()))?;

        let subset = ArraySubset::new_with_start_shape(vec![index as u64], vec![1])
            .map_err(|e| ArrayIoError::write(&self.path, TIME_VARIABLE, e.to_string()))?;
        array
            .store_array_subset_elements(&subset, &[units.to_offset(time)])
            .map_err(|e| ArrayIoError::write(&self.path, TIME_VARIABLE, e.to_string()))?;

        times.push(time);
        self.times = Some((units, times));
        debug!(path = %self.path.display(), record = index, %time, "Appended time record");
        Ok(index)
    }

    /// Open the variable for writing record `index`, creating it or growing
    /// its time dimension as needed.
    fn prepare_variable(&self, spec: &VariableSpec, index: usize) -> Result<Array<FilesystemStore>> {
        let levels = spec.level_count() as u64;
        let (ny, nx) = (spec.grid.ny as u64, spec.grid.nx as u64);

        if self.exists(&spec.name) {
            let array = self.open_array(&spec.name)?;
            let shape = array.shape().to_vec();
            let expected: Vec<u64> = if spec.is_layered() {
                vec![levels, ny, nx]
            } else {
                vec![ny, nx]
            };
            if shape.len() != expected.len() + 1 || shape[1..] != expected[..] {
                return Err(ArrayIoError::invalid_layout(
                    &self.path,
                    &spec.name,
                    format!("stored shape {:?} does not match {:?}", &shape[1..], expected),
                ));
            }
            if shape[0] > index as u64 {
                return Ok(array);
            }

            let mut grown = shape.clone();
            grown[0] = index as u64 + 1;
            let mut chunk_shape = vec![self.time_chunk];
            chunk_shape.extend(expected.iter().map(|d| (*d).max(1)));
            let array =
                self.build_array(&spec.name, grown, chunk_shape, array.attributes().clone())?;
            array
                .store_metadata()
                .map_err(|e| ArrayIoError::write(&self.path, &spec.name, e.to_string()))?;
            return Ok(array);
        }

        let (shape, chunk_shape, dims) = if spec.is_layered() {
            (
                vec![index as u64 + 1, levels, ny, nx],
                vec![self.time_chunk, levels.max(1), ny.max(1), nx.max(1)],
                json!([TIME_VARIABLE, "level", "y", "x"]),
            )
        } else {
            (
                vec![index as u64 + 1, ny, nx],
                vec![self.time_chunk, ny.max(1), nx.max(1)],
                json!([TIME_VARIABLE, "y", "x"]),
            )
        };

        let mut attrs = Map::new();
        attrs.insert("units".to_string(), json!(spec.units));
        attrs.insert("long_name".to_string(), json!(spec.long_name));
        attrs.insert("_ARRAY_DIMENSIONS".to_string(), dims);
        attrs.insert("grid".to_string(), serde_json::to_value(spec.grid).unwrap_or_default());

        let array = self.build_array(&spec.name, shape, chunk_shape, attrs)?;
        array
            .store_metadata()
            .map_err(|e| ArrayIoError::write(&self.path, &spec.name, e.to_string()))?;
        debug!(path = %self.path.display(), variable = %spec.name, "Created variable");
        Ok(array)
    }
}

impl Dataset for ZarrDataset {
    fn path(&self) -> &Path {
        &self.path
    }

    fn time_axis(&mut self) -> Result<Vec<DateTime<Utc>>> {
        Ok(self.cached_time_axis()?.1.clone())
    }

    fn variable_layout(&mut self, variable: &str) -> Result<Option<VariableLayout>> {
        if !self.exists(variable) {
            return Ok(None);
        }

        let array = self.open_array(variable)?;
        let shape = array.shape();
        let levels = match shape.len() {
            3 => 1,
            4 => shape[1] as usize,
            n => {
                return Err(ArrayIoError::invalid_layout(
                    &self.path,
                    variable,
                    format!("expected 3 or 4 dimensions, found {n}"),
                ))
            }
        };

        let grid = array
            .attributes()
            .get("grid")
            .and_then(|v| serde_json::from_value::<GridSpec>(v.clone()).ok());

        Ok(Some(VariableLayout {
            records: shape[0] as usize,
            levels,
            ny: shape[shape.len() - 2] as usize,
            nx: shape[shape.len() - 1] as usize,
            grid,
        }))
    }

    fn read_slab(&mut self, variable: &str, time_index: usize, slab: &Slab) -> Result<Vec<f64>> {
        let array = self.open_array(variable)?;
        let shape = array.shape();
        if shape.first().map_or(true, |&n| time_index as u64 >= n) {
            return Err(ArrayIoError::read(
                &self.path,
                variable,
                format!("record {time_index} beyond stored records"),
            ));
        }

        let (start, extent) = match shape.len() {
            3 if slab.levels == 1 => (
                vec![time_index as u64, slab.y.start as u64, slab.x.start as u64],
                vec![1, slab.y.len() as u64, slab.x.len() as u64],
            ),
            4 => (
                vec![time_index as u64, 0, slab.y.start as u64, slab.x.start as u64],
                vec![1, slab.levels as u64, slab.y.len() as u64, slab.x.len() as u64],
            ),
            _ => {
                return Err(ArrayIoError::invalid_layout(
                    &self.path,
                    variable,
                    format!("cannot read {} levels from shape {:?}", slab.levels, shape),
                ))
            }
        };

        let subset = ArraySubset::new_with_start_shape(start, extent)
            .map_err(|e| ArrayIoError::read(&self.path, variable, e.to_string()))?;
        let values: Vec<f64> = array
            .retrieve_array_subset_elements(&subset)
            .map_err(|e| ArrayIoError::read(&self.path, variable, e.to_string()))?;

        debug!(
            path = %self.path.display(),
            variable,
            record = time_index,
            values = values.len(),
            "Read hyperslab"
        );
        Ok(values)
    }

    fn write_slab(
        &mut self,
        variable: &VariableSpec,
        time: DateTime<Utc>,
        slab: &Slab,
        values: &[f64],
    ) -> Result<()> {
        if values.len() != slab.len() {
            return Err(ArrayIoError::ShapeMismatch {
                variable: variable.name.clone(),
                expected: slab.len(),
                actual: values.len(),
            });
        }

        let index = self.ensure_record(time)?;
        let array = self.prepare_variable(variable, index)?;

        let (start, extent) = if variable.is_layered() {
            (
                vec![index as u64, 0, slab.y.start as u64, slab.x.start as u64],
                vec![1, slab.levels as u64, slab.y.len() as u64, slab.x.len() as u64],
            )
        } else {
            (
                vec![index as u64, slab.y.start as u64, slab.x.start as u64],
                vec![1, slab.y.len() as u64, slab.x.len() as u64],
            )
        };

        let subset = ArraySubset::new_with_start_shape(start, extent)
            .map_err(|e| ArrayIoError::write(&self.path, &variable.name, e.to_string()))?;
        array
            .store_array_subset_elements(&subset, values)
            .map_err(|e| ArrayIoError::write(&self.path, &variable.name, e.to_string()))?;

        debug!(
            path = %self.path.display(),
            variable = %variable.name,
            record = index,
            values = values.len(),
            "Wrote hyperslab"
        );
        Ok(())
    }
}

fn node_path(variable: &str) -> String {
    format!("/{}", variable)
}
