//! Local-slice ↔ hyperslab transfer with collective and independent access.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fieldio_common::grid::level_count;
use fieldio_common::{AccessMode, Decomposition, FieldDescriptor, FileKind, GridSpec};
use tracing::{debug, info, warn};

use crate::backend::{Dataset, DatasetBackend};
use crate::comm::Communicator;
use crate::config::ArrayIoConfig;
use crate::error::{ArrayIoError, Result};
use crate::regrid::{checked_regrid, regrid_slice, Regridder};
use crate::types::{describe_grid, Slab, VariableSpec};

/// A read of one field's local slice at one time.
#[derive(Debug, Clone, Copy)]
pub struct ReadRequest<'a> {
    /// Stream that owns the cached handle used for this read.
    pub owner: &'a str,
    pub path: &'a Path,
    pub kind: FileKind,
    pub field: &'a FieldDescriptor,
    pub time: DateTime<Utc>,
}

/// A write of one variable's local slice at one time.
#[derive(Debug, Clone, Copy)]
pub struct WriteRequest<'a> {
    pub owner: &'a str,
    pub path: &'a Path,
    pub kind: FileKind,
    /// On-disk variable name (`<field>` or `<field>_<stat>`).
    pub variable: &'a str,
    pub field: &'a FieldDescriptor,
    pub time: DateTime<Utc>,
    pub values: &'a [f64],
}

/// An open collective session on one file.
struct Session {
    mode: AccessMode,
    /// `None` after a failed access dropped the handle.
    dataset: Option<Box<dyn Dataset>>,
}

/// Where this process sits on the target grid.
struct Placement<'a> {
    grid: &'a GridSpec,
    decomposition: &'a Decomposition,
    regridder: Option<&'a dyn Regridder>,
}

/// Moves this process's decomposition slice to and from array files.
pub struct DistributedIo {
    backend: Box<dyn DatasetBackend>,
    comm: Arc<dyn Communicator>,
    grid: GridSpec,
    decomposition: Decomposition,
    regridder: Option<Arc<dyn Regridder>>,
    config: ArrayIoConfig,
    sessions: HashMap<PathBuf, Session>,
    cached: HashMap<String, Box<dyn Dataset>>,
}

impl DistributedIo {
    pub fn new(
        backend: Box<dyn DatasetBackend>,
        comm: Arc<dyn Communicator>,
        grid: GridSpec,
        decomposition: Decomposition,
        config: ArrayIoConfig,
    ) -> Result<Self> {
        config.validate().map_err(ArrayIoError::Config)?;
        if !decomposition.fits(&grid) {
            return Err(ArrayIoError::Config(format!(
                "decomposition x={:?} y={:?} does not fit grid {}x{}",
                decomposition.x, decomposition.y, grid.nx, grid.ny
            )));
        }

        Ok(Self {
            backend,
            comm,
            grid,
            decomposition,
            regridder: None,
            config,
            sessions: HashMap::new(),
            cached: HashMap::new(),
        })
    }

    /// Use `regridder` when a file's grid differs from the target grid.
    pub fn with_regridder(mut self, regridder: Arc<dyn Regridder>) -> Self {
        self.regridder = Some(regridder);
        self
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn decomposition(&self) -> &Decomposition {
        &self.decomposition
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn has_session(&self, path: &Path) -> bool {
        self.sessions.contains_key(path)
    }

    /// Begin a collective session on `path`. Every process must call this
    /// in the same order; the call synchronizes on the barrier.
    pub fn open_collective(&mut self, path: &Path, mode: AccessMode) -> Result<()> {
        if self.sessions.contains_key(path) {
            return Err(ArrayIoError::collective(path, "session already open"));
        }

        self.comm.barrier()?;
        let dataset = self.open_with_retry(path, mode)?;
        self.sessions.insert(
            path.to_path_buf(),
            Session {
                mode,
                dataset: Some(dataset),
            },
        );
        debug!(path = %path.display(), %mode, rank = self.comm.rank(), "Opened collective session");
        Ok(())
    }

    /// End the collective session on `path`.
    pub fn close_collective(&mut self, path: &Path) -> Result<()> {
        if self.sessions.remove(path).is_none() {
            return Err(ArrayIoError::collective(path, "close without open session"));
        }
        self.comm.barrier()?;
        debug!(path = %path.display(), rank = self.comm.rank(), "Closed collective session");
        Ok(())
    }

    /// Read the local slice of `request.field` at `request.time`.
    pub fn read_hyperslab(&mut self, request: &ReadRequest<'_>) -> Result<Vec<f64>> {
        let field = request.field;
        let time = request.time;
        self.run(
            request.owner,
            request.path,
            request.kind,
            AccessMode::Read,
            |dataset, placement| read_local(dataset, placement, field, time),
        )
    }

    /// Times of every record in `path`, read through `owner`'s handle.
    pub fn time_axis(&mut self, owner: &str, path: &Path, kind: FileKind) -> Result<Vec<DateTime<Utc>>> {
        self.run(owner, path, kind, AccessMode::Read, |dataset, _| dataset.time_axis())
    }

    /// Write the local slice of `request.variable` at `request.time`.
    pub fn write_hyperslab(&mut self, request: &WriteRequest<'_>) -> Result<()> {
        let expected = self.decomposition.local_len(request.field.levels);
        if request.values.len() != expected {
            return Err(ArrayIoError::ShapeMismatch {
                variable: request.variable.to_string(),
                expected,
                actual: request.values.len(),
            });
        }

        self.run(
            request.owner,
            request.path,
            request.kind,
            AccessMode::Write,
            |dataset, placement| write_local(dataset, placement, request),
        )
    }

    /// Close the cached handle held for `owner`, if any.
    pub fn release(&mut self, owner: &str) {
        if let Some(dataset) = self.cached.remove(owner) {
            debug!(owner, path = %dataset.path().display(), "Released cached handle");
        }
    }

    /// Close every cached handle and abandon any open sessions.
    pub fn close_all(&mut self) {
        for path in self.sessions.keys() {
            warn!(path = %path.display(), "Collective session left open at shutdown");
        }
        self.sessions.clear();
        self.cached.clear();
    }

    fn open_with_retry(&self, path: &Path, mode: AccessMode) -> Result<Box<dyn Dataset>> {
        let mut attempt = 0;
        loop {
            match self.backend.open(path, mode) {
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(path = %path.display(), error = %err, attempt, "Open failed, retrying");
                }
                other => return other,
            }
        }
    }

    /// Run `op` against the right handle, retrying transient failures with a
    /// fresh one.
    fn run<T, F>(
        &mut self,
        owner: &str,
        path: &Path,
        kind: FileKind,
        mode: AccessMode,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut(&mut dyn Dataset, &Placement<'_>) -> Result<T>,
    {
        let mut attempt = 0;
        loop {
            match self.run_once(owner, path, kind, mode, &mut op) {
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        owner,
                        path = %path.display(),
                        error = %err,
                        attempt,
                        "I/O failed, retrying with a fresh handle"
                    );
                    self.discard(owner, path, kind);
                }
                other => return other,
            }
        }
    }

    fn run_once<T, F>(
        &mut self,
        owner: &str,
        path: &Path,
        kind: FileKind,
        mode: AccessMode,
        op: &mut F,
    ) -> Result<T>
    where
        F: FnMut(&mut dyn Dataset, &Placement<'_>) -> Result<T>,
    {
        let placement = Placement {
            grid: &self.grid,
            decomposition: &self.decomposition,
            regridder: self.regridder.as_deref(),
        };

        if kind.is_collective() {
            let session = self
                .sessions
                .get_mut(path)
                .ok_or_else(|| ArrayIoError::collective(path, "access without open session"))?;
            if session.mode != mode {
                return Err(ArrayIoError::collective(
                    path,
                    format!("session opened for {}, access is {}", session.mode, mode),
                ));
            }
            if session.dataset.is_none() {
                session.dataset = Some(self.backend.open(path, mode)?);
            }
            let Some(dataset) = session.dataset.as_mut() else {
                return Err(ArrayIoError::collective(path, "session handle unavailable"));
            };
            return op(dataset.as_mut(), &placement);
        }

        if mode == AccessMode::Read && self.config.cache_handles {
            let stale = self.cached.get(owner).map_or(true, |d| d.path() != path);
            if stale {
                let dataset = self.backend.open(path, mode)?;
                if let Some(old) = self.cached.insert(owner.to_string(), dataset) {
                    debug!(owner, path = %old.path().display(), "Replaced cached handle");
                }
            }
            let Some(dataset) = self.cached.get_mut(owner) else {
                return Err(ArrayIoError::open(path, "cached handle unavailable"));
            };
            return op(dataset.as_mut(), &placement);
        }

        let mut dataset = self.backend.open(path, mode)?;
        op(dataset.as_mut(), &placement)
    }

    fn discard(&mut self, owner: &str, path: &Path, kind: FileKind) {
        if kind.is_collective() {
            if let Some(session) = self.sessions.get_mut(path) {
                session.dataset = None;
            }
        } else {
            self.cached.remove(owner);
        }
    }
}

fn mismatch(variable: &str, file: String, target: String) -> ArrayIoError {
    ArrayIoError::DecompositionMismatch {
        variable: variable.to_string(),
        file_grid: file,
        target_grid: target,
    }
}

fn read_local(
    dataset: &mut dyn Dataset,
    placement: &Placement<'_>,
    field: &FieldDescriptor,
    time: DateTime<Utc>,
) -> Result<Vec<f64>> {
    let path = dataset.path().to_path_buf();
    let levels = level_count(field.levels);

    let layout = dataset
        .variable_layout(&field.name)?
        .ok_or_else(|| ArrayIoError::MissingVariable {
            path: path.display().to_string(),
            variable: field.name.clone(),
        })?;
    if layout.levels != levels {
        return Err(mismatch(
            &field.name,
            layout.describe(),
            describe_grid(placement.grid, levels),
        ));
    }

    let record = dataset
        .find_record(time)?
        .ok_or_else(|| ArrayIoError::TimeNotFound {
            path: path.display().to_string(),
            time: time.to_rfc3339(),
        })?;

    if layout.matches(placement.grid) {
        return dataset.read_slab(&field.name, record, &Slab::local(placement.decomposition, levels));
    }

    let Some(regridder) = placement.regridder else {
        return Err(mismatch(
            &field.name,
            layout.describe(),
            describe_grid(placement.grid, levels),
        ));
    };

    let source = layout.source_grid();
    if source.is_empty() {
        return Err(ArrayIoError::invalid_layout(&path, &field.name, "empty grid"));
    }

    let full = dataset.read_slab(&field.name, record, &Slab::full(&source, levels))?;
    let mut local = Vec::with_capacity(placement.decomposition.local_len(field.levels));
    for level in full.chunks(source.len()) {
        let regridded = checked_regrid(regridder, &source, placement.grid, level)?;
        local.extend(placement.decomposition.extract(placement.grid, -1, &regridded));
    }

    debug!(
        path = %path.display(),
        field = %field.name,
        source = %layout.describe(),
        "Regridded on read"
    );
    Ok(local)
}

fn write_local(
    dataset: &mut dyn Dataset,
    placement: &Placement<'_>,
    request: &WriteRequest<'_>,
) -> Result<()> {
    let levels = level_count(request.field.levels);
    let target = describe_grid(placement.grid, levels);

    match dataset.variable_layout(request.variable)? {
        Some(layout) if layout.levels != levels => {
            Err(mismatch(request.variable, layout.describe(), target))
        }
        Some(layout) if !layout.matches(placement.grid) => {
            let Some(regridder) = placement.regridder else {
                return Err(mismatch(request.variable, layout.describe(), target));
            };

            let file_grid = layout.source_grid();
            let Some((slab, values)) = regrid_slice(
                regridder,
                placement.grid,
                placement.decomposition,
                &file_grid,
                levels,
                request.values,
            )?
            else {
                debug!(
                    path = %dataset.path().display(),
                    variable = request.variable,
                    "Slice owns no points of the file grid"
                );
                return Ok(());
            };

            let spec = VariableSpec::for_field(request.variable, request.field, file_grid);
            dataset.write_slab(&spec, request.time, &slab, &values)
        }
        _ => {
            let spec = VariableSpec::for_field(request.variable, request.field, *placement.grid);
            dataset.write_slab(
                &spec,
                request.time,
                &Slab::local(placement.decomposition, levels),
                request.values,
            )
        }
    }
}

impl Drop for DistributedIo {
    fn drop(&mut self) {
        if !self.sessions.is_empty() || !self.cached.is_empty() {
            info!(
                sessions = self.sessions.len(),
                handles = self.cached.len(),
                "Closing remaining dataset handles"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use chrono::TimeZone;

    use super::*;
    use crate::backend::zarr::ZarrBackend;
    use crate::comm::LocalCommunicator;
    use crate::regrid::BilinearRegridder;

    /// Counts opens and fails the first `failures` of them.
    struct FlakyBackend {
        inner: ZarrBackend,
        opens: Rc<Cell<u32>>,
        failures: Rc<Cell<u32>>,
    }

    impl DatasetBackend for FlakyBackend {
        fn open(&self, path: &Path, mode: AccessMode) -> Result<Box<dyn Dataset>> {
            self.opens.set(self.opens.get() + 1);
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(ArrayIoError::open(path, "transient"));
            }
            self.inner.open(path, mode)
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
    }

    fn adapter(grid: GridSpec, rank: usize, size: usize) -> DistributedIo {
        DistributedIo::new(
            Box::new(ZarrBackend::default()),
            Arc::new(LocalCommunicator::new(rank, size)),
            grid,
            Decomposition::block_rows(&grid, rank, size).unwrap(),
            ArrayIoConfig::default(),
        )
        .unwrap()
    }

    fn flaky(grid: GridSpec, failures: u32) -> (DistributedIo, Rc<Cell<u32>>) {
        let opens = Rc::new(Cell::new(0));
        let backend = FlakyBackend {
            inner: ZarrBackend::default(),
            opens: opens.clone(),
            failures: Rc::new(Cell::new(failures)),
        };
        let io = DistributedIo::new(
            Box::new(backend),
            Arc::new(LocalCommunicator::single()),
            grid,
            Decomposition::whole(&grid),
            ArrayIoConfig::default(),
        )
        .unwrap();
        (io, opens)
    }

    fn write(io: &mut DistributedIo, path: &Path, field: &FieldDescriptor, values: &[f64]) -> Result<()> {
        io.write_hyperslab(&WriteRequest {
            owner: "out",
            path,
            kind: FileKind::Serial,
            variable: &field.name,
            field,
            time: t0(),
            values,
        })
    }

    fn read(io: &mut DistributedIo, path: &Path, kind: FileKind, field: &FieldDescriptor) -> Result<Vec<f64>> {
        io.read_hyperslab(&ReadRequest {
            owner: "in",
            path,
            kind,
            field,
            time: t0(),
        })
    }

    #[test]
    fn test_serial_roundtrip_by_rank() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("data.zarr");
        let grid = GridSpec::global(4, 6);
        let field = FieldDescriptor::new("tas", "K", -1);

        for rank in 0..2 {
            let mut io = adapter(grid, rank, 2);
            let values = vec![10.0 * (rank + 1) as f64; 12];
            write(&mut io, &path, &field, &values).unwrap();
        }

        let mut io = adapter(grid, 1, 2);
        let values = read(&mut io, &path, FileKind::Serial, &field).unwrap();
        assert_eq!(values, vec![20.0; 12]);
    }

    #[test]
    fn test_collective_order_errors() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("coll.zarr");
        let grid = GridSpec::global(4, 4);
        let field = FieldDescriptor::new("tas", "K", -1);
        let mut io = adapter(grid, 0, 1);

        let err = io
            .write_hyperslab(&WriteRequest {
                owner: "out",
                path: &path,
                kind: FileKind::Parallel,
                variable: "tas",
                field: &field,
                time: t0(),
                values: &[0.0; 16],
            })
            .unwrap_err();
        assert!(matches!(err, ArrayIoError::CollectiveOrder { .. }));

        io.open_collective(&path, AccessMode::Write).unwrap();
        assert!(matches!(
            io.open_collective(&path, AccessMode::Write).unwrap_err(),
            ArrayIoError::CollectiveOrder { .. }
        ));
        assert!(matches!(
            read(&mut io, &path, FileKind::Parallel, &field).unwrap_err(),
            ArrayIoError::CollectiveOrder { .. }
        ));
        io.close_collective(&path).unwrap();
        assert!(matches!(
            io.close_collective(&path).unwrap_err(),
            ArrayIoError::CollectiveOrder { .. }
        ));
    }

    #[test]
    fn test_collective_write_then_read() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("coll.zarr");
        let grid = GridSpec::global(3, 4);
        let field = FieldDescriptor::new("ua", "m s-1", 2);
        let mut ranks: Vec<_> = (0..2).map(|r| adapter(grid, r, 2)).collect();

        for io in ranks.iter_mut() {
            io.open_collective(&path, AccessMode::Write).unwrap();
        }
        for (rank, io) in ranks.iter_mut().enumerate() {
            let values = vec![rank as f64; 12];
            io.write_hyperslab(&WriteRequest {
                owner: "out",
                path: &path,
                kind: FileKind::Parallel,
                variable: "ua",
                field: &field,
                time: t0(),
                values: &values,
            })
            .unwrap();
        }
        for io in ranks.iter_mut() {
            io.close_collective(&path).unwrap();
        }

        for (rank, io) in ranks.iter_mut().enumerate() {
            io.open_collective(&path, AccessMode::Read).unwrap();
            let values = read(io, &path, FileKind::Parallel, &field).unwrap();
            assert_eq!(values, vec![rank as f64; 12]);
            io.close_collective(&path).unwrap();
        }
    }

    #[test]
    fn test_grid_mismatch_requires_regridder() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("coarse.zarr");
        let coarse = GridSpec::global(3, 3);
        let fine = GridSpec::global(5, 5);
        let field = FieldDescriptor::new("tas", "K", -1);

        let mut writer = adapter(coarse, 0, 1);
        write(&mut writer, &path, &field, &[280.0; 9]).unwrap();

        let mut reader = adapter(fine, 0, 1);
        let err = read(&mut reader, &path, FileKind::Serial, &field).unwrap_err();
        assert!(err.is_decomposition_mismatch());

        let mut reader = adapter(fine, 1, 2).with_regridder(Arc::new(BilinearRegridder));
        let values = read(&mut reader, &path, FileKind::Serial, &field).unwrap();
        assert_eq!(values.len(), 10);
        assert!(values.iter().all(|v| (v - 280.0).abs() < 1e-9));
    }

    /// Drops every value but the first.
    struct Truncating;

    impl Regridder for Truncating {
        fn regrid(&self, _: &GridSpec, _: &GridSpec, values: &[f64]) -> Result<Vec<f64>> {
            Ok(values[..1].to_vec())
        }
    }

    #[test]
    fn test_short_regridder_output_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("coarse.zarr");
        let coarse = GridSpec::global(3, 3);
        let fine = GridSpec::global(5, 5);
        let field = FieldDescriptor::new("tas", "K", -1);

        let mut writer = adapter(coarse, 0, 1);
        write(&mut writer, &path, &field, &[280.0; 9]).unwrap();

        let mut reader = adapter(fine, 1, 2).with_regridder(Arc::new(Truncating));
        let err = read(&mut reader, &path, FileKind::Serial, &field).unwrap_err();
        assert!(matches!(err, ArrayIoError::Regrid(_)));

        let mut writer = adapter(fine, 0, 2).with_regridder(Arc::new(Truncating));
        let err = write(&mut writer, &path, &field, &[1.0; 15]).unwrap_err();
        assert!(matches!(err, ArrayIoError::Regrid(_)));
    }

    #[test]
    fn test_decomposed_write_regrids_onto_file_grid() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("coarse_out.zarr");
        let coarse = GridSpec::global(3, 3);
        let fine = GridSpec::global(4, 6);
        let field = FieldDescriptor::new("tas", "K", -1);

        let mut creator = adapter(coarse, 0, 1);
        write(&mut creator, &path, &field, &[0.0; 9]).unwrap();

        for rank in 0..2 {
            let mut io = adapter(fine, rank, 2).with_regridder(Arc::new(BilinearRegridder));
            let values = vec![10.0 * (rank + 1) as f64; 12];
            write(&mut io, &path, &field, &values).unwrap();
        }

        // coarse row 0 lies in rank 0's rows, rows 1 and 2 nearest rank 1's
        let mut reader = adapter(coarse, 0, 1);
        let values = read(&mut reader, &path, FileKind::Serial, &field).unwrap();
        assert_eq!(&values[..3], &[10.0; 3]);
        assert_eq!(&values[3..], &[20.0; 6]);

        let mut io = adapter(fine, 1, 2);
        let err = write(&mut io, &path, &field, &[1.0; 12]).unwrap_err();
        assert!(err.is_decomposition_mismatch());
    }

    #[test]
    fn test_level_mismatch_is_never_regridded() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("levels.zarr");
        let grid = GridSpec::global(2, 2);

        let mut io = adapter(grid, 0, 1).with_regridder(Arc::new(BilinearRegridder));
        write(&mut io, &path, &FieldDescriptor::new("ta", "K", 2), &[1.0; 8]).unwrap();

        let err = read(&mut io, &path, FileKind::Serial, &FieldDescriptor::new("ta", "K", 3))
            .unwrap_err();
        assert!(err.is_decomposition_mismatch());
    }

    #[test]
    fn test_cached_handle_reused_until_release() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("cache.zarr");
        let grid = GridSpec::global(2, 2);
        let field = FieldDescriptor::new("tas", "K", -1);
        let (mut io, opens) = flaky(grid, 0);

        write(&mut io, &path, &field, &[1.0; 4]).unwrap();
        assert_eq!(opens.get(), 1);

        read(&mut io, &path, FileKind::Serial, &field).unwrap();
        read(&mut io, &path, FileKind::Serial, &field).unwrap();
        assert_eq!(opens.get(), 2);

        io.release("in");
        read(&mut io, &path, FileKind::Serial, &field).unwrap();
        assert_eq!(opens.get(), 3);
    }

    #[test]
    fn test_transient_failure_retried_once() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("retry.zarr");
        let grid = GridSpec::global(2, 2);
        let field = FieldDescriptor::new("tas", "K", -1);

        let (mut io, opens) = flaky(grid, 1);
        write(&mut io, &path, &field, &[1.0; 4]).unwrap();
        assert_eq!(opens.get(), 2);

        let (mut io, _) = flaky(grid, 2);
        let err = write(&mut io, &path, &field, &[1.0; 4]).unwrap_err();
        assert!(matches!(err, ArrayIoError::Open { .. }));
    }

    #[test]
    fn test_missing_record_and_variable() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("sparse.zarr");
        let grid = GridSpec::global(2, 2);
        let field = FieldDescriptor::new("tas", "K", -1);
        let mut io = adapter(grid, 0, 1);
        write(&mut io, &path, &field, &[1.0; 4]).unwrap();

        let err = io
            .read_hyperslab(&ReadRequest {
                owner: "in",
                path: &path,
                kind: FileKind::Serial,
                field: &field,
                time: t0() + chrono::Duration::hours(1),
            })
            .unwrap_err();
        assert!(matches!(err, ArrayIoError::TimeNotFound { .. }));

        let other = FieldDescriptor::new("pr", "kg m-2 s-1", -1);
        let err = read(&mut io, &path, FileKind::Serial, &other).unwrap_err();
        assert!(matches!(err, ArrayIoError::MissingVariable { .. }));
    }

    #[test]
    fn test_wrong_local_length_rejected_before_io() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("never.zarr");
        let grid = GridSpec::global(2, 2);
        let (mut io, opens) = flaky(grid, 0);

        let err = write(&mut io, &path, &FieldDescriptor::new("tas", "K", -1), &[1.0; 3]).unwrap_err();
        assert!(matches!(err, ArrayIoError::ShapeMismatch { expected: 4, actual: 3, .. }));
        assert_eq!(opens.get(), 0);
        assert!(!path.exists());
    }
}
