//! End-to-end scenarios for the I/O component.

use std::path::Path;
use std::sync::Arc;

use array_io::{
    ArrayIoError, BilinearRegridder, Dataset, DatasetBackend, Slab, VariableLayout, VariableSpec,
    ZarrBackend,
};
use chrono::{DateTime, Duration, Utc};
use fieldio::{
    ComponentError, IoComponent, InMemoryFields, ModelContext, StepFailure, WindowState,
};
use fieldio_common::{AccessMode, ConfigError, FieldDescriptor, GridSpec, Registry};
use temporal::TemporalError;
use test_utils::{
    air_temperature, collection_record, constant_field, epoch_2000, read_full, stream_record,
    time_series, write_archive,
};

/// Fails every write of one variable.
struct FailingWrites {
    inner: ZarrBackend,
    variable: &'static str,
}

struct FailingDataset {
    inner: Box<dyn Dataset>,
    variable: &'static str,
}

impl DatasetBackend for FailingWrites {
    fn open(&self, path: &Path, mode: AccessMode) -> array_io::Result<Box<dyn Dataset>> {
        Ok(Box::new(FailingDataset {
            inner: self.inner.open(path, mode)?,
            variable: self.variable,
        }))
    }
}

impl Dataset for FailingDataset {
    fn path(&self) -> &Path {
        self.inner.path()
    }

    fn time_axis(&mut self) -> array_io::Result<Vec<DateTime<Utc>>> {
        self.inner.time_axis()
    }

    fn variable_layout(&mut self, variable: &str) -> array_io::Result<Option<VariableLayout>> {
        self.inner.variable_layout(variable)
    }

    fn read_slab(&mut self, variable: &str, time_index: usize, slab: &Slab) -> array_io::Result<Vec<f64>> {
        self.inner.read_slab(variable, time_index, slab)
    }

    fn write_slab(
        &mut self,
        variable: &VariableSpec,
        time: DateTime<Utc>,
        slab: &Slab,
        values: &[f64],
    ) -> array_io::Result<()> {
        if variable.name == self.variable {
            return Err(ArrayIoError::write(self.inner.path(), &variable.name, "injected failure"));
        }
        self.inner.write_slab(variable, time, slab, values)
    }
}

fn hours(h: i64) -> DateTime<Utc> {
    epoch_2000() + Duration::hours(h)
}

fn tas() -> FieldDescriptor {
    FieldDescriptor::new("tas", "K", -1)
}

/// Hourly `tas` archive over `0..=last` hours, value = 10 * hour.
fn archive(dir: &Path, grid: &GridSpec, last: i64) {
    let times = time_series(epoch_2000(), Duration::hours(1), last as usize + 1);
    write_archive(dir, "in_%y4%m2%d2.zarr", grid, &tas(), &times, |t| {
        constant_field(grid, -1, (t - epoch_2000()).num_hours() as f64 * 10.0)
    });
}

fn input_registry(dir: &Path, last: i64) -> Registry {
    Registry::from_records(
        &[stream_record(
            "atm",
            dir,
            "in_%y4%m2%d2.zarr",
            epoch_2000(),
            hours(last),
            "1h",
            &[tas()],
        )],
        &[],
    )
    .unwrap()
}

#[test]
fn test_stream_exports_interpolated_value() {
    let temp_dir = tempfile::tempdir().unwrap();
    let grid = GridSpec::global(4, 3);
    archive(temp_dir.path(), &grid, 6);

    let registry = input_registry(temp_dir.path(), 6);
    let mut component =
        IoComponent::initialize(&registry, &ModelContext::single(grid, epoch_2000())).unwrap();
    let mut fields = InMemoryFields::new();

    let outcome = component
        .step(epoch_2000() + Duration::minutes(30), &mut fields)
        .unwrap();
    assert_eq!(outcome.exported, 1);
    assert_eq!(fields.exported("atm", "tas"), Some(&constant_field(&grid, -1, 5.0)[..]));

    let diag = &component.stream_diagnostics()[0];
    assert_eq!(diag.state, WindowState::Loaded);
    assert_eq!((diag.lower, diag.upper), (Some(hours(0)), Some(hours(1))));
}

#[test]
fn test_six_hourly_average_from_host_samples() {
    let temp_dir = tempfile::tempdir().unwrap();
    let grid = GridSpec::global(4, 3);
    let registry = Registry::from_records(
        &[],
        &[collection_record(
            "hist",
            temp_dir.path(),
            "hist_%y4%m2%d2.zarr",
            "6h",
            &["avg"],
            &[tas()],
        )],
    )
    .unwrap();
    let mut component =
        IoComponent::initialize(&registry, &ModelContext::single(grid, epoch_2000())).unwrap();
    let mut fields = InMemoryFields::new();

    for h in 1..=6 {
        fields.set_import("tas", constant_field(&grid, -1, h as f64));
        let outcome = component.step(hours(h), &mut fields).unwrap();
        assert_eq!(outcome.deposited, 1);
        assert_eq!(outcome.flushes.len(), usize::from(h == 6));
    }

    let path = temp_dir.path().join("hist_20000101.zarr");
    assert_eq!(read_full(&path, &grid, "tas_avg", -1, hours(6)), constant_field(&grid, -1, 3.5));
    assert_eq!(component.next_flush("hist"), Some(hours(12)));
    assert!(component.finalize().unwrap().is_empty());
}

#[test]
fn test_time_past_end_surfaces_time_range_error() {
    let temp_dir = tempfile::tempdir().unwrap();
    let grid = GridSpec::global(2, 2);
    archive(temp_dir.path(), &grid, 6);

    let registry = input_registry(temp_dir.path(), 6);
    let mut component =
        IoComponent::initialize(&registry, &ModelContext::single(grid, epoch_2000())).unwrap();
    let mut fields = InMemoryFields::new();

    let err = component.step(hours(7), &mut fields).unwrap_err();
    match err.failures() {
        [StepFailure::Stream(TemporalError::TimeRange { time, .. })] => assert_eq!(*time, hours(7)),
        other => panic!("unexpected failures: {:?}", other),
    }
    assert_eq!(component.stream_diagnostics()[0].state, WindowState::Error);
}

#[test]
fn test_two_rank_collective_write_with_failing_slice() {
    let temp_dir = tempfile::tempdir().unwrap();
    let grid = GridSpec::global(4, 6);
    let ua = FieldDescriptor::new("ua", "m s-1", -1);
    let mut record = collection_record(
        "hist",
        temp_dir.path(),
        "hist_%y4%m2%d2.zarr",
        "6h",
        &["avg"],
        &[tas(), ua],
    );
    record.insert("FILETYPE", "parallel");
    let registry = Registry::from_records(&[], &[record]).unwrap();

    let mut ranks: Vec<IoComponent> = (0..2)
        .map(|rank| {
            let context = ModelContext::block_rows(grid, epoch_2000(), rank, 2).unwrap();
            let backend: Box<dyn DatasetBackend> = if rank == 1 {
                Box::new(FailingWrites {
                    inner: ZarrBackend::default(),
                    variable: "ua_avg",
                })
            } else {
                Box::new(ZarrBackend::default())
            };
            IoComponent::initialize_with_backend(&registry, &context, backend).unwrap()
        })
        .collect();

    let mut results = Vec::new();
    for (rank, component) in ranks.iter_mut().enumerate() {
        let mut fields = InMemoryFields::new();
        fields.set_import("tas", vec![rank as f64 + 1.0; 12]);
        fields.set_import("ua", vec![rank as f64 + 1.0; 12]);
        results.push(component.step(hours(6), &mut fields));
    }

    assert!(results[0].is_ok());
    let err = results[1].as_ref().unwrap_err();
    match err.failures() {
        [StepFailure::Output { collection, field, .. }] => {
            assert_eq!(collection, "hist");
            assert_eq!(field, "ua");
        }
        other => panic!("unexpected failures: {:?}", other),
    }
    // the flush that wrote tas_avg is still reported alongside the failure
    let outcome = err.outcome().unwrap();
    assert_eq!(outcome.time, hours(6));
    assert_eq!(outcome.deposited, 2);
    assert_eq!(outcome.flushes.len(), 1);
    assert_eq!(outcome.flushes[0].written, vec!["tas_avg"]);

    let path = temp_dir.path().join("hist_20000101.zarr");
    let tas_avg = read_full(&path, &grid, "tas_avg", -1, hours(6));
    assert_eq!(&tas_avg[..12], &[1.0; 12]);
    assert_eq!(&tas_avg[12..], &[2.0; 12]);

    let ua_avg = read_full(&path, &grid, "ua_avg", -1, hours(6));
    assert_eq!(&ua_avg[..12], &[1.0; 12]);
    assert!(ua_avg[12..].iter().all(|v| v.is_nan()));
}

#[test]
fn test_duplicate_stream_names_rejected_before_io() {
    let temp_dir = tempfile::tempdir().unwrap();
    let grid = GridSpec::global(2, 2);
    let record = stream_record(
        "atm",
        temp_dir.path(),
        "missing.zarr",
        epoch_2000(),
        hours(6),
        "1h",
        &[tas()],
    );

    let err = Registry::from_records(&[record.clone(), record.clone()], &[]).unwrap_err();
    assert!(matches!(err, ConfigError::Duplicate { kind: "stream", .. }));

    let registry = Registry {
        streams: vec![
            fieldio_common::InputStreamDescriptor::from_record(&record).unwrap();
            2
        ],
        collections: Vec::new(),
    };
    let err = IoComponent::initialize(&registry, &ModelContext::single(grid, epoch_2000()))
        .err()
        .unwrap();
    assert!(matches!(err, ComponentError::Config(_)));
}

#[test]
fn test_missing_archive_fails_initialize() {
    let temp_dir = tempfile::tempdir().unwrap();
    let grid = GridSpec::global(2, 2);
    let registry = input_registry(temp_dir.path(), 6);

    let err = IoComponent::initialize(&registry, &ModelContext::single(grid, epoch_2000()))
        .err()
        .unwrap();
    assert!(matches!(err, ComponentError::Stream(TemporalError::Io { .. })));
}

#[test]
fn test_finalize_flushes_partial_window_then_rejects_steps() {
    let temp_dir = tempfile::tempdir().unwrap();
    let grid = GridSpec::global(2, 2);
    let registry = Registry::from_records(
        &[],
        &[collection_record(
            "daily",
            temp_dir.path(),
            "daily.zarr",
            "1d",
            &["max"],
            &[tas()],
        )],
    )
    .unwrap();
    let mut component =
        IoComponent::initialize(&registry, &ModelContext::single(grid, epoch_2000())).unwrap();
    let mut fields = InMemoryFields::new();

    for h in 1..=3 {
        component
            .deposit("daily", "tas", &constant_field(&grid, -1, h as f64), hours(h))
            .unwrap();
        component.step(hours(h), &mut fields).unwrap();
    }
    assert!(matches!(
        component.deposit("hourly", "tas", &[0.0; 4], hours(3)),
        Err(ComponentError::UnknownCollection(_))
    ));

    let reports = component.finalize().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].time, hours(3));
    let path = temp_dir.path().join("daily.zarr");
    assert_eq!(read_full(&path, &grid, "tas_max", -1, hours(3)), constant_field(&grid, -1, 3.0));

    assert!(matches!(
        component.step(hours(4), &mut fields),
        Err(ComponentError::Finalized)
    ));
}

#[test]
fn test_coarse_archive_needs_regridder() {
    let temp_dir = tempfile::tempdir().unwrap();
    let coarse = GridSpec::global(5, 3);
    let fine = GridSpec::global(9, 5);
    let times = time_series(epoch_2000(), Duration::hours(1), 2);
    write_archive(temp_dir.path(), "in_%y4%m2%d2.zarr", &coarse, &tas(), &times, |_| {
        air_temperature(&coarse, -1)
    });
    let registry = input_registry(temp_dir.path(), 1);

    let err = IoComponent::initialize(&registry, &ModelContext::single(fine, epoch_2000()))
        .err()
        .unwrap();
    match err {
        ComponentError::Stream(TemporalError::Io { source, .. }) => {
            assert!(source.is_decomposition_mismatch())
        }
        other => panic!("unexpected error: {other}"),
    }

    let context = ModelContext::single(fine, epoch_2000()).with_regridder(Arc::new(BilinearRegridder));
    let mut component = IoComponent::initialize(&registry, &context).unwrap();
    let mut fields = InMemoryFields::new();
    component.step(epoch_2000(), &mut fields).unwrap();

    let values = fields.exported("atm", "tas").unwrap();
    assert_eq!(values.len(), fine.len());
    // coarse points coincide with every other fine point
    let expected = air_temperature(&fine, -1);
    for row in (0..fine.ny).step_by(2) {
        for col in (0..fine.nx).step_by(2) {
            let i = row * fine.nx + col;
            assert!((values[i] - expected[i]).abs() < 1e-9);
        }
    }
}
