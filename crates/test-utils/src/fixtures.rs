//! Common fixtures: times, archives on disk, and configuration records.

use std::path::Path;
use std::sync::Arc;

use array_io::{
    ArrayIoConfig, DistributedIo, LocalCommunicator, ReadRequest, WriteRequest, ZarrBackend,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use fieldio_common::{ConfigRecord, Decomposition, FieldDescriptor, FileKind, FilenameTemplate, GridSpec};

/// UTC time from calendar components.
pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .unwrap_or_else(|| panic!("invalid fixture time {year}-{month}-{day} {hour}:{minute}"))
}

/// `2000-01-01T00:00:00Z`, the reference time of the archived test data.
pub fn epoch_2000() -> DateTime<Utc> {
    at(2000, 1, 1, 0, 0)
}

/// `count` times spaced `step` apart starting at `start`.
pub fn time_series(start: DateTime<Utc>, step: Duration, count: usize) -> Vec<DateTime<Utc>> {
    (0..count).map(|k| start + step * k as i32).collect()
}

/// A single-process adapter over the whole grid.
pub fn whole_grid_io(grid: GridSpec) -> DistributedIo {
    DistributedIo::new(
        Box::new(ZarrBackend::default()),
        Arc::new(LocalCommunicator::single()),
        grid,
        Decomposition::whole(&grid),
        ArrayIoConfig::default(),
    )
    .expect("whole-grid adapter")
}

/// Write full-grid snapshots of `field` into the dataset at `path`.
pub fn write_snapshots(
    path: &Path,
    grid: &GridSpec,
    field: &FieldDescriptor,
    snapshots: &[(DateTime<Utc>, Vec<f64>)],
) {
    let mut io = whole_grid_io(*grid);
    for (time, values) in snapshots {
        io.write_hyperslab(&WriteRequest {
            owner: "fixture",
            path,
            kind: FileKind::Serial,
            variable: &field.name,
            field,
            time: *time,
            values,
        })
        .unwrap_or_else(|e| panic!("writing {} at {}: {}", field.name, time, e));
    }
}

/// Write an archive for `field` under `dir`, one snapshot per time in
/// `times`, each stored in the file `template` resolves to at that time.
pub fn write_archive(
    dir: &Path,
    template: &str,
    grid: &GridSpec,
    field: &FieldDescriptor,
    times: &[DateTime<Utc>],
    values_at: impl Fn(DateTime<Utc>) -> Vec<f64>,
) {
    let template = FilenameTemplate::new(dir.join(template).display().to_string());
    for time in times {
        let path = template.resolve(*time);
        write_snapshots(Path::new(&path), grid, field, &[(*time, values_at(*time))]);
    }
}

/// Read back the full grid of `variable` at `time`.
pub fn read_full(
    path: &Path,
    grid: &GridSpec,
    variable: &str,
    levels: i32,
    time: DateTime<Utc>,
) -> Vec<f64> {
    let field = FieldDescriptor::new(variable, "", levels);
    let mut io = whole_grid_io(*grid);
    io.read_hyperslab(&ReadRequest {
        owner: "fixture",
        path,
        kind: FileKind::Serial,
        field: &field,
        time,
    })
    .unwrap_or_else(|e| panic!("reading {} at {}: {}", variable, time, e))
}

fn with_fields(mut record: ConfigRecord, fields: &[FieldDescriptor]) -> ConfigRecord {
    record.insert("FIELD_COUNT", fields.len().to_string());
    for (i, field) in fields.iter().enumerate() {
        let i = i + 1;
        record.insert(&format!("FIELD_{i}_NAME"), field.name.as_str());
        record.insert(&format!("FIELD_{i}_UNITS"), field.units.as_str());
        record.insert(&format!("FIELD_{i}_LONGNAME"), field.long_name.as_str());
        record.insert(&format!("FIELD_{i}_LEVELS"), field.levels.to_string());
    }
    record
}

/// An input stream record reading `datafile` (a template under `dir`).
pub fn stream_record(
    name: &str,
    dir: &Path,
    datafile: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    frequency: &str,
    fields: &[FieldDescriptor],
) -> ConfigRecord {
    let record = ConfigRecord::new()
        .with("NAME", name)
        .with("DATAFILE", dir.join(datafile).display().to_string())
        .with("FILETYPE", "serial")
        .with("MODE", "read")
        .with("START_TIME", start.to_rfc3339())
        .with("END_TIME", end.to_rfc3339())
        .with("TIME_FREQUENCY", frequency);
    with_fields(record, fields)
}

/// An output collection record writing `filename` (a template under `dir`).
pub fn collection_record(
    name: &str,
    dir: &Path,
    filename: &str,
    frequency: &str,
    statistics: &[&str],
    fields: &[FieldDescriptor],
) -> ConfigRecord {
    let mut record = ConfigRecord::new()
        .with("NAME", name)
        .with("FILENAME_BASE", dir.join(filename).display().to_string())
        .with("FILETYPE", "serial")
        .with("OUTPUT_FREQUENCY", frequency);
    for stat in statistics {
        record.insert(&format!("DO_{}", stat.to_ascii_uppercase()), "true");
    }
    with_fields(record, fields)
}
