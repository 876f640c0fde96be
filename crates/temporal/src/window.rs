//! Per-stream bracketing state machine.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use array_io::{ArrayIoError, DistributedIo, ReadRequest};
use chrono::{DateTime, Duration, Utc};
use fieldio_common::{AccessMode, InputStreamDescriptor};
use tracing::{debug, error, info, warn};

use crate::error::{Result, TemporalError};
use crate::interpolate::{Snapshot, TimeBracket};

/// Lifecycle of a stream's bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Uninitialized,
    Loaded,
    /// Refresh interval elapsed; endpoints are being reloaded.
    Stale,
    /// Terminal.
    Error,
}

/// Snapshot of a stream's state for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDiagnostics {
    pub name: String,
    pub state: WindowState,
    pub lower: Option<DateTime<Utc>>,
    pub upper: Option<DateTime<Utc>>,
    /// Model time of the last load from disk.
    pub last_reload: Option<DateTime<Utc>>,
    /// Snapshots read since initialization.
    pub loads: usize,
}

/// Records compare equal within this many milliseconds.
const TIME_TOLERANCE_MS: i64 = 1_000;

/// A stored record: the file holding it and its time.
#[derive(Debug, Clone, PartialEq)]
struct Record {
    path: PathBuf,
    time: DateTime<Utc>,
}

/// Owns the bracketing snapshots of one input stream.
///
/// Snapshot times are the records the stream's files actually hold.
/// `TIME_FREQUENCY` is the nominal spacing: it only decides which files to
/// look in, so calendar-month records work under a `30d` or `31d` spacing.
pub struct TemporalWindow {
    descriptor: InputStreamDescriptor,
    state: WindowState,
    bracket: Option<TimeBracket>,
    last_reload: Option<DateTime<Utc>>,
    loads: usize,
    /// Time axis of every file read so far, dropped on refresh.
    axes: HashMap<PathBuf, Vec<DateTime<Utc>>>,
}

impl TemporalWindow {
    pub fn new(descriptor: InputStreamDescriptor) -> Self {
        Self {
            descriptor,
            state: WindowState::Uninitialized,
            bracket: None,
            last_reload: None,
            loads: 0,
            axes: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &InputStreamDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    pub fn bracket(&self) -> Option<&TimeBracket> {
        self.bracket.as_ref()
    }

    pub fn diagnostics(&self) -> StreamDiagnostics {
        StreamDiagnostics {
            name: self.descriptor.name.clone(),
            state: self.state,
            lower: self.bracket.as_ref().map(|b| b.lower.time),
            upper: self.bracket.as_ref().map(|b| b.upper.time),
            last_reload: self.last_reload,
            loads: self.loads,
        }
    }

    /// Map a model time into the dataset's time base.
    pub fn data_time(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        match self.descriptor.climatology {
            Some(years) => years.wrap_time(t),
            None => t,
        }
    }

    /// Load the bracket covering the stream start.
    pub fn initialize(&mut self, io: &mut DistributedIo) -> Result<()> {
        if self.state != WindowState::Uninitialized {
            return Err(TemporalError::AlreadyInitialized {
                stream: self.descriptor.name.clone(),
            });
        }

        let start = self.descriptor.window.start;
        match self.covering(io, start).and_then(|(lower, upper)| self.load_pair(io, lower, upper)) {
            Ok(bracket) => {
                info!(
                    stream = %self.descriptor.name,
                    lower = %bracket.lower.time,
                    upper = %bracket.upper.time,
                    policy = ?self.descriptor.interpolation,
                    "Stream initialized"
                );
                self.bracket = Some(bracket);
                self.state = WindowState::Loaded;
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Every field of the stream at model time `time`, in descriptor order.
    pub fn value_at(&mut self, io: &mut DistributedIo, time: DateTime<Utc>) -> Result<Vec<Vec<f64>>> {
        match self.state {
            WindowState::Uninitialized => {
                return Err(TemporalError::NotInitialized {
                    stream: self.descriptor.name.clone(),
                })
            }
            WindowState::Error => {
                return Err(TemporalError::Failed {
                    stream: self.descriptor.name.clone(),
                })
            }
            WindowState::Loaded | WindowState::Stale => {}
        }

        let window = self.descriptor.window;
        let mapped = self.data_time(time);
        let t = if window.contains(&mapped) {
            mapped
        } else if self.descriptor.extrapolate {
            window.clamp(mapped)
        } else {
            error!(
                stream = %self.descriptor.name,
                %time,
                start = %window.start,
                end = %window.end,
                "Time outside stream window"
            );
            self.state = WindowState::Error;
            self.bracket = None;
            return Err(TemporalError::TimeRange {
                stream: self.descriptor.name.clone(),
                time,
                start: window.start,
                end: window.end,
            });
        };

        if self.refresh_due(time) {
            self.state = WindowState::Stale;
            self.refresh(io, time)?;
        }

        let (lower, upper) = match &self.bracket {
            Some(b) => (b.lower.time, b.upper.time),
            None => {
                return Err(TemporalError::Failed {
                    stream: self.descriptor.name.clone(),
                })
            }
        };
        if t > upper {
            self.advance(io, t, time)?;
        } else if t < lower {
            self.reseek(io, t, time)?;
        }

        if self.last_reload.is_none() {
            self.last_reload = Some(time);
        }

        match &self.bracket {
            Some(bracket) => Ok(bracket.evaluate(self.descriptor.interpolation, t)),
            None => Err(TemporalError::Failed {
                stream: self.descriptor.name.clone(),
            }),
        }
    }

    /// Close the stream's cached file handle.
    pub fn finalize(&mut self, io: &mut DistributedIo) {
        io.release(&self.descriptor.name);
        debug!(stream = %self.descriptor.name, loads = self.loads, "Stream finalized");
    }

    fn refresh_due(&self, time: DateTime<Utc>) -> bool {
        self.descriptor.refresh > chrono::Duration::zero()
            && self
                .last_reload
                .is_some_and(|last| time - last >= self.descriptor.refresh)
    }

    fn refresh(&mut self, io: &mut DistributedIo, time: DateTime<Utc>) -> Result<()> {
        let Some((lower, upper)) = self.bracket.as_ref().map(|b| (b.lower.record(), b.upper.record()))
        else {
            return Err(TemporalError::Failed {
                stream: self.descriptor.name.clone(),
            });
        };

        debug!(stream = %self.descriptor.name, %time, "Refresh interval elapsed, reloading bracket");
        self.axes.clear();
        let upper = (upper != lower).then_some(upper);
        self.replace_bracket(io, lower, upper, time)
    }

    /// Move the bracket forward so it covers `t`.
    fn advance(&mut self, io: &mut DistributedIo, t: DateTime<Utc>, time: DateTime<Utc>) -> Result<()> {
        let Some(current) = self.bracket.take() else {
            return Err(TemporalError::Failed {
                stream: self.descriptor.name.clone(),
            });
        };
        let (lower, upper) = match self.covering(io, t) {
            Ok(pair) => pair,
            Err(err) => return Err(self.fail(err)),
        };

        if lower != current.upper.record() {
            debug!(
                stream = %self.descriptor.name,
                from = %current.upper.time,
                to = %lower.time,
                "Jumped past next snapshot, loading covering pair"
            );
            return self.replace_bracket(io, lower, upper, time);
        }

        let Some(upper) = upper else {
            self.bracket = Some(TimeBracket {
                lower: current.upper.clone(),
                upper: current.upper,
            });
            return Ok(());
        };
        match self.load_snapshot(io, upper) {
            Ok(next) => {
                self.bracket = Some(TimeBracket {
                    lower: current.upper,
                    upper: next,
                });
                self.state = WindowState::Loaded;
                self.last_reload = Some(time);
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Load the pair covering `t`, which lies before the current bracket.
    fn reseek(&mut self, io: &mut DistributedIo, t: DateTime<Utc>, time: DateTime<Utc>) -> Result<()> {
        debug!(stream = %self.descriptor.name, %t, "Time before bracket, reseeking");
        match self.covering(io, t) {
            Ok((lower, upper)) => self.replace_bracket(io, lower, upper, time),
            Err(err) => Err(self.fail(err)),
        }
    }

    fn replace_bracket(
        &mut self,
        io: &mut DistributedIo,
        lower: Record,
        upper: Option<Record>,
        time: DateTime<Utc>,
    ) -> Result<()> {
        match self.load_pair(io, lower, upper) {
            Ok(bracket) => {
                self.bracket = Some(bracket);
                self.state = WindowState::Loaded;
                self.last_reload = Some(time);
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// The last stored record at or before `t` and the first one after it.
    ///
    /// Both are searched within two nominal steps of `t`; no upper record
    /// means `t` lies past the last record and the lower one is held.
    fn covering(
        &mut self,
        io: &mut DistributedIo,
        t: DateTime<Utc>,
    ) -> std::result::Result<(Record, Option<Record>), ArrayIoError> {
        let window = self.descriptor.window;
        let reach = self.descriptor.frequency * 2;
        let tolerance = Duration::milliseconds(TIME_TOLERANCE_MS);

        let floor = t.checked_sub_signed(reach).map_or(window.start, |f| f.max(window.start));
        let lower = self.search(io, t, floor, |times| {
            times
                .iter()
                .copied()
                .filter(|r| *r >= window.start - tolerance && *r <= t + tolerance)
                .max()
        })?;
        let Some(lower) = lower else {
            return Err(ArrayIoError::TimeNotFound {
                path: self.file_for(t).display().to_string(),
                time: t.to_rfc3339(),
            });
        };

        let ceiling = lower.time.checked_add_signed(reach).map_or(window.end, |c| c.min(window.end));
        let after = lower.time + tolerance;
        let upper = self.search(io, t, ceiling, |times| {
            times
                .iter()
                .copied()
                .filter(|r| *r > after && *r <= window.end + tolerance)
                .min()
        })?;
        Ok((lower, upper))
    }

    /// Walk the files resolved from `from` toward `limit` and return the
    /// first record `pick` selects.
    ///
    /// Files that cannot be opened are skipped; when nothing is found the
    /// first open failure is returned.
    fn search<F>(
        &mut self,
        io: &mut DistributedIo,
        from: DateTime<Utc>,
        limit: DateTime<Utc>,
        pick: F,
    ) -> std::result::Result<Option<Record>, ArrayIoError>
    where
        F: Fn(&[DateTime<Utc>]) -> Option<DateTime<Utc>>,
    {
        let mut seen: Vec<PathBuf> = Vec::new();
        let mut skipped = None;

        for at in lookup_times(from, limit, self.descriptor.frequency) {
            let path = self.file_for(at);
            if seen.contains(&path) {
                continue;
            }
            match self.time_axis(io, &path) {
                Ok(times) => {
                    if let Some(time) = pick(&times) {
                        return Ok(Some(Record { path, time }));
                    }
                }
                Err(err @ ArrayIoError::Open { .. }) => {
                    debug!(stream = %self.descriptor.name, path = %path.display(), error = %err, "Skipping unreadable file");
                    skipped.get_or_insert(err);
                }
                Err(err) => return Err(err),
            }
            seen.push(path);
        }

        match skipped {
            Some(err) => {
                warn!(stream = %self.descriptor.name, %from, error = %err, "No record found");
                Err(err)
            }
            None => Ok(None),
        }
    }

    fn file_for(&self, t: DateTime<Utc>) -> PathBuf {
        PathBuf::from(self.descriptor.datafile.resolve(t))
    }

    fn time_axis(
        &mut self,
        io: &mut DistributedIo,
        path: &Path,
    ) -> std::result::Result<Vec<DateTime<Utc>>, ArrayIoError> {
        if let Some(times) = self.axes.get(path) {
            return Ok(times.clone());
        }

        let kind = self.descriptor.file_kind;
        let times = if kind.is_collective() {
            io.open_collective(path, AccessMode::Read)?;
            let times = io.time_axis(&self.descriptor.name, path, kind);
            let closed = io.close_collective(path);
            let times = times?;
            closed?;
            times
        } else {
            io.time_axis(&self.descriptor.name, path, kind)?
        };

        self.axes.insert(path.to_path_buf(), times.clone());
        Ok(times)
    }

    fn load_pair(
        &mut self,
        io: &mut DistributedIo,
        lower: Record,
        upper: Option<Record>,
    ) -> std::result::Result<TimeBracket, ArrayIoError> {
        let lower = self.load_snapshot(io, lower)?;
        let upper = match upper {
            Some(record) => self.load_snapshot(io, record)?,
            None => lower.clone(),
        };
        Ok(TimeBracket { lower, upper })
    }

    fn load_snapshot(
        &mut self,
        io: &mut DistributedIo,
        record: Record,
    ) -> std::result::Result<Snapshot, ArrayIoError> {
        let Record { path, time } = record;
        let collective = self.descriptor.file_kind.is_collective();

        if collective {
            io.open_collective(&path, AccessMode::Read)?;
        }

        let mut fields = Vec::with_capacity(self.descriptor.fields.len());
        let mut failure = None;
        for field in &self.descriptor.fields {
            let request = ReadRequest {
                owner: &self.descriptor.name,
                path: &path,
                kind: self.descriptor.file_kind,
                field,
                time,
            };
            match io.read_hyperslab(&request) {
                Ok(values) => fields.push(values),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        if collective {
            let closed = io.close_collective(&path);
            if failure.is_none() {
                closed?;
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }

        self.loads += 1;
        debug!(
            stream = %self.descriptor.name,
            %time,
            path = %path.display(),
            "Loaded snapshot"
        );
        Ok(Snapshot { path, time, fields })
    }

    fn fail(&mut self, err: ArrayIoError) -> TemporalError {
        error!(stream = %self.descriptor.name, error = %err, "Stream failed");
        self.state = WindowState::Error;
        self.bracket = None;
        TemporalError::io(&self.descriptor.name, err)
    }
}

impl Snapshot {
    fn record(&self) -> Record {
        Record {
            path: self.path.clone(),
            time: self.time,
        }
    }
}

/// Times from `from` to `limit` inclusive, half a nominal step apart.
///
/// Half steps keep a file whose records lie less than one step away from
/// being stepped over when the real spacing is uneven.
fn lookup_times(
    from: DateTime<Utc>,
    limit: DateTime<Utc>,
    frequency: Duration,
) -> impl Iterator<Item = DateTime<Utc>> {
    let stride = (frequency / 2).max(Duration::seconds(1));
    let forward = limit >= from;
    std::iter::successors(Some(from), move |&t| {
        if t == limit {
            return None;
        }
        let next = if forward {
            t.checked_add_signed(stride).map_or(limit, |n| n.min(limit))
        } else {
            t.checked_sub_signed(stride).map_or(limit, |n| n.max(limit))
        };
        Some(next)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use fieldio_common::{
        FieldDescriptor, FileKind, FilenameTemplate, InterpolationPolicy, TimeRange, ValidYears,
    };

    fn descriptor(hours: i64, frequency: Duration) -> InputStreamDescriptor {
        let start = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        InputStreamDescriptor {
            name: "atm".to_string(),
            datafile: FilenameTemplate::new("atm.zarr"),
            file_kind: FileKind::Serial,
            mode: AccessMode::Read,
            window: TimeRange::new(start, start + Duration::hours(hours)),
            frequency,
            refresh: Duration::zero(),
            climatology: None,
            extrapolate: false,
            interpolation: InterpolationPolicy::Linear,
            fields: vec![FieldDescriptor::new("tas", "K", -1)],
        }
    }

    #[test]
    fn test_lookup_times_reach_limit_both_ways() {
        let start = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let forward: Vec<_> = lookup_times(start, start + Duration::hours(5), Duration::hours(4)).collect();
        assert_eq!(
            forward,
            vec![
                start,
                start + Duration::hours(2),
                start + Duration::hours(4),
                start + Duration::hours(5)
            ]
        );

        let backward: Vec<_> = lookup_times(start, start - Duration::hours(3), Duration::hours(6)).collect();
        assert_eq!(backward, vec![start, start - Duration::hours(3)]);

        assert_eq!(lookup_times(start, start, Duration::hours(1)).count(), 1);
    }

    #[test]
    fn test_monthly_files_not_stepped_over() {
        let mut desc = descriptor(24 * 366, Duration::days(30));
        desc.datafile = FilenameTemplate::new("mon_%y4%m2.zarr");
        let window = TemporalWindow::new(desc);
        let jan = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();

        let files: Vec<_> = lookup_times(jan, jan + Duration::days(60), Duration::days(30))
            .map(|t| window.file_for(t))
            .collect();
        assert!(files.contains(&PathBuf::from("mon_200002.zarr")));
    }

    #[test]
    fn test_climatology_maps_into_valid_years() {
        let mut desc = descriptor(24, Duration::hours(6));
        desc.climatology = Some(ValidYears::new(2000, 2000));
        let window = TemporalWindow::new(desc);

        let later = Utc.with_ymd_and_hms(2003, 1, 1, 6, 0, 0).unwrap();
        assert_eq!(
            window.data_time(later),
            Utc.with_ymd_and_hms(2000, 1, 1, 6, 0, 0).unwrap()
        );
        let earlier = Utc.with_ymd_and_hms(1997, 1, 1, 6, 0, 0).unwrap();
        assert_eq!(window.data_time(earlier), window.data_time(later));
    }

    #[test]
    fn test_value_before_initialize() {
        let grid = fieldio_common::GridSpec::global(2, 2);
        let mut io = test_utils::whole_grid_io(grid);
        let mut window = TemporalWindow::new(descriptor(12, Duration::hours(6)));
        let start = window.descriptor().window.start;

        let err = window.value_at(&mut io, start).unwrap_err();
        assert!(matches!(err, TemporalError::NotInitialized { .. }));
        assert_eq!(window.diagnostics().state, WindowState::Uninitialized);
    }
}
