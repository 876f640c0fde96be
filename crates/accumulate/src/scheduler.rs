//! Flush boundary tracking and emission for one output collection.

use std::collections::BTreeSet;
use std::path::PathBuf;

use array_io::{DistributedIo, WriteRequest};
use chrono::{DateTime, Duration, Utc};
use fieldio_common::{AccessMode, OutputCollectionDescriptor};
use tracing::{debug, info, warn};

use crate::engine::AccumulationEngine;
use crate::error::AccumulationError;

/// A field whose aggregates could not be emitted or written.
#[derive(Debug)]
pub struct FieldFailure {
    pub field: String,
    pub error: AccumulationError,
}

/// Outcome of one flush of a collection.
#[derive(Debug)]
pub struct FlushReport {
    pub collection: String,
    /// Time stamped on the written records.
    pub time: DateTime<Utc>,
    pub path: PathBuf,
    /// Variables written successfully.
    pub written: Vec<String>,
    pub failures: Vec<FieldFailure>,
    /// Boundaries passed without their own flush because one step jumped
    /// over several.
    pub skipped_boundaries: usize,
}

impl FlushReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Decides when a collection flushes and writes its aggregates.
///
/// Boundaries lie on `run_start + k * frequency`; `next_flush` only ever
/// moves along that grid, so step jitter never accumulates into drift.
///
/// A field whose flush or write fails is in error from then on: its
/// samples are discarded at later flushes and every report names it.
pub struct OutputScheduler {
    descriptor: OutputCollectionDescriptor,
    run_start: DateTime<Utc>,
    next_flush: DateTime<Utc>,
    flushes: usize,
    failed: BTreeSet<String>,
}

impl OutputScheduler {
    pub fn new(descriptor: OutputCollectionDescriptor, run_start: DateTime<Utc>) -> Self {
        let next_flush = run_start + descriptor.frequency;
        Self {
            descriptor,
            run_start,
            next_flush,
            flushes: 0,
            failed: BTreeSet::new(),
        }
    }

    pub fn descriptor(&self) -> &OutputCollectionDescriptor {
        &self.descriptor
    }

    pub fn next_flush(&self) -> DateTime<Utc> {
        self.next_flush
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// Fields in error, in name order.
    pub fn failed_fields(&self) -> impl Iterator<Item = &str> {
        self.failed.iter().map(String::as_str)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_flush
    }

    /// First boundary strictly after `t`.
    pub fn boundary_after(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let step = self.descriptor.frequency.num_milliseconds();
        if t < self.run_start || step <= 0 {
            return self.run_start + self.descriptor.frequency;
        }
        let elapsed = (t - self.run_start).num_milliseconds();
        let k = elapsed / step + 1;
        self.run_start + Duration::milliseconds(k * step)
    }

    /// Flush if `now` reached the next boundary. The records are stamped
    /// with the boundary time.
    pub fn step(
        &mut self,
        now: DateTime<Utc>,
        engine: &mut AccumulationEngine,
        io: &mut DistributedIo,
    ) -> Option<FlushReport> {
        if !self.is_due(now) {
            return None;
        }

        let boundary = self.next_flush;
        let next = self.boundary_after(now);
        let passed = ((next - boundary).num_milliseconds()
            / self.descriptor.frequency.num_milliseconds().max(1)) as usize;
        let skipped = passed.saturating_sub(1);
        if skipped > 0 {
            warn!(
                collection = %self.descriptor.name,
                %boundary,
                %now,
                skipped,
                "Step passed several output boundaries, flushing once"
            );
        }

        let mut report = self.emit(boundary, engine, io, false);
        report.skipped_boundaries = skipped;
        self.next_flush = next;
        Some(report)
    }

    /// Flush whatever was deposited since the last boundary, stamped with
    /// `now`. Empty buffers are skipped; `None` if nothing was pending.
    pub fn finalize(
        &mut self,
        now: DateTime<Utc>,
        engine: &mut AccumulationEngine,
        io: &mut DistributedIo,
    ) -> Option<FlushReport> {
        let pending = engine
            .field_names()
            .any(|field| engine.pending(field).map_or(false, |n| n > 0));
        if !pending {
            debug!(collection = %self.descriptor.name, "Nothing pending at finalize");
            return None;
        }
        Some(self.emit(now, engine, io, true))
    }

    fn emit(
        &mut self,
        time: DateTime<Utc>,
        engine: &mut AccumulationEngine,
        io: &mut DistributedIo,
        skip_empty: bool,
    ) -> FlushReport {
        let path = PathBuf::from(self.descriptor.filename.resolve(time));
        let name = self.descriptor.name.clone();
        let mut report = FlushReport {
            collection: name.clone(),
            time,
            path: path.clone(),
            written: Vec::new(),
            failures: Vec::new(),
            skipped_boundaries: 0,
        };

        let collective = self.descriptor.file_kind.is_collective();
        let session = if collective {
            io.open_collective(&path, AccessMode::Write)
        } else {
            Ok(())
        };

        for field in &self.descriptor.fields {
            if skip_empty && engine.pending(&field.name).map_or(true, |n| n == 0) {
                continue;
            }

            if self.failed.contains(&field.name) {
                if let Err(error) = engine.discard(&field.name) {
                    warn!(collection = %name, field = %field.name, error = %error, "Discard failed");
                }
                report.failures.push(FieldFailure {
                    field: field.name.clone(),
                    error: AccumulationError::FieldFailed {
                        collection: name.clone(),
                        field: field.name.clone(),
                    },
                });
                continue;
            }

            let aggregates = match engine.flush(&field.name, time) {
                Ok(aggregates) => aggregates,
                Err(error) => {
                    warn!(
                        collection = %name,
                        field = %field.name,
                        %error,
                        "Output field flushed with no samples"
                    );
                    self.failed.insert(field.name.clone());
                    report.failures.push(FieldFailure {
                        field: field.name.clone(),
                        error,
                    });
                    continue;
                }
            };

            if let Err(err) = &session {
                self.failed.insert(field.name.clone());
                report.failures.push(FieldFailure {
                    field: field.name.clone(),
                    error: AccumulationError::Write {
                        collection: name.clone(),
                        variable: field.name.clone(),
                        source: array_io::ArrayIoError::collective(&path, err.to_string()),
                    },
                });
                continue;
            }

            for (statistic, values) in aggregates {
                let variable = statistic.variable_name(&field.name);
                let request = WriteRequest {
                    owner: &name,
                    path: &path,
                    kind: self.descriptor.file_kind,
                    variable: &variable,
                    field,
                    time,
                    values: &values,
                };
                match io.write_hyperslab(&request) {
                    Ok(()) => report.written.push(variable),
                    Err(source) => {
                        warn!(
                            collection = %name,
                            %variable,
                            error = %source,
                            "Output write failed"
                        );
                        self.failed.insert(field.name.clone());
                        report.failures.push(FieldFailure {
                            field: field.name.clone(),
                            error: AccumulationError::Write {
                                collection: name.clone(),
                                variable,
                                source,
                            },
                        });
                    }
                }
            }
        }

        if collective && session.is_ok() {
            if let Err(source) = io.close_collective(&path) {
                report.failures.push(FieldFailure {
                    field: String::new(),
                    error: AccumulationError::Write {
                        collection: name.clone(),
                        variable: String::new(),
                        source,
                    },
                });
            }
        }

        self.flushes += 1;
        info!(
            collection = %name,
            %time,
            path = %path.display(),
            written = report.written.len(),
            failed = report.failures.len(),
            "Flushed output collection"
        );
        report
    }
}
