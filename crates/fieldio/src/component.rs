//! The initialize/step/finalize component.

use accumulate::{AccumulationEngine, FlushReport, OutputScheduler};
use array_io::{DatasetBackend, DistributedIo, ZarrBackend};
use chrono::{DateTime, Utc};
use fieldio_common::Registry;
use temporal::{StreamDiagnostics, TemporalWindow};
use tracing::{debug, info, warn};

use crate::context::ModelContext;
use crate::error::{ComponentError, Result, StepFailure};
use crate::fields::FieldExchange;

struct Collection {
    engine: AccumulationEngine,
    scheduler: OutputScheduler,
}

/// What a successful step did.
#[derive(Debug)]
pub struct StepOutcome {
    pub time: DateTime<Utc>,
    /// Stream fields exported to the host.
    pub exported: usize,
    /// Output samples pulled from the host and deposited.
    pub deposited: usize,
    pub flushes: Vec<FlushReport>,
}

/// Reads input streams and writes output collections for one process.
pub struct IoComponent {
    io: DistributedIo,
    streams: Vec<TemporalWindow>,
    collections: Vec<Collection>,
    last_time: Option<DateTime<Utc>>,
    finalized: bool,
}

impl IoComponent {
    /// Validate `registry`, set up the adapter over Zarr datasets and load
    /// the first bracket of every stream.
    pub fn initialize(registry: &Registry, context: &ModelContext) -> Result<Self> {
        let backend = ZarrBackend::new(context.io_config.clone());
        Self::initialize_with_backend(registry, context, Box::new(backend))
    }

    pub fn initialize_with_backend(
        registry: &Registry,
        context: &ModelContext,
        backend: Box<dyn DatasetBackend>,
    ) -> Result<Self> {
        registry.validate()?;

        let mut io = DistributedIo::new(
            backend,
            context.communicator.clone(),
            context.grid,
            context.decomposition.clone(),
            context.io_config.clone(),
        )?;
        if let Some(regridder) = &context.regridder {
            io = io.with_regridder(regridder.clone());
        }

        let mut streams = Vec::with_capacity(registry.streams.len());
        for descriptor in &registry.streams {
            let mut window = TemporalWindow::new(descriptor.clone());
            window.initialize(&mut io)?;
            streams.push(window);
        }

        let collections = registry
            .collections
            .iter()
            .map(|descriptor| Collection {
                engine: AccumulationEngine::new(descriptor, &context.decomposition),
                scheduler: OutputScheduler::new(descriptor.clone(), context.start_time),
            })
            .collect();

        info!(
            rank = context.rank(),
            streams = registry.streams.len(),
            collections = registry.collections.len(),
            start = %context.start_time,
            "IO component initialized"
        );

        Ok(Self {
            io,
            streams,
            collections,
            last_time: None,
            finalized: false,
        })
    }

    /// Advance to model time `time`: export every stream's fields, deposit
    /// the host's output samples, flush collections at their boundaries.
    ///
    /// Failures of single streams or output fields do not stop the rest of
    /// the step; they come back together as [`ComponentError::Step`] along
    /// with the outcome of everything else.
    pub fn step(&mut self, time: DateTime<Utc>, fields: &mut dyn FieldExchange) -> Result<StepOutcome> {
        if self.finalized {
            return Err(ComponentError::Finalized);
        }

        let mut failures = Vec::new();
        let mut outcome = StepOutcome {
            time,
            exported: 0,
            deposited: 0,
            flushes: Vec::new(),
        };

        for window in &mut self.streams {
            match window.value_at(&mut self.io, time) {
                Ok(values) => {
                    for (field, values) in window.descriptor().fields.iter().zip(values) {
                        fields.export(window.name(), field, time, values);
                        outcome.exported += 1;
                    }
                }
                Err(err) => failures.push(StepFailure::Stream(err)),
            }
        }

        for collection in &mut self.collections {
            let name = collection.scheduler.descriptor().name.clone();
            for field in &collection.scheduler.descriptor().fields {
                let Some(values) = fields.import(&name, field) else {
                    continue;
                };
                match collection.engine.deposit(&field.name, values, time) {
                    Ok(()) => outcome.deposited += 1,
                    Err(error) => failures.push(StepFailure::Output {
                        collection: name.clone(),
                        field: field.name.clone(),
                        error,
                    }),
                }
            }

            if let Some(mut report) = collection.scheduler.step(time, &mut collection.engine, &mut self.io) {
                failures.extend(drain_failures(&mut report));
                outcome.flushes.push(report);
            }
        }

        self.last_time = Some(time);
        debug!(
            %time,
            exported = outcome.exported,
            deposited = outcome.deposited,
            flushes = outcome.flushes.len(),
            failures = failures.len(),
            "Step complete"
        );

        if failures.is_empty() {
            Ok(outcome)
        } else {
            Err(ComponentError::Step { outcome, failures })
        }
    }

    /// Push a sample of `field` into `collection` directly.
    pub fn deposit(
        &mut self,
        collection: &str,
        field: &str,
        values: &[f64],
        time: DateTime<Utc>,
    ) -> Result<()> {
        if self.finalized {
            return Err(ComponentError::Finalized);
        }
        let target = self
            .collections
            .iter_mut()
            .find(|c| c.engine.collection() == collection)
            .ok_or_else(|| ComponentError::UnknownCollection(collection.to_string()))?;
        target.engine.deposit(field, values, time)?;
        Ok(())
    }

    /// Flush partially filled windows at the last stepped time, release
    /// stream handles and close the adapter.
    pub fn finalize(&mut self) -> Result<Vec<FlushReport>> {
        if self.finalized {
            return Err(ComponentError::Finalized);
        }
        self.finalized = true;

        let mut failures = Vec::new();
        let mut reports = Vec::new();
        match self.last_time {
            Some(time) => {
                for collection in &mut self.collections {
                    if let Some(mut report) =
                        collection
                            .scheduler
                            .finalize(time, &mut collection.engine, &mut self.io)
                    {
                        failures.extend(drain_failures(&mut report));
                        reports.push(report);
                    }
                }
            }
            None => warn!("Finalize before any step, nothing to flush"),
        }

        for window in &mut self.streams {
            window.finalize(&mut self.io);
        }
        self.io.close_all();

        info!(
            flushes = reports.len(),
            failures = failures.len(),
            "IO component finalized"
        );

        if failures.is_empty() {
            Ok(reports)
        } else {
            Err(ComponentError::Finalize { failures })
        }
    }

    pub fn stream_diagnostics(&self) -> Vec<StreamDiagnostics> {
        self.streams.iter().map(TemporalWindow::diagnostics).collect()
    }

    /// Next output boundary of `collection`.
    pub fn next_flush(&self, collection: &str) -> Option<DateTime<Utc>> {
        self.collections
            .iter()
            .find(|c| c.engine.collection() == collection)
            .map(|c| c.scheduler.next_flush())
    }

    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.last_time
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

fn drain_failures(report: &mut FlushReport) -> Vec<StepFailure> {
    let collection = report.collection.clone();
    report
        .failures
        .drain(..)
        .map(|failure| StepFailure::Output {
            collection: collection.clone(),
            field: failure.field,
            error: failure.error,
        })
        .collect()
}
