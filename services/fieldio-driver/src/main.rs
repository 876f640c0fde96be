//! Field I/O driver.
//!
//! Loads a YAML run file, initializes the I/O component on a single process
//! and steps it over the model clock. Exported stream values are offered
//! back as output samples on the next step, so every collection field that
//! shares a name with a stream field gets accumulated and written.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use array_io::{ArrayIoConfig, BilinearRegridder, NearestRegridder};
use clap::Parser;
use fieldio::{ComponentError, FlushReport, IoComponent, InMemoryFields, ModelContext};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::RunFile;

#[derive(Parser, Debug)]
#[command(name = "fieldio-driver")]
#[command(about = "Step the field I/O component over a model clock")]
struct Args {
    /// Run file path
    #[arg(short, long, env = "FIELDIO_RUN_FILE")]
    run_file: PathBuf,

    /// Log level, used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit JSON logs
    #[arg(long)]
    json: bool,

    /// Stop after this many steps
    #[arg(long)]
    max_steps: Option<usize>,
}

/// Counts of one driver run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct RunSummary {
    steps: usize,
    failed_steps: usize,
    flushes: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level, args.json)?;

    info!(run_file = %args.run_file.display(), "Starting field I/O driver");
    let run_file = config::load_run_file(&args.run_file)?;
    let summary = run(&run_file, args.max_steps)?;

    info!(
        steps = summary.steps,
        failed_steps = summary.failed_steps,
        flushes = summary.flushes,
        "Run complete"
    );
    if summary.failed_steps > 0 {
        anyhow::bail!("{} of {} steps reported failures", summary.failed_steps, summary.steps);
    }
    Ok(())
}

fn init_tracing(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn run(run_file: &RunFile, max_steps: Option<usize>) -> Result<RunSummary> {
    let clock = run_file.clock()?;
    let registry = run_file.registry()?;

    let mut context =
        ModelContext::single(run_file.grid()?, clock.start).with_io_config(ArrayIoConfig::from_env());
    match run_file.regrid.as_deref() {
        None | Some("none") => {}
        Some("bilinear") => context = context.with_regridder(Arc::new(BilinearRegridder)),
        Some("nearest") => context = context.with_regridder(Arc::new(NearestRegridder)),
        Some(other) => anyhow::bail!("Unknown regrid method: {}", other),
    }

    let mut component = IoComponent::initialize(&registry, &context)?;
    let mut fields = InMemoryFields::new();
    let mut summary = RunSummary::default();

    for time in clock.steps().take(max_steps.unwrap_or(usize::MAX)) {
        match component.step(time, &mut fields) {
            Ok(outcome) => summary.flushes += log_flushes(&outcome.flushes),
            Err(ComponentError::Step { outcome, failures }) => {
                for failure in &failures {
                    warn!(%time, error = %failure, "Step failure");
                }
                summary.flushes += log_flushes(&outcome.flushes);
                summary.failed_steps += 1;
            }
            Err(err) => return Err(err.into()),
        }
        fields.mirror_exports();
        summary.steps += 1;
    }

    match component.finalize() {
        Ok(reports) => summary.flushes += reports.len(),
        Err(ComponentError::Finalize { failures }) => {
            for failure in &failures {
                error!(error = %failure, "Finalize failure");
            }
            summary.failed_steps += 1;
        }
        Err(err) => return Err(err.into()),
    }

    for diag in component.stream_diagnostics() {
        info!(
            stream = %diag.name,
            state = ?diag.state,
            loads = diag.loads,
            "Stream summary"
        );
    }

    Ok(summary)
}

fn log_flushes(reports: &[FlushReport]) -> usize {
    for report in reports {
        info!(
            collection = %report.collection,
            time = %report.time,
            path = %report.path.display(),
            written = report.written.len(),
            failed = report.failures.len(),
            "Output written"
        );
    }
    reports.len()
}
