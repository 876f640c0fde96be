//! Run file loader for the driver.
//!
//! A run file names the model clock, the grid and the stream/collection
//! records:
//!
//! ```yaml
//! start_time: 2000-01-01T00:00:00
//! stop_time: 2000-01-02
//! time_step: 30m
//! grid: { nx: 73, ny: 37 }
//! regrid: bilinear
//! streams:
//!   - NAME: atm
//!     DATAFILE: ${DATA_DIR:-/data}/atm_%y4%m2%d2.zarr
//!     ...
//! collections: []
//! ```
//!
//! Supports environment variable substitution using `${VAR}` and
//! `${VAR:-default}` syntax.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use fieldio_common::registry::ConfigValue;
use fieldio_common::time::{parse_interval, parse_time};
use fieldio_common::{ConfigRecord, GridSpec, Registry};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct RunFile {
    pub start_time: String,
    pub stop_time: String,
    pub time_step: ConfigValue,
    pub grid: GridConfig,
    /// `none`, `bilinear` or `nearest`.
    #[serde(default)]
    pub regrid: Option<String>,
    #[serde(default)]
    pub streams: Vec<ConfigRecord>,
    #[serde(default)]
    pub collections: Vec<ConfigRecord>,
}

/// A global regular lat/lon grid.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct GridConfig {
    pub nx: usize,
    pub ny: usize,
}

/// The parsed clock of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clock {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub step: Duration,
}

impl Clock {
    /// Step times after the start, up to and including the stop time.
    pub fn steps(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        (1..)
            .map(move |k| self.start + self.step * k)
            .take_while(move |t| *t <= self.stop)
    }
}

impl RunFile {
    pub fn clock(&self) -> Result<Clock> {
        let start = parse_time(&self.start_time).context("Invalid start_time")?;
        let stop = parse_time(&self.stop_time).context("Invalid stop_time")?;
        let step = parse_interval(&self.time_step.to_string()).context("Invalid time_step")?;
        anyhow::ensure!(stop >= start, "stop_time {} is before start_time {}", stop, start);
        anyhow::ensure!(step > Duration::zero(), "time_step must be positive");
        Ok(Clock { start, stop, step })
    }

    pub fn grid(&self) -> Result<GridSpec> {
        anyhow::ensure!(
            self.grid.nx > 0 && self.grid.ny > 0,
            "grid must have at least one point, got {}x{}",
            self.grid.nx,
            self.grid.ny
        );
        Ok(GridSpec::global(self.grid.nx, self.grid.ny))
    }

    pub fn registry(&self) -> Result<Registry> {
        Registry::from_records(&self.streams, &self.collections).context("Invalid stream or collection record")
    }
}

/// Load and parse a run file with environment variable substitution.
pub fn load_run_file<P: AsRef<Path>>(path: P) -> Result<RunFile> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read run file from {:?}", path.as_ref()))?;

    parse_run_file(&content)
        .with_context(|| format!("Failed to parse run file from {:?}", path.as_ref()))
}

pub fn parse_run_file(content: &str) -> Result<RunFile> {
    let expanded = expand_env_vars(content)?;
    let run: RunFile = serde_yaml::from_str(&expanded)?;
    run.clock()?;
    run.grid()?;
    Ok(run)
}

/// Expand `${VAR}` and `${VAR:-default}` references.
fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .with_context(|| format!("Unclosed variable substitution: ${{{}", after))?;
        result.push_str(&resolve_var_expr(&after[..end])?);
        rest = &after[end + 1..];
    }
    result.push_str(rest);

    Ok(result)
}

fn resolve_var_expr(expr: &str) -> Result<String> {
    if let Some((var_name, default)) = expr.split_once(":-") {
        match std::env::var(var_name.trim()) {
            Ok(val) if !val.is_empty() => Ok(val),
            _ => Ok(default.to_string()),
        }
    } else {
        std::env::var(expr.trim()).with_context(|| format!("Environment variable {} not set", expr))
    }
}
