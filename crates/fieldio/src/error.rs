//! Error types for the I/O component.

use accumulate::AccumulationError;
use array_io::ArrayIoError;
use fieldio_common::ConfigError;
use temporal::TemporalError;
use thiserror::Error;

use crate::component::StepOutcome;

/// One failure inside a step or finalize that did not stop the others.
#[derive(Error, Debug)]
pub enum StepFailure {
    #[error(transparent)]
    Stream(TemporalError),

    #[error("collection {collection}, field {field}: {error}")]
    Output {
        collection: String,
        field: String,
        #[source]
        error: AccumulationError,
    },
}

#[derive(Error, Debug)]
pub enum ComponentError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] ArrayIoError),

    #[error("stream error: {0}")]
    Stream(#[from] TemporalError),

    #[error("accumulation error: {0}")]
    Accumulation(#[from] AccumulationError),

    /// Some streams or output fields failed during a step. `outcome` holds
    /// what the rest of the step did, including flushes that succeeded.
    #[error("step at {}: {} failure(s), first: {}", outcome.time, failures.len(), first_message(failures))]
    Step {
        outcome: StepOutcome,
        failures: Vec<StepFailure>,
    },

    /// Some output fields failed during finalize.
    #[error("finalize: {} failure(s), first: {}", failures.len(), first_message(failures))]
    Finalize { failures: Vec<StepFailure> },

    #[error("unknown collection {0}")]
    UnknownCollection(String),

    #[error("component already finalized")]
    Finalized,
}

fn first_message(failures: &[StepFailure]) -> String {
    failures
        .first()
        .map(|f| f.to_string())
        .unwrap_or_default()
}

impl ComponentError {
    /// Failures carried by a step or finalize error.
    pub fn failures(&self) -> &[StepFailure] {
        match self {
            Self::Step { failures, .. } | Self::Finalize { failures } => failures,
            _ => &[],
        }
    }

    /// The partial outcome of a step that had failures.
    pub fn outcome(&self) -> Option<&StepOutcome> {
        match self {
            Self::Step { outcome, .. } => Some(outcome),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ComponentError>;
