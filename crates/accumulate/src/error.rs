//! Error types for output accumulation.

use array_io::ArrayIoError;
use fieldio_common::Statistic;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AccumulationError {
    /// Flush requested with nothing deposited since the last flush.
    #[error("{collection}/{field}: {statistic} flushed with no deposits")]
    BufferState {
        collection: String,
        field: String,
        statistic: Statistic,
    },

    /// Deposit length differs from the buffer length.
    #[error("{collection}/{field}: expected {expected} values, got {actual}")]
    ShapeMismatch {
        collection: String,
        field: String,
        expected: usize,
        actual: usize,
    },

    /// The field failed at an earlier flush and is no longer written.
    #[error("{collection}/{field} failed at an earlier flush")]
    FieldFailed { collection: String, field: String },

    #[error("collection {collection} has no field {field}")]
    UnknownField { collection: String, field: String },

    #[error("unknown collection {0}")]
    UnknownCollection(String),

    /// Writing an aggregate failed.
    #[error("{collection}/{variable}: {source}")]
    Write {
        collection: String,
        variable: String,
        #[source]
        source: ArrayIoError,
    },
}

impl AccumulationError {
    pub fn is_buffer_state(&self) -> bool {
        matches!(self, Self::BufferState { .. })
    }

    pub fn is_field_failed(&self) -> bool {
        matches!(self, Self::FieldFailed { .. })
    }
}

pub type Result<T> = std::result::Result<T, AccumulationError>;
