//! Error types for input streams.

use array_io::ArrayIoError;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemporalError {
    /// Requested time outside the stream window with extrapolation off.
    #[error("stream {stream}: time {time} outside [{start}, {end}]")]
    TimeRange {
        stream: String,
        time: DateTime<Utc>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// Loading a snapshot failed after the retry.
    #[error("stream {stream}: {source}")]
    Io {
        stream: String,
        #[source]
        source: ArrayIoError,
    },

    /// The stream failed earlier and is unusable.
    #[error("stream {stream} has failed")]
    Failed { stream: String },

    #[error("stream {stream} is not initialized")]
    NotInitialized { stream: String },

    #[error("stream {stream} is already initialized")]
    AlreadyInitialized { stream: String },
}

impl TemporalError {
    pub fn io(stream: &str, source: ArrayIoError) -> Self {
        Self::Io {
            stream: stream.to_string(),
            source,
        }
    }

    /// Name of the stream the error belongs to.
    pub fn stream(&self) -> &str {
        match self {
            Self::TimeRange { stream, .. }
            | Self::Io { stream, .. }
            | Self::Failed { stream }
            | Self::NotInitialized { stream }
            | Self::AlreadyInitialized { stream } => stream,
        }
    }
}

pub type Result<T> = std::result::Result<T, TemporalError>;
