//! Error types for configuration and time parsing.

use thiserror::Error;

/// Result type alias using ConfigError.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while turning configuration records into descriptors.
///
/// All of these are fatal at initialize: no file is touched once one of
/// them has been reported.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{record}: missing required key {key}")]
    MissingKey { record: String, key: String },

    #[error("{record}: invalid value for {key}: {message}")]
    InvalidValue {
        record: String,
        key: String,
        message: String,
    },

    #[error("{record}: {message}")]
    Inconsistent { record: String, message: String },

    #[error("duplicate {kind} name: {name}")]
    Duplicate { kind: &'static str, name: String },
}

impl ConfigError {
    pub fn missing(record: impl Into<String>, key: impl Into<String>) -> Self {
        Self::MissingKey {
            record: record.into(),
            key: key.into(),
        }
    }

    pub fn invalid(
        record: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            record: record.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn inconsistent(record: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Inconsistent {
            record: record.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeParseError {
    #[error("Invalid time format: {0}")]
    InvalidFormat(String),

    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    #[error("Invalid time units: {0}")]
    InvalidUnits(String),
}
