//! Error types for hyperslab I/O.

use std::path::Path;

use thiserror::Error;

/// Errors that can occur while moving hyperslabs to and from array files.
#[derive(Error, Debug)]
pub enum ArrayIoError {
    /// Failed to open the array file.
    #[error("failed to open {path}: {message}")]
    Open { path: String, message: String },

    /// Failed to read a variable or the time axis.
    #[error("failed to read {variable} from {path}: {message}")]
    Read {
        path: String,
        variable: String,
        message: String,
    },

    /// Failed to write a variable or the time axis.
    #[error("failed to write {variable} to {path}: {message}")]
    Write {
        path: String,
        variable: String,
        message: String,
    },

    /// The variable is not present in the file.
    #[error("variable {variable} not found in {path}")]
    MissingVariable { path: String, variable: String },

    /// No time record matches the requested time.
    #[error("no record for {time} in {path}")]
    TimeNotFound { path: String, time: String },

    /// Collective access issued out of order (no session, wrong direction,
    /// or double open).
    #[error("collective access out of order on {path}: {message}")]
    CollectiveOrder { path: String, message: String },

    /// File grid incompatible with the target grid and no way to map it.
    #[error("{variable}: file grid {file_grid} incompatible with target grid {target_grid}")]
    DecompositionMismatch {
        variable: String,
        file_grid: String,
        target_grid: String,
    },

    /// Local buffer length does not match the decomposition slice.
    #[error("{variable}: expected {expected} local values, got {actual}")]
    ShapeMismatch {
        variable: String,
        expected: usize,
        actual: usize,
    },

    /// Invalid layout metadata in the file.
    #[error("invalid layout for {variable} in {path}: {message}")]
    InvalidLayout {
        path: String,
        variable: String,
        message: String,
    },

    /// The regridding capability failed.
    #[error("regridding error: {0}")]
    Regrid(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ArrayIoError {
    pub fn open(path: &Path, msg: impl Into<String>) -> Self {
        Self::Open {
            path: path.display().to_string(),
            message: msg.into(),
        }
    }

    pub fn read(path: &Path, variable: &str, msg: impl Into<String>) -> Self {
        Self::Read {
            path: path.display().to_string(),
            variable: variable.to_string(),
            message: msg.into(),
        }
    }

    pub fn write(path: &Path, variable: &str, msg: impl Into<String>) -> Self {
        Self::Write {
            path: path.display().to_string(),
            variable: variable.to_string(),
            message: msg.into(),
        }
    }

    pub fn collective(path: &Path, msg: impl Into<String>) -> Self {
        Self::CollectiveOrder {
            path: path.display().to_string(),
            message: msg.into(),
        }
    }

    pub fn invalid_layout(path: &Path, variable: &str, msg: impl Into<String>) -> Self {
        Self::InvalidLayout {
            path: path.display().to_string(),
            variable: variable.to_string(),
            message: msg.into(),
        }
    }

    /// Transient open/read/write failures get one retry with a fresh handle;
    /// everything else describes a condition a retry cannot fix.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Open { .. } | Self::Read { .. } | Self::Write { .. })
    }

    pub fn is_decomposition_mismatch(&self) -> bool {
        matches!(self, Self::DecompositionMismatch { .. })
    }
}

/// Result type for array I/O operations.
pub type Result<T> = std::result::Result<T, ArrayIoError>;
