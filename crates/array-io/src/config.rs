//! Configuration for the distributed I/O adapter.

use serde::{Deserialize, Serialize};

/// Tuning knobs for [`DistributedIo`](crate::DistributedIo) and the Zarr
/// backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayIoConfig {
    /// Number of time records per chunk along the time axis of new arrays.
    pub time_chunk: usize,

    /// Retries after a failed open/read/write, each with a fresh handle.
    pub max_retries: u32,

    /// Keep one open handle per input stream between reads of the same file.
    pub cache_handles: bool,
}

impl Default for ArrayIoConfig {
    fn default() -> Self {
        Self {
            time_chunk: 1,
            max_retries: 1,
            cache_handles: true,
        }
    }
}

impl ArrayIoConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("FIELDIO_TIME_CHUNK") {
            if let Ok(size) = val.parse() {
                config.time_chunk = size;
            }
        }

        if let Ok(val) = std::env::var("FIELDIO_IO_RETRIES") {
            if let Ok(retries) = val.parse() {
                config.max_retries = retries;
            }
        }

        if let Ok(val) = std::env::var("FIELDIO_CACHE_HANDLES") {
            config.cache_handles = val.to_lowercase() == "true" || val == "1";
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.time_chunk == 0 {
            return Err("time_chunk must be > 0".to_string());
        }

        if self.max_retries > 1 {
            return Err("max_retries must be 0 or 1".to_string());
        }

        Ok(())
    }
}
