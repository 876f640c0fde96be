//! Output-side accumulation and scheduling.
//!
//! Every step the host deposits a sample of each output field. The
//! [`AccumulationEngine`] of a collection folds samples into one
//! [`AccumulationBuffer`] per field and statistic; the collection's
//! [`OutputScheduler`] decides when a boundary has been reached, flushes
//! the buffers and writes the aggregates through the I/O adapter.

pub mod buffer;
pub mod engine;
pub mod error;
pub mod scheduler;

pub use buffer::AccumulationBuffer;
pub use engine::AccumulationEngine;
pub use error::{AccumulationError, Result};
pub use scheduler::{FieldFailure, FlushReport, OutputScheduler};
