//! Common types shared by every fieldio crate.
//!
//! - [`registry`]: validated input stream and output collection descriptors,
//!   parsed once from key/value configuration records
//! - [`time`]: filename templates, climatology year wrapping, interval and
//!   CF time-unit parsing
//! - [`grid`]: the global grid shape and a process's decomposition slice

pub mod error;
pub mod grid;
pub mod registry;
pub mod time;

pub use error::{ConfigError, ConfigResult, TimeParseError};
pub use grid::{Decomposition, GridSpec};
pub use registry::{
    AccessMode, ConfigRecord, FieldDescriptor, FileKind, InputStreamDescriptor,
    InterpolationPolicy, OutputCollectionDescriptor, Registry, Statistic,
};
pub use time::{FilenameTemplate, TimeRange, TimeUnits, ValidYears};
