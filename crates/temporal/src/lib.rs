//! Temporal window management for input streams.
//!
//! A stream is a time-indexed sequence of archived snapshots, the records
//! its files hold between `start` and `end`. The nominal frequency only
//! locates the files. For each stream a [`TemporalWindow`] keeps the pair of
//! snapshots bracketing the current model time and evaluates the stream's
//! fields at any time inside that bracket:
//!
//! ```text
//! value_at(t)
//!   ├─► map t into the valid years (climatology)
//!   ├─► range-check against [start, end] (clamp if extrapolating)
//!   ├─► reload endpoints if the refresh interval elapsed
//!   ├─► t > t1: advance (shift or load covering pair)
//!   ├─► t < t0: reseek
//!   └─► interpolate per the stream's policy
//! ```

pub mod error;
pub mod interpolate;
pub mod window;

pub use error::{Result, TemporalError};
pub use interpolate::{interpolate, Snapshot, TimeBracket};
pub use window::{StreamDiagnostics, TemporalWindow, WindowState};
