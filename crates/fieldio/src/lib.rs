//! Time-dependent field I/O for a coupled model component.
//!
//! [`IoComponent`] is driven by the host once per model step:
//!
//! ```text
//! IoComponent::initialize(registry, context)
//!      │   validate descriptors, open the adapter, load first brackets
//!      ▼
//! step(time, fields) ── every step ─────────────────────────────┐
//!      ├─► streams: value_at(time) ─► fields.export(...)         │
//!      ├─► collections: fields.import(...) ─► deposit            │
//!      └─► schedulers: flush at boundaries ─► write hyperslabs ◄─┘
//!      ▼
//! finalize()   flush partial windows, release handles
//! ```
//!
//! Clock, grid and decomposition all come from the host through
//! [`ModelContext`]; nothing here owns simulation state beyond brackets and
//! accumulation buffers.

pub mod component;
pub mod context;
pub mod error;
pub mod fields;

pub use component::{IoComponent, StepOutcome};
pub use context::ModelContext;
pub use error::{ComponentError, Result, StepFailure};
pub use fields::{FieldExchange, InMemoryFields};

pub use accumulate::FlushReport;
pub use fieldio_common::{ConfigRecord, Registry};
pub use temporal::{StreamDiagnostics, WindowState};
