//! Distributed hyperslab I/O over Zarr V3 array files.
//!
//! Each process owns a rectangular slice of a global grid. This crate moves
//! that slice to and from one time record of a named variable in an on-disk
//! array file:
//!
//! ```text
//! DistributedIo::read_hyperslab(field, time)
//!      │
//!      ├─► Acquire dataset handle
//!      │         ├─► parallel file: collective session opened by open_collective
//!      │         └─► serial file: cached per-owner handle, or open/close per call
//!      │
//!      ├─► Locate time record in the file's time axis
//!      │
//!      ├─► Compare file grid with target grid
//!      │         ├─► same layout: read the local slab only
//!      │         ├─► differs + regridder: read full grid, regrid, extract slab
//!      │         └─► differs, no regridder: DecompositionMismatch
//!      │
//!      └─► On open/read failure: drop the handle, reopen, retry once
//! ```
//!
//! The backend is a trait seam ([`DatasetBackend`]/[`Dataset`]); the
//! production implementation is [`ZarrBackend`].

pub mod adapter;
pub mod backend;
pub mod comm;
pub mod config;
pub mod error;
pub mod regrid;
pub mod types;

pub use adapter::{DistributedIo, ReadRequest, WriteRequest};
pub use backend::zarr::ZarrBackend;
pub use backend::{Dataset, DatasetBackend};
pub use comm::{Communicator, LocalCommunicator};
pub use config::ArrayIoConfig;
pub use error::{ArrayIoError, Result};
pub use regrid::{BilinearRegridder, NearestRegridder, Regridder};
pub use types::{Slab, VariableLayout, VariableSpec};
