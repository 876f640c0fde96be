//! What the host hands the component at initialize.

use std::sync::Arc;

use array_io::{ArrayIoConfig, Communicator, LocalCommunicator, Regridder};
use chrono::{DateTime, Utc};
use fieldio_common::{Decomposition, GridSpec};

/// Host-owned grid, clock origin and process group.
#[derive(Clone)]
pub struct ModelContext {
    pub grid: GridSpec,
    pub decomposition: Decomposition,
    /// Run start; output boundaries are counted from here.
    pub start_time: DateTime<Utc>,
    pub communicator: Arc<dyn Communicator>,
    pub regridder: Option<Arc<dyn Regridder>>,
    pub io_config: ArrayIoConfig,
}

impl ModelContext {
    /// One process owning the whole grid.
    pub fn single(grid: GridSpec, start_time: DateTime<Utc>) -> Self {
        Self {
            decomposition: Decomposition::whole(&grid),
            grid,
            start_time,
            communicator: Arc::new(LocalCommunicator::single()),
            regridder: None,
            io_config: ArrayIoConfig::default(),
        }
    }

    /// Rank `rank` of `size` processes splitting the grid by rows.
    pub fn block_rows(
        grid: GridSpec,
        start_time: DateTime<Utc>,
        rank: usize,
        size: usize,
    ) -> Option<Self> {
        let decomposition = Decomposition::block_rows(&grid, rank, size)?;
        Some(Self {
            grid,
            decomposition,
            start_time,
            communicator: Arc::new(LocalCommunicator::new(rank, size)),
            regridder: None,
            io_config: ArrayIoConfig::default(),
        })
    }

    pub fn with_regridder(mut self, regridder: Arc<dyn Regridder>) -> Self {
        self.regridder = Some(regridder);
        self
    }

    pub fn with_io_config(mut self, config: ArrayIoConfig) -> Self {
        self.io_config = config;
        self
    }

    pub fn rank(&self) -> usize {
        self.communicator.rank()
    }
}

impl std::fmt::Debug for ModelContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelContext")
            .field("grid", &self.grid)
            .field("decomposition", &self.decomposition)
            .field("start_time", &self.start_time)
            .field("rank", &self.communicator.rank())
            .field("size", &self.communicator.size())
            .field("regridder", &self.regridder.is_some())
            .finish()
    }
}
