//! Process-group abstraction for collective file access.

use crate::error::Result;

/// The group of processes sharing a decomposed grid.
///
/// Collective opens and closes synchronize through [`barrier`]; every
/// process of the group must issue them in the same order.
///
/// [`barrier`]: Communicator::barrier
pub trait Communicator {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn barrier(&self) -> Result<()>;
}

/// A communicator whose barrier returns immediately.
///
/// Suitable for single-process runs, and for lockstep drivers that call
/// every rank in sequence from one thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalCommunicator {
    rank: usize,
    size: usize,
}

impl LocalCommunicator {
    pub fn new(rank: usize, size: usize) -> Self {
        Self { rank, size }
    }

    pub fn single() -> Self {
        Self::new(0, 1)
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }
}
