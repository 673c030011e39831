//! Distributed (MPI) transport for HPC clusters.
//!
//! One [`MpiComm`] per process, launched under `mpirun`/`srun`. Fixed-size
//! layouts map onto `MPI_Scatter`/`MPI_Gather`, variable-size layouts onto
//! `MPI_Scatterv`/`MPI_Gatherv` with explicit counts and displacements, so
//! result blocks are placed by offset rather than by arrival order.
//!
//! Gated behind the `distributed` feature.

use mpi::collective::SystemOperation;
use mpi::datatype::{Partition, PartitionMut};
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;
use mpi::Count;

use crate::comm::{BlockLayout, CommError, Communicator};

/// MPI endpoint on `MPI_COMM_WORLD`.
///
/// Holds the [`Universe`]; MPI is finalised when the communicator is dropped.
pub struct MpiComm {
    world: SimpleCommunicator,
    rank: usize,
    size: usize,
    _universe: Universe,
}

impl MpiComm {
    /// Initialise MPI. Fails when MPI was already initialised in this process.
    pub fn init() -> Result<Self, CommError> {
        let universe = mpi::initialize()
            .ok_or_else(|| CommError::Unavailable("MPI already initialised".into()))?;
        let world = universe.world();
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        log::debug!("MPI rank {} of {} initialised", rank, size);
        Ok(Self {
            world,
            rank,
            size,
            _universe: universe,
        })
    }

    fn to_counts(values: &[usize]) -> Result<Vec<Count>, CommError> {
        values
            .iter()
            .map(|&v| {
                Count::try_from(v).map_err(|_| {
                    CommError::Unavailable(format!("{v} elements exceed the MPI count range"))
                })
            })
            .collect()
    }

    fn root(&self, root: usize) -> Result<mpi::topology::Process<'_>, CommError> {
        if root >= self.size {
            return Err(CommError::InvalidRoot {
                root,
                size: self.size,
            });
        }
        Ok(self.world.process_at_rank(root as i32))
    }
}

impl Communicator for MpiComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) -> Result<(), CommError> {
        self.world.barrier();
        Ok(())
    }

    fn all_agree(&self, ok: bool) -> Result<bool, CommError> {
        let local = i32::from(ok);
        let mut global = 0i32;
        self.world
            .all_reduce_into(&local, &mut global, SystemOperation::logical_and());
        Ok(global != 0)
    }

    fn broadcast(&self, root: usize, buf: &mut [f64]) -> Result<(), CommError> {
        self.root(root)?.broadcast_into(buf);
        Ok(())
    }

    fn scatter_root(&self, send: &[f64], layout: &BlockLayout) -> Result<(), CommError> {
        layout.check(self.size, Some(send.len()))?;
        let root = self.root(self.rank)?;
        // MPI needs a receive buffer on the root too; the root's block stays
        // in place in `send`, so this copy is discarded.
        let mut own = vec![0.0; layout.count(self.rank)];
        if layout.is_uniform() {
            root.scatter_into_root(&send[..layout.total()], &mut own[..]);
        } else {
            let counts = Self::to_counts(layout.counts())?;
            let displs = Self::to_counts(layout.displs())?;
            let partition = Partition::new(send, counts, displs);
            root.scatter_varcount_into_root(&partition, &mut own[..]);
        }
        Ok(())
    }

    fn scatter_member(
        &self,
        root: usize,
        recv: &mut [f64],
        layout: &BlockLayout,
    ) -> Result<(), CommError> {
        layout.check(self.size, None)?;
        layout.check_local(self.rank, recv.len())?;
        let root = self.root(root)?;
        if layout.is_uniform() {
            root.scatter_into(recv);
        } else {
            root.scatter_varcount_into(recv);
        }
        Ok(())
    }

    fn gather_root(&self, recv: &mut [f64], layout: &BlockLayout) -> Result<(), CommError> {
        layout.check(self.size, Some(recv.len()))?;
        let root = self.root(self.rank)?;
        let own = recv[layout.range(self.rank)].to_vec();
        if layout.is_uniform() {
            let total = layout.total();
            root.gather_into_root(&own[..], &mut recv[..total]);
        } else {
            let counts = Self::to_counts(layout.counts())?;
            let displs = Self::to_counts(layout.displs())?;
            let mut partition = PartitionMut::new(recv, counts, displs);
            root.gather_varcount_into_root(&own[..], &mut partition);
        }
        Ok(())
    }

    fn gather_member(
        &self,
        root: usize,
        send: &[f64],
        layout: &BlockLayout,
    ) -> Result<(), CommError> {
        layout.check(self.size, None)?;
        layout.check_local(self.rank, send.len())?;
        let root = self.root(root)?;
        if layout.is_uniform() {
            root.gather_into(send);
        } else {
            root.gather_varcount_into(send);
        }
        Ok(())
    }
}
