//! Plan-driven distribution transport.
//!
//! [`Transport`] binds a [`Communicator`] to a [`PartitionPlan`] and exposes
//! the three group operations of a run: replicate the right operand,
//! distribute the rows of the left operand, and collect the rows of the
//! result. Counts and offsets always come from the plan's layout; results are
//! placed by offset, never by arrival order.
//!
//! The local checks below run before the collective is entered. They guard
//! against programming errors; a participant that fails one never reaches
//! the collective, which leaves its peers blocked.

use strata_compute::{CommError, Communicator, COORDINATOR};
use thiserror::Error;

use crate::matrix::{Matrix, RowBlock};
use crate::partition::PartitionPlan;

/// Errors from the distribution transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Communicator error: {0}")]
    Comm(#[from] CommError),

    #[error("Plan covers {plan} participants, group has {group}")]
    GroupSize { plan: usize, group: usize },

    #[error("Rank {rank} passed the wrong side of a striped transfer")]
    WrongSide { rank: usize },

    #[error("Buffer of dimension {actual} does not match plan dimension {expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("Block holds stripe [{held_from}, {held_to}), plan assigns [{from}, {to})")]
    StripeMismatch {
        held_from: usize,
        held_to: usize,
        from: usize,
        to: usize,
    },
}

/// One participant's side of a striped transfer.
pub enum Striped<'a> {
    /// The coordinator's full matrix; its own stripe stays in place.
    Full(&'a mut Matrix),
    /// A member's stripe-sized block.
    Block(&'a mut RowBlock),
}

/// Collective transport for one run.
pub struct Transport<'c, C: Communicator> {
    comm: &'c C,
    plan: &'c PartitionPlan,
}

impl<'c, C: Communicator> Transport<'c, C> {
    pub fn new(comm: &'c C, plan: &'c PartitionPlan) -> Result<Self, TransportError> {
        if plan.participants() != comm.size() {
            return Err(TransportError::GroupSize {
                plan: plan.participants(),
                group: comm.size(),
            });
        }
        Ok(Self { comm, plan })
    }

    /// Deliver the coordinator's `matrix` into every participant's `matrix`.
    pub fn replicate_full(&self, matrix: &mut Matrix) -> Result<(), TransportError> {
        self.check_dim(matrix.dim())?;
        log::debug!(
            "[rank {}] replicating {}x{} operand",
            self.comm.rank(),
            matrix.dim(),
            matrix.dim()
        );
        self.comm.broadcast(COORDINATOR, matrix.as_mut_slice())?;
        Ok(())
    }

    /// Split the coordinator's matrix by stripe and deliver each stripe to its owner.
    pub fn distribute_striped(&self, side: Striped<'_>) -> Result<(), TransportError> {
        let layout = self.plan.layout();
        match (self.comm.is_coordinator(), side) {
            (true, Striped::Full(full)) => {
                self.check_dim(full.dim())?;
                log::debug!("[rank {}] distributing stripes", self.comm.rank());
                self.comm.scatter_root(full.as_slice(), layout)?;
            }
            (false, Striped::Block(block)) => {
                self.check_block(block)?;
                self.comm
                    .scatter_member(COORDINATOR, block.as_mut_slice(), layout)?;
                log::debug!(
                    "[rank {}] received rows [{}, {})",
                    self.comm.rank(),
                    block.stripe().from,
                    block.stripe().to
                );
            }
            _ => {
                return Err(TransportError::WrongSide {
                    rank: self.comm.rank(),
                })
            }
        }
        Ok(())
    }

    /// Reassemble every participant's stripe into the coordinator's matrix.
    pub fn collect_striped(&self, side: Striped<'_>) -> Result<(), TransportError> {
        let layout = self.plan.layout();
        match (self.comm.is_coordinator(), side) {
            (true, Striped::Full(full)) => {
                self.check_dim(full.dim())?;
                self.comm.gather_root(full.as_mut_slice(), layout)?;
                log::debug!("[rank {}] collected all stripes", self.comm.rank());
            }
            (false, Striped::Block(block)) => {
                self.check_block(block)?;
                self.comm
                    .gather_member(COORDINATOR, block.as_slice(), layout)?;
            }
            _ => {
                return Err(TransportError::WrongSide {
                    rank: self.comm.rank(),
                })
            }
        }
        Ok(())
    }

    fn check_dim(&self, actual: usize) -> Result<(), TransportError> {
        if actual != self.plan.dim() {
            return Err(TransportError::Dimension {
                expected: self.plan.dim(),
                actual,
            });
        }
        Ok(())
    }

    fn check_block(&self, block: &RowBlock) -> Result<(), TransportError> {
        self.check_dim(block.dim())?;
        let held = block.stripe();
        let assigned = self.plan.stripe(self.comm.rank());
        if held != assigned {
            return Err(TransportError::StripeMismatch {
                held_from: held.from,
                held_to: held.to,
                from: assigned.from,
                to: assigned.to,
            });
        }
        Ok(())
    }
}
