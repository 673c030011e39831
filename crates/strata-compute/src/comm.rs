//! Communicator trait and block layout.
//!
//! The [`Communicator`] trait abstracts over the group transport (in-process
//! thread group, MPI) so that the pipeline in `strata-core` never addresses a
//! peer directly. Every operation is a collective: all participants of the
//! group must make the matching call, and none returns until the whole group
//! has completed it.

use std::ops::Range;

use thiserror::Error;

/// Rank of the participant that owns the full matrices.
pub const COORDINATOR: usize = 0;

/// Errors originating from a communicator.
#[derive(Debug, Error)]
pub enum CommError {
    #[error("Rank {rank} expected a block of {expected} elements, buffer holds {actual}")]
    CountMismatch {
        rank: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Layout describes {layout} participants, group has {group}")]
    GroupSizeMismatch { layout: usize, group: usize },

    #[error("Uniform layout with unequal block counts: {0:?}")]
    UnevenUniformLayout(Vec<usize>),

    #[error("Block of rank {rank} ends at {end}, buffer holds {len} elements")]
    OutOfBounds { rank: usize, end: usize, len: usize },

    #[error("Invalid root rank {root} for a group of {size}")]
    InvalidRoot { root: usize, size: usize },

    #[error("Group state poisoned by a failed participant")]
    Poisoned,

    #[error("Participant {0} panicked")]
    ParticipantPanicked(usize),

    #[error("Group must contain at least one participant")]
    EmptyGroup,

    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

/// Per-participant element counts and displacements of one striped transfer.
///
/// Block `r` covers `displs[r]..displs[r] + counts[r]` of the root's full
/// buffer. A uniform layout selects the fixed-size collectives; every count
/// must then be equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    counts: Vec<usize>,
    displs: Vec<usize>,
    uniform: bool,
}

impl BlockLayout {
    /// Build a layout from explicit counts and displacements.
    pub fn new(counts: Vec<usize>, displs: Vec<usize>, uniform: bool) -> Result<Self, CommError> {
        if counts.is_empty() {
            return Err(CommError::EmptyGroup);
        }
        if counts.len() != displs.len() {
            return Err(CommError::GroupSizeMismatch {
                layout: counts.len(),
                group: displs.len(),
            });
        }
        if uniform && counts.iter().any(|&c| c != counts[0]) {
            return Err(CommError::UnevenUniformLayout(counts));
        }
        Ok(Self {
            counts,
            displs,
            uniform,
        })
    }

    /// Equal contiguous blocks of `count` elements for `participants` ranks.
    pub fn uniform(count: usize, participants: usize) -> Result<Self, CommError> {
        let counts = vec![count; participants];
        let displs = (0..participants).map(|r| r * count).collect();
        Self::new(counts, displs, true)
    }

    pub fn participants(&self) -> usize {
        self.counts.len()
    }

    pub fn count(&self, rank: usize) -> usize {
        self.counts[rank]
    }

    pub fn displ(&self, rank: usize) -> usize {
        self.displs[rank]
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    pub fn displs(&self) -> &[usize] {
        &self.displs
    }

    /// Element range of block `rank` inside the root's buffer.
    pub fn range(&self, rank: usize) -> Range<usize> {
        self.displs[rank]..self.displs[rank] + self.counts[rank]
    }

    /// Byte offset of block `rank` inside the root's buffer.
    pub fn byte_offset(&self, rank: usize) -> usize {
        self.displs[rank] * std::mem::size_of::<f64>()
    }

    /// Total number of elements over all blocks.
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn is_uniform(&self) -> bool {
        self.uniform
    }

    /// Check the layout against a group size and the root buffer length.
    pub fn check(&self, group: usize, root_len: Option<usize>) -> Result<(), CommError> {
        if self.participants() != group {
            return Err(CommError::GroupSizeMismatch {
                layout: self.participants(),
                group,
            });
        }
        if let Some(len) = root_len {
            for rank in 0..group {
                let end = self.range(rank).end;
                if end > len {
                    return Err(CommError::OutOfBounds { rank, end, len });
                }
            }
        }
        Ok(())
    }

    /// Check that a member's local buffer matches its block.
    pub fn check_local(&self, rank: usize, len: usize) -> Result<(), CommError> {
        let expected = self.count(rank);
        if expected != len {
            return Err(CommError::CountMismatch {
                rank,
                expected,
                actual: len,
            });
        }
        Ok(())
    }
}

/// One participant's endpoint into a group transport.
///
/// The root of a striped transfer keeps its own block in place inside its
/// full buffer; only the other blocks travel. Implementations must never
/// return from a call on one participant before every participant has
/// reached it.
pub trait Communicator {
    /// This participant's rank.
    fn rank(&self) -> usize;

    /// Number of participants in the group.
    fn size(&self) -> usize;

    /// Block until every participant reaches the barrier.
    fn barrier(&self) -> Result<(), CommError>;

    /// Logical AND of `ok` over the group.
    ///
    /// Carries no matrix data; used to abort a run before the first data
    /// collective when any participant failed to prepare.
    fn all_agree(&self, ok: bool) -> Result<bool, CommError>;

    /// Replicate `buf` from `root` into every participant's `buf`.
    fn broadcast(&self, root: usize, buf: &mut [f64]) -> Result<(), CommError>;

    /// Root side of a striped distribution: send block `r` of `send` to rank `r`.
    fn scatter_root(&self, send: &[f64], layout: &BlockLayout) -> Result<(), CommError>;

    /// Member side of a striped distribution: receive this rank's block into `recv`.
    fn scatter_member(&self, root: usize, recv: &mut [f64], layout: &BlockLayout)
        -> Result<(), CommError>;

    /// Root side of a striped collection: place block `r` at `layout.range(r)` of `recv`.
    fn gather_root(&self, recv: &mut [f64], layout: &BlockLayout) -> Result<(), CommError>;

    /// Member side of a striped collection: contribute this rank's block.
    fn gather_member(&self, root: usize, send: &[f64], layout: &BlockLayout)
        -> Result<(), CommError>;

    fn is_coordinator(&self) -> bool {
        self.rank() == COORDINATOR
    }
}
