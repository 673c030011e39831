//! Per-run pipeline executed by every participant in lock-step.
//!
//! `Init → Plan → Distribute → Compute → Collect → Finalize`, no retries and
//! no cycles. Everything that can fail locally (planning, kernel pool,
//! buffer allocation) happens before the first data collective; the group
//! then votes once with [`Communicator::all_agree`] so that a participant
//! that could not prepare aborts the whole run instead of stranding its
//! peers inside a collective.

use std::fmt;
use std::time::{Duration, Instant};

use strata_compute::{CommError, Communicator, ComputeError, CpuKernel, ThreadGroup};
use thiserror::Error;

use crate::assembler::{assemble, AssemblyError, Product};
use crate::matrix::{Fill, Matrix, MatrixError, RowBlock};
use crate::partition::{PartitionError, PartitionMode, PartitionPlan};
use crate::transport::{Striped, Transport, TransportError};

/// States of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Plan,
    Distribute,
    Compute,
    Collect,
    Finalize,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Plan => "plan",
            Phase::Distribute => "distribute",
            Phase::Compute => "compute",
            Phase::Collect => "collect",
            Phase::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Invalid partition: {0}")]
    Partition(#[from] PartitionError),

    #[error("Rank {rank}: {source}")]
    Allocation {
        rank: usize,
        #[source]
        source: MatrixError,
    },

    #[error("Rank {rank}: {source}")]
    Kernel {
        rank: usize,
        #[source]
        source: ComputeError,
    },

    #[error("Run aborted: another participant failed to prepare")]
    Aborted,

    #[error("{phase} phase failed: {source}")]
    Transport {
        phase: Phase,
        #[source]
        source: TransportError,
    },

    #[error("Compute phase failed: {0}")]
    Compute(#[from] ComputeError),

    #[error("Matrix error: {0}")]
    Matrix(#[from] MatrixError),

    #[error("Finalize phase failed: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("Participant group failed: {0}")]
    Group(#[from] CommError),

    #[error("Coordinator finished without a result")]
    MissingReport,
}

impl RunError {
    fn at(phase: Phase) -> impl Fn(TransportError) -> RunError {
        move |source| RunError::Transport { phase, source }
    }
}

/// Per-run configuration, identical on every participant.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Matrix dimension.
    pub n: usize,
    /// Kernel worker threads per participant.
    pub threads: usize,
    pub mode: PartitionMode,
    /// Initial contents of both operands on the coordinator.
    pub fill: Fill,
}

impl RunConfig {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            ..Default::default()
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            n: 0,
            threads: 1,
            mode: PartitionMode::Remainder,
            fill: Fill::RowIndex,
        }
    }
}

/// Wall-clock time spent per phase on the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Timings {
    /// Kernel setup, planning and allocation.
    pub init: Duration,
    pub distribute: Duration,
    pub compute: Duration,
    pub collect: Duration,
}

/// What the coordinator holds once a run has finished.
#[derive(Debug)]
pub struct RunReport {
    pub product: Product,
    /// Left operand, as distributed.
    pub a: Matrix,
    /// Right operand, as replicated.
    pub b: Matrix,
    pub plan: PartitionPlan,
    pub timings: Timings,
}

enum Workspace {
    Coordinator { a: Matrix, b: Matrix, c: Matrix },
    Member { a: RowBlock, b: Matrix, c: RowBlock },
}

fn enter(rank: usize, phase: Phase) {
    log::debug!("[rank {}] entering {} phase", rank, phase);
}

fn prepare(
    rank: usize,
    plan: &PartitionPlan,
    config: &RunConfig,
) -> Result<(CpuKernel, Workspace), RunError> {
    let kernel =
        CpuKernel::new(config.threads).map_err(|source| RunError::Kernel { rank, source })?;
    let alloc = |source| RunError::Allocation { rank, source };
    let n = plan.dim();

    let workspace = if rank == strata_compute::COORDINATOR {
        Workspace::Coordinator {
            a: Matrix::new(n, config.fill).map_err(alloc)?,
            b: Matrix::new(n, config.fill).map_err(alloc)?,
            c: Matrix::zeros(n).map_err(alloc)?,
        }
    } else {
        let stripe = plan.stripe(rank);
        Workspace::Member {
            a: RowBlock::zeros(stripe, n).map_err(alloc)?,
            b: Matrix::zeros(n).map_err(alloc)?,
            c: RowBlock::zeros(stripe, n).map_err(alloc)?,
        }
    };
    Ok((kernel, workspace))
}

/// Run one participant's share of `C = A * B`.
///
/// The coordinator returns `Some(report)`; every other participant `None`.
pub fn run_participant<C: Communicator>(
    comm: &C,
    config: &RunConfig,
) -> Result<Option<RunReport>, RunError> {
    let rank = comm.rank();
    let started = Instant::now();
    let mut timings = Timings::default();

    enter(rank, Phase::Init);
    if comm.is_coordinator() {
        log::debug!(
            "Start parallel algorithm (size={}, participants={}, threads={})",
            config.n,
            comm.size(),
            config.threads
        );
    }

    // Planning is pure and runs on every participant before any collective,
    // so a strict-mode violation aborts the whole group without blocking.
    enter(rank, Phase::Plan);
    let plan = PartitionPlan::new(config.n, comm.size(), config.mode)?;
    let stripe = plan.stripe(rank);
    let n = plan.dim();

    let prepared = prepare(rank, &plan, config);
    if let Err(e) = &prepared {
        log::error!("[rank {}] failed to prepare: {}", rank, e);
    }
    let agreed = comm
        .all_agree(prepared.is_ok())
        .map_err(|e| RunError::Transport {
            phase: Phase::Plan,
            source: e.into(),
        })?;
    let (kernel, mut workspace) = prepared?;
    if !agreed {
        return Err(RunError::Aborted);
    }
    timings.init = started.elapsed();

    enter(rank, Phase::Distribute);
    let mark = Instant::now();
    let transport = Transport::new(comm, &plan).map_err(RunError::at(Phase::Distribute))?;
    match &mut workspace {
        Workspace::Coordinator { a, b, .. } => {
            transport
                .replicate_full(b)
                .map_err(RunError::at(Phase::Distribute))?;
            transport
                .distribute_striped(Striped::Full(a))
                .map_err(RunError::at(Phase::Distribute))?;
        }
        Workspace::Member { a, b, .. } => {
            transport
                .replicate_full(b)
                .map_err(RunError::at(Phase::Distribute))?;
            transport
                .distribute_striped(Striped::Block(a))
                .map_err(RunError::at(Phase::Distribute))?;
        }
    }
    timings.distribute = mark.elapsed();

    enter(rank, Phase::Compute);
    let mark = Instant::now();
    match &mut workspace {
        Workspace::Coordinator { a, b, c } => {
            kernel.multiply_rows(a.rows(stripe)?, b.as_slice(), n, c.rows_mut(stripe)?)?
        }
        Workspace::Member { a, b, c } => {
            kernel.multiply_rows(a.as_slice(), b.as_slice(), n, c.as_mut_slice())?
        }
    }
    timings.compute = mark.elapsed();
    log::debug!(
        "[rank {}] computed rows [{}, {}) on {} threads",
        rank,
        stripe.from,
        stripe.to,
        kernel.num_threads()
    );

    enter(rank, Phase::Collect);
    let mark = Instant::now();
    match &mut workspace {
        Workspace::Coordinator { c, .. } => transport
            .collect_striped(Striped::Full(c))
            .map_err(RunError::at(Phase::Collect))?,
        Workspace::Member { c, .. } => transport
            .collect_striped(Striped::Block(c))
            .map_err(RunError::at(Phase::Collect))?,
    }
    timings.collect = mark.elapsed();

    enter(rank, Phase::Finalize);
    match workspace {
        Workspace::Coordinator { a, b, c } => {
            let product = assemble(c, &plan)?;
            Ok(Some(RunReport {
                product,
                a,
                b,
                plan,
                timings,
            }))
        }
        Workspace::Member { .. } => Ok(None),
    }
}

/// Run a whole group of `participants` in this process and return the
/// coordinator's report.
///
/// When the run fails, the error of the participant that caused it is
/// preferred over the `Aborted` seen by the others.
pub fn run_local(config: &RunConfig, participants: usize) -> Result<RunReport, RunError> {
    let outcomes = ThreadGroup::run(participants, |comm| run_participant(&comm, config))?;

    let mut report = None;
    let mut errors = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(Some(r)) => report = Some(r),
            Ok(None) => {}
            Err(e) => errors.push(e),
        }
    }
    if let Some(root) = errors.iter().position(|e| !matches!(e, RunError::Aborted)) {
        return Err(errors.swap_remove(root));
    }
    if let Some(e) = errors.pop() {
        return Err(e);
    }
    report.ok_or(RunError::MissingReport)
}
