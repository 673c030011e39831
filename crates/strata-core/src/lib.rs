//! # Strata Core
//!
//! Two-level parallel dense matrix multiplication `C = A * B`. Output rows
//! are striped across the participants of a group (distributed memory), and
//! each participant spreads its stripe over a pool of worker threads (shared
//! memory).
//!
//! ## Modules
//!
//! - [`matrix`]: Owned full-size and stripe-size buffers.
//! - [`partition`]: Stripe planner and the immutable partition plan.
//! - [`transport`]: Replicate / distribute / collect over a communicator.
//! - [`assembler`]: Coordinator-side result finalisation and verification.
//! - [`pipeline`]: The per-run state machine every participant executes.

pub mod assembler;
pub mod matrix;
pub mod partition;
pub mod pipeline;
pub mod transport;

pub use assembler::Product;
pub use matrix::{Fill, Matrix, RowBlock};
pub use partition::{plan, PartitionMode, PartitionPlan, Stripe};
pub use pipeline::{run_local, run_participant, Phase, RunConfig, RunError, RunReport, Timings};
