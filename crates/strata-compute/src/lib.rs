//! # Strata Compute
//!
//! Transport and compute backends for the Strata framework. This crate
//! knows nothing about matrices or stripes: it moves flat `f64` buffers
//! between the participants of a group and runs the shared-memory kernel
//! over contiguous row ranges.
//!
//! ## Available backends
//!
//! | Backend | Feature flag | Status |
//! |---------|-------------|--------|
//! | Thread group (in-process participants) | always | Implemented |
//! | CPU kernel (Rayon) | `cpu` (default) | Implemented |
//! | Distributed (MPI) | `distributed` | Implemented |

pub mod comm;
pub mod local;

#[cfg(feature = "cpu")]
pub mod cpu;

#[cfg(feature = "distributed")]
pub mod distributed;

pub use comm::{BlockLayout, CommError, Communicator, COORDINATOR};
pub use local::{LocalComm, ThreadGroup};

#[cfg(feature = "cpu")]
pub use cpu::{multiply_sequential, ComputeError, CpuKernel};

#[cfg(feature = "distributed")]
pub use distributed::MpiComm;
