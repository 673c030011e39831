//! Strata command-line interface.
//!
//! Multiply two `N x N` matrices over a group of ranks, each running a pool
//! of worker threads:
//! ```sh
//! strata 1024
//! strata 1024 dump=c.bin debug
//! strata debug dump=c.bin 1024
//! strata 1024 --ranks 4 --threads 2 --mode strict --verify
//! strata --config job.toml
//! mpirun -n 4 strata 1024 --mpi        # built with --features distributed
//! ```

mod config;
mod runner;

use std::path::PathBuf;

use clap::Parser;
use strata_core::PartitionMode;

use crate::config::{FillKind, JobConfig, Overrides, RunToken, Settings};

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Strata: hybrid distributed/threaded dense matrix multiplication")]
#[command(version)]
struct Cli {
    /// Matrix dimension N, `dump=<path>` to save the result and `debug` for
    /// diagnostics, in any order.
    #[arg(value_name = "N | dump=<path> | debug")]
    tokens: Vec<RunToken>,
    /// Participants in the in-process group.
    #[arg(short = 'p', long)]
    ranks: Option<usize>,
    /// Worker threads per participant.
    #[arg(short, long)]
    threads: Option<usize>,
    /// How sizes that do not divide evenly are handled: remainder or strict.
    #[arg(long)]
    mode: Option<PartitionMode>,
    /// Operand initialisation pattern.
    #[arg(long, value_enum)]
    fill: Option<FillKind>,
    /// Seed for the seeded fill pattern.
    #[arg(long)]
    seed: Option<u64>,
    /// TOML job file; command-line values override it.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Check the product against an independent reference.
    #[arg(long)]
    verify: bool,
    /// Run as one rank of an MPI world instead of an in-process group.
    #[arg(long)]
    mpi: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let job = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => JobConfig::default(),
    };
    let settings = Settings::resolve(
        Overrides {
            tokens: cli.tokens,
            ranks: cli.ranks,
            threads: cli.threads,
            mode: cli.mode,
            fill: cli.fill,
            seed: cli.seed,
            verify: cli.verify,
            mpi: cli.mpi,
        },
        job,
    )?;

    let default_level = if settings.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
    if settings.debug {
        eprintln!("debug is now on.");
    }

    runner::run(&settings)
}
