//! Job runner: executes the pipeline and reports on the coordinator.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{bail, Context, Result};
use strata_core::{run_local, Matrix, RunReport, Timings};

use crate::config::Settings;

/// Debug previews show at most this many rows and columns.
pub const PREVIEW_LIMIT: usize = 100;

/// Largest accepted deviation from the reference product, relative to the
/// largest magnitude in the result.
pub const VERIFY_TOLERANCE: f64 = 1e-9;

/// Run one job. Only the coordinator reports; other MPI ranks return quietly.
pub fn run(settings: &Settings) -> Result<()> {
    let Some(report) = execute(settings)? else {
        return Ok(());
    };
    let n = report.product.dim();

    if settings.debug {
        eprintln!("A[{n}x{n}]:");
        eprint!("{}", report.a.preview(PREVIEW_LIMIT));
        eprintln!("B[{n}x{n}]:");
        eprint!("{}", report.b.preview(PREVIEW_LIMIT));
        eprintln!("C[{n}x{n}]=A*B:");
        eprint!("{}", report.product.matrix().preview(PREVIEW_LIMIT));
    }

    print!("{}", timing_summary(n, &report.timings));
    println!(
        "Checksum = {}",
        format_g(report.product.matrix().checksum(), 12)
    );

    if let Some(path) = &settings.dump {
        log::info!("dumping result to {}", path.display());
        // The product is valid even when it cannot be saved.
        if let Err(e) = write_dump(report.product.matrix(), path) {
            eprintln!("Warning: {:#} - no results are saved", e);
        }
    }

    if settings.verify {
        let deviation = verify(&report)?;
        println!("Verification PASSED (max deviation {:e})", deviation);
    }

    if settings.debug {
        eprintln!("Done!");
    }
    Ok(())
}

fn execute(settings: &Settings) -> Result<Option<RunReport>> {
    if settings.mpi {
        return execute_mpi(settings);
    }
    log::info!(
        "Running {}x{} on {} in-process rank(s)",
        settings.run.n,
        settings.run.n,
        settings.ranks
    );
    let report = run_local(&settings.run, settings.ranks).context("Run failed")?;
    Ok(Some(report))
}

#[cfg(feature = "distributed")]
fn execute_mpi(settings: &Settings) -> Result<Option<RunReport>> {
    use strata_compute::{Communicator, MpiComm};

    let comm = MpiComm::init().context("Failed to initialise MPI")?;
    if comm.is_coordinator() && settings.ranks != 1 && settings.ranks != comm.size() {
        eprintln!(
            "Warning: ranks = {} ignored, MPI world has {} ranks",
            settings.ranks,
            comm.size()
        );
    }
    strata_core::run_participant(&comm, &settings.run)
        .with_context(|| format!("Rank {} failed", comm.rank()))
}

#[cfg(not(feature = "distributed"))]
fn execute_mpi(_settings: &Settings) -> Result<Option<RunReport>> {
    bail!("--mpi requires a build with the `distributed` feature")
}

/// Both timing lines printed after a run.
///
/// "send" covers distribution; "computing" covers the kernel and the
/// collection of the result.
pub fn timing_summary(n: usize, timings: &Timings) -> String {
    let computing = timings.compute + timings.collect;
    let init = timings.init.as_secs_f64();
    let send = timings.distribute.as_secs_f64();
    let secs = computing.as_secs();
    format!(
        "Times (init, send and computing) = {}, {}, {} sec\n\n\
         size={}\tinitTime={}\tsendTime={}\tcomputeTime={} ({} min, {} sec)\n",
        format_g(init, 4),
        format_g(send, 4),
        format_g(computing.as_secs_f64(), 4),
        n,
        format_g(init, 6),
        format_g(send, 6),
        format_g(computing.as_secs_f64(), 6),
        secs / 60,
        secs % 60,
    )
}

/// `%g`-style formatting with `precision` significant digits.
pub fn format_g(value: f64, precision: usize) -> String {
    if value == 0.0 || !value.is_finite() {
        return format!("{}", value);
    }
    let precision = precision.max(1);
    let sci = format!("{:.*e}", precision - 1, value);
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return sci;
    };
    let exp: i32 = exp.parse().unwrap_or(0);

    if exp < -4 || exp >= precision as i32 {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exp.abs())
    } else {
        let decimals = (precision as i32 - 1 - exp).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Write the full product as raw native-endian doubles.
pub fn write_dump(matrix: &Matrix, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create result file {}", path.display()))?;
    matrix
        .write_raw(BufWriter::new(file))
        .with_context(|| format!("Failed to write result file {}", path.display()))?;
    Ok(())
}

/// Compare the product against an independent reference.
pub fn verify(report: &RunReport) -> Result<f64> {
    let deviation = report.product.max_deviation(&report.a, &report.b)?;
    let scale = report
        .product
        .matrix()
        .as_slice()
        .iter()
        .fold(1.0_f64, |m, v| m.max(v.abs()));
    if deviation > VERIFY_TOLERANCE * scale {
        bail!(
            "Verification FAILED: max deviation {:e} exceeds {:e}",
            deviation,
            VERIFY_TOLERANCE * scale
        );
    }
    Ok(deviation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use strata_core::assembler::assemble;
    use strata_core::{Fill, PartitionMode, RunConfig};

    fn settings(n: usize, ranks: usize) -> Settings {
        Settings {
            run: RunConfig {
                threads: 2,
                ..RunConfig::new(n)
            },
            ranks,
            dump: None,
            debug: false,
            verify: false,
            mpi: false,
        }
    }

    #[test]
    fn format_g_matches_printf() {
        assert_eq!(format_g(0.0, 4), "0");
        assert_eq!(format_g(1.5, 4), "1.5");
        assert_eq!(format_g(100.0, 4), "100");
        assert_eq!(format_g(0.0001234, 4), "0.0001234");
        assert_eq!(format_g(0.00001234, 4), "1.234e-05");
        assert_eq!(format_g(1234567.0, 4), "1.235e+06");
        assert_eq!(format_g(9.99996, 4), "10");
        assert_eq!(format_g(-2.25, 6), "-2.25");
        assert_eq!(format_g(123456.0, 6), "123456");
    }

    #[test]
    fn timing_summary_has_both_forms() {
        let timings = Timings {
            init: Duration::from_millis(1500),
            distribute: Duration::from_millis(250),
            compute: Duration::from_secs(61),
            collect: Duration::from_secs(1),
        };
        assert_eq!(
            timing_summary(8, &timings),
            "Times (init, send and computing) = 1.5, 0.25, 62 sec\n\n\
             size=8\tinitTime=1.5\tsendTime=0.25\tcomputeTime=62 (1 min, 2 sec)\n"
        );
    }

    #[test]
    fn dump_writes_every_element() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.bin");
        let report = run_local(&settings(5, 2).run, 2).unwrap();
        write_dump(report.product.matrix(), &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 5 * 5 * std::mem::size_of::<f64>());
        let first = f64::from_ne_bytes(bytes[..8].try_into().unwrap());
        let last = f64::from_ne_bytes(bytes[bytes.len() - 8..].try_into().unwrap());
        // Row-index operands: C[i][j] = (i + 1) * 15 for n = 5.
        assert_eq!(first, 15.0);
        assert_eq!(last, 75.0);
    }

    #[test]
    fn unwritable_dump_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(4, 2);
        s.dump = Some(dir.path().join("missing").join("c.bin"));
        assert!(write_dump(&Matrix::zeros(2).unwrap(), s.dump.as_deref().unwrap()).is_err());
        assert!(run(&s).is_ok());
    }

    #[test]
    fn invalid_partition_fails_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.bin");
        let mut s = settings(10, 3);
        s.run.mode = PartitionMode::Strict;
        s.dump = Some(path.clone());
        assert!(run(&s).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn verify_accepts_correct_and_rejects_corrupt_products() {
        let mut s = settings(9, 3);
        s.run.fill = Fill::Seeded(11);
        let report = run_local(&s.run, s.ranks).unwrap();
        assert_eq!(verify(&report).unwrap(), 0.0);

        let mut wrong = report.product.matrix().clone();
        wrong.as_mut_slice()[40] += 1.0;
        let corrupt = RunReport {
            product: assemble(wrong, &report.plan).unwrap(),
            ..report
        };
        assert!(verify(&corrupt).is_err());
    }

    #[test]
    fn mpi_flag_needs_the_feature() {
        let mut s = settings(4, 1);
        s.mpi = true;
        if cfg!(not(feature = "distributed")) {
            assert!(run(&s).is_err());
        }
    }
}
