//! CPU compute kernel using Rayon for shared-memory parallelism.
//!
//! Each participant owns one [`CpuKernel`]; its thread pool is built once and
//! reused for the whole run. The participant's output rows are split into
//! one contiguous chunk per worker thread (static scheduling: every row costs
//! the same, so there is nothing to balance). Chunks write disjoint rows, so
//! the workers need no synchronisation beyond the final join.

use rayon::prelude::*;
use thiserror::Error;

/// Errors originating from the compute kernel.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Failed to build a pool of {threads} threads: {reason}")]
    PoolBuild { threads: usize, reason: String },

    #[error("Thread count must be at least 1")]
    NoThreads,

    #[error("Operand {operand} holds {actual} elements, expected {expected}")]
    ShapeMismatch {
        operand: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// CPU kernel that parallelises row blocks across a fixed pool of threads.
pub struct CpuKernel {
    pool: rayon::ThreadPool,
    num_threads: usize,
}

impl CpuKernel {
    /// Create a kernel with a dedicated pool of `num_threads` workers.
    pub fn new(num_threads: usize) -> Result<Self, ComputeError> {
        if num_threads == 0 {
            return Err(ComputeError::NoThreads);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("strata-worker-{i}"))
            .build()
            .map_err(|e| ComputeError::PoolBuild {
                threads: num_threads,
                reason: e.to_string(),
            })?;
        Ok(Self { pool, num_threads })
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Compute `c_rows = a_rows * b` for a contiguous block of rows.
    ///
    /// `a_rows` and `c_rows` hold the same number of full rows of width `n`;
    /// `b` is the complete `n x n` right operand. An empty block is a no-op.
    pub fn multiply_rows(
        &self,
        a_rows: &[f64],
        b: &[f64],
        n: usize,
        c_rows: &mut [f64],
    ) -> Result<(), ComputeError> {
        check_len("B", n * n, b.len())?;
        check_len("A", c_rows.len(), a_rows.len())?;
        if n == 0 || c_rows.is_empty() {
            return Ok(());
        }
        if c_rows.len() % n != 0 {
            return Err(ComputeError::ShapeMismatch {
                operand: "C",
                expected: (c_rows.len() / n + 1) * n,
                actual: c_rows.len(),
            });
        }

        let rows = c_rows.len() / n;
        let chunk = rows.div_ceil(self.num_threads) * n;
        log::debug!(
            "Multiplying {} rows on {} threads ({} rows per chunk)",
            rows,
            self.num_threads,
            chunk / n
        );

        self.pool.install(|| {
            c_rows
                .par_chunks_mut(chunk)
                .zip(a_rows.par_chunks(chunk))
                .for_each(|(c_block, a_block)| multiply_block(a_block, b, n, c_block));
        });
        Ok(())
    }
}

fn check_len(operand: &'static str, expected: usize, actual: usize) -> Result<(), ComputeError> {
    if expected != actual {
        return Err(ComputeError::ShapeMismatch {
            operand,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Sequential row kernel shared by the parallel and reference paths.
///
/// Each cell accumulates over `k` in increasing order into a local sum, so
/// the result of a cell never depends on how rows were split across threads.
fn multiply_block(a_block: &[f64], b: &[f64], n: usize, c_block: &mut [f64]) {
    for (a_row, c_row) in a_block.chunks_exact(n).zip(c_block.chunks_exact_mut(n)) {
        for (j, c) in c_row.iter_mut().enumerate() {
            let mut sum = 0.0;
            for (k, &a) in a_row.iter().enumerate() {
                sum += a * b[k * n + j];
            }
            *c = sum;
        }
    }
}

/// Reference triple loop over full `n x n` operands, on the calling thread.
pub fn multiply_sequential(a: &[f64], b: &[f64], n: usize) -> Result<Vec<f64>, ComputeError> {
    check_len("A", n * n, a.len())?;
    check_len("B", n * n, b.len())?;
    let mut c = vec![0.0; n * n];
    if n > 0 {
        multiply_block(a, b, n, &mut c);
    }
    Ok(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(n: usize, seed: u64) -> Vec<f64> {
        let mut s = seed;
        (0..n * n)
            .map(|_| {
                s = s.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((s >> 33) % 1000) as f64 / 7.0 - 50.0
            })
            .collect()
    }

    #[test]
    fn zero_threads_rejected() {
        assert!(matches!(CpuKernel::new(0), Err(ComputeError::NoThreads)));
    }

    #[test]
    fn identity_right_operand_returns_left() {
        let n = 5;
        let a = seeded(n, 3);
        let mut identity = vec![0.0; n * n];
        for i in 0..n {
            identity[i * n + i] = 1.0;
        }
        let kernel = CpuKernel::new(2).unwrap();
        let mut c = vec![0.0; n * n];
        kernel.multiply_rows(&a, &identity, n, &mut c).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn parallel_matches_sequential_bit_for_bit() {
        for &n in &[1, 4, 17] {
            let a = seeded(n, 11);
            let b = seeded(n, 29);
            let expected = multiply_sequential(&a, &b, n).unwrap();
            for &threads in &[1, 2, 3, 5, 8] {
                let kernel = CpuKernel::new(threads).unwrap();
                let mut c = vec![f64::NAN; n * n];
                kernel.multiply_rows(&a, &b, n, &mut c).unwrap();
                assert_eq!(c, expected, "n={n} threads={threads}");
            }
        }
    }

    #[test]
    fn row_block_matches_rows_of_full_product() {
        let n = 6;
        let a = seeded(n, 5);
        let b = seeded(n, 7);
        let full = multiply_sequential(&a, &b, n).unwrap();

        let kernel = CpuKernel::new(4).unwrap();
        let (from, to) = (2, 5);
        let mut block = vec![0.0; (to - from) * n];
        kernel
            .multiply_rows(&a[from * n..to * n], &b, n, &mut block)
            .unwrap();
        assert_eq!(block, full[from * n..to * n].to_vec());
    }

    #[test]
    fn empty_block_is_a_no_op() {
        let kernel = CpuKernel::new(3).unwrap();
        let b = seeded(4, 1);
        let mut c: Vec<f64> = Vec::new();
        kernel.multiply_rows(&[], &b, 4, &mut c).unwrap();
        kernel.multiply_rows(&[], &[], 0, &mut c).unwrap();
        assert!(c.is_empty());
    }

    #[test]
    fn mismatched_operands_rejected() {
        let kernel = CpuKernel::new(1).unwrap();
        let b = vec![0.0; 9];
        let mut c = vec![0.0; 6];
        let err = kernel.multiply_rows(&[0.0; 3], &b, 3, &mut c).unwrap_err();
        assert!(matches!(
            err,
            ComputeError::ShapeMismatch { operand: "A", expected: 6, actual: 3 }
        ));
        let err = kernel.multiply_rows(&[0.0; 6], &b[..8], 3, &mut c).unwrap_err();
        assert!(matches!(err, ComputeError::ShapeMismatch { operand: "B", .. }));
    }
}
