//! Owned matrix buffers.
//!
//! [`Matrix`] is a full `n x n` row-major buffer, held only by the
//! coordinator (plus the replicated right operand on every participant).
//! [`RowBlock`] is a stripe-sized buffer tagged with the [`Stripe`] it holds.
//! They are distinct types with distinct sizes: a member never allocates a
//! full-size buffer for an operand it only holds a stripe of.
//!
//! Allocation is fallible. A participant that cannot allocate reports
//! [`MatrixError::Allocation`] and must not enter any data collective.

use std::fmt::Write as _;
use std::io::{self, Write};

use ndarray::ArrayView2;
use thiserror::Error;

use crate::partition::Stripe;

/// Errors from matrix allocation and access.
#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("Insufficient memory for {elements} matrix elements")]
    Allocation { elements: usize },

    #[error("Matrix dimension {n} overflows the address space")]
    TooLarge { n: usize },

    #[error("Buffer holds {actual} elements, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Stripe [{from}, {to}) lies outside a matrix of {n} rows")]
    StripeOutOfRange { from: usize, to: usize, n: usize },

    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Initial contents of a freshly allocated matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fill {
    /// All zeros.
    Zeros,
    /// `M[i][j] = i + 1`.
    #[default]
    RowIndex,
    /// Deterministic pseudo-random integers in `0..10`.
    Seeded(u64),
}

impl Fill {
    fn populate(self, data: &mut [f64], n: usize) {
        match self {
            Fill::Zeros => {}
            Fill::RowIndex => {
                for (i, row) in data.chunks_exact_mut(n).enumerate() {
                    row.fill((i + 1) as f64);
                }
            }
            Fill::Seeded(seed) => {
                // 64-bit LCG (Knuth's MMIX constants); the high bits are the good ones.
                let mut s = seed;
                for v in data.iter_mut() {
                    s = s
                        .wrapping_mul(6364136223846793005)
                        .wrapping_add(1442695040888963407);
                    *v = ((s >> 33) % 10) as f64;
                }
            }
        }
    }
}

fn element_count(rows: usize, n: usize) -> Result<usize, MatrixError> {
    rows.checked_mul(n).ok_or(MatrixError::TooLarge { n })
}

fn try_alloc(elements: usize) -> Result<Vec<f64>, MatrixError> {
    let mut data = Vec::new();
    data.try_reserve_exact(elements)
        .map_err(|_| MatrixError::Allocation { elements })?;
    data.resize(elements, 0.0);
    Ok(data)
}

/// A dense square matrix, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    n: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// Allocate an `n x n` matrix and initialise it with `fill`.
    pub fn new(n: usize, fill: Fill) -> Result<Self, MatrixError> {
        let mut data = try_alloc(element_count(n, n)?)?;
        if n > 0 {
            fill.populate(&mut data, n);
        }
        Ok(Self { n, data })
    }

    pub fn zeros(n: usize) -> Result<Self, MatrixError> {
        Self::new(n, Fill::Zeros)
    }

    /// Wrap an existing row-major buffer of `n * n` elements.
    pub fn from_vec(n: usize, data: Vec<f64>) -> Result<Self, MatrixError> {
        let expected = element_count(n, n)?;
        if data.len() != expected {
            return Err(MatrixError::DimensionMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { n, data })
    }

    /// Build a matrix from a per-cell function.
    pub fn from_fn(n: usize, f: impl Fn(usize, usize) -> f64) -> Result<Self, MatrixError> {
        let mut m = Self::zeros(n)?;
        for (i, row) in m.data.chunks_exact_mut(n.max(1)).enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = f(i, j);
            }
        }
        Ok(m)
    }

    /// Dimension `n` of the `n x n` matrix.
    pub fn dim(&self) -> usize {
        self.n
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n + j]
    }

    /// The rows covered by `stripe`.
    pub fn rows(&self, stripe: Stripe) -> Result<&[f64], MatrixError> {
        let range = self.row_range(stripe)?;
        Ok(&self.data[range])
    }

    pub fn rows_mut(&mut self, stripe: Stripe) -> Result<&mut [f64], MatrixError> {
        let range = self.row_range(stripe)?;
        Ok(&mut self.data[range])
    }

    fn row_range(&self, stripe: Stripe) -> Result<std::ops::Range<usize>, MatrixError> {
        if stripe.from > stripe.to || stripe.to > self.n {
            return Err(MatrixError::StripeOutOfRange {
                from: stripe.from,
                to: stripe.to,
                n: self.n,
            });
        }
        Ok(stripe.from * self.n..stripe.to * self.n)
    }

    /// Borrow as an `ndarray` view.
    pub fn view(&self) -> Result<ArrayView2<'_, f64>, MatrixError> {
        Ok(ArrayView2::from_shape((self.n, self.n), &self.data)?)
    }

    /// Sum of all elements.
    pub fn checksum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Render at most `limit x limit` of the top-left corner for debugging.
    pub fn preview(&self, limit: usize) -> String {
        let shown = self.n.min(limit);
        let truncated = shown < self.n;
        let mut out = String::new();
        for i in 0..shown {
            for j in 0..shown {
                let _ = write!(out, "{:6.1} ", self.get(i, j));
            }
            if truncated {
                out.push_str("...");
            }
            out.push('\n');
        }
        if truncated {
            out.push_str("   .... .... ...\n");
        }
        out.push_str("\n-----------------------\n");
        out
    }

    /// Write the full matrix as headerless native-endian IEEE-754 doubles.
    pub fn write_raw<W: Write>(&self, mut writer: W) -> io::Result<()> {
        for row in self.data.chunks(self.n.max(1)) {
            let bytes: Vec<u8> = row.iter().flat_map(|v| v.to_ne_bytes()).collect();
            writer.write_all(&bytes)?;
        }
        writer.flush()
    }
}

/// A stripe-sized buffer holding rows `[from, to)` of an `n x n` matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBlock {
    stripe: Stripe,
    n: usize,
    data: Vec<f64>,
}

impl RowBlock {
    /// Allocate a zeroed block for `stripe` of an `n x n` matrix.
    pub fn zeros(stripe: Stripe, n: usize) -> Result<Self, MatrixError> {
        if stripe.from > stripe.to || stripe.to > n {
            return Err(MatrixError::StripeOutOfRange {
                from: stripe.from,
                to: stripe.to,
                n,
            });
        }
        let data = try_alloc(element_count(stripe.len(), n)?)?;
        Ok(Self { stripe, n, data })
    }

    pub fn stripe(&self) -> Stripe {
        self.stripe
    }

    /// Row width `n`.
    pub fn dim(&self) -> usize {
        self.n
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_index_fill() {
        let m = Matrix::new(3, Fill::RowIndex).unwrap();
        assert_eq!(m.as_slice(), &[1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 3.0, 3.0, 3.0]);
    }

    #[test]
    fn seeded_fill_is_deterministic_and_small() {
        let a = Matrix::new(8, Fill::Seeded(42)).unwrap();
        let b = Matrix::new(8, Fill::Seeded(42)).unwrap();
        let c = Matrix::new(8, Fill::Seeded(43)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_slice().iter().all(|&v| (0.0..10.0).contains(&v) && v.fract() == 0.0));
    }

    #[test]
    fn empty_matrix_is_valid() {
        let m = Matrix::new(0, Fill::RowIndex).unwrap();
        assert_eq!(m.dim(), 0);
        assert!(m.as_slice().is_empty());
        assert_eq!(m.rows(Stripe::new(0, 0)).unwrap().len(), 0);
    }

    #[test]
    fn overflowing_dimension_is_reported() {
        assert!(matches!(
            Matrix::zeros(usize::MAX),
            Err(MatrixError::TooLarge { .. })
        ));
    }

    #[test]
    fn unsatisfiable_allocation_is_reported() {
        // Fits in usize but not in any address space.
        let n = 1usize << 31;
        assert!(matches!(
            Matrix::zeros(n),
            Err(MatrixError::Allocation { .. }) | Err(MatrixError::TooLarge { .. })
        ));
    }

    #[test]
    fn rows_slices_the_stripe() {
        let m = Matrix::from_fn(4, |i, j| (i * 10 + j) as f64).unwrap();
        let rows = m.rows(Stripe::new(1, 3)).unwrap();
        assert_eq!(rows.len(), 8);
        assert_eq!(rows[0], 10.0);
        assert_eq!(rows[7], 23.0);
        assert!(m.rows(Stripe::new(3, 5)).is_err());
    }

    #[test]
    fn row_block_has_stripe_size() {
        let block = RowBlock::zeros(Stripe::new(2, 5), 7).unwrap();
        assert_eq!(block.as_slice().len(), 21);
        assert_eq!(block.stripe(), Stripe::new(2, 5));
        assert!(RowBlock::zeros(Stripe::new(3, 3), 7).unwrap().is_empty());
        assert!(RowBlock::zeros(Stripe::new(6, 8), 7).is_err());
    }

    #[test]
    fn view_matches_layout() {
        let m = Matrix::from_fn(3, |i, j| (i * 3 + j) as f64).unwrap();
        let v = m.view().unwrap();
        assert_eq!(v[[1, 2]], 5.0);
        assert_eq!(v[[2, 0]], 6.0);
    }

    #[test]
    fn preview_truncates_large_matrices() {
        let m = Matrix::new(5, Fill::RowIndex).unwrap();
        let full = m.preview(10);
        assert!(!full.contains("..."));
        assert_eq!(full.lines().next().unwrap(), "   1.0    1.0    1.0    1.0    1.0 ");

        let cut = m.preview(2);
        assert!(cut.starts_with("   1.0    1.0 ...\n   2.0    2.0 ...\n"));
        assert!(cut.contains("   .... .... ..."));
    }

    #[test]
    fn write_raw_emits_every_element() {
        let m = Matrix::from_fn(3, |i, j| (i * 3 + j) as f64 + 0.5).unwrap();
        let mut bytes = Vec::new();
        m.write_raw(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 9 * 8);
        let decoded: Vec<f64> = bytes
            .chunks_exact(8)
            .map(|c| f64::from_ne_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(decoded, m.as_slice());
    }
}
