//! Result assembly on the coordinator.

use ndarray::Zip;
use thiserror::Error;

use crate::matrix::{Matrix, MatrixError};
use crate::partition::PartitionPlan;

/// Errors from result assembly and verification.
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("Collected matrix has dimension {actual}, plan expects {expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("Matrix error: {0}")]
    Matrix(#[from] MatrixError),
}

/// The finished product matrix.
///
/// Read-only once assembled: it is handed to the dump writer and the debug
/// display unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    matrix: Matrix,
}

/// Finalise the coordinator's collected matrix.
pub fn assemble(matrix: Matrix, plan: &PartitionPlan) -> Result<Product, AssemblyError> {
    if matrix.dim() != plan.dim() {
        return Err(AssemblyError::Dimension {
            expected: plan.dim(),
            actual: matrix.dim(),
        });
    }
    Ok(Product { matrix })
}

impl Product {
    pub fn matrix(&self) -> &Matrix {
        &self.matrix
    }

    pub fn dim(&self) -> usize {
        self.matrix.dim()
    }

    /// Largest absolute difference from an independent `a * b`.
    ///
    /// The reference uses `ndarray`'s matrix product, whose summation order
    /// differs from the row kernel, so compare against a tolerance rather
    /// than for equality.
    pub fn max_deviation(&self, a: &Matrix, b: &Matrix) -> Result<f64, AssemblyError> {
        for operand in [a, b] {
            if operand.dim() != self.dim() {
                return Err(AssemblyError::Dimension {
                    expected: self.dim(),
                    actual: operand.dim(),
                });
            }
        }
        let reference = a.view()?.dot(&b.view()?);
        let mut worst = 0.0_f64;
        Zip::from(&self.matrix.view()?)
            .and(&reference)
            .for_each(|&got, &want| worst = worst.max((got - want).abs()));
        Ok(worst)
    }
}
