//! Linear operators accessed row by row.
//!
//! Preconditioners and solvers in this crate only need a few things from a matrix:
//! its dimensions, a matrix-vector product, its diagonal and access to its rows.
//! [`RowMatrix`] collects these so that any distributed matrix type
//! can be plugged in. It is implemented here for serial
//! [`CsrMatrix`][nas::CsrMatrix]s.

use nalgebra as na;
use nalgebra_sparse as nas;

use crate::comm::{Communicator, SerialComm};

/// Error in applying an operator.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum OperatorError {
    /// A vector's length didn't match the operator.
    #[error("Dimension mismatch: expected a vector of length {expected}, got {found}")]
    DimensionMismatch {
        /// Number of rows owned by this process.
        expected: usize,
        /// Length of the vector given.
        found: usize,
    },
    /// The operator itself reported a failure.
    #[error("Operator application failed: {0}")]
    ApplyFailed(String),
}

/// The nonzero entries of one row of a [`RowMatrix`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RowView<'a> {
    /// Column indices of the entries.
    pub cols: &'a [usize],
    /// Values of the entries.
    pub values: &'a [f64],
}

impl<'a> RowView<'a> {
    /// Iterate over `(column, value)` pairs.
    pub fn iter(self) -> impl 'a + Iterator<Item = (usize, f64)> {
        self.cols.iter().copied().zip(self.values.iter().copied())
    }
}

/// A square matrix distributed by rows over the processes of a communicator.
///
/// Row and column indices are local to this process.
pub trait RowMatrix {
    /// Number of rows owned by this process.
    fn num_my_rows(&self) -> usize;
    /// Number of stored entries in the rows owned by this process.
    fn num_my_nonzeros(&self) -> usize;
    /// The communicator the matrix is distributed over.
    fn comm(&self) -> &dyn Communicator;
    /// Compute `y = A x`.
    fn apply(&self, x: &na::DVector<f64>, y: &mut na::DVector<f64>) -> Result<(), OperatorError>;
    /// The diagonal entries of the rows owned by this process.
    /// Rows with no stored diagonal entry get zero.
    fn extract_diagonal(&self) -> na::DVector<f64>;
    /// The stored entries of a row.
    fn row(&self, row_idx: usize) -> RowView<'_>;

    /// Total number of rows over all processes.
    fn num_global_rows(&self) -> usize {
        self.comm().sum_all_counts(self.num_my_rows())
    }

    /// Total number of stored entries over all processes.
    fn num_global_nonzeros(&self) -> usize {
        self.comm().sum_all_counts(self.num_my_nonzeros())
    }

    /// Check that a vector has one entry per local row.
    fn check_len(&self, v: &na::DVector<f64>) -> Result<(), OperatorError> {
        if v.len() == self.num_my_rows() {
            Ok(())
        } else {
            Err(OperatorError::DimensionMismatch {
                expected: self.num_my_rows(),
                found: v.len(),
            })
        }
    }
}

impl RowMatrix for nas::CsrMatrix<f64> {
    #[inline]
    fn num_my_rows(&self) -> usize {
        self.nrows()
    }

    #[inline]
    fn num_my_nonzeros(&self) -> usize {
        self.nnz()
    }

    fn comm(&self) -> &dyn Communicator {
        static SERIAL: SerialComm = SerialComm;
        &SERIAL
    }

    fn apply(&self, x: &na::DVector<f64>, y: &mut na::DVector<f64>) -> Result<(), OperatorError> {
        if x.len() != self.ncols() {
            return Err(OperatorError::DimensionMismatch {
                expected: self.ncols(),
                found: x.len(),
            });
        }
        self.check_len(y)?;

        y.copy_from(&(self * x));
        Ok(())
    }

    fn extract_diagonal(&self) -> na::DVector<f64> {
        na::DVector::from_iterator(
            self.nrows(),
            (0..self.nrows()).map(|row_idx| {
                RowMatrix::row(self, row_idx)
                    .iter()
                    .find(|&(col, _)| col == row_idx)
                    .map_or(0.0, |(_, val)| val)
            }),
        )
    }

    // shadowed by the inherent `CsrMatrix::row`,
    // so call this as `RowMatrix::row` on concrete CSR matrices
    fn row(&self, row_idx: usize) -> RowView<'_> {
        let range = self.row_offsets()[row_idx]..self.row_offsets()[row_idx + 1];
        RowView {
            cols: &self.col_indices()[range.clone()],
            values: &self.values()[range],
        }
    }
}

/// Dot product of two distributed vectors.
pub fn dot(comm: &dyn Communicator, x: &na::DVector<f64>, y: &na::DVector<f64>) -> f64 {
    comm.sum_all(x.dot(y))
}

/// Euclidean norm of a distributed vector.
pub fn norm2(comm: &dyn Communicator, x: &na::DVector<f64>) -> f64 {
    dot(comm, x, x).sqrt()
}
