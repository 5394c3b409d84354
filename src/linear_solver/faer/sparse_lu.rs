use faer::{
    linalg::solvers::Solve,
    reborrow::Reborrow,
    sparse::linalg::solvers::{Lu, SymbolicLu},
    Col,
};

use crate::error::{GlmError, LinearSolverError};
use crate::linear_solver::{LinearSolveMode, LinearSolver};
use crate::linear_solver_error;
use crate::matrix::SparseJacobian;

use super::check_finite;

/// A [LinearSolver] that uses the sparse LU decomposition in the [`faer`](https://github.com/sarah-ek/faer-rs) library.
///
/// The symbolic and numeric factorizations are both computed in [SparseLu::new]; solves never
/// refactorize.
pub struct SparseLu {
    lu: Lu<usize, f64>,
    nrows: usize,
    nnz: usize,
}

impl SparseLu {
    pub fn new(matrix: &SparseJacobian) -> Result<Self, GlmError> {
        if matrix.nrows() != matrix.ncols() {
            return Err(linear_solver_error!(MatrixNotSquare));
        }
        let matrix = matrix.to_faer()?;
        let symbolic = SymbolicLu::try_new(matrix.symbolic())
            .map_err(|e| linear_solver_error!(FactorizationFailed, format!("{e:?}")))?;
        let lu = Lu::try_new_with_symbolic(symbolic, matrix.rb())
            .map_err(|e| linear_solver_error!(FactorizationFailed, format!("{e:?}")))?;
        Ok(Self {
            lu,
            nrows: matrix.nrows(),
            nnz: matrix.val().len(),
        })
    }

    /// Number of stored entries of the factorized matrix.
    pub fn nnz(&self) -> usize {
        self.nnz
    }
}

impl LinearSolver for SparseLu {
    fn nrows(&self) -> usize {
        self.nrows
    }

    fn solve_in_place(&self, b: &mut Col<f64>, mode: LinearSolveMode) -> Result<(), GlmError> {
        crate::error::check_length("right-hand side", self.nrows, b.nrows())?;
        match mode {
            LinearSolveMode::Forward => self.lu.solve_in_place(b.as_mut()),
            LinearSolveMode::Reverse => self.lu.solve_transpose_in_place(b.as_mut()),
        }
        check_finite(b)
    }
}
