use faer::linalg::solvers::{PartialPivLu, Solve};
use faer::{Col, Mat};

use crate::error::{GlmError, LinearSolverError};
use crate::linear_solver::{LinearSolveMode, LinearSolver};
use crate::linear_solver_error;

use super::check_finite;

/// A [LinearSolver] that uses the partial pivoting LU decomposition in the [`faer`](https://github.com/sarah-ek/faer-rs) library.
///
/// Used for the dense Jacobian of the embedded Newton iteration.
pub struct DenseLu {
    lu: PartialPivLu<f64>,
    nrows: usize,
}

impl DenseLu {
    pub fn new(matrix: &Mat<f64>) -> Result<Self, GlmError> {
        if matrix.nrows() != matrix.ncols() {
            return Err(linear_solver_error!(MatrixNotSquare));
        }
        Ok(Self {
            lu: matrix.partial_piv_lu(),
            nrows: matrix.nrows(),
        })
    }
}

impl LinearSolver for DenseLu {
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
