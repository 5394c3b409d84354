pub mod lu;
pub mod sparse_lu;

use ::faer::Col;

use crate::error::{GlmError, LinearSolverError};
use crate::linear_solver_error;

/// A singular factorization shows up as non-finite entries in the solution.
pub(crate) fn check_finite(x: &Col<f64>) -> Result<(), GlmError> {
    if x.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(linear_solver_error!(LuSolveFailed))
    }
}
