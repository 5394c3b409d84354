use faer::{Col, Mat};

use crate::error::GlmError;

pub use convergence::{Convergence, ConvergenceStatus};
pub use newton::NewtonSolver;

/// A nonlinear problem `G(x) = 0` solved with a dense Newton iteration.
///
/// The Jacobian is always requested at the point of the most recent call to
/// [NewtonProblem::residual], so implementations may cache intermediate results between the two.
pub trait NewtonProblem {
    fn nstates(&self) -> usize;

    /// Evaluate `G(x)`.
    fn residual(&mut self, x: &Col<f64>) -> Result<Col<f64>, GlmError>;

    /// A second residual norm that must also fall below tolerance, evaluated at the same point.
    fn auxiliary_norm(&self) -> f64 {
        0.0
    }

    /// `dG/dx` at the last residual point.
    fn jacobian(&mut self) -> Result<Mat<f64>, GlmError>;
}

pub mod convergence;
pub mod newton;
