use log::{info, warn};

use faer::Col;

use crate::error::{GlmError, NonLinearSolverError};
use crate::linear_solver::{DenseLu, LinearSolveMode, LinearSolver};
use crate::NewtonConfig;

use super::{Convergence, ConvergenceStatus, NewtonProblem};

/// Full Newton iteration: the Jacobian is rebuilt and refactorized at every iterate.
pub struct NewtonSolver {
    convergence: Convergence,
    last_norm: f64,
}

impl NewtonSolver {
    pub fn new(config: &NewtonConfig) -> Self {
        Self {
            convergence: Convergence::new(config),
            last_norm: f64::NAN,
        }
    }

    pub fn convergence(&self) -> &Convergence {
        &self.convergence
    }

    /// Residual norm at the last iterate.
    pub fn last_norm(&self) -> f64 {
        self.last_norm
    }

    /// Solve `G(x) = 0` starting from `x`, returning the number of Newton updates taken.
    pub fn solve_in_place(
        &mut self,
        problem: &mut impl NewtonProblem,
        x: &mut Col<f64>,
    ) -> Result<usize, GlmError> {
        crate::error::check_length("Newton initial guess", problem.nstates(), x.nrows())?;
        self.convergence.reset();
        loop {
            let mut dx = problem.residual(x)?;
            let norm = dx.norm_l2().max(problem.auxiliary_norm());
            self.last_norm = norm;
            let niter = self.convergence.niter();
            match self.convergence.check_new_iteration(norm) {
                ConvergenceStatus::Continue => {}
                ConvergenceStatus::Converged => {
                    info!("Newton converged after {niter} iterations, norm = {norm:.3e}");
                    return Ok(niter);
                }
                ConvergenceStatus::Diverged => {
                    warn!("Newton diverged at iteration {niter}");
                    return Err(GlmError::from(NonLinearSolverError::NewtonDiverged {
                        niter,
                        residual_norm: norm,
                    }));
                }
                ConvergenceStatus::MaximumIterations => {
                    warn!("Newton reached the maximum of {niter} iterations, norm = {norm:.3e}");
                    return Err(GlmError::from(NonLinearSolverError::NewtonDidNotConverge {
                        niter,
                        residual_norm: norm,
                    }));
                }
            }
            let lu = DenseLu::new(&problem.jacobian()?)?;
            lu.solve_in_place(&mut dx, LinearSolveMode::Forward)?;
            for i in 0..x.nrows() {
                x[i] -= dx[i];
            }
        }
    }
}
