use log::debug;

use crate::NewtonConfig;

/// Residual-based convergence test for the Newton iteration.
///
/// The iteration has converged once the residual norm is below `atol`, or below `rtol` times the
/// norm at the initial guess.
#[derive(Clone, Debug)]
pub struct Convergence {
    pub rtol: f64,
    pub atol: f64,
    max_iter: usize,
    niter: usize,
    initial_norm: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvergenceStatus {
    Converged,
    Diverged,
    Continue,
    MaximumIterations,
}

impl Convergence {
    pub fn new(config: &NewtonConfig) -> Self {
        Self {
            rtol: config.rtol,
            atol: config.atol,
            max_iter: config.maximum_iterations,
            niter: 0,
            initial_norm: None,
        }
    }
    pub fn max_iter(&self) -> usize {
        self.max_iter
    }
    pub fn set_max_iter(&mut self, value: usize) {
        self.max_iter = value;
    }
    pub fn niter(&self) -> usize {
        self.niter
    }
    pub fn reset(&mut self) {
        self.niter = 0;
        self.initial_norm = None;
    }

    /// Check the residual norm at the current iterate. A `Continue` status counts one more
    /// Newton update.
    pub fn check_new_iteration(&mut self, norm: f64) -> ConvergenceStatus {
        debug!("  Iteration {}, norm = {:.3e}", self.niter, norm);
        if !norm.is_finite() {
            return ConvergenceStatus::Diverged;
        }
        let initial_norm = *self.initial_norm.get_or_insert(norm);
        if norm <= self.atol || norm <= self.rtol * initial_norm {
            return ConvergenceStatus::Converged;
        }
        if self.niter >= self.max_iter {
            return ConvergenceStatus::MaximumIterations;
        }
        self.niter += 1;
        ConvergenceStatus::Continue
    }
}
