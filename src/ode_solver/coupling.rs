use std::collections::BTreeMap;

use faer::{Col, Mat};
use log::warn;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::{GlmError, OptimizerError};
use crate::nonlinear_solver::{NewtonProblem, NewtonSolver};
use crate::ode_equations::OdeFunction;
use crate::ode_solver::phase::{Linearization, Phase, PhaseInput, PhaseState, StateMap};
use crate::{other_error, NewtonConfig};

/// How the stage equations `G(Y) = Y - S(Y) = 0` of a phase are closed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Formulation {
    /// Solved by an inner Newton iteration inside the integrator.
    #[default]
    Embedded,
    /// Handed to an [ExternalOptimizer] as equality constraints on the stage values.
    Exposed,
}

/// Newton iteration on the stage values of a phase.
struct EmbeddedProblem<'p, 'a, F: OdeFunction> {
    phase: &'p Phase<'a, F>,
    state: Option<PhaseState>,
    step_norm: f64,
}

impl<F: OdeFunction> NewtonProblem for EmbeddedProblem<'_, '_, F> {
    fn nstates(&self) -> usize {
        self.phase.num_unknowns()
    }

    fn residual(&mut self, x: &Col<f64>) -> Result<Col<f64>, GlmError> {
        let state = self.phase.evaluate(x)?;
        self.step_norm = self.phase.step_residual_norm(&state)?;
        let residual = self.phase.stage_residual(&state);
        self.state = Some(state);
        Ok(residual)
    }

    fn auxiliary_norm(&self) -> f64 {
        self.step_norm
    }

    fn jacobian(&mut self) -> Result<Mat<f64>, GlmError> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| other_error!("Jacobian requested before residual"))?;
        let lin = self.phase.linearize(state)?;
        self.phase.coupling_jacobian(&lin)
    }
}

/// The converged state of a phase and the number of Newton updates it took.
pub(crate) fn solve_embedded<F: OdeFunction>(
    phase: &Phase<'_, F>,
    config: &NewtonConfig,
) -> Result<(PhaseState, usize), GlmError> {
    let mut problem = EmbeddedProblem {
        phase,
        state: None,
        step_norm: 0.0,
    };
    let mut x = phase.initial_guess();
    let niter = NewtonSolver::new(config).solve_in_place(&mut problem, &mut x)?;
    match problem.state {
        Some(state) => Ok((state, niter)),
        None => phase.evaluate(&x).map(|state| (state, niter)),
    }
}

/// The equality constraints `G(Y) = 0` of one phase, as seen by an external optimizer.
///
/// Besides the constraints and their Jacobian, the problem exposes the partials an outer
/// optimization needs to chain through the integration: the step-vector trajectory `y` of every
/// state as a function of `Y`, and both `G` and `y` as functions of the phase inputs.
pub trait ExposedProblem {
    fn num_variables(&self) -> usize;

    /// A starting point, every stage value set to the initial state.
    fn initial_guess(&self) -> Col<f64>;

    /// Seeds of every state, then every parameter, then the step sizes.
    fn inputs(&self) -> Vec<PhaseInput>;

    /// `G(Y) = Y - (A h F(Y) + U y(Y))`
    fn constraints(&mut self, x: &Col<f64>) -> Result<Col<f64>, GlmError>;

    /// `dG/dY`, dense.
    fn constraint_jacobian(&mut self, x: &Col<f64>) -> Result<Mat<f64>, GlmError>;

    /// `dG/d(input)` at fixed `Y`, dense.
    fn constraint_input_jacobian(
        &mut self,
        x: &Col<f64>,
        input: &PhaseInput,
    ) -> Result<Mat<f64>, GlmError>;

    /// `y(Y)` of every state.
    fn trajectory(&mut self, x: &Col<f64>) -> Result<StateMap, GlmError>;

    /// `dy/dY` of every state, dense.
    fn trajectory_jacobian(
        &mut self,
        x: &Col<f64>,
    ) -> Result<BTreeMap<String, Mat<f64>>, GlmError>;

    /// `dy/d(input)` of every state at fixed `Y`, dense.
    fn trajectory_input_jacobian(
        &mut self,
        x: &Col<f64>,
        input: &PhaseInput,
    ) -> Result<BTreeMap<String, Mat<f64>>, GlmError>;
}

/// A caller-supplied driver that returns stage values satisfying the constraints of an
/// [ExposedProblem]. The integrator does not iterate on its behalf.
pub trait ExternalOptimizer {
    fn optimize(&mut self, problem: &mut dyn ExposedProblem) -> Result<Col<f64>, GlmError>;
}

pub(crate) struct StageConstraints<'p, 'a, F: OdeFunction> {
    phase: &'p Phase<'a, F>,
}

impl<'p, 'a, F: OdeFunction> StageConstraints<'p, 'a, F> {
    pub(crate) fn new(phase: &'p Phase<'a, F>) -> Self {
        Self { phase }
    }

    fn linearize(&self, x: &Col<f64>) -> Result<Linearization, GlmError> {
        let state = self.phase.evaluate(x)?;
        self.phase.linearize(&state)
    }
}

impl<F: OdeFunction> ExposedProblem for StageConstraints<'_, '_, F> {
    fn num_variables(&self) -> usize {
        self.phase.num_unknowns()
    }

    fn initial_guess(&self) -> Col<f64> {
        self.phase.initial_guess()
    }

    fn inputs(&self) -> Vec<PhaseInput> {
        self.phase.inputs()
    }

    fn constraints(&mut self, x: &Col<f64>) -> Result<Col<f64>, GlmError> {
        let state = self.phase.evaluate(x)?;
        Ok(self.phase.stage_residual(&state))
    }

    fn constraint_jacobian(&mut self, x: &Col<f64>) -> Result<Mat<f64>, GlmError> {
        let lin = self.linearize(x)?;
        self.phase.coupling_jacobian(&lin)
    }

    fn constraint_input_jacobian(
        &mut self,
        x: &Col<f64>,
        input: &PhaseInput,
    ) -> Result<Mat<f64>, GlmError> {
        let lin = self.linearize(x)?;
        Ok(self.phase.input_jacobians(&lin, input)?.0)
    }

    fn trajectory(&mut self, x: &Col<f64>) -> Result<StateMap, GlmError> {
        Ok(self.phase.evaluate(x)?.trajectory)
    }

    fn trajectory_jacobian(
        &mut self,
        x: &Col<f64>,
    ) -> Result<BTreeMap<String, Mat<f64>>, GlmError> {
        let lin = self.linearize(x)?;
        self.phase.trajectory_jacobians(&lin)
    }

    fn trajectory_input_jacobian(
        &mut self,
        x: &Col<f64>,
        input: &PhaseInput,
    ) -> Result<BTreeMap<String, Mat<f64>>, GlmError> {
        let lin = self.linearize(x)?;
        Ok(self.phase.input_jacobians(&lin, input)?.1)
    }
}

/// Evaluate a phase at the point returned by the optimizer.
///
/// The point must satisfy the constraints to the Newton tolerances: `||G|| <= atol`, or
/// `||G|| <= rtol ||G(Y0)||` relative to the initial guess. An infeasible point is an
/// [OptimizerError::InfeasiblePoint], never a Newton convergence error.
pub(crate) fn solve_exposed<F: OdeFunction>(
    phase: &Phase<'_, F>,
    optimizer: &mut dyn ExternalOptimizer,
    config: &NewtonConfig,
) -> Result<PhaseState, GlmError> {
    let mut constraints = StageConstraints::new(phase);
    let x = optimizer.optimize(&mut constraints)?;
    let state = phase.evaluate(&x)?;
    let norm = phase.stage_residual(&state).norm_l2();
    let initial = phase.stage_residual(&phase.evaluate(&phase.initial_guess())?);
    let tolerance = config.atol.max(config.rtol * initial.norm_l2());
    if !(norm <= tolerance) {
        warn!("External optimizer returned an infeasible point, constraint norm = {norm:.3e}");
        return Err(GlmError::from(OptimizerError::InfeasiblePoint {
            constraint_norm: norm,
            tolerance,
        }));
    }
    Ok(state)
}
