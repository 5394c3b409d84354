use std::collections::BTreeMap;

use faer::{Col, Mat};

use crate::error::{check_length, ConfigurationError, GlmError};
use crate::linear_solver::{DenseLu, LinearSolveMode, LinearSolver};
use crate::matrix::{SparseJacobian, SparsityPattern};
use crate::ode_equations::{OdeFunction, ParameterKind};
use crate::ode_solver::integrator::{Integrator, IntegratorInputs};
use crate::ode_solver::output::{InitialConditionSeed, StartingContraction, TrajectoryAssembler};
use crate::ode_solver::phase::{Linearization, Phase, StateMap};
use crate::ode_solver::solution::{PhaseRecord, Solution};
use crate::{configuration_error, other_error};

/// An input of the integration that the trajectory can be differentiated with respect to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SensitivityInput {
    InitialCondition(String),
    Parameter(String),
    /// Every step size of the global grid.
    StepSizes,
}

/// Perturbations of the inputs. Missing entries are zero.
#[derive(Debug, Clone, Default)]
pub struct TangentSeeds {
    pub initial_conditions: StateMap,
    pub parameters: StateMap,
    pub step_sizes: Option<Col<f64>>,
}

/// Gradients of a scalar function of the trajectory with respect to every input.
#[derive(Debug, Clone)]
pub struct Gradients {
    pub initial_conditions: StateMap,
    pub parameters: StateMap,
    pub step_sizes: Col<f64>,
}

/// A phase linearized at its converged stage values, with the coupling Jacobian factorized.
struct LinearizedPhase<'a, F: OdeFunction> {
    phase: Phase<'a, F>,
    lin: Linearization,
    coupling: DenseLu,
}

impl<'a, F: OdeFunction> LinearizedPhase<'a, F> {
    fn new(phase: Phase<'a, F>, record: &PhaseRecord) -> Result<Self, GlmError> {
        let state = phase.evaluate(&phase.join(&record.stage_values))?;
        let lin = phase.linearize(&state)?;
        let coupling = DenseLu::new(&phase.coupling_jacobian(&lin)?)?;
        Ok(Self {
            phase,
            lin,
            coupling,
        })
    }

    /// Tangent of the step-vector trajectory.
    fn tangent(
        &self,
        dy0: &StateMap,
        dp: &StateMap,
        dh: &Col<f64>,
    ) -> Result<StateMap, GlmError> {
        let (phase, lin) = (&self.phase, &self.lin);
        let df_explicit = phase.rates_input_tangent(lin, dp, dh);
        let dy_explicit = phase.trajectory_tangent(lin, Some(dy0), Some(dh), &df_explicit)?;
        let ds_explicit = phase.stage_tangent(lin, Some(dh), &df_explicit, &dy_explicit);
        let dstage = self
            .coupling
            .solve(&phase.join(&ds_explicit), LinearSolveMode::Forward)?;
        let mut df = phase.rates_tangent(lin, &phase.split(&dstage)?);
        for (name, d) in df.iter_mut() {
            add_assign(d, &df_explicit[name]);
        }
        phase.trajectory_tangent(lin, Some(dy0), Some(dh), &df)
    }

    /// Transpose of [LinearizedPhase::tangent]: returns the seed adjoint and accumulates the
    /// parameter and step-size adjoints.
    fn adjoint(
        &self,
        y_bar: &StateMap,
        p_bar: &mut StateMap,
        h_bar: &mut Col<f64>,
    ) -> Result<StateMap, GlmError> {
        let (phase, lin) = (&self.phase, &self.lin);
        let (mut y0_bar, mut f_bar) = phase.trajectory_adjoint(lin, y_bar, h_bar)?;
        let stage_bar = phase.rates_adjoint(lin, &f_bar);
        let lambda = self
            .coupling
            .solve(&phase.join(&stage_bar), LinearSolveMode::Reverse)?;
        let (fb, yb) = phase.stage_adjoint(lin, &phase.split(&lambda)?, h_bar);
        let (y0b, fb_trajectory) = phase.trajectory_adjoint(lin, &yb, h_bar)?;
        for (name, f) in f_bar.iter_mut() {
            add_assign(f, &fb[name]);
            add_assign(f, &fb_trajectory[name]);
        }
        for (name, y) in y0_bar.iter_mut() {
            add_assign(y, &y0b[name]);
        }
        phase.rates_input_adjoint(lin, &f_bar, p_bar, h_bar);
        Ok(y0_bar)
    }
}

fn add_assign(x: &mut Col<f64>, y: &Col<f64>) {
    for i in 0..x.nrows() {
        x[i] += y[i];
    }
}

/// Exact derivatives of an assembled [Solution] with respect to the initial conditions, the
/// parameters and the step sizes.
///
/// The converged phases are linearized once. [Sensitivities::tangent] then pushes one input
/// perturbation forward and [Sensitivities::adjoint] pulls one output weighting back; both reuse
/// the factorized recurrence of every state and the factorized coupling Jacobian of every phase.
pub struct Sensitivities<'a, F: OdeFunction> {
    function: &'a F,
    num_steps: usize,
    num_times: usize,
    seeds: BTreeMap<String, InitialConditionSeed>,
    contractions: BTreeMap<String, StartingContraction>,
    assemblers: BTreeMap<String, TrajectoryAssembler>,
    starting: Option<LinearizedPhase<'a, F>>,
    main: LinearizedPhase<'a, F>,
}

impl<'a, F: OdeFunction> Integrator<'a, F> {
    /// Linearize a solution computed by [Integrator::solve] from the same `inputs`.
    pub fn sensitivities(
        &self,
        inputs: &IntegratorInputs,
        solution: &Solution,
    ) -> Result<Sensitivities<'a, F>, GlmError> {
        let initial_conditions = self.initial_conditions(inputs)?;
        let (seeds, seed_values) = self.initial_seeds(&initial_conditions)?;
        let contractions = self.contractions();
        let (starting, main_seeds) = match (
            self.starting_phase(&inputs.parameters, seed_values.clone())?,
            solution.starting_phase(),
        ) {
            (Some(phase), Some(record)) => {
                let linearized = LinearizedPhase::new(phase, record)?;
                let main_seeds = Self::contract(&contractions, &record.trajectory)?;
                (Some(linearized), main_seeds)
            }
            (None, None) => (None, seed_values),
            _ => {
                return Err(other_error!(
                    "solution does not match the starting method of the scheme"
                ))
            }
        };
        let main = LinearizedPhase::new(
            self.main_phase(&inputs.parameters, main_seeds)?,
            solution.main_phase(),
        )?;
        Ok(Sensitivities {
            function: self.function(),
            num_steps: self.grid().num_steps(),
            num_times: self.grid().num_times(),
            seeds,
            contractions,
            assemblers: self.assemblers(),
            starting,
            main,
        })
    }
}

impl<F: OdeFunction> Sensitivities<'_, F> {
    fn parameter_size(&self, name: &str) -> Result<usize, GlmError> {
        let p = self.function.system().parameter(name)?;
        Ok(match p.kind() {
            ParameterKind::Static => p.size(),
            ParameterKind::Dynamic => self.num_times * p.size(),
        })
    }

    /// Number of values of an input.
    pub fn input_size(&self, input: &SensitivityInput) -> Result<usize, GlmError> {
        match input {
            SensitivityInput::InitialCondition(name) => {
                Ok(self.function.system().state(name)?.size())
            }
            SensitivityInput::Parameter(name) => self.parameter_size(name),
            SensitivityInput::StepSizes => Ok(self.num_steps),
        }
    }

    /// Every input of the system, states first.
    pub fn inputs(&self) -> Vec<SensitivityInput> {
        let system = self.function.system();
        system
            .states()
            .map(|s| SensitivityInput::InitialCondition(s.name().to_string()))
            .chain(
                system
                    .parameters()
                    .map(|p| SensitivityInput::Parameter(p.name().to_string())),
            )
            .chain(std::iter::once(SensitivityInput::StepSizes))
            .collect()
    }

    fn state_zeros(&self) -> StateMap {
        self.function
            .system()
            .states()
            .map(|s| (s.name().to_string(), Col::zeros(s.size())))
            .collect()
    }

    fn parameter_zeros(&self) -> Result<StateMap, GlmError> {
        self.function
            .system()
            .parameters()
            .map(|p| {
                let size = self.parameter_size(p.name())?;
                Ok::<_, GlmError>((p.name().to_string(), Col::zeros(size)))
            })
            .collect()
    }

    /// Directional derivative of the assembled trajectory of every state.
    pub fn tangent(&self, seeds: &TangentSeeds) -> Result<StateMap, GlmError> {
        let mut dic = self.state_zeros();
        for (name, d) in &seeds.initial_conditions {
            let slot = dic
                .get_mut(name)
                .ok_or_else(|| configuration_error!(UnknownState, name.clone()))?;
            check_length(&format!("tangent of {name}"), slot.nrows(), d.nrows())?;
            *slot = d.clone();
        }
        let mut dp = self.parameter_zeros()?;
        for (name, d) in &seeds.parameters {
            let slot = dp
                .get_mut(name)
                .ok_or_else(|| configuration_error!(UnknownParameter, name.clone()))?;
            check_length(&format!("tangent of {name}"), slot.nrows(), d.nrows())?;
            *slot = d.clone();
        }
        let dh = match &seeds.step_sizes {
            Some(dh) => {
                check_length("tangent of the step sizes", self.num_steps, dh.nrows())?;
                dh.clone()
            }
            None => Col::zeros(self.num_steps),
        };

        let first_seeds: StateMap = self
            .seeds
            .iter()
            .map(|(name, seed)| (name.clone(), seed.jacobian().mul(&dic[name])))
            .collect();
        let (dy_starting, main_seeds) = match &self.starting {
            Some(starting) => {
                let dy = starting.tangent(&first_seeds, &dp, &dh)?;
                let main_seeds = self
                    .contractions
                    .iter()
                    .map(|(name, c)| (name.clone(), c.jacobian().mul(&dy[name])))
                    .collect();
                (Some(dy), main_seeds)
            }
            None => (None, first_seeds),
        };
        let dy_main = self.main.tangent(&main_seeds, &dp, &dh)?;
        self.assemblers
            .iter()
            .map(|(name, assembler)| {
                let mut d = assembler.main_jacobian().mul(&dy_main[name]);
                if let (Some(jac), Some(dy)) = (assembler.starting_jacobian(), &dy_starting) {
                    jac.mul_add(1.0, &dy[name], &mut d);
                }
                Ok::<_, GlmError>((name.clone(), d))
            })
            .collect()
    }

    /// Gradient of `sum_x <y_bar[x], y[x]>` over the assembled trajectories `y`. States missing
    /// from `y_bar` have zero weight.
    pub fn adjoint(&self, y_bar: &StateMap) -> Result<Gradients, GlmError> {
        if let Some(name) = y_bar.keys().find(|name| !self.assemblers.contains_key(*name)) {
            return Err(configuration_error!(UnknownState, name.clone()));
        }
        let mut main_bar = StateMap::new();
        let mut starting_bar = StateMap::new();
        for (name, assembler) in &self.assemblers {
            let n = assembler.main_jacobian().nrows();
            let yb = match y_bar.get(name) {
                Some(yb) => {
                    check_length(&format!("adjoint of {name}"), n, yb.nrows())?;
                    yb.clone()
                }
                None => Col::zeros(n),
            };
            main_bar.insert(name.clone(), assembler.main_jacobian().transpose_mul(&yb));
            if let Some(jac) = assembler.starting_jacobian() {
                starting_bar.insert(name.clone(), jac.transpose_mul(&yb));
            }
        }

        let mut p_bar = self.parameter_zeros()?;
        let mut h_bar = Col::zeros(self.num_steps);
        let main_seed_bar = self.main.adjoint(&main_bar, &mut p_bar, &mut h_bar)?;
        let first_seed_bar = match &self.starting {
            Some(starting) => {
                for (name, c) in &self.contractions {
                    if let Some(sb) = starting_bar.get_mut(name) {
                        c.jacobian().transpose_mul_add(1.0, &main_seed_bar[name], sb);
                    }
                }
                starting.adjoint(&starting_bar, &mut p_bar, &mut h_bar)?
            }
            None => main_seed_bar,
        };
        let initial_conditions = self
            .seeds
            .iter()
            .map(|(name, seed)| {
                let bar = seed.jacobian().transpose_mul(&first_seed_bar[name]);
                (name.clone(), bar)
            })
            .collect();
        Ok(Gradients {
            initial_conditions,
            parameters: p_bar,
            step_sizes: h_bar,
        })
    }

    /// Dense Jacobian of the assembled trajectory of every state with respect to `input`, one
    /// tangent per input value.
    pub fn jacobian(
        &self,
        input: &SensitivityInput,
    ) -> Result<BTreeMap<String, Mat<f64>>, GlmError> {
        let n = self.input_size(input)?;
        let mut columns = Vec::with_capacity(n);
        for c in 0..n {
            let mut unit = Col::zeros(n);
            unit[c] = 1.0;
            let mut seeds = TangentSeeds::default();
            match input {
                SensitivityInput::InitialCondition(name) => {
                    seeds.initial_conditions.insert(name.clone(), unit);
                }
                SensitivityInput::Parameter(name) => {
                    seeds.parameters.insert(name.clone(), unit);
                }
                SensitivityInput::StepSizes => seeds.step_sizes = Some(unit),
            }
            columns.push(self.tangent(&seeds)?);
        }
        Ok(self
            .assemblers
            .keys()
            .map(|name| {
                let nrows = self.assemblers[name].main_jacobian().nrows();
                let jac = Mat::from_fn(nrows, n, |r, c| columns[c][name][r]);
                (name.clone(), jac)
            })
            .collect())
    }

    /// Structurally non-zero partials of every `(state, input)` pair.
    pub fn total_derivatives(
        &self,
    ) -> Result<BTreeMap<(String, SensitivityInput), SparseJacobian>, GlmError> {
        let mut derivatives = BTreeMap::new();
        for input in self.inputs() {
            for (name, jac) in self.jacobian(&input)? {
                let (mut rows, mut cols, mut values) = (Vec::new(), Vec::new(), Vec::new());
                for c in 0..jac.ncols() {
                    for r in 0..jac.nrows() {
                        if jac[(r, c)] != 0.0 {
                            rows.push(r);
                            cols.push(c);
                            values.push(jac[(r, c)]);
                        }
                    }
                }
                let pattern = SparsityPattern::new(jac.nrows(), jac.ncols(), rows, cols)?;
                derivatives.insert((name, input.clone()), SparseJacobian::new(pattern, values)?);
            }
        }
        Ok(derivatives)
    }
}
