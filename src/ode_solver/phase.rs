use std::collections::BTreeMap;

use faer::{Col, Mat};

use crate::configuration_error;
use crate::error::{check_length, ConfigurationError, GlmError};
use crate::linear_solver::LinearSolveMode;
use crate::matrix::SparseJacobian;
use crate::ode_equations::{checked_rates, OdeFunction, ParameterMap, RateInputs, RatePartials, Wrt};
use crate::ode_solver::stage::{StageBuilder, StagePartials};
use crate::ode_solver::time_grid::TimeGrid;
use crate::ode_solver::vectorized_step::{StepInputs, StepPartials, VectorizedStepEngine};
use crate::scheme::Scheme;

pub type StateMap = BTreeMap<String, Col<f64>>;

/// An input a phase depends on besides its stage values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PhaseInput {
    /// The step-vector seed of a state
    Seed(String),
    /// A parameter, in the layout it is supplied in
    Parameter(String),
    /// Step sizes of the whole grid
    StepSizes,
}

/// Everything computed from one guess of the stage values.
#[derive(Debug, Clone)]
pub struct PhaseState {
    /// Y, the guess
    pub stage_values: StateMap,
    /// F(Y)
    pub rates: StateMap,
    /// y, the step-vector trajectory driven by F
    pub trajectory: StateMap,
    /// S = A h F + U y, the stage values implied by the trajectory
    pub stages: StateMap,
}

/// Partials of every component of a phase at one [PhaseState].
pub struct Linearization {
    pub rates: RatePartials,
    pub stages: BTreeMap<String, StagePartials>,
    pub steps: BTreeMap<String, StepPartials>,
}

/// One vectorized integration of every state over grid points `offset .. offset + num_times`.
///
/// The unknowns are the stage values `Y` of all states, concatenated in name order. Given `Y`, the
/// rates `F(Y)` drive the step recurrence to a trajectory `y`, which in turn implies stage values
/// `S(Y)`. The integration is consistent where `G(Y) = Y - S(Y) = 0`.
pub struct Phase<'a, F: OdeFunction> {
    function: &'a F,
    scheme: Scheme,
    offset: usize,
    num_times: usize,
    num_global_steps: usize,
    h: Vec<f64>,
    stage_times: Col<f64>,
    stage_time_jacobian: SparseJacobian,
    parameter_map: ParameterMap,
    stage_parameters: StateMap,
    engine: VectorizedStepEngine,
    stage_builders: BTreeMap<String, StageBuilder>,
    seeds: StateMap,
    unknowns: BTreeMap<String, (usize, usize)>,
    num_unknowns: usize,
}

impl<'a, F: OdeFunction> Phase<'a, F> {
    pub fn new(
        function: &'a F,
        scheme: &Scheme,
        grid: &TimeGrid,
        offset: usize,
        num_times: usize,
        parameters: &StateMap,
        seeds: StateMap,
    ) -> Result<Self, GlmError> {
        let system = function.system();
        if num_times < 2 || offset + num_times > grid.num_times() {
            return Err(GlmError::from(ConfigurationError::TooFewTimePoints {
                expected: offset + num_times.max(2),
                found: grid.num_times(),
            }));
        }
        let num_steps = num_times - 1;
        let h = grid.step_sizes()[offset..offset + num_steps].to_vec();
        let abscissa = scheme.abscissa();
        let parameter_map =
            ParameterMap::new(system, grid.num_times(), offset, num_steps, abscissa);
        let stage_parameters = parameter_map.evaluate(parameters)?;

        let mut engine = VectorizedStepEngine::new(scheme);
        let mut stage_builders = BTreeMap::new();
        let mut unknowns = BTreeMap::new();
        let mut num_unknowns = 0;
        for state in system.states() {
            engine.build_structure(state.name(), num_times, state.size())?;
            let builder = StageBuilder::new(scheme, num_times, state.size());
            let layout = builder.layout();
            let seed = seeds
                .get(state.name())
                .ok_or_else(|| configuration_error!(UnknownState, state.name().to_string()))?;
            check_length(
                &format!("seed of {}", state.name()),
                layout.y0_len(),
                seed.nrows(),
            )?;
            unknowns.insert(state.name().to_string(), (num_unknowns, layout.f_len()));
            num_unknowns += layout.f_len();
            stage_builders.insert(state.name().to_string(), builder);
        }
        Ok(Self {
            function,
            scheme: scheme.clone(),
            offset,
            num_times,
            num_global_steps: grid.num_steps(),
            h,
            stage_times: grid.stage_times(offset, num_steps, abscissa),
            stage_time_jacobian: grid.stage_time_jacobian(offset, num_steps, abscissa),
            parameter_map,
            stage_parameters,
            engine,
            stage_builders,
            seeds,
            unknowns,
            num_unknowns,
        })
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }
    pub fn offset(&self) -> usize {
        self.offset
    }
    pub fn num_times(&self) -> usize {
        self.num_times
    }
    pub fn num_unknowns(&self) -> usize {
        self.num_unknowns
    }
    pub fn engine(&self) -> &VectorizedStepEngine {
        &self.engine
    }
    pub fn stage_builder(&self, state: &str) -> Option<&StageBuilder> {
        self.stage_builders.get(state)
    }
    pub fn seeds(&self) -> &StateMap {
        &self.seeds
    }

    pub fn split(&self, x: &Col<f64>) -> Result<StateMap, GlmError> {
        check_length("stage values", self.num_unknowns, x.nrows())?;
        Ok(self
            .unknowns
            .iter()
            .map(|(name, &(start, len))| (name.clone(), Col::from_fn(len, |k| x[start + k])))
            .collect())
    }

    pub fn join(&self, map: &StateMap) -> Col<f64> {
        let mut x = Col::zeros(self.num_unknowns);
        for (name, &(start, len)) in &self.unknowns {
            if let Some(v) = map.get(name) {
                for k in 0..len.min(v.nrows()) {
                    x[start + k] = v[k];
                }
            }
        }
        x
    }

    /// Every stage value set to the physical state of the seed.
    pub fn initial_guess(&self) -> Col<f64> {
        let guess = self
            .stage_builders
            .iter()
            .map(|(name, builder)| {
                let layout = builder.layout();
                let seed = &self.seeds[name];
                let y = Col::from_fn(layout.f_len(), |k| seed[k % layout.size()]);
                (name.clone(), y)
            })
            .collect();
        self.join(&guess)
    }

    fn rate_inputs<'b>(&'b self, states: &'b StateMap) -> RateInputs<'b> {
        RateInputs {
            num: self.parameter_map.num_evaluations(),
            times: &self.stage_times,
            states,
            parameters: &self.stage_parameters,
        }
    }

    pub fn evaluate(&self, x: &Col<f64>) -> Result<PhaseState, GlmError> {
        let stage_values = self.split(x)?;
        let rates = checked_rates(self.function, &self.rate_inputs(&stage_values))?;
        let step_inputs: BTreeMap<String, StepInputs> = self
            .unknowns
            .keys()
            .map(|name| {
                (
                    name.clone(),
                    StepInputs {
                        y0: &self.seeds[name],
                        h: &self.h,
                        f: &rates[name],
                    },
                )
            })
            .collect();
        let trajectory = self.engine.solve_all(&step_inputs)?;
        let stages = self
            .stage_builders
            .iter()
            .map(|(name, builder)| {
                Ok::<_, GlmError>((
                    name.clone(),
                    builder.compute(&self.h, &rates[name], &trajectory[name])?,
                ))
            })
            .collect::<Result<StateMap, GlmError>>()?;
        Ok(PhaseState {
            stage_values,
            rates,
            trajectory,
            stages,
        })
    }

    /// `G = Y - S`
    pub fn stage_residual(&self, state: &PhaseState) -> Col<f64> {
        let y = self.join(&state.stage_values);
        let s = self.join(&state.stages);
        Col::from_fn(self.num_unknowns, |k| y[k] - s[k])
    }

    /// Norm of the step recurrence residual over all states.
    pub fn step_residual_norm(&self, state: &PhaseState) -> Result<f64, GlmError> {
        let mut sum = 0.0;
        for name in self.unknowns.keys() {
            let inputs = StepInputs {
                y0: &self.seeds[name],
                h: &self.h,
                f: &state.rates[name],
            };
            let r = self.engine.residual(name, &state.trajectory[name], &inputs)?;
            let norm = r.norm_l2();
            sum += norm * norm;
        }
        Ok(sum.sqrt())
    }

    pub fn linearize(&self, state: &PhaseState) -> Result<Linearization, GlmError> {
        let rates = self
            .function
            .rate_partials(&self.rate_inputs(&state.stage_values))?;
        self.check_rate_partials(&rates)?;
        let mut stages = BTreeMap::new();
        let mut steps = BTreeMap::new();
        for (name, builder) in &self.stage_builders {
            let f = &state.rates[name];
            stages.insert(name.clone(), builder.partials(&self.h, f)?);
            steps.insert(name.clone(), self.engine.partials(name, &self.h, f)?);
        }
        Ok(Linearization {
            rates,
            stages,
            steps,
        })
    }

    fn check_rate_partials(&self, partials: &RatePartials) -> Result<(), GlmError> {
        let system = self.function.system();
        let num = self.parameter_map.num_evaluations();
        for ((of, wrt), jac) in partials.iter() {
            let nrows = num * system.state(of)?.size();
            let ncols = match wrt {
                Wrt::State(s) => num * system.state(s)?.size(),
                Wrt::Parameter(p) => num * system.parameter(p)?.size(),
                Wrt::Time => num,
            };
            check_length(&format!("rows of d({of})/d({wrt:?})"), nrows, jac.nrows())?;
            check_length(&format!("columns of d({of})/d({wrt:?})"), ncols, jac.ncols())?;
        }
        Ok(())
    }

    fn zeros_like(&self, name: &str) -> Col<f64> {
        Col::zeros(self.unknowns.get(name).map_or(0, |&(_, len)| len))
    }

    /// dF = dF/dY dY
    pub fn rates_tangent(&self, lin: &Linearization, dy_stage: &StateMap) -> StateMap {
        self.unknowns
            .keys()
            .map(|of| {
                let mut df = self.zeros_like(of);
                for (wrt, dx) in dy_stage {
                    if let Some(jac) = lin.rates.get(of, &Wrt::State(wrt.clone())) {
                        jac.mul_add(1.0, dx, &mut df);
                    }
                }
                (of.clone(), df)
            })
            .collect()
    }

    /// Transpose of [Phase::rates_tangent].
    pub fn rates_adjoint(&self, lin: &Linearization, f_bar: &StateMap) -> StateMap {
        let mut y_bar: StateMap = self
            .unknowns
            .keys()
            .map(|name| (name.clone(), self.zeros_like(name)))
            .collect();
        for (of, fb) in f_bar {
            for (wrt, yb) in y_bar.iter_mut() {
                if let Some(jac) = lin.rates.get(of, &Wrt::State(wrt.clone())) {
                    jac.transpose_mul_add(1.0, fb, yb);
                }
            }
        }
        y_bar
    }

    /// dF from perturbations of the parameters and of the global step sizes.
    pub fn rates_input_tangent(
        &self,
        lin: &Linearization,
        dp: &StateMap,
        dh_global: &Col<f64>,
    ) -> StateMap {
        let dt = self.stage_time_jacobian.mul(dh_global);
        let dp_stage: StateMap = self
            .parameter_map
            .jacobians()
            .filter_map(|(name, jac)| dp.get(name).map(|d| (name.clone(), jac.mul(d))))
            .collect();
        self.unknowns
            .keys()
            .map(|of| {
                let mut df = self.zeros_like(of);
                for (p, d) in &dp_stage {
                    if let Some(jac) = lin.rates.get(of, &Wrt::Parameter(p.clone())) {
                        jac.mul_add(1.0, d, &mut df);
                    }
                }
                if let Some(jac) = lin.rates.get(of, &Wrt::Time) {
                    jac.mul_add(1.0, &dt, &mut df);
                }
                (of.clone(), df)
            })
            .collect()
    }

    /// Transpose of [Phase::rates_input_tangent], accumulated into `p_bar` and `h_bar_global`.
    pub fn rates_input_adjoint(
        &self,
        lin: &Linearization,
        f_bar: &StateMap,
        p_bar: &mut StateMap,
        h_bar_global: &mut Col<f64>,
    ) {
        let mut t_bar = Col::zeros(self.parameter_map.num_evaluations());
        for (of, fb) in f_bar {
            if let Some(jac) = lin.rates.get(of, &Wrt::Time) {
                jac.transpose_mul_add(1.0, fb, &mut t_bar);
            }
            for (p, pm) in self.parameter_map.jacobians() {
                if let Some(jac) = lin.rates.get(of, &Wrt::Parameter(p.clone())) {
                    let stage_bar = jac.transpose_mul(fb);
                    let pb = p_bar
                        .entry(p.clone())
                        .or_insert_with(|| Col::zeros(pm.ncols()));
                    pm.transpose_mul_add(1.0, &stage_bar, pb);
                }
            }
        }
        self.stage_time_jacobian
            .transpose_mul_add(1.0, &t_bar, h_bar_global);
    }

    fn phase_step_sizes(&self, dh_global: &Col<f64>) -> Col<f64> {
        Col::from_fn(self.h.len(), |i| dh_global[self.offset + i])
    }

    /// dy = M^-1 (-dR/dy0 dy0 - dR/dh dh - dR/dF dF)
    pub fn trajectory_tangent(
        &self,
        lin: &Linearization,
        dy0: Option<&StateMap>,
        dh_global: Option<&Col<f64>>,
        df: &StateMap,
    ) -> Result<StateMap, GlmError> {
        let dh = dh_global.map(|d| self.phase_step_sizes(d));
        self.unknowns
            .keys()
            .map(|name| {
                let partials = &lin.steps[name];
                let mut rhs = Col::zeros(partials.rates.nrows());
                partials.rates.mul_add(-1.0, &df[name], &mut rhs);
                if let Some(dh) = &dh {
                    partials.step_sizes.mul_add(-1.0, dh, &mut rhs);
                }
                if let Some(d) = dy0.and_then(|m| m.get(name)) {
                    self.engine
                        .seed_jacobian(name)?
                        .mul_add(-1.0, d, &mut rhs);
                }
                let dy = self
                    .engine
                    .apply_linear_solve(name, &rhs, LinearSolveMode::Forward)?;
                Ok::<_, GlmError>((name.clone(), dy))
            })
            .collect()
    }

    /// Transpose of [Phase::trajectory_tangent]: returns `(y0_bar, f_bar)` and accumulates into
    /// `h_bar_global`.
    pub fn trajectory_adjoint(
        &self,
        lin: &Linearization,
        y_bar: &StateMap,
        h_bar_global: &mut Col<f64>,
    ) -> Result<(StateMap, StateMap), GlmError> {
        let mut y0_bar = StateMap::new();
        let mut f_bar = StateMap::new();
        for name in self.unknowns.keys() {
            let partials = &lin.steps[name];
            let Some(yb) = y_bar.get(name) else {
                continue;
            };
            let w = self
                .engine
                .apply_linear_solve(name, yb, LinearSolveMode::Reverse)?;
            let seed = self.engine.seed_jacobian(name)?;
            let mut y0b = Col::zeros(seed.ncols());
            seed.transpose_mul_add(-1.0, &w, &mut y0b);
            let hb = {
                let mut hb = Col::zeros(partials.step_sizes.ncols());
                partials.step_sizes.transpose_mul_add(-1.0, &w, &mut hb);
                hb
            };
            for i in 0..hb.nrows() {
                h_bar_global[self.offset + i] += hb[i];
            }
            let mut fb = Col::zeros(partials.rates.ncols());
            partials.rates.transpose_mul_add(-1.0, &w, &mut fb);
            y0_bar.insert(name.clone(), y0b);
            f_bar.insert(name.clone(), fb);
        }
        Ok((y0_bar, f_bar))
    }

    /// dS = dS/dh dh + dS/dF dF + dS/dy dy
    pub fn stage_tangent(
        &self,
        lin: &Linearization,
        dh_global: Option<&Col<f64>>,
        df: &StateMap,
        dy: &StateMap,
    ) -> StateMap {
        let dh = dh_global.map(|d| self.phase_step_sizes(d));
        self.stage_builders
            .iter()
            .map(|(name, builder)| {
                let partials = &lin.stages[name];
                let mut ds = partials.rates.mul(&df[name]);
                builder.step_partial().mul_add(1.0, &dy[name], &mut ds);
                if let Some(dh) = &dh {
                    partials.step_sizes.mul_add(1.0, dh, &mut ds);
                }
                (name.clone(), ds)
            })
            .collect()
    }

    /// Transpose of [Phase::stage_tangent]: returns `(f_bar, y_bar)` and accumulates into
    /// `h_bar_global`.
    pub fn stage_adjoint(
        &self,
        lin: &Linearization,
        s_bar: &StateMap,
        h_bar_global: &mut Col<f64>,
    ) -> (StateMap, StateMap) {
        let mut f_bar = StateMap::new();
        let mut y_bar = StateMap::new();
        for (name, builder) in &self.stage_builders {
            let partials = &lin.stages[name];
            let sb = &s_bar[name];
            f_bar.insert(name.clone(), partials.rates.transpose_mul(sb));
            y_bar.insert(name.clone(), builder.step_partial().transpose_mul(sb));
            let hb = partials.step_sizes.transpose_mul(sb);
            for i in 0..hb.nrows() {
                h_bar_global[self.offset + i] += hb[i];
            }
        }
        (f_bar, y_bar)
    }

    /// `dG/dY = I - dS/dY`, built one column at a time by pushing a unit perturbation of `Y`
    /// through the rates, the step recurrence and the stage builder.
    pub fn coupling_jacobian(&self, lin: &Linearization) -> Result<Mat<f64>, GlmError> {
        let n = self.num_unknowns;
        let mut jac = Mat::zeros(n, n);
        for c in 0..n {
            let mut unit = Col::zeros(n);
            unit[c] = 1.0;
            let dy_stage = self.split(&unit)?;
            let df = self.rates_tangent(lin, &dy_stage);
            let dy = self.trajectory_tangent(lin, None, None, &df)?;
            let ds = self.join(&self.stage_tangent(lin, None, &df, &dy));
            for r in 0..n {
                jac[(r, c)] = -ds[r];
            }
            jac[(c, c)] += 1.0;
        }
        Ok(jac)
    }

    pub fn num_global_steps(&self) -> usize {
        self.num_global_steps
    }

    /// Seeds of every state, then every parameter, then the step sizes.
    pub fn inputs(&self) -> Vec<PhaseInput> {
        let seeds = self.seeds.keys().map(|name| PhaseInput::Seed(name.clone()));
        let parameters = self
            .parameter_map
            .jacobians()
            .map(|(name, _)| PhaseInput::Parameter(name.clone()));
        seeds
            .chain(parameters)
            .chain(std::iter::once(PhaseInput::StepSizes))
            .collect()
    }

    pub fn input_size(&self, input: &PhaseInput) -> Result<usize, GlmError> {
        match input {
            PhaseInput::Seed(name) => self
                .seeds
                .get(name)
                .map(|seed| seed.nrows())
                .ok_or_else(|| configuration_error!(UnknownState, name.clone())),
            PhaseInput::Parameter(name) => self
                .parameter_map
                .jacobian(name)
                .map(|jac| jac.ncols())
                .ok_or_else(|| configuration_error!(UnknownParameter, name.clone())),
            PhaseInput::StepSizes => Ok(self.num_global_steps),
        }
    }

    /// `(dy, dG)` for a perturbation `d` of one input, stage values held fixed.
    pub fn input_tangent(
        &self,
        lin: &Linearization,
        input: &PhaseInput,
        d: &Col<f64>,
    ) -> Result<(StateMap, Col<f64>), GlmError> {
        check_length(&format!("{input:?} perturbation"), self.input_size(input)?, d.nrows())?;
        let mut dy0 = StateMap::new();
        let mut dp = StateMap::new();
        let mut dh = Col::zeros(self.num_global_steps);
        match input {
            PhaseInput::Seed(name) => {
                dy0.insert(name.clone(), d.clone());
            }
            PhaseInput::Parameter(name) => {
                dp.insert(name.clone(), d.clone());
            }
            PhaseInput::StepSizes => dh = d.clone(),
        }
        let df = self.rates_input_tangent(lin, &dp, &dh);
        let dy = self.trajectory_tangent(lin, Some(&dy0), Some(&dh), &df)?;
        let ds = self.join(&self.stage_tangent(lin, Some(&dh), &df, &dy));
        Ok((dy, Col::from_fn(ds.nrows(), |k| -ds[k])))
    }

    fn trajectory_columns(
        &self,
        columns: &[StateMap],
    ) -> Result<BTreeMap<String, Mat<f64>>, GlmError> {
        self.unknowns
            .keys()
            .map(|name| {
                let nrows = self.engine.layout(name)?.y_len();
                let jac = Mat::from_fn(nrows, columns.len(), |r, c| columns[c][name][r]);
                Ok::<_, GlmError>((name.clone(), jac))
            })
            .collect()
    }

    /// Dense `dG/d(input)` and `dy/d(input)` of every state, stage values held fixed.
    pub fn input_jacobians(
        &self,
        lin: &Linearization,
        input: &PhaseInput,
    ) -> Result<(Mat<f64>, BTreeMap<String, Mat<f64>>), GlmError> {
        let n = self.input_size(input)?;
        let mut trajectory = Vec::with_capacity(n);
        let mut constraints = Vec::with_capacity(n);
        for c in 0..n {
            let mut unit = Col::zeros(n);
            unit[c] = 1.0;
            let (dy, dg) = self.input_tangent(lin, input, &unit)?;
            trajectory.push(dy);
            constraints.push(dg);
        }
        let constraint_jac = Mat::from_fn(self.num_unknowns, n, |r, c| constraints[c][r]);
        Ok((constraint_jac, self.trajectory_columns(&trajectory)?))
    }

    /// Dense `dy/dY` of every state.
    pub fn trajectory_jacobians(
        &self,
        lin: &Linearization,
    ) -> Result<BTreeMap<String, Mat<f64>>, GlmError> {
        let n = self.num_unknowns;
        let mut columns = Vec::with_capacity(n);
        for c in 0..n {
            let mut unit = Col::zeros(n);
            unit[c] = 1.0;
            let df = self.rates_tangent(lin, &self.split(&unit)?);
            columns.push(self.trajectory_tangent(lin, None, None, &df)?);
        }
        self.trajectory_columns(&columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigurationError;
    use crate::ode_solver::test_models::forced_oscillator::ForcedOscillator;
    use crate::ode_solver::tests::{assert_mat_eq, finite_difference, oscillator_inputs};

    fn seeds(scheme: &Scheme, values: &[(&str, usize, f64)]) -> StateMap {
        values
            .iter()
            .map(|&(name, size, value)| {
                let n = scheme.num_step_vars() * size;
                (name.to_string(), Col::from_fn(n, |k| value + 0.1 * k as f64))
            })
            .collect()
    }

    #[test]
    fn coupling_jacobian_matches_finite_differences() {
        let model = ForcedOscillator::new().unwrap();
        let grid = TimeGrid::uniform(0.0, 1.0, 4).unwrap();
        let inputs = oscillator_inputs(&grid);
        for (scheme, offset, num_times) in
            [(Scheme::rk4(), 0, 4), (Scheme::bdf2(), 1, 3), (Scheme::trapezoidal(), 2, 2)]
        {
            let seeds = seeds(&scheme, &[("x", 2, 1.0), ("v", 1, -0.2)]);
            let phase = Phase::new(
                &model,
                &scheme,
                &grid,
                offset,
                num_times,
                &inputs.parameters,
                seeds,
            )
            .unwrap();
            let x = Col::from_fn(phase.num_unknowns(), |k| 0.5 + 0.3 * (k as f64).sin());
            let state = phase.evaluate(&x).unwrap();
            let lin = phase.linearize(&state).unwrap();
            let jac = phase.coupling_jacobian(&lin).unwrap();
            let fd = finite_difference(&x, |x| phase.stage_residual(&phase.evaluate(x).unwrap()));
            assert_mat_eq(&jac, &fd, 1e-6);
        }
    }

    fn stack(blocks: &[&Mat<f64>]) -> Mat<f64> {
        let nrows = blocks.iter().map(|b| b.nrows()).sum();
        let ncols = blocks.first().map_or(0, |b| b.ncols());
        let mut out = Mat::zeros(nrows, ncols);
        let mut row = 0;
        for block in blocks {
            for r in 0..block.nrows() {
                for c in 0..ncols {
                    out[(row + r, c)] = block[(r, c)];
                }
            }
            row += block.nrows();
        }
        out
    }

    fn concat(values: &[&Col<f64>]) -> Col<f64> {
        let all: Vec<f64> = values
            .iter()
            .flat_map(|v| (0..v.nrows()).map(|k| v[k]))
            .collect();
        Col::from_fn(all.len(), |k| all[k])
    }

    #[test]
    fn input_jacobians_match_finite_differences() {
        let model = ForcedOscillator::new().unwrap();
        let grid = TimeGrid::uniform(0.0, 1.0, 4).unwrap();
        let inputs = oscillator_inputs(&grid);
        let scheme = Scheme::bdf2();
        let seeds = seeds(&scheme, &[("x", 2, 1.0), ("v", 1, -0.2)]);
        let build = |seeds: StateMap, parameters: &StateMap, grid: &TimeGrid| {
            Phase::new(&model, &scheme, grid, 1, 3, parameters, seeds).unwrap()
        };
        let phase = build(seeds.clone(), &inputs.parameters, &grid);
        let x = Col::from_fn(phase.num_unknowns(), |k| 0.5 + 0.3 * (k as f64).sin());
        let lin = phase.linearize(&phase.evaluate(&x).unwrap()).unwrap();
        // G, then the trajectories of v and x
        let outputs = |phase: &Phase<ForcedOscillator>| {
            let state = phase.evaluate(&x).unwrap();
            let g = phase.stage_residual(&state);
            concat(&[&g, &state.trajectory["v"], &state.trajectory["x"]])
        };

        assert_eq!(
            phase.inputs(),
            vec![
                PhaseInput::Seed("v".to_string()),
                PhaseInput::Seed("x".to_string()),
                PhaseInput::Parameter("k".to_string()),
                PhaseInput::Parameter("u".to_string()),
                PhaseInput::StepSizes,
            ]
        );
        for input in phase.inputs() {
            let (dg, dy) = phase.input_jacobians(&lin, &input).unwrap();
            let base = match &input {
                PhaseInput::Seed(name) => seeds[name].clone(),
                PhaseInput::Parameter(name) => inputs.parameters[name].clone(),
                PhaseInput::StepSizes => Col::from_fn(3, |i| grid.step_sizes()[i]),
            };
            assert_eq!(phase.input_size(&input).unwrap(), base.nrows());
            let fd = finite_difference(&base, |d| {
                let mut seeds = seeds.clone();
                let mut parameters = inputs.parameters.clone();
                let mut grid = grid.clone();
                match &input {
                    PhaseInput::Seed(name) => {
                        seeds.insert(name.clone(), d.clone());
                    }
                    PhaseInput::Parameter(name) => {
                        parameters.insert(name.clone(), d.clone());
                    }
                    PhaseInput::StepSizes => {
                        let h: Vec<f64> = (0..d.nrows()).map(|i| d[i]).collect();
                        grid = TimeGrid::from_step_sizes(0.0, &h).unwrap();
                    }
                }
                outputs(&build(seeds, &parameters, &grid))
            });
            assert_mat_eq(&stack(&[&dg, &dy["v"], &dy["x"]]), &fd, 1e-6);
        }
        assert!(phase
            .input_size(&PhaseInput::Parameter("missing".to_string()))
            .is_err());
    }

    #[test]
    fn trajectory_jacobians_match_finite_differences() {
        let model = ForcedOscillator::new().unwrap();
        let grid = TimeGrid::uniform(0.0, 1.0, 4).unwrap();
        let inputs = oscillator_inputs(&grid);
        let scheme = Scheme::trapezoidal();
        let phase = Phase::new(
            &model,
            &scheme,
            &grid,
            0,
            4,
            &inputs.parameters,
            seeds(&scheme, &[("x", 2, 1.0), ("v", 1, -0.2)]),
        )
        .unwrap();
        let x = Col::from_fn(phase.num_unknowns(), |k| 0.2 - 0.1 * (k as f64).cos());
        let lin = phase.linearize(&phase.evaluate(&x).unwrap()).unwrap();
        let jac = phase.trajectory_jacobians(&lin).unwrap();
        let fd = finite_difference(&x, |x| {
            let state = phase.evaluate(x).unwrap();
            concat(&[&state.trajectory["v"], &state.trajectory["x"]])
        });
        assert_mat_eq(&stack(&[&jac["v"], &jac["x"]]), &fd, 1e-6);
    }

    #[test]
    fn unknowns_are_concatenated_in_name_order() {
        let model = ForcedOscillator::new().unwrap();
        let grid = TimeGrid::uniform(0.0, 1.0, 3).unwrap();
        let inputs = oscillator_inputs(&grid);
        let scheme = Scheme::implicit_midpoint();
        let phase = Phase::new(
            &model,
            &scheme,
            &grid,
            0,
            3,
            &inputs.parameters,
            seeds(&scheme, &[("x", 2, 1.0), ("v", 1, 3.0)]),
        )
        .unwrap();
        // two steps, one stage: v has 2 values, x has 4
        assert_eq!(phase.num_unknowns(), 6);
        let guess = phase.initial_guess();
        let split = phase.split(&guess).unwrap();
        assert_eq!(split["v"][1], 3.0);
        assert_eq!((split["x"][2], split["x"][3]), (1.0, 1.1));
        assert_eq!(guess[0], 3.0);
        let joined = phase.join(&split);
        for k in 0..6 {
            assert_eq!(joined[k], guess[k]);
        }
        assert!(phase.split(&Col::zeros(5)).is_err());
    }

    #[test]
    fn phase_setup_errors() {
        let model = ForcedOscillator::new().unwrap();
        let grid = TimeGrid::uniform(0.0, 1.0, 3).unwrap();
        let inputs = oscillator_inputs(&grid);
        let scheme = Scheme::rk4();
        let err = Phase::new(
            &model,
            &scheme,
            &grid,
            2,
            2,
            &inputs.parameters,
            seeds(&scheme, &[("x", 2, 1.0), ("v", 1, 3.0)]),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            GlmError::ConfigurationError(ConfigurationError::TooFewTimePoints { .. })
        ));
        let err = Phase::new(
            &model,
            &scheme,
            &grid,
            0,
            3,
            &inputs.parameters,
            seeds(&scheme, &[("x", 2, 1.0)]),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            GlmError::ConfigurationError(ConfigurationError::UnknownState(_))
        ));
    }
}
