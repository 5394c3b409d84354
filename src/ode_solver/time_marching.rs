use std::collections::BTreeMap;

use faer::{Col, Mat};
use log::debug;

use crate::error::{ConfigurationError, GlmError};
use crate::nonlinear_solver::{NewtonProblem, NewtonSolver};
use crate::ode_equations::{checked_rates, OdeFunction, ParameterMap, RateInputs, Wrt};
use crate::ode_solver::integrator::IntegratorInputs;
use crate::ode_solver::phase::StateMap;
use crate::ode_solver::stage::StageBuilder;
use crate::ode_solver::time_grid::TimeGrid;
use crate::scheme::{Scheme, StartingMethod};
use crate::{other_error, NewtonConfig};

/// Stage equations `Y - (A h F(Y) + U y_old) = 0` of a single step, all states together.
struct StepProblem<'p, F: OdeFunction> {
    function: &'p F,
    builders: &'p BTreeMap<String, StageBuilder>,
    unknowns: &'p BTreeMap<String, (usize, usize)>,
    num_unknowns: usize,
    h: f64,
    times: Col<f64>,
    parameters: StateMap,
    y_old: &'p StateMap,
    last: Option<(StateMap, StateMap)>,
}

impl<F: OdeFunction> StepProblem<'_, F> {
    fn split(&self, x: &Col<f64>) -> StateMap {
        self.unknowns
            .iter()
            .map(|(name, &(start, len))| (name.clone(), Col::from_fn(len, |k| x[start + k])))
            .collect()
    }

    fn inputs<'b>(&'b self, stages: &'b StateMap) -> RateInputs<'b> {
        RateInputs {
            num: self.times.nrows(),
            times: &self.times,
            states: stages,
            parameters: &self.parameters,
        }
    }

    fn initial_guess(&self) -> Col<f64> {
        let mut x = Col::zeros(self.num_unknowns);
        for (name, &(start, len)) in self.unknowns {
            let y = &self.y_old[name];
            let size = self.builders[name].layout().size();
            for k in 0..len {
                x[start + k] = y[k % size];
            }
        }
        x
    }
}

impl<F: OdeFunction> NewtonProblem for StepProblem<'_, F> {
    fn nstates(&self) -> usize {
        self.num_unknowns
    }

    fn residual(&mut self, x: &Col<f64>) -> Result<Col<f64>, GlmError> {
        let stages = self.split(x);
        let rates = checked_rates(self.function, &self.inputs(&stages))?;
        let mut g = x.clone();
        for (name, &(start, len)) in self.unknowns {
            let s = self.builders[name].compute_step(self.h, &rates[name], &self.y_old[name])?;
            for k in 0..len {
                g[start + k] -= s[k];
            }
        }
        self.last = Some((stages, rates));
        Ok(g)
    }

    fn jacobian(&mut self) -> Result<Mat<f64>, GlmError> {
        let (stages, rates) = self
            .last
            .as_ref()
            .ok_or_else(|| other_error!("Jacobian requested before residual"))?;
        let partials = self.function.rate_partials(&self.inputs(stages))?;
        let mut jac = Mat::zeros(self.num_unknowns, self.num_unknowns);
        for (of, &(row, nrows)) in self.unknowns {
            let dstage_drate = self.builders[of].partials(&[self.h], &rates[of])?.rates;
            for (wrt, &(col, ncols)) in self.unknowns {
                let Some(drate) = partials.get(of, &Wrt::State(wrt.clone())) else {
                    continue;
                };
                for c in 0..ncols {
                    let mut unit = Col::zeros(ncols);
                    unit[c] = 1.0;
                    let d = dstage_drate.mul(&drate.mul(&unit));
                    for r in 0..nrows {
                        jac[(row + r, col + c)] -= d[r];
                    }
                }
            }
        }
        for k in 0..self.num_unknowns {
            jac[(k, k)] += 1.0;
        }
        Ok(jac)
    }
}

/// Integrates one step at a time, solving the stage equations of each step with Newton.
///
/// Produces the same trajectory as the vectorized [crate::Integrator] with far more, far smaller
/// solves, and serves as its reference.
pub struct TimeMarchingIntegrator<'a, F: OdeFunction> {
    function: &'a F,
    scheme: Scheme,
    grid: TimeGrid,
    newton: NewtonConfig,
}

impl<'a, F: OdeFunction> TimeMarchingIntegrator<'a, F> {
    pub fn new(
        function: &'a F,
        scheme: Scheme,
        grid: TimeGrid,
        newton: NewtonConfig,
    ) -> Result<Self, GlmError> {
        let expected = 2 + scheme.starting_method().map_or(0, StartingMethod::num_steps);
        if grid.num_times() < expected {
            return Err(GlmError::from(ConfigurationError::TooFewTimePoints {
                expected,
                found: grid.num_times(),
            }));
        }
        Ok(Self {
            function,
            scheme,
            grid,
            newton,
        })
    }

    /// Step vectors at points `first .. first + num_steps + 1` starting from `seed`.
    fn march(
        &self,
        scheme: &Scheme,
        first: usize,
        num_steps: usize,
        seed: StateMap,
        parameters: &StateMap,
    ) -> Result<Vec<StateMap>, GlmError> {
        let system = self.function.system();
        let builders: BTreeMap<String, StageBuilder> = system
            .states()
            .map(|s| (s.name().to_string(), StageBuilder::single_step(scheme, s.size())))
            .collect();
        let mut unknowns = BTreeMap::new();
        let mut num_unknowns = 0;
        for (name, builder) in &builders {
            let len = builder.layout().f_len();
            unknowns.insert(name.clone(), (num_unknowns, len));
            num_unknowns += len;
        }
        let h = self.grid.step_sizes();
        let mut solver = NewtonSolver::new(&self.newton);
        let mut steps = vec![seed];
        for g in first..first + num_steps {
            let parameter_map =
                ParameterMap::new(system, self.grid.num_times(), g, 1, scheme.abscissa());
            let y_old = &steps[steps.len() - 1];
            let mut problem = StepProblem {
                function: self.function,
                builders: &builders,
                unknowns: &unknowns,
                num_unknowns,
                h: h[g],
                times: self.grid.stage_times(g, 1, scheme.abscissa()),
                parameters: parameter_map.evaluate(parameters)?,
                y_old,
                last: None,
            };
            let mut x = problem.initial_guess();
            let niter = solver.solve_in_place(&mut problem, &mut x)?;
            debug!("Step {g} converged in {niter} iterations");
            let stages = problem.split(&x);
            let rates = checked_rates(self.function, &problem.inputs(&stages))?;
            let y_new = builders
                .iter()
                .map(|(name, builder)| {
                    let layout = builder.layout();
                    let (b, v) = (scheme.b(), scheme.v());
                    let (y, f) = (&y_old[name], &rates[name]);
                    let y_new = Col::from_fn(layout.y0_len(), |k| {
                        let (j, e) = (k / layout.size(), k % layout.size());
                        let recurrence: f64 = (0..layout.num_step_vars())
                            .map(|l| v[(j, l)] * y[layout.y0_index(l, e)])
                            .sum();
                        let forcing: f64 = (0..layout.num_stages())
                            .map(|a| b[(j, a)] * h[g] * f[layout.f_index(0, a, e)])
                            .sum();
                        recurrence + forcing
                    });
                    (name.clone(), y_new)
                })
                .collect();
            steps.push(y_new);
        }
        Ok(steps)
    }

    fn seed(scheme: &Scheme, initial_conditions: &StateMap) -> StateMap {
        initial_conditions
            .iter()
            .map(|(name, ic)| {
                let n = ic.nrows();
                let y =
                    Col::from_fn(scheme.num_step_vars() * n, |k| if k < n { ic[k] } else { 0.0 });
                (name.clone(), y)
            })
            .collect()
    }

    /// The physical state of every declared state at every grid point, laid out as
    /// [crate::Solution::trajectory].
    pub fn solve(&self, inputs: &IntegratorInputs) -> Result<StateMap, GlmError> {
        let system = self.function.system();
        let mut initial_conditions = StateMap::new();
        for state in system.states() {
            let ic = match inputs.initial_conditions.get(state.name()) {
                Some(ic) => {
                    crate::error::check_length(state.name(), state.size(), ic.nrows())?;
                    ic.clone()
                }
                None => Col::zeros(state.size()),
            };
            initial_conditions.insert(state.name().to_string(), ic);
        }

        let mut points = Vec::new();
        let main_seed = match self.scheme.starting_method() {
            Some(starting) => {
                let starting_scheme = starting.scheme().scheme();
                let k = starting.num_steps();
                let steps = self.march(
                    &starting_scheme,
                    0,
                    k,
                    Self::seed(&starting_scheme, &initial_conditions),
                    &inputs.parameters,
                )?;
                let c = starting.coefficients();
                let seed = initial_conditions
                    .iter()
                    .map(|(name, ic)| {
                        let n = ic.nrows();
                        let y = Col::from_fn(c.num_starting() * n, |idx| {
                            let (m, e) = (idx / n, idx % n);
                            let mut sum = 0.0;
                            for (i, step) in steps.iter().enumerate() {
                                for j in 0..c.num_step_vars() {
                                    sum += c.get(m, i, j) * step[name][j * n + e];
                                }
                            }
                            sum
                        });
                        (name.clone(), y)
                    })
                    .collect();
                points.extend(steps.into_iter().take(k));
                seed
            }
            None => Self::seed(&self.scheme, &initial_conditions),
        };
        let first = points.len();
        let steps = self.march(
            &self.scheme,
            first,
            self.grid.num_times() - 1 - first,
            main_seed,
            &inputs.parameters,
        )?;
        points.extend(steps);

        Ok(initial_conditions
            .iter()
            .map(|(name, ic)| {
                let n = ic.nrows();
                let y = Col::from_fn(points.len() * n, |idx| points[idx / n][name][idx % n]);
                (name.clone(), y)
            })
            .collect())
    }
}
