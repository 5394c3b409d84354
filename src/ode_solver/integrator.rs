use std::collections::BTreeMap;

use faer::Col;
use log::info;

use crate::configuration_error;
use crate::error::{check_length, ConfigurationError, GlmError};
use crate::matrix::StepLayout;
use crate::ode_equations::OdeFunction;
use crate::ode_solver::coupling::{solve_embedded, solve_exposed, ExternalOptimizer, Formulation};
use crate::ode_solver::output::{InitialConditionSeed, StartingContraction, TrajectoryAssembler};
use crate::ode_solver::phase::{Phase, PhaseState, StateMap};
use crate::ode_solver::solution::{PhaseRecord, Solution};
use crate::ode_solver::time_grid::TimeGrid;
use crate::ode_solver::vectorized_step::EngineStatistics;
use crate::scheme::{Scheme, StartingMethod};
use crate::{IntegratorConfig, NewtonConfig};

/// Initial conditions and parameter values of one integration.
///
/// States without an initial condition start at zero. Every declared parameter needs a value:
/// `size` values for a static parameter, `num_times * size` for a dynamic one.
#[derive(Debug, Clone, Default)]
pub struct IntegratorInputs {
    pub initial_conditions: StateMap,
    pub parameters: StateMap,
}

impl IntegratorInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initial_condition(mut self, state: &str, value: Col<f64>) -> Self {
        self.initial_conditions.insert(state.to_string(), value);
        self
    }

    pub fn parameter(mut self, name: &str, value: Col<f64>) -> Self {
        self.parameters.insert(name.to_string(), value);
        self
    }
}

/// Integrates an [OdeFunction] over a [TimeGrid] with a GLM [Scheme].
///
/// A scheme with a starting method first integrates grid points `0 ..= k` with the starting
/// scheme, always with the embedded formulation, and contracts that trajectory into the seed of the
/// main integration over points `k ..`. Otherwise the main integration covers the whole grid and is
/// seeded with `[ic, 0, ..., 0]`.
pub struct Integrator<'a, F: OdeFunction> {
    function: &'a F,
    scheme: Scheme,
    starting_scheme: Option<Scheme>,
    grid: TimeGrid,
    formulation: Formulation,
    newton: NewtonConfig,
}

impl<'a, F: OdeFunction> Integrator<'a, F> {
    pub fn new(
        function: &'a F,
        scheme: Scheme,
        grid: TimeGrid,
        formulation: Formulation,
        newton: NewtonConfig,
    ) -> Result<Self, GlmError> {
        let starting_scheme = match scheme.starting_method() {
            Some(starting) => {
                let starting_scheme = starting.scheme().scheme();
                if starting_scheme.starting_method().is_some() {
                    return Err(configuration_error!(
                        NestedStartingMethod,
                        starting.scheme().to_string()
                    ));
                }
                Some(starting_scheme)
            }
            None => None,
        };
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
            starting_scheme,
            grid,
            formulation,
            newton,
        })
    }

    pub fn from_config(function: &'a F, config: &IntegratorConfig) -> Result<Self, GlmError> {
        Self::new(
            function,
            config.scheme.scheme(),
            config.time_grid()?,
            config.formulation,
            config.newton.clone(),
        )
    }

    pub fn function(&self) -> &'a F {
        self.function
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    pub fn grid(&self) -> &TimeGrid {
        &self.grid
    }

    pub fn formulation(&self) -> Formulation {
        self.formulation
    }

    pub fn newton_config(&self) -> &NewtonConfig {
        &self.newton
    }

    /// Number of grid steps integrated by the starting scheme.
    pub(crate) fn num_starting_steps(&self) -> usize {
        self.scheme
            .starting_method()
            .map_or(0, StartingMethod::num_steps)
    }

    /// The layouts of the starting and main phases of a state.
    pub(crate) fn layouts(&self, size: usize) -> (Option<StepLayout>, StepLayout) {
        let k = self.num_starting_steps();
        let starting = self.starting_scheme.as_ref().map(|s| {
            StepLayout::new(k + 1, s.num_stages(), s.num_step_vars(), size)
        });
        let main = StepLayout::new(
            self.grid.num_times() - k,
            self.scheme.num_stages(),
            self.scheme.num_step_vars(),
            size,
        );
        (starting, main)
    }

    /// Initial conditions of every declared state, zero where none is given.
    pub(crate) fn initial_conditions(
        &self,
        inputs: &IntegratorInputs,
    ) -> Result<StateMap, GlmError> {
        let system = self.function.system();
        for name in inputs.initial_conditions.keys() {
            system.state(name)?;
        }
        system
            .states()
            .map(|state| match inputs.initial_conditions.get(state.name()) {
                Some(ic) => {
                    check_length(
                        &format!("initial condition of {}", state.name()),
                        state.size(),
                        ic.nrows(),
                    )?;
                    Ok::<_, GlmError>((state.name().to_string(), ic.clone()))
                }
                None => Ok((state.name().to_string(), Col::zeros(state.size()))),
            })
            .collect()
    }

    /// Seeds of the first phase, built from the initial conditions.
    pub(crate) fn initial_seeds(
        &self,
        initial_conditions: &StateMap,
    ) -> Result<(BTreeMap<String, InitialConditionSeed>, StateMap), GlmError> {
        let mut seeds = BTreeMap::new();
        let mut values = StateMap::new();
        for state in self.function.system().states() {
            let (starting, main) = self.layouts(state.size());
            let seed = InitialConditionSeed::new(starting.unwrap_or(main));
            values.insert(
                state.name().to_string(),
                seed.apply(&initial_conditions[state.name()])?,
            );
            seeds.insert(state.name().to_string(), seed);
        }
        Ok((seeds, values))
    }

    /// Contractions from the starting trajectory to the main seed, one per state.
    pub(crate) fn contractions(&self) -> BTreeMap<String, StartingContraction> {
        let Some(starting) = self.scheme.starting_method() else {
            return BTreeMap::new();
        };
        self.function
            .system()
            .states()
            .filter_map(|state| {
                let (layout, _) = self.layouts(state.size());
                layout.map(|layout| {
                    (
                        state.name().to_string(),
                        StartingContraction::new(layout, starting.coefficients()),
                    )
                })
            })
            .collect()
    }

    pub(crate) fn assemblers(&self) -> BTreeMap<String, TrajectoryAssembler> {
        self.function
            .system()
            .states()
            .map(|state| {
                let (starting, main) = self.layouts(state.size());
                (
                    state.name().to_string(),
                    TrajectoryAssembler::new(main, starting),
                )
            })
            .collect()
    }

    pub(crate) fn starting_phase(
        &self,
        parameters: &StateMap,
        seeds: StateMap,
    ) -> Result<Option<Phase<'a, F>>, GlmError> {
        self.starting_scheme
            .as_ref()
            .map(|scheme| {
                Phase::new(
                    self.function,
                    scheme,
                    &self.grid,
                    0,
                    self.num_starting_steps() + 1,
                    parameters,
                    seeds,
                )
            })
            .transpose()
    }

    pub(crate) fn main_phase(
        &self,
        parameters: &StateMap,
        seeds: StateMap,
    ) -> Result<Phase<'a, F>, GlmError> {
        let k = self.num_starting_steps();
        Phase::new(
            self.function,
            &self.scheme,
            &self.grid,
            k,
            self.grid.num_times() - k,
            parameters,
            seeds,
        )
    }

    /// Main seeds contracted from a converged starting trajectory.
    pub(crate) fn contract(
        contractions: &BTreeMap<String, StartingContraction>,
        starting_trajectory: &StateMap,
    ) -> Result<StateMap, GlmError> {
        contractions
            .iter()
            .map(|(name, contraction)| {
                Ok::<_, GlmError>((name.clone(), contraction.apply(&starting_trajectory[name])?))
            })
            .collect()
    }

    /// Integrate over the whole grid. The exposed formulation needs an `optimizer`; the embedded
    /// formulation ignores it.
    pub fn solve(
        &self,
        inputs: &IntegratorInputs,
        optimizer: Option<&mut dyn ExternalOptimizer>,
    ) -> Result<Solution, GlmError> {
        let optimizer = match (self.formulation, optimizer) {
            (Formulation::Exposed, None) => return Err(configuration_error!(MissingOptimizer)),
            (Formulation::Exposed, Some(optimizer)) => Some(optimizer),
            (Formulation::Embedded, _) => None,
        };
        let initial_conditions = self.initial_conditions(inputs)?;
        let (_, seeds) = self.initial_seeds(&initial_conditions)?;
        let mut statistics = EngineStatistics::default();

        let (starting, main_seeds) = match self.starting_phase(&inputs.parameters, seeds.clone())? {
            Some(phase) => {
                info!(
                    "Starting integration with {:?} over {} points",
                    phase.scheme().name(),
                    phase.num_times()
                );
                let (state, niter) = solve_embedded(&phase, &self.newton)?;
                statistics.accumulate(&phase.engine().statistics());
                let main_seeds = Self::contract(&self.contractions(), &state.trajectory)?;
                (Some(record(&phase, state, niter)), main_seeds)
            }
            None => (None, seeds),
        };

        let phase = self.main_phase(&inputs.parameters, main_seeds)?;
        info!(
            "Main integration ({}) over {} points, {} unknowns",
            self.formulation,
            phase.num_times(),
            phase.num_unknowns()
        );
        let (state, niter) = match optimizer {
            Some(optimizer) => (solve_exposed(&phase, optimizer, &self.newton)?, 0),
            None => solve_embedded(&phase, &self.newton)?,
        };
        statistics.accumulate(&phase.engine().statistics());
        let main = record(&phase, state, niter);

        let mut sizes = BTreeMap::new();
        let mut trajectories = StateMap::new();
        for (name, assembler) in self.assemblers() {
            let y = assembler.assemble(
                &main.trajectory[&name],
                starting.as_ref().map(|s| &s.trajectory[&name]),
            )?;
            sizes.insert(name.clone(), assembler.size());
            trajectories.insert(name, y);
        }
        Ok(Solution::new(
            self.grid.times().to_vec(),
            sizes,
            trajectories,
            starting,
            main,
            statistics,
        ))
    }
}

fn record<F: OdeFunction>(phase: &Phase<'_, F>, state: PhaseState, niter: usize) -> PhaseRecord {
    PhaseRecord {
        scheme: phase.scheme().name(),
        offset: phase.offset(),
        num_times: phase.num_times(),
        stage_values: state.stage_values,
        trajectory: state.trajectory,
        newton_iterations: niter,
    }
}
