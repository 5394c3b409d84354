use std::collections::BTreeMap;

use faer::Col;

use crate::configuration_error;
use crate::error::{ConfigurationError, GlmError};
use crate::ode_solver::phase::StateMap;
use crate::ode_solver::vectorized_step::EngineStatistics;
use crate::scheme::SchemeName;

/// The converged unknowns of one vectorized integration.
#[derive(Debug, Clone)]
pub struct PhaseRecord {
    pub scheme: Option<SchemeName>,
    /// First grid point covered by the phase.
    pub offset: usize,
    pub num_times: usize,
    pub stage_values: StateMap,
    /// Step-vector trajectory of every state.
    pub trajectory: StateMap,
    /// Newton updates taken, zero for the exposed formulation.
    pub newton_iterations: usize,
}

/// The physical state of every declared state at every grid point.
///
/// The trajectory of a state of size `n` holds `num_times * n` values, grid point `k` occupying
/// `k * n .. (k + 1) * n`.
#[derive(Debug, Clone)]
pub struct Solution {
    times: Vec<f64>,
    sizes: BTreeMap<String, usize>,
    trajectories: StateMap,
    starting: Option<PhaseRecord>,
    main: PhaseRecord,
    statistics: EngineStatistics,
}

impl Solution {
    pub(crate) fn new(
        times: Vec<f64>,
        sizes: BTreeMap<String, usize>,
        trajectories: StateMap,
        starting: Option<PhaseRecord>,
        main: PhaseRecord,
        statistics: EngineStatistics,
    ) -> Self {
        Self {
            times,
            sizes,
            trajectories,
            starting,
            main,
            statistics,
        }
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn num_times(&self) -> usize {
        self.times.len()
    }

    pub fn trajectories(&self) -> &StateMap {
        &self.trajectories
    }

    pub fn trajectory(&self, state: &str) -> Result<&Col<f64>, GlmError> {
        self.trajectories
            .get(state)
            .ok_or_else(|| configuration_error!(UnknownState, state.to_string()))
    }

    /// The value of `state` at grid point `k`.
    pub fn value(&self, state: &str, k: usize) -> Result<Col<f64>, GlmError> {
        let y = self.trajectory(state)?;
        let n = self.sizes[state];
        if k >= self.num_times() {
            return Err(configuration_error!(
                TimeGrid,
                format!("grid point {k} is out of range")
            ));
        }
        Ok(Col::from_fn(n, |e| y[k * n + e]))
    }

    pub fn final_value(&self, state: &str) -> Result<Col<f64>, GlmError> {
        self.value(state, self.num_times() - 1)
    }

    pub fn starting_phase(&self) -> Option<&PhaseRecord> {
        self.starting.as_ref()
    }

    pub fn main_phase(&self) -> &PhaseRecord {
        &self.main
    }

    /// Newton updates over both phases.
    pub fn newton_iterations(&self) -> usize {
        self.main.newton_iterations + self.starting.as_ref().map_or(0, |s| s.newton_iterations)
    }

    /// Work done by the step engines of both phases.
    pub fn statistics(&self) -> &EngineStatistics {
        &self.statistics
    }
}
