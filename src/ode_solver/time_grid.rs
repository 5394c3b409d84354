use faer::Col;
use nalgebra::DVector;

use crate::configuration_error;
use crate::error::{ConfigurationError, GlmError};
use crate::matrix::{SparseJacobian, SparsityPattern};

/// A strictly increasing set of time points `t_0 < t_1 < ... < t_{N-1}`.
///
/// The step sizes `h_g = t_{g+1} - t_g` are the independent variables of the grid: the initial
/// time is fixed and `t_g = t_0 + sum_{k<g} h_k`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeGrid {
    times: Vec<f64>,
}

impl TimeGrid {
    pub fn from_times(times: Vec<f64>) -> Result<Self, GlmError> {
        if times.len() < 2 {
            return Err(configuration_error!(
                TimeGrid,
                format!("at least two time points are needed, got {}", times.len())
            ));
        }
        if times.iter().any(|t| !t.is_finite()) {
            return Err(configuration_error!(
                TimeGrid,
                "time points must be finite".to_string()
            ));
        }
        if times.windows(2).any(|w| w[1] <= w[0]) {
            return Err(configuration_error!(
                TimeGrid,
                "time points must be strictly increasing".to_string()
            ));
        }
        Ok(Self { times })
    }

    /// Map normalized times (usually in `[0, 1]`) onto `[initial_time, final_time]`.
    pub fn new(normalized: &[f64], initial_time: f64, final_time: f64) -> Result<Self, GlmError> {
        let span = final_time - initial_time;
        Self::from_times(
            normalized
                .iter()
                .map(|s| initial_time + s * span)
                .collect(),
        )
    }

    pub fn uniform(initial_time: f64, final_time: f64, num_times: usize) -> Result<Self, GlmError> {
        if num_times < 2 {
            return Err(GlmError::from(ConfigurationError::TooFewTimePoints {
                expected: 2,
                found: num_times,
            }));
        }
        let normalized = (0..num_times)
            .map(|i| i as f64 / (num_times - 1) as f64)
            .collect::<Vec<_>>();
        Self::new(&normalized, initial_time, final_time)
    }

    pub fn from_step_sizes(initial_time: f64, step_sizes: &[f64]) -> Result<Self, GlmError> {
        let mut times = Vec::with_capacity(step_sizes.len() + 1);
        let mut t = initial_time;
        times.push(t);
        for h in step_sizes {
            t += h;
            times.push(t);
        }
        Self::from_times(times)
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn num_times(&self) -> usize {
        self.times.len()
    }

    pub fn num_steps(&self) -> usize {
        self.times.len() - 1
    }

    pub fn initial_time(&self) -> f64 {
        self.times[0]
    }

    pub fn final_time(&self) -> f64 {
        self.times[self.times.len() - 1]
    }

    pub fn step_sizes(&self) -> Vec<f64> {
        self.times.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// Stage times `t_g + c_a h_g` for steps `offset .. offset + num_steps`, step-major.
    pub fn stage_times(
        &self,
        offset: usize,
        num_steps: usize,
        abscissa: &DVector<f64>,
    ) -> Col<f64> {
        let s = abscissa.len();
        Col::from_fn(num_steps * s, |q| {
            let g = offset + q / s;
            let h = self.times[g + 1] - self.times[g];
            self.times[g] + abscissa[q % s] * h
        })
    }

    /// d(stage times) / d(step sizes of the whole grid).
    pub fn stage_time_jacobian(
        &self,
        offset: usize,
        num_steps: usize,
        abscissa: &DVector<f64>,
    ) -> SparseJacobian {
        let s = abscissa.len();
        let mut indices = Vec::new();
        let mut values = Vec::new();
        for i in 0..num_steps {
            let g = offset + i;
            for (a, &c) in abscissa.iter().enumerate() {
                let q = i * s + a;
                for k in 0..g {
                    indices.push((q, k));
                    values.push(1.0);
                }
                if c != 0.0 {
                    indices.push((q, g));
                    values.push(c);
                }
            }
        }
        let pattern =
            SparsityPattern::from_indices(num_steps * s, self.num_steps(), indices.into_iter());
        SparseJacobian::from_parts(pattern, values)
    }
}
