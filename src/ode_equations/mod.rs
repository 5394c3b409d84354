use std::collections::BTreeMap;

use faer::Col;

use crate::error::{check_length, GlmError};
use crate::matrix::SparseJacobian;

pub mod parameters;
pub mod system;

pub use parameters::ParameterMap;
pub use system::{OdeSystem, OdeSystemBuilder, ParameterDescriptor, ParameterKind, StateDescriptor};

/// The inputs of one vectorized rate evaluation.
///
/// `num` independent evaluations are requested at once. Every state and parameter vector holds
/// `num` consecutive values, each of the declared size, so the value of state `x` for evaluation
/// `q` is `states["x"][q * size .. (q + 1) * size]`.
pub struct RateInputs<'a> {
    pub num: usize,
    pub times: &'a Col<f64>,
    pub states: &'a BTreeMap<String, Col<f64>>,
    pub parameters: &'a BTreeMap<String, Col<f64>>,
}

impl RateInputs<'_> {
    pub fn state(&self, name: &str) -> Result<&Col<f64>, GlmError> {
        self.states.get(name).ok_or_else(|| {
            GlmError::from(crate::error::ConfigurationError::UnknownState(
                name.to_string(),
            ))
        })
    }

    pub fn parameter(&self, name: &str) -> Result<&Col<f64>, GlmError> {
        self.parameters.get(name).ok_or_else(|| {
            GlmError::from(crate::error::ConfigurationError::MissingParameter(
                name.to_string(),
            ))
        })
    }
}

/// The independent variable of a rate partial derivative.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Wrt {
    State(String),
    Parameter(String),
    Time,
}

/// Sparse partial derivatives of the rates, keyed by `(rate of state, wrt)`.
///
/// For `num` evaluations the partial of state `x` (size `n`) with respect to
/// - state `y` (size `m`) is `(num * n) x (num * m)`,
/// - parameter `p` (size `m`) is `(num * n) x (num * m)`,
/// - time is `(num * n) x num`.
///
/// Missing entries are zero.
#[derive(Debug, Clone, Default)]
pub struct RatePartials {
    partials: BTreeMap<(String, Wrt), SparseJacobian>,
}

impl RatePartials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, of: &str, wrt: Wrt, jacobian: SparseJacobian) {
        self.partials.insert((of.to_string(), wrt), jacobian);
    }

    pub fn get(&self, of: &str, wrt: &Wrt) -> Option<&SparseJacobian> {
        self.partials.get(&(of.to_string(), wrt.clone()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(String, Wrt), &SparseJacobian)> {
        self.partials.iter()
    }
}

/// The external rate evaluator of an ODE system `dy/dt = f(t, y, p)`.
///
/// One call covers every stage evaluation of a vectorized integration, so implementations
/// should loop over `inputs.num`.
pub trait OdeFunction: Sync {
    fn system(&self) -> &OdeSystem;

    /// The rate of every declared state.
    fn rates(&self, inputs: &RateInputs) -> Result<BTreeMap<String, Col<f64>>, GlmError>;

    fn rate_partials(&self, inputs: &RateInputs) -> Result<RatePartials, GlmError>;
}

/// Evaluate the rates and check they match the declared shapes.
pub(crate) fn checked_rates(
    function: &impl OdeFunction,
    inputs: &RateInputs,
) -> Result<BTreeMap<String, Col<f64>>, GlmError> {
    let rates = function.rates(inputs)?;
    for state in function.system().states() {
        let rate = rates.get(state.name()).ok_or_else(|| {
            GlmError::from(crate::error::ConfigurationError::UnknownState(
                state.name().to_string(),
            ))
        })?;
        check_length(
            &format!("rate of {}", state.name()),
            inputs.num * state.size(),
            rate.nrows(),
        )?;
    }
    Ok(rates)
}
