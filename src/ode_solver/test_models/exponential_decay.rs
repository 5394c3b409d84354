use std::collections::BTreeMap;

use faer::Col;

use crate::error::GlmError;
use crate::matrix::{SparseJacobian, SparsityPattern};
use crate::{OdeFunction, OdeSystem, OdeSystemBuilder, RateInputs, RatePartials, Wrt};

// exponential decay problem
// dy/dt = -k y (p = [k])
pub struct ExponentialDecay {
    system: OdeSystem,
}

impl ExponentialDecay {
    pub fn new(size: usize) -> Result<Self, GlmError> {
        let system = OdeSystemBuilder::new()
            .state("y", &[size])
            .static_parameter("k", &[])
            .build()?;
        Ok(Self { system })
    }

    /// y(t) = y0 exp(-k t)
    pub fn solution(y0: f64, k: f64, t: f64) -> f64 {
        y0 * (-k * t).exp()
    }
}

impl OdeFunction for ExponentialDecay {
    fn system(&self) -> &OdeSystem {
        &self.system
    }

    fn rates(&self, inputs: &RateInputs) -> Result<BTreeMap<String, Col<f64>>, GlmError> {
        let y = inputs.state("y")?;
        let k = inputs.parameter("k")?;
        let n = y.nrows() / inputs.num;
        let dydt = Col::from_fn(y.nrows(), |i| -k[i / n] * y[i]);
        Ok(BTreeMap::from([("y".to_string(), dydt)]))
    }

    fn rate_partials(&self, inputs: &RateInputs) -> Result<RatePartials, GlmError> {
        let y = inputs.state("y")?;
        let k = inputs.parameter("k")?;
        let len = y.nrows();
        let n = len / inputs.num;
        let mut partials = RatePartials::new();

        // Jv = -kv
        let diagonal = SparsityPattern::new(len, len, (0..len).collect(), (0..len).collect())?;
        let values = (0..len).map(|i| -k[i / n]).collect();
        partials.insert("y", Wrt::State("y".to_string()), SparseJacobian::new(diagonal, values)?);

        let pattern = SparsityPattern::new(
            len,
            inputs.num,
            (0..len).collect(),
            (0..len).map(|i| i / n).collect(),
        )?;
        let values = (0..len).map(|i| -y[i]).collect();
        partials.insert(
            "y",
            Wrt::Parameter("k".to_string()),
            SparseJacobian::new(pattern, values)?,
        );
        Ok(partials)
    }
}
