use std::collections::BTreeMap;

use faer::Col;

use crate::error::GlmError;
use crate::matrix::{SparseJacobian, SparsityPattern};
use crate::{OdeFunction, OdeSystem, OdeSystemBuilder, RateInputs, RatePartials, Wrt};

// damped oscillator driven by a decaying amplitude v and a forcing u(t)
// dx/dt = [x1, -k0 x0 - k1 x1 + v]
// dv/dt = -v x0 + u sin(t)
// states x (2), v (1), static k (2), dynamic u (1)
pub struct ForcedOscillator {
    system: OdeSystem,
}

impl ForcedOscillator {
    pub fn new() -> Result<Self, GlmError> {
        let system = OdeSystemBuilder::new()
            .time_units("s")
            .state_with_units("x", &[2], "m")
            .state("v", &[])
            .static_parameter("k", &[2])
            .dynamic_parameter("u", &[])
            .build()?;
        Ok(Self { system })
    }
}

/// A block-diagonal partial with one dense `nrows x ncols` block per evaluation.
fn blocks(
    num: usize,
    nrows: usize,
    ncols: usize,
    value: impl Fn(usize, usize, usize) -> f64,
) -> Result<SparseJacobian, GlmError> {
    let (mut rows, mut cols, mut values) = (Vec::new(), Vec::new(), Vec::new());
    for q in 0..num {
        for r in 0..nrows {
            for c in 0..ncols {
                rows.push(q * nrows + r);
                cols.push(q * ncols + c);
                values.push(value(q, r, c));
            }
        }
    }
    SparseJacobian::new(
        SparsityPattern::new(num * nrows, num * ncols, rows, cols)?,
        values,
    )
}

impl OdeFunction for ForcedOscillator {
    fn system(&self) -> &OdeSystem {
        &self.system
    }

    fn rates(&self, inputs: &RateInputs) -> Result<BTreeMap<String, Col<f64>>, GlmError> {
        let (x, v) = (inputs.state("x")?, inputs.state("v")?);
        let (k, u) = (inputs.parameter("k")?, inputs.parameter("u")?);
        let t = inputs.times;
        let dx = Col::from_fn(2 * inputs.num, |i| {
            let q = i / 2;
            match i % 2 {
                0 => x[2 * q + 1],
                _ => -k[2 * q] * x[2 * q] - k[2 * q + 1] * x[2 * q + 1] + v[q],
            }
        });
        let dv = Col::from_fn(inputs.num, |q| -v[q] * x[2 * q] + u[q] * t[q].sin());
        Ok(BTreeMap::from([("x".to_string(), dx), ("v".to_string(), dv)]))
    }

    fn rate_partials(&self, inputs: &RateInputs) -> Result<RatePartials, GlmError> {
        let (x, v) = (inputs.state("x")?, inputs.state("v")?);
        let (k, u) = (inputs.parameter("k")?, inputs.parameter("u")?);
        let t = inputs.times;
        let num = inputs.num;
        let mut partials = RatePartials::new();
        let state = |name: &str| Wrt::State(name.to_string());
        let parameter = |name: &str| Wrt::Parameter(name.to_string());

        partials.insert(
            "x",
            state("x"),
            blocks(num, 2, 2, |q, r, c| match (r, c) {
                (0, 1) => 1.0,
                (1, 0) => -k[2 * q],
                (1, 1) => -k[2 * q + 1],
                _ => 0.0,
            })?,
        );
        partials.insert("x", state("v"), blocks(num, 2, 1, |_, r, _| r as f64)?);
        partials.insert(
            "x",
            parameter("k"),
            blocks(num, 2, 2, |q, r, c| if r == 1 { -x[2 * q + c] } else { 0.0 })?,
        );
        partials.insert(
            "v",
            state("x"),
            blocks(num, 1, 2, |q, _, c| if c == 0 { -v[q] } else { 0.0 })?,
        );
        partials.insert("v", state("v"), blocks(num, 1, 1, |q, _, _| -x[2 * q])?);
        partials.insert("v", parameter("u"), blocks(num, 1, 1, |q, _, _| t[q].sin())?);
        partials.insert("v", Wrt::Time, blocks(num, 1, 1, |q, _, _| u[q] * t[q].cos())?);
        Ok(partials)
    }
}
