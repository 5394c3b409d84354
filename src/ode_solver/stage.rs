use faer::Col;
use nalgebra::DMatrix;

use crate::error::{check_length, GlmError};
use crate::matrix::{SparseJacobian, StepLayout};
use crate::scheme::Scheme;

/// Partials of the stage values that change with the step sizes and rates.
#[derive(Debug, Clone)]
pub struct StagePartials {
    /// dY/dF, `h_i A[a, b]` on the stage-pair blocks of each step
    pub rates: SparseJacobian,
    /// dY/dh, `sum_b A[a, b] F[i, b]`
    pub step_sizes: SparseJacobian,
}

/// Computes the stage values `Y_i = A h_i F_i + U y_i` of every step of a trajectory.
///
/// `y_i` is the step vector entering step `i`, so the stage values read rows `0 .. N - 1` of the
/// step-vector trajectory.
#[derive(Debug, Clone)]
pub struct StageBuilder {
    a: DMatrix<f64>,
    u: DMatrix<f64>,
    layout: StepLayout,
    step_partial: SparseJacobian,
}

impl StageBuilder {
    pub fn new(scheme: &Scheme, num_times: usize, size: usize) -> Self {
        let layout = StepLayout::new(
            num_times,
            scheme.num_stages(),
            scheme.num_step_vars(),
            size,
        );
        let u = scheme.u();
        let values = layout
            .stage_step_blocks()
            .map(|[_, a, j, _]| u[(a, j)])
            .collect();
        let step_partial = SparseJacobian::from_parts(layout.stage_step_pattern(), values);
        Self {
            a: scheme.a().clone(),
            u: u.clone(),
            layout,
            step_partial,
        }
    }

    /// A builder for a single step, see [StageBuilder::compute_step].
    pub fn single_step(scheme: &Scheme, size: usize) -> Self {
        Self::new(scheme, 2, size)
    }

    pub fn layout(&self) -> StepLayout {
        self.layout
    }

    fn check_inputs(&self, h: &[f64], f: &Col<f64>) -> Result<(), GlmError> {
        check_length("step sizes", self.layout.num_steps(), h.len())?;
        check_length("stage rates", self.layout.f_len(), f.nrows())
    }

    pub fn compute(&self, h: &[f64], f: &Col<f64>, y: &Col<f64>) -> Result<Col<f64>, GlmError> {
        self.check_inputs(h, f)?;
        check_length("step vectors", self.layout.y_len(), y.nrows())?;
        let l = self.layout;
        let mut stages = self.step_partial.mul(y);
        for [i, a, b, e] in l.stage_rate_blocks() {
            stages[l.f_index(i, a, e)] += self.a[(a, b)] * h[i] * f[l.f_index(i, b, e)];
        }
        Ok(stages)
    }

    /// Stage values of one step of size `h` from the step vector `y_old`.
    pub fn compute_step(
        &self,
        h: f64,
        f: &Col<f64>,
        y_old: &Col<f64>,
    ) -> Result<Col<f64>, GlmError> {
        check_length("step vector", self.layout.y0_len(), y_old.nrows())?;
        let n = self.layout.y0_len();
        let y = Col::from_fn(self.layout.y_len(), |k| if k < n { y_old[k] } else { 0.0 });
        self.compute(&[h], f, &y)
    }

    pub fn partials(&self, h: &[f64], f: &Col<f64>) -> Result<StagePartials, GlmError> {
        self.check_inputs(h, f)?;
        let l = self.layout;
        let rates = l
            .stage_rate_blocks()
            .map(|[i, a, b, _]| h[i] * self.a[(a, b)])
            .collect();
        let step_sizes = l
            .stage_rate_blocks()
            .map(|[i, a, b, e]| self.a[(a, b)] * f[l.f_index(i, b, e)])
            .collect();
        Ok(StagePartials {
            rates: SparseJacobian::from_parts(l.stage_rate_pattern(), rates),
            step_sizes: SparseJacobian::from_parts(l.stage_size_pattern(), step_sizes),
        })
    }

    /// dY/dy, constant.
    pub fn step_partial(&self) -> &SparseJacobian {
        &self.step_partial
    }

    pub fn u(&self) -> &DMatrix<f64> {
        &self.u
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ode_solver::tests::{assert_jacobian_eq, finite_difference};

    fn inputs(layout: StepLayout) -> (Vec<f64>, Col<f64>, Col<f64>) {
        let h = (0..layout.num_steps()).map(|i| 0.1 + 0.05 * i as f64).collect();
        let f = Col::from_fn(layout.f_len(), |k| (k as f64 * 0.7).sin());
        let y = Col::from_fn(layout.y_len(), |k| 1.0 + (k as f64 * 0.3).cos());
        (h, f, y)
    }

    #[test]
    fn single_step_stage_values() {
        let scheme = Scheme::bdf2();
        let builder = StageBuilder::single_step(&scheme, 1);
        let f = Col::from_fn(1, |_| -2.0);
        let y_old = Col::from_fn(2, |j| [1.0, 0.5][j]);
        let stages = builder.compute_step(0.3, &f, &y_old).unwrap();
        let expected = 2.0 / 3.0 * 0.3 * -2.0 + 4.0 / 3.0 * 1.0 - 1.0 / 3.0 * 0.5;
        approx::assert_relative_eq!(stages[0], expected, epsilon = 1e-15);
    }

    #[test]
    fn stage_partials_match_finite_differences() {
        for scheme in [Scheme::rk4(), Scheme::trapezoidal(), Scheme::bdf4()] {
            let builder = StageBuilder::new(&scheme, 4, 2);
            let (h, f, y) = inputs(builder.layout());
            let partials = builder.partials(&h, &f).unwrap();

            let fd = finite_difference(&f, |f| builder.compute(&h, f, &y).unwrap());
            assert_jacobian_eq(&partials.rates, &fd);

            let hc = Col::from_fn(h.len(), |i| h[i]);
            let fd = finite_difference(&hc, |hc| {
                let h = hc.iter().copied().collect::<Vec<_>>();
                builder.compute(&h, &f, &y).unwrap()
            });
            assert_jacobian_eq(&partials.step_sizes, &fd);

            let fd = finite_difference(&y, |y| builder.compute(&h, &f, y).unwrap());
            assert_jacobian_eq(builder.step_partial(), &fd);
        }
    }

    #[test]
    fn wrong_shapes_are_rejected() {
        let builder = StageBuilder::new(&Scheme::rk4(), 3, 1);
        let (h, f, y) = inputs(builder.layout());
        assert!(builder.compute(&h[..1], &f, &y).is_err());
        let short = Col::zeros(f.nrows() - 1);
        assert!(builder.compute(&h, &short, &y).is_err());
        assert!(builder.partials(&h, &short).is_err());
    }
}
