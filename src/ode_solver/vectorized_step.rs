use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use faer::Col;
use log::info;
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::Serialize;

use crate::configuration_error;
use crate::error::{check_length, ConfigurationError, GlmError, LinearSolverError};
use crate::linear_solver::{LinearSolveMode, LinearSolver, SparseLu};
use crate::linear_solver_error;
use crate::matrix::{SparseJacobian, StepLayout};
use crate::scheme::Scheme;

/// Counters of the work done by a [VectorizedStepEngine].
#[derive(Default, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EngineStatistics {
    pub number_of_factorizations: usize,
    pub number_of_trajectory_solves: usize,
    pub number_of_tangent_solves: usize,
    pub number_of_adjoint_solves: usize,
    pub number_of_residual_evaluations: usize,
}

impl EngineStatistics {
    pub fn accumulate(&mut self, other: &EngineStatistics) {
        self.number_of_factorizations += other.number_of_factorizations;
        self.number_of_trajectory_solves += other.number_of_trajectory_solves;
        self.number_of_tangent_solves += other.number_of_tangent_solves;
        self.number_of_adjoint_solves += other.number_of_adjoint_solves;
        self.number_of_residual_evaluations += other.number_of_residual_evaluations;
    }
}

#[derive(Default, Debug)]
struct Counters {
    factorizations: AtomicUsize,
    trajectory_solves: AtomicUsize,
    tangent_solves: AtomicUsize,
    adjoint_solves: AtomicUsize,
    residual_evaluations: AtomicUsize,
}

impl Counters {
    fn increment(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Partials of the step residual that change with the step sizes and rates.
#[derive(Debug, Clone)]
pub struct StepPartials {
    /// dR/dF, `-B[j, a] h_i`
    pub rates: SparseJacobian,
    /// dR/dh, `-sum_a B[j, a] F[i, a]`
    pub step_sizes: SparseJacobian,
}

/// The factorized recurrence of one state.
struct StepStructure {
    layout: StepLayout,
    recurrence: SparseJacobian,
    seed: SparseJacobian,
    lu: SparseLu,
}

/// Inputs of one trajectory solve.
pub struct StepInputs<'a> {
    pub y0: &'a Col<f64>,
    pub h: &'a [f64],
    pub f: &'a Col<f64>,
}

/// Solves the step recurrence of every step of a trajectory at once.
///
/// With step vectors `y_i` (each `r` values of the state) the recurrence
///
/// ```text
/// y_0 = y0
/// y_i = V y_{i-1} + B h_{i-1} F_{i-1},   i = 1 .. N - 1
/// ```
///
/// is the block lower-bidiagonal linear system `M y = rhs`
///
/// ```text
/// |  I           | | y_0 |   | y0             |
/// | -V  I        | | y_1 | = | B h_0 F_0      |
/// |    -V  I     | | y_2 |   | B h_1 F_1      |
/// |       .  .   | | ... |   | ...            |
/// ```
///
/// `M` depends only on `V`, the number of time points and the state size, so it is assembled and
/// factorized once per state by [VectorizedStepEngine::build_structure]. Trajectory solves,
/// tangent solves and adjoint solves all reuse that factorization.
///
/// The residual is `R(y, y0, h, F) = M y - rhs(y0, h, F)`.
pub struct VectorizedStepEngine {
    b: DMatrix<f64>,
    v: DMatrix<f64>,
    structures: BTreeMap<String, StepStructure>,
    counters: Counters,
}

impl VectorizedStepEngine {
    pub fn new(scheme: &Scheme) -> Self {
        Self {
            b: scheme.b().clone(),
            v: scheme.v().clone(),
            structures: BTreeMap::new(),
            counters: Counters::default(),
        }
    }

    /// Assemble and factorize `M` for a state. Each state is built exactly once.
    pub fn build_structure(
        &mut self,
        state: &str,
        num_times: usize,
        size: usize,
    ) -> Result<(), GlmError> {
        if self.structures.contains_key(state) {
            return Err(configuration_error!(DuplicateName, state.to_string()));
        }
        let layout = StepLayout::new(num_times, self.b.ncols(), self.v.nrows(), size);
        let values = std::iter::repeat(1.0)
            .take(layout.y_len())
            .chain(
                layout
                    .recurrence_coupling_blocks()
                    .map(|[_, j, k, _]| -self.v[(j, k)]),
            )
            .collect();
        let recurrence = SparseJacobian::from_parts(layout.recurrence_pattern(), values);
        let lu = SparseLu::new(&recurrence)?;
        Counters::increment(&self.counters.factorizations);
        info!(
            "Factorized step recurrence for {state}: {} unknowns, {} non-zeros",
            layout.y_len(),
            lu.nnz()
        );
        let seed_pattern = layout.seed_pattern();
        let seed = SparseJacobian::from_parts(seed_pattern, vec![-1.0; layout.y0_len()]);
        self.structures.insert(
            state.to_string(),
            StepStructure {
                layout,
                recurrence,
                seed,
                lu,
            },
        );
        Ok(())
    }

    fn structure(&self, state: &str) -> Result<&StepStructure, GlmError> {
        self.structures
            .get(state)
            .ok_or_else(|| linear_solver_error!(StructureNotBuilt, state.to_string()))
    }

    pub fn layout(&self, state: &str) -> Result<StepLayout, GlmError> {
        Ok(self.structure(state)?.layout)
    }

    pub fn states(&self) -> impl Iterator<Item = &String> {
        self.structures.keys()
    }

    fn check_inputs(layout: &StepLayout, inputs: &StepInputs) -> Result<(), GlmError> {
        check_length("seed", layout.y0_len(), inputs.y0.nrows())?;
        check_length("step sizes", layout.num_steps(), inputs.h.len())?;
        check_length("stage rates", layout.f_len(), inputs.f.nrows())
    }

    /// `rhs` with the seed in the first step vector and `B h_i F_i` in step vector `i + 1`.
    pub fn assemble_rhs(&self, state: &str, inputs: &StepInputs) -> Result<Col<f64>, GlmError> {
        let layout = self.structure(state)?.layout;
        Self::check_inputs(&layout, inputs)?;
        let mut rhs = Col::zeros(layout.y_len());
        for j in 0..layout.num_step_vars() {
            for e in 0..layout.size() {
                rhs[layout.y_index(0, j, e)] = inputs.y0[layout.y0_index(j, e)];
            }
        }
        for [i, j, a, e] in layout.step_rate_blocks() {
            rhs[layout.y_index(i + 1, j, e)] +=
                self.b[(j, a)] * inputs.h[i] * inputs.f[layout.f_index(i, a, e)];
        }
        Ok(rhs)
    }

    /// Solve `M y = rhs` with the stored factorization.
    pub fn solve_forward(&self, state: &str, rhs: &Col<f64>) -> Result<Col<f64>, GlmError> {
        let structure = self.structure(state)?;
        let y = structure.lu.solve(rhs, LinearSolveMode::Forward)?;
        Counters::increment(&self.counters.trajectory_solves);
        Ok(y)
    }

    /// The step-vector trajectory of one state.
    pub fn solve(&self, state: &str, inputs: &StepInputs) -> Result<Col<f64>, GlmError> {
        let rhs = self.assemble_rhs(state, inputs)?;
        self.solve_forward(state, &rhs)
    }

    /// Trajectories of several states. States are independent and solved in parallel.
    pub fn solve_all(
        &self,
        inputs: &BTreeMap<String, StepInputs>,
    ) -> Result<BTreeMap<String, Col<f64>>, GlmError> {
        inputs
            .par_iter()
            .map(|(state, inputs)| Ok::<_, GlmError>((state.clone(), self.solve(state, inputs)?)))
            .collect()
    }

    /// `M y - rhs`, evaluated directly from the assembled `M`.
    pub fn residual(
        &self,
        state: &str,
        y: &Col<f64>,
        inputs: &StepInputs,
    ) -> Result<Col<f64>, GlmError> {
        let structure = self.structure(state)?;
        check_length("step vectors", structure.layout.y_len(), y.nrows())?;
        let rhs = self.assemble_rhs(state, inputs)?;
        let mut residual = structure.recurrence.mul(y);
        for k in 0..residual.nrows() {
            residual[k] -= rhs[k];
        }
        Counters::increment(&self.counters.residual_evaluations);
        Ok(residual)
    }

    /// Solve `M x = v` ([LinearSolveMode::Forward]) or `M^T x = v` ([LinearSolveMode::Reverse]).
    pub fn apply_linear_solve(
        &self,
        state: &str,
        v: &Col<f64>,
        mode: LinearSolveMode,
    ) -> Result<Col<f64>, GlmError> {
        let structure = self.structure(state)?;
        let x = structure.lu.solve(v, mode)?;
        match mode {
            LinearSolveMode::Forward => Counters::increment(&self.counters.tangent_solves),
            LinearSolveMode::Reverse => Counters::increment(&self.counters.adjoint_solves),
        }
        Ok(x)
    }

    pub fn partials(
        &self,
        state: &str,
        h: &[f64],
        f: &Col<f64>,
    ) -> Result<StepPartials, GlmError> {
        let layout = self.structure(state)?.layout;
        check_length("step sizes", layout.num_steps(), h.len())?;
        check_length("stage rates", layout.f_len(), f.nrows())?;
        let rates = layout
            .step_rate_blocks()
            .map(|[i, j, a, _]| -self.b[(j, a)] * h[i])
            .collect();
        let step_sizes = layout
            .step_rate_blocks()
            .map(|[i, j, a, e]| -self.b[(j, a)] * f[layout.f_index(i, a, e)])
            .collect();
        Ok(StepPartials {
            rates: SparseJacobian::from_parts(layout.step_rate_pattern(), rates),
            step_sizes: SparseJacobian::from_parts(layout.step_size_pattern(), step_sizes),
        })
    }

    /// dR/dy, the recurrence operator `M`.
    pub fn recurrence_jacobian(&self, state: &str) -> Result<&SparseJacobian, GlmError> {
        Ok(&self.structure(state)?.recurrence)
    }

    /// dR/dy0, minus the identity on the first step vector.
    pub fn seed_jacobian(&self, state: &str) -> Result<&SparseJacobian, GlmError> {
        Ok(&self.structure(state)?.seed)
    }

    pub fn statistics(&self) -> EngineStatistics {
        EngineStatistics {
            number_of_factorizations: self.counters.factorizations.load(Ordering::Relaxed),
            number_of_trajectory_solves: self.counters.trajectory_solves.load(Ordering::Relaxed),
            number_of_tangent_solves: self.counters.tangent_solves.load(Ordering::Relaxed),
            number_of_adjoint_solves: self.counters.adjoint_solves.load(Ordering::Relaxed),
            number_of_residual_evaluations: self
                .counters
                .residual_evaluations
                .load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ode_solver::tests::{assert_jacobian_eq, finite_difference};
    use crate::scheme::SchemeName;
    use approx::assert_relative_eq;
    use strum::IntoEnumIterator;

    struct Inputs {
        y0: Col<f64>,
        h: Vec<f64>,
        f: Col<f64>,
    }

    impl Inputs {
        fn new(layout: StepLayout) -> Self {
            Self {
                y0: Col::from_fn(layout.y0_len(), |k| 1.0 - 0.1 * k as f64),
                h: (0..layout.num_steps()).map(|i| 0.05 + 0.01 * i as f64).collect(),
                f: Col::from_fn(layout.f_len(), |k| (0.3 * k as f64).cos()),
            }
        }
        fn step(&self) -> StepInputs<'_> {
            StepInputs {
                y0: &self.y0,
                h: &self.h,
                f: &self.f,
            }
        }
    }

    fn engine(scheme: &Scheme, num_times: usize, size: usize) -> VectorizedStepEngine {
        let mut engine = VectorizedStepEngine::new(scheme);
        engine.build_structure("x", num_times, size).unwrap();
        engine
    }

    #[test]
    fn zero_forcing_gives_powers_of_v() {
        for name in SchemeName::iter() {
            let scheme = name.scheme();
            let engine = engine(&scheme, 6, 2);
            let layout = engine.layout("x").unwrap();
            let mut inputs = Inputs::new(layout);
            inputs.f = Col::zeros(layout.f_len());
            let y = engine.solve("x", &inputs.step()).unwrap();

            let r = scheme.num_step_vars();
            let mut v_pow = DMatrix::<f64>::identity(r, r);
            for i in 0..layout.num_times() {
                for j in 0..r {
                    for e in 0..2 {
                        let expected: f64 = (0..r)
                            .map(|k| v_pow[(j, k)] * inputs.y0[layout.y0_index(k, e)])
                            .sum();
                        assert_relative_eq!(
                            y[layout.y_index(i, j, e)],
                            expected,
                            epsilon = 1e-12
                        );
                    }
                }
                v_pow = scheme.v() * v_pow;
            }
        }
    }

    #[test]
    fn one_step_methods_keep_the_seed_without_forcing() {
        let engine = engine(&Scheme::rk4(), 5, 3);
        let layout = engine.layout("x").unwrap();
        let mut inputs = Inputs::new(layout);
        inputs.f = Col::zeros(layout.f_len());
        let y = engine.solve("x", &inputs.step()).unwrap();
        for i in 0..5 {
            for e in 0..3 {
                assert_eq!(y[layout.y_index(i, 0, e)], inputs.y0[e]);
            }
        }
    }

    #[test]
    fn residual_closure() {
        for name in SchemeName::iter() {
            let engine = engine(&name.scheme(), 20, 2);
            let inputs = Inputs::new(engine.layout("x").unwrap());
            let y = engine.solve("x", &inputs.step()).unwrap();
            let residual = engine.residual("x", &y, &inputs.step()).unwrap();
            assert!(residual.norm_l2() < 1e-10, "{name}: {:e}", residual.norm_l2());
        }
    }

    #[test]
    fn forward_euler_recurrence() {
        let engine = engine(&Scheme::forward_euler(), 4, 1);
        let inputs = Inputs::new(engine.layout("x").unwrap());
        let y = engine.solve("x", &inputs.step()).unwrap();
        let mut expected = inputs.y0[0];
        for i in 0..3 {
            assert_relative_eq!(y[i], expected, epsilon = 1e-14);
            expected += inputs.h[i] * inputs.f[i];
        }
        assert_relative_eq!(y[3], expected, epsilon = 1e-14);
    }

    #[test]
    fn residual_partials_match_finite_differences() {
        let scheme = Scheme::bdf2();
        let engine = engine(&scheme, 5, 2);
        let layout = engine.layout("x").unwrap();
        let inputs = Inputs::new(layout);
        let y = Col::from_fn(layout.y_len(), |k| (k as f64).sqrt());
        let partials = engine.partials("x", &inputs.h, &inputs.f).unwrap();

        let fd = finite_difference(&inputs.f, |f| {
            let step = StepInputs { f, ..inputs.step() };
            engine.residual("x", &y, &step).unwrap()
        });
        assert_jacobian_eq(&partials.rates, &fd);

        let hc = Col::from_fn(inputs.h.len(), |i| inputs.h[i]);
        let fd = finite_difference(&hc, |hc| {
            let h = hc.iter().copied().collect::<Vec<_>>();
            let step = StepInputs { h: &h, ..inputs.step() };
            engine.residual("x", &y, &step).unwrap()
        });
        assert_jacobian_eq(&partials.step_sizes, &fd);

        let fd = finite_difference(&y, |y| engine.residual("x", y, &inputs.step()).unwrap());
        assert_jacobian_eq(engine.recurrence_jacobian("x").unwrap(), &fd);

        let fd = finite_difference(&inputs.y0, |y0| {
            let step = StepInputs { y0, ..inputs.step() };
            engine.residual("x", &y, &step).unwrap()
        });
        assert_jacobian_eq(engine.seed_jacobian("x").unwrap(), &fd);
    }

    #[test]
    fn forward_and_reverse_solves() {
        let engine = engine(&Scheme::bdf4(), 6, 2);
        let m = engine.recurrence_jacobian("x").unwrap();
        let n = m.nrows();
        let v = Col::from_fn(n, |k| 1.0 + k as f64);
        let w = Col::from_fn(n, |k| (k as f64).sin());

        let x = engine
            .apply_linear_solve("x", &v, LinearSolveMode::Forward)
            .unwrap();
        let mx = m.mul(&x);
        let z = engine
            .apply_linear_solve("x", &w, LinearSolveMode::Reverse)
            .unwrap();
        let mtz = m.transpose_mul(&z);
        for k in 0..n {
            assert_relative_eq!(mx[k], v[k], epsilon = 1e-10);
            assert_relative_eq!(mtz[k], w[k], epsilon = 1e-10);
        }
        // <w, M^-1 v> = <M^-T w, v>
        let lhs: f64 = (0..n).map(|k| w[k] * x[k]).sum();
        let rhs: f64 = (0..n).map(|k| z[k] * v[k]).sum();
        assert_relative_eq!(lhs, rhs, max_relative = 1e-12);
    }

    #[test]
    fn structure_is_built_once() {
        let mut engine = engine(&Scheme::bdf2(), 10, 1);
        assert!(engine.build_structure("x", 10, 1).is_err());
        engine.build_structure("v", 10, 3).unwrap();
        let mut inputs = BTreeMap::new();
        let x_inputs = Inputs::new(engine.layout("x").unwrap());
        let v_inputs = Inputs::new(engine.layout("v").unwrap());
        inputs.insert("x".to_string(), x_inputs.step());
        inputs.insert("v".to_string(), v_inputs.step());
        for _ in 0..3 {
            let y = engine.solve_all(&inputs).unwrap();
            assert_eq!(y["v"].nrows(), 10 * 2 * 3);
        }
        let y = engine.solve("x", &x_inputs.step()).unwrap();
        engine.residual("x", &y, &x_inputs.step()).unwrap();
        engine
            .apply_linear_solve("x", &y, LinearSolveMode::Reverse)
            .unwrap();
        insta::assert_yaml_snapshot!(engine.statistics(), @r###"
        number_of_factorizations: 2
        number_of_trajectory_solves: 7
        number_of_tangent_solves: 0
        number_of_adjoint_solves: 1
        number_of_residual_evaluations: 1
        "###);
        let err = engine.layout("z").unwrap_err();
        assert!(matches!(
            err,
            GlmError::LinearSolverError(LinearSolverError::StructureNotBuilt(_))
        ));
    }
}
