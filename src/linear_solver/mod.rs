use ::faer::Col;

use crate::error::GlmError;

pub mod faer;

pub use self::faer::lu::DenseLu;
pub use self::faer::sparse_lu::SparseLu;

/// Direction of a linearized solve.
///
/// `Forward` solves `A x = b` and is used for trajectory solves and tangent propagation,
/// `Reverse` solves `A^T x = b` and is used for adjoint propagation. Both reuse the same
/// factorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinearSolveMode {
    Forward,
    Reverse,
}

/// A factorized square matrix `A`.
pub trait LinearSolver: Send + Sync {
    fn nrows(&self) -> usize;

    /// Overwrite `b` with the solution `x` of `A x = b` (or `A^T x = b` for [LinearSolveMode::Reverse]).
    fn solve_in_place(&self, b: &mut Col<f64>, mode: LinearSolveMode) -> Result<(), GlmError>;

    fn solve(&self, b: &Col<f64>, mode: LinearSolveMode) -> Result<Col<f64>, GlmError> {
        let mut b = b.clone();
        self.solve_in_place(&mut b, mode)?;
        Ok(b)
    }
}

#[cfg(test)]
pub mod tests {
    use faer::{Col, Mat};

    use super::{DenseLu, LinearSolveMode, LinearSolver, SparseLu};
    use crate::matrix::{SparseJacobian, SparsityPattern};

    pub struct LinearSolveSolution {
        pub mode: LinearSolveMode,
        pub x: Col<f64>,
        pub b: Col<f64>,
    }

    /// A = [[2, 0, 0], [1, 2, 0], [0, 3, 1]]
    pub fn linear_problem() -> (SparseJacobian, Vec<LinearSolveSolution>) {
        let pattern =
            SparsityPattern::new(3, 3, vec![0, 1, 1, 2, 2], vec![0, 0, 1, 1, 2]).unwrap();
        let a = SparseJacobian::new(pattern, vec![2.0, 1.0, 2.0, 3.0, 1.0]).unwrap();
        let x = Col::from_fn(3, |i| (i + 1) as f64);
        let solns = vec![
            LinearSolveSolution {
                mode: LinearSolveMode::Forward,
                b: a.mul(&x),
                x: x.clone(),
            },
            LinearSolveSolution {
                mode: LinearSolveMode::Reverse,
                b: a.transpose_mul(&x),
                x,
            },
        ];
        (a, solns)
    }

    pub fn test_linear_solver(solver: impl LinearSolver, solns: Vec<LinearSolveSolution>) {
        for soln in solns {
            let x = solver.solve(&soln.b, soln.mode).unwrap();
            for i in 0..solver.nrows() {
                approx::assert_relative_eq!(x[i], soln.x[i], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_lu_dense() {
        let (a, solns) = linear_problem();
        let solver = DenseLu::new(&a.to_dense()).unwrap();
        test_linear_solver(solver, solns);
    }

    #[test]
    fn test_lu_sparse() {
        let (a, solns) = linear_problem();
        let solver = SparseLu::new(&a).unwrap();
        test_linear_solver(solver, solns);
    }

    #[test]
    fn dense_lu_solves_backward_euler_coupling() {
        // I - dS/dY of backward Euler for y' = -y on 20 points
        let n = 19;
        let h = 1.0 / n as f64;
        let a = Mat::from_fn(n, n, |i, j| match i.cmp(&j) {
            std::cmp::Ordering::Equal => 1.0 + h,
            std::cmp::Ordering::Greater => h,
            std::cmp::Ordering::Less => 0.0,
        });
        let x = Col::from_fn(n, |i| 1.0 - 0.05 * i as f64);
        let solver = DenseLu::new(&a).unwrap();
        for (mode, b) in [
            (LinearSolveMode::Forward, &a * &x),
            (LinearSolveMode::Reverse, a.transpose() * &x),
        ] {
            let solved = solver.solve(&b, mode).unwrap();
            for i in 0..n {
                approx::assert_relative_eq!(solved[i], x[i], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn singular_matrix_is_reported() {
        let solver = DenseLu::new(&Mat::zeros(2, 2)).unwrap();
        let b = Col::from_fn(2, |_| 1.0);
        assert!(solver.solve(&b, LinearSolveMode::Forward).is_err());
    }

    #[test]
    fn non_square_matrix_is_rejected() {
        assert!(DenseLu::new(&Mat::zeros(2, 3)).is_err());
        let pattern = SparsityPattern::new(2, 3, vec![0, 1], vec![0, 1]).unwrap();
        let a = SparseJacobian::new(pattern, vec![1.0, 1.0]).unwrap();
        assert!(SparseLu::new(&a).is_err());
    }
}
