use faer::Col;

use crate::error::{check_length, GlmError, ShapeError};
use crate::matrix::{SparseJacobian, SparsityPattern, StepLayout};
use crate::scheme::StartingCoefficients;

/// Seed `[ic, 0, ..., 0]` for a scheme without a starting method.
#[derive(Debug, Clone)]
pub struct InitialConditionSeed {
    jacobian: SparseJacobian,
}

impl InitialConditionSeed {
    pub fn new(layout: StepLayout) -> Self {
        let pattern = layout.initial_condition_pattern();
        let values = vec![1.0; pattern.nnz()];
        Self {
            jacobian: SparseJacobian::from_parts(pattern, values),
        }
    }

    pub fn apply(&self, initial_condition: &Col<f64>) -> Result<Col<f64>, GlmError> {
        check_length("initial condition", self.jacobian.ncols(), initial_condition.nrows())?;
        Ok(self.jacobian.mul(initial_condition))
    }

    /// d(seed) / d(initial condition), constant.
    pub fn jacobian(&self) -> &SparseJacobian {
        &self.jacobian
    }
}

/// Contracts the trajectory of a starting run into the seed of the main run:
/// `y0[k] = sum_{i, j} C[k, i, j] y_start[i, j]`.
#[derive(Debug, Clone)]
pub struct StartingContraction {
    jacobian: SparseJacobian,
}

impl StartingContraction {
    pub fn new(starting_layout: StepLayout, coefficients: &StartingCoefficients) -> Self {
        let pattern = starting_layout.starting_pattern(coefficients);
        let values = starting_layout
            .starting_blocks(coefficients.num_starting())
            .map(|[k, i, j, _]| coefficients.get(k, i, j))
            .collect();
        Self {
            jacobian: SparseJacobian::from_parts(pattern, values),
        }
    }

    pub fn apply(&self, starting_trajectory: &Col<f64>) -> Result<Col<f64>, GlmError> {
        check_length(
            "starting trajectory",
            self.jacobian.ncols(),
            starting_trajectory.nrows(),
        )?;
        Ok(self.jacobian.mul(starting_trajectory))
    }

    pub fn jacobian(&self) -> &SparseJacobian {
        &self.jacobian
    }
}

/// Assembles the physical state at every grid point from the starting and main trajectories.
///
/// The starting run covers grid points `0 ..= k` and the main run points `k ..`; the output takes
/// rows `0 .. k` from the starting run and the rest from the main run. The physical state is
/// step variable 0 of each step vector.
#[derive(Debug, Clone)]
pub struct TrajectoryAssembler {
    size: usize,
    num_times: usize,
    main: SparseJacobian,
    starting: Option<SparseJacobian>,
}

impl TrajectoryAssembler {
    pub fn new(main_layout: StepLayout, starting_layout: Option<StepLayout>) -> Self {
        let size = main_layout.size();
        let offset = starting_layout.map_or(0, |l| l.num_times() - 1);
        let num_times = offset + main_layout.num_times();
        let shifted = |layout: StepLayout, rows_offset: usize, num_rows: usize| {
            let pattern = layout.state_rows_pattern();
            let indices = pattern
                .indices()
                .filter(|(row, _)| *row < num_rows * size)
                .map(|(row, col)| (row + rows_offset * size, col))
                .collect::<Vec<_>>();
            let nnz = indices.len();
            let pattern = SparsityPattern::from_indices(
                num_times * size,
                layout.y_len(),
                indices.into_iter(),
            );
            SparseJacobian::from_parts(pattern, vec![1.0; nnz])
        };
        let main = shifted(main_layout, offset, main_layout.num_times());
        let starting = starting_layout.map(|l| shifted(l, 0, offset));
        Self {
            size,
            num_times,
            main,
            starting,
        }
    }

    pub fn num_times(&self) -> usize {
        self.num_times
    }

    pub fn assemble(
        &self,
        main: &Col<f64>,
        starting: Option<&Col<f64>>,
    ) -> Result<Col<f64>, GlmError> {
        check_length("main trajectory", self.main.ncols(), main.nrows())?;
        let mut out = self.main.mul(main);
        match (&self.starting, starting) {
            (Some(jac), Some(y)) => {
                check_length("starting trajectory", jac.ncols(), y.nrows())?;
                jac.mul_add(1.0, y, &mut out);
            }
            (Some(_), None) => return Err(GlmError::from(ShapeError::MissingStartingTrajectory)),
            (None, Some(_)) => {
                return Err(GlmError::from(ShapeError::UnexpectedStartingTrajectory))
            }
            (None, None) => {}
        }
        Ok(out)
    }

    /// d(output) / d(main trajectory), constant.
    pub fn main_jacobian(&self) -> &SparseJacobian {
        &self.main
    }

    /// d(output) / d(starting trajectory), constant.
    pub fn starting_jacobian(&self) -> Option<&SparseJacobian> {
        self.starting.as_ref()
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::Scheme;

    #[test]
    fn initial_condition_seed() {
        let layout = StepLayout::new(5, 1, 2, 3);
        let seed = InitialConditionSeed::new(layout);
        let ic = Col::from_fn(3, |e| e as f64 + 1.0);
        let y0 = seed.apply(&ic).unwrap();
        assert_eq!(y0.nrows(), 6);
        assert_eq!((y0[0], y0[1], y0[2]), (1.0, 2.0, 3.0));
        assert_eq!((y0[3], y0[4], y0[5]), (0.0, 0.0, 0.0));
    }

    #[test]
    fn starting_contraction_orders_most_recent_first() {
        let bdf2 = Scheme::bdf2();
        let coefficients = bdf2.starting_method().unwrap().coefficients();
        // one RK4 step, two points, one step variable, size 2
        let layout = StepLayout::new(2, 4, 1, 2);
        let contraction = StartingContraction::new(layout, coefficients);
        let y_start = Col::from_fn(4, |k| [1.0, 2.0, 3.0, 4.0][k]);
        let y0 = contraction.apply(&y_start).unwrap();
        assert_eq!((y0[0], y0[1]), (3.0, 4.0));
        assert_eq!((y0[2], y0[3]), (1.0, 2.0));
    }

    #[test]
    fn assembled_trajectory() {
        let main = StepLayout::new(4, 1, 2, 1);
        let starting = StepLayout::new(3, 4, 1, 1);
        let assembler = TrajectoryAssembler::new(main, Some(starting));
        assert_eq!(assembler.num_times(), 6);
        let y_main = Col::from_fn(main.y_len(), |k| 10.0 + k as f64);
        let y_start = Col::from_fn(starting.y_len(), |k| k as f64);
        let out = assembler.assemble(&y_main, Some(&y_start)).unwrap();
        let expected = [0.0, 1.0, 10.0, 12.0, 14.0, 16.0];
        for (n, e) in expected.iter().enumerate() {
            assert_eq!(out[n], *e);
        }

        let assembler = TrajectoryAssembler::new(main, None);
        let out = assembler.assemble(&y_main, None).unwrap();
        assert_eq!(out.nrows(), 4);
        assert_eq!(out[3], 16.0);
    }

    #[test]
    fn starting_trajectory_must_match_the_scheme() {
        let main = StepLayout::new(4, 1, 2, 1);
        let starting = StepLayout::new(3, 4, 1, 1);
        let y_main = Col::from_fn(main.y_len(), |k| k as f64);
        let y_start = Col::from_fn(starting.y_len(), |k| k as f64);

        let err = TrajectoryAssembler::new(main, Some(starting))
            .assemble(&y_main, None)
            .unwrap_err();
        assert!(matches!(
            err,
            GlmError::ShapeError(ShapeError::MissingStartingTrajectory)
        ));
        let err = TrajectoryAssembler::new(main, None)
            .assemble(&y_main, Some(&y_start))
            .unwrap_err();
        assert!(matches!(
            err,
            GlmError::ShapeError(ShapeError::UnexpectedStartingTrajectory)
        ));
    }
}
