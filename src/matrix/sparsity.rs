use crate::error::{GlmError, ShapeError};
use crate::scheme::StartingCoefficients;

/// The coordinates of the structurally non-zero entries of a sparse matrix.
///
/// Duplicate coordinates are allowed, their values are summed when the matrix is assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparsityPattern {
    nrows: usize,
    ncols: usize,
    rows: Vec<usize>,
    cols: Vec<usize>,
}

impl SparsityPattern {
    pub fn new(
        nrows: usize,
        ncols: usize,
        rows: Vec<usize>,
        cols: Vec<usize>,
    ) -> Result<Self, GlmError> {
        crate::error::check_length("pattern columns", rows.len(), cols.len())?;
        for (&row, &col) in rows.iter().zip(cols.iter()) {
            if row >= nrows || col >= ncols {
                return Err(GlmError::from(ShapeError::IndexOutOfBounds {
                    row,
                    col,
                    nrows,
                    ncols,
                }));
            }
        }
        Ok(Self {
            nrows,
            ncols,
            rows,
            cols,
        })
    }

    pub(crate) fn from_indices(
        nrows: usize,
        ncols: usize,
        indices: impl Iterator<Item = (usize, usize)>,
    ) -> Self {
        let (rows, cols) = indices.unzip();
        Self {
            nrows,
            ncols,
            rows,
            cols,
        }
    }

    pub fn identity(n: usize) -> Self {
        Self::from_indices(n, n, (0..n).map(|i| (i, i)))
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nnz(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    pub fn cols(&self) -> &[usize] {
        &self.cols
    }

    pub fn indices(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.rows.iter().copied().zip(self.cols.iter().copied())
    }
}

fn blocks3(n: [usize; 3]) -> impl Iterator<Item = [usize; 3]> {
    (0..n[0]).flat_map(move |i| (0..n[1]).flat_map(move |j| (0..n[2]).map(move |k| [i, j, k])))
}

fn blocks4(n: [usize; 4]) -> impl Iterator<Item = [usize; 4]> {
    (0..n[0]).flat_map(move |i| blocks3([n[1], n[2], n[3]]).map(move |[j, k, l]| [i, j, k, l]))
}

/// Memory layout of the vectorized tensors of one state over a time grid.
///
/// With `N` time points, `s` stages, `r` step variables and `size` elements per state:
///
/// - the step-vector trajectory `y` has shape `(N, r, size)`,
/// - the stage tensors `F` and `Y` have shape `(N - 1, s, size)`,
/// - the seed `y0` has shape `(r, size)`,
///
/// all stored row-major.
///
/// Every block enumeration below yields its index tuples in a fixed order, and the matching
/// pattern lists its entries in that same order, so values can be filled by walking the
/// enumeration again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepLayout {
    num_times: usize,
    num_stages: usize,
    num_step_vars: usize,
    size: usize,
}

impl StepLayout {
    pub fn new(num_times: usize, num_stages: usize, num_step_vars: usize, size: usize) -> Self {
        Self {
            num_times,
            num_stages,
            num_step_vars,
            size,
        }
    }

    pub fn num_times(&self) -> usize {
        self.num_times
    }
    pub fn num_steps(&self) -> usize {
        self.num_times.saturating_sub(1)
    }
    pub fn num_stages(&self) -> usize {
        self.num_stages
    }
    pub fn num_step_vars(&self) -> usize {
        self.num_step_vars
    }
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn y_len(&self) -> usize {
        self.num_times * self.num_step_vars * self.size
    }
    pub fn f_len(&self) -> usize {
        self.num_steps() * self.num_stages * self.size
    }
    pub fn y0_len(&self) -> usize {
        self.num_step_vars * self.size
    }

    pub fn y_index(&self, i: usize, j: usize, e: usize) -> usize {
        (i * self.num_step_vars + j) * self.size + e
    }
    pub fn f_index(&self, i: usize, a: usize, e: usize) -> usize {
        (i * self.num_stages + a) * self.size + e
    }
    pub fn y0_index(&self, j: usize, e: usize) -> usize {
        j * self.size + e
    }

    /// `(i, j, k, e)`: step variable `j` of step `i + 1` depends on variable `k` of step `i`.
    pub fn recurrence_coupling_blocks(&self) -> impl Iterator<Item = [usize; 4]> {
        blocks4([
            self.num_steps(),
            self.num_step_vars,
            self.num_step_vars,
            self.size,
        ])
    }

    /// `(i, j, a, e)`: step variable `j` of step `i + 1` depends on stage `a` of step `i`.
    pub fn step_rate_blocks(&self) -> impl Iterator<Item = [usize; 4]> {
        blocks4([self.num_steps(), self.num_step_vars, self.num_stages, self.size])
    }

    /// `(i, a, b, e)`: stage `a` of step `i` depends on the rate at stage `b`.
    pub fn stage_rate_blocks(&self) -> impl Iterator<Item = [usize; 4]> {
        blocks4([self.num_steps(), self.num_stages, self.num_stages, self.size])
    }

    /// `(i, a, j, e)`: stage `a` of step `i` depends on step variable `j` entering the step.
    pub fn stage_step_blocks(&self) -> impl Iterator<Item = [usize; 4]> {
        blocks4([self.num_steps(), self.num_stages, self.num_step_vars, self.size])
    }

    /// The recurrence operator `M`: the identity followed by one entry per coupling block.
    pub fn recurrence_pattern(&self) -> SparsityPattern {
        let n = self.y_len();
        let l = *self;
        let diagonal = (0..n).map(|i| (i, i));
        let coupling = self
            .recurrence_coupling_blocks()
            .map(move |[i, j, k, e]| (l.y_index(i + 1, j, e), l.y_index(i, k, e)));
        SparsityPattern::from_indices(n, n, diagonal.chain(coupling))
    }

    /// Coupling of the first step vector to the seed.
    pub fn seed_pattern(&self) -> SparsityPattern {
        let l = *self;
        SparsityPattern::from_indices(
            self.y_len(),
            self.y0_len(),
            blocks3([1, self.num_step_vars, self.size])
                .map(move |[_, j, e]| (l.y_index(0, j, e), l.y0_index(j, e))),
        )
    }

    pub fn step_rate_pattern(&self) -> SparsityPattern {
        let l = *self;
        SparsityPattern::from_indices(
            self.y_len(),
            self.f_len(),
            self.step_rate_blocks()
                .map(move |[i, j, a, e]| (l.y_index(i + 1, j, e), l.f_index(i, a, e))),
        )
    }

    pub fn step_size_pattern(&self) -> SparsityPattern {
        let l = *self;
        SparsityPattern::from_indices(
            self.y_len(),
            self.num_steps(),
            self.step_rate_blocks()
                .map(move |[i, j, _, e]| (l.y_index(i + 1, j, e), i)),
        )
    }

    pub fn stage_rate_pattern(&self) -> SparsityPattern {
        let l = *self;
        SparsityPattern::from_indices(
            self.f_len(),
            self.f_len(),
            self.stage_rate_blocks()
                .map(move |[i, a, b, e]| (l.f_index(i, a, e), l.f_index(i, b, e))),
        )
    }

    pub fn stage_size_pattern(&self) -> SparsityPattern {
        let l = *self;
        SparsityPattern::from_indices(
            self.f_len(),
            self.num_steps(),
            self.stage_rate_blocks()
                .map(move |[i, a, _, e]| (l.f_index(i, a, e), i)),
        )
    }

    pub fn stage_step_pattern(&self) -> SparsityPattern {
        let l = *self;
        SparsityPattern::from_indices(
            self.f_len(),
            self.y_len(),
            self.stage_step_blocks()
                .map(move |[i, a, j, e]| (l.f_index(i, a, e), l.y_index(i, j, e))),
        )
    }

    /// Selection of the physical state (step variable 0) at every time point.
    pub fn state_rows_pattern(&self) -> SparsityPattern {
        let l = *self;
        SparsityPattern::from_indices(
            self.num_times * self.size,
            self.y_len(),
            blocks3([self.num_times, 1, self.size])
                .map(move |[n, _, e]| (n * l.size + e, l.y_index(n, 0, e))),
        )
    }

    /// Seeding of a scheme without a starting method: step variable 0 is the initial condition.
    pub fn initial_condition_pattern(&self) -> SparsityPattern {
        SparsityPattern::from_indices(
            self.y0_len(),
            self.size,
            (0..self.size).map(|e| (e, e)),
        )
    }

    /// `(k, i, j, e)` for the contraction of a starting trajectory laid out as `self`.
    pub fn starting_blocks(&self, num_starting: usize) -> impl Iterator<Item = [usize; 4]> {
        blocks4([num_starting, self.num_times, self.num_step_vars, self.size])
    }

    /// Contraction of a starting trajectory laid out as `self` into the seed of the main run.
    pub fn starting_pattern(&self, coefficients: &StartingCoefficients) -> SparsityPattern {
        let l = *self;
        let num_starting = coefficients.num_starting();
        SparsityPattern::from_indices(
            num_starting * self.size,
            self.y_len(),
            self.starting_blocks(num_starting)
                .map(move |[k, i, j, e]| (k * l.size + e, l.y_index(i, j, e))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recurrence_pattern_is_unit_lower_block_bidiagonal() {
        let layout = StepLayout::new(3, 1, 2, 2);
        let pattern = layout.recurrence_pattern();
        assert_eq!(pattern.nrows(), 12);
        assert_eq!(pattern.ncols(), 12);
        // 12 diagonal entries plus 2 steps * 2 * 2 * 2 coupling entries
        assert_eq!(pattern.nnz(), 12 + 16);
        for (row, col) in pattern.indices() {
            assert!(col <= row);
            if row == col {
                continue;
            }
            // the coupling always reaches back exactly one step vector
            let row_step = row / (2 * 2);
            let col_step = col / (2 * 2);
            assert_eq!(row_step, col_step + 1);
        }
    }

    #[test]
    fn step_patterns() {
        let layout = StepLayout::new(4, 2, 1, 3);
        assert_eq!(layout.y_len(), 12);
        assert_eq!(layout.f_len(), 18);
        let rate = layout.step_rate_pattern();
        assert_eq!((rate.nrows(), rate.ncols(), rate.nnz()), (12, 18, 18));
        assert_eq!(rate.indices().next(), Some((3, 0)));
        let size = layout.step_size_pattern();
        assert_eq!((size.nrows(), size.ncols()), (12, 3));
        assert!(size.indices().all(|(row, col)| row / 3 == col + 1));
        let seed = layout.seed_pattern();
        assert_eq!(seed.indices().collect::<Vec<_>>(), vec![(0, 0), (1, 1), (2, 2)]);
    }

    #[test]
    fn stage_patterns() {
        let layout = StepLayout::new(3, 2, 2, 1);
        let p = layout.stage_rate_pattern();
        assert_eq!(p.nnz(), 2 * 2 * 2);
        assert!(p.indices().all(|(row, col)| row / 2 == col / 2));
        let p = layout.stage_step_pattern();
        assert_eq!((p.nrows(), p.ncols(), p.nnz()), (4, 6, 8));
        assert!(p.indices().all(|(row, col)| row / 2 == col / 2));
    }

    #[test]
    fn output_patterns() {
        let layout = StepLayout::new(3, 1, 2, 2);
        let p = layout.state_rows_pattern();
        assert_eq!(
            p.indices().collect::<Vec<_>>(),
            vec![(0, 0), (1, 1), (2, 4), (3, 5), (4, 8), (5, 9)]
        );
        let p = layout.initial_condition_pattern();
        assert_eq!((p.nrows(), p.ncols()), (4, 2));
        assert_eq!(p.indices().collect::<Vec<_>>(), vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn out_of_bounds_pattern_is_rejected() {
        assert!(SparsityPattern::new(2, 2, vec![0, 1], vec![1, 0]).is_ok());
        let err = SparsityPattern::new(2, 2, vec![0, 2], vec![1, 0]).unwrap_err();
        assert!(matches!(
            err,
            GlmError::ShapeError(ShapeError::IndexOutOfBounds { row: 2, col: 0, .. })
        ));
        assert!(SparsityPattern::new(2, 2, vec![0], vec![1, 0]).is_err());
    }
}
