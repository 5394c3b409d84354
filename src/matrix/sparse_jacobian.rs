use faer::sparse::{SparseColMat, Triplet};
use faer::{Col, Mat};
use nalgebra_sparse::CooMatrix;

use crate::error::{GlmError, ShapeError};
use crate::other_error;

use super::sparsity::SparsityPattern;

/// A sparse partial derivative: a [SparsityPattern] and one value per pattern entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseJacobian {
    pattern: SparsityPattern,
    values: Vec<f64>,
}

impl SparseJacobian {
    pub fn new(pattern: SparsityPattern, values: Vec<f64>) -> Result<Self, GlmError> {
        if pattern.nnz() != values.len() {
            return Err(GlmError::from(ShapeError::PatternValues {
                expected: pattern.nnz(),
                found: values.len(),
            }));
        }
        Ok(Self { pattern, values })
    }

    pub(crate) fn from_parts(pattern: SparsityPattern, values: Vec<f64>) -> Self {
        debug_assert_eq!(pattern.nnz(), values.len());
        Self { pattern, values }
    }

    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            pattern: SparsityPattern::from_indices(nrows, ncols, std::iter::empty()),
            values: Vec::new(),
        }
    }

    pub fn identity(n: usize, alpha: f64) -> Self {
        Self {
            pattern: SparsityPattern::identity(n),
            values: vec![alpha; n],
        }
    }

    pub fn pattern(&self) -> &SparsityPattern {
        &self.pattern
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn nrows(&self) -> usize {
        self.pattern.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.pattern.ncols()
    }

    pub fn triplets(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.pattern
            .indices()
            .zip(self.values.iter().copied())
            .map(|((i, j), v)| (i, j, v))
    }

    pub fn scale(&mut self, alpha: f64) {
        self.values.iter_mut().for_each(|v| *v *= alpha);
    }

    /// y += alpha * J x
    pub fn mul_add(&self, alpha: f64, x: &Col<f64>, y: &mut Col<f64>) {
        for (i, j, v) in self.triplets() {
            y[i] += alpha * v * x[j];
        }
    }

    /// y += alpha * J^T x
    pub fn transpose_mul_add(&self, alpha: f64, x: &Col<f64>, y: &mut Col<f64>) {
        for (i, j, v) in self.triplets() {
            y[j] += alpha * v * x[i];
        }
    }

    pub fn mul(&self, x: &Col<f64>) -> Col<f64> {
        let mut y = Col::zeros(self.nrows());
        self.mul_add(1.0, x, &mut y);
        y
    }

    pub fn transpose_mul(&self, x: &Col<f64>) -> Col<f64> {
        let mut y = Col::zeros(self.ncols());
        self.transpose_mul_add(1.0, x, &mut y);
        y
    }

    pub fn to_dense(&self) -> Mat<f64> {
        let mut m = Mat::zeros(self.nrows(), self.ncols());
        for (i, j, v) in self.triplets() {
            m[(i, j)] += v;
        }
        m
    }

    /// Compressed column form for factorization, duplicate entries are summed.
    pub fn to_faer(&self) -> Result<SparseColMat<usize, f64>, GlmError> {
        let triplets = self
            .triplets()
            .map(|(i, j, v)| Triplet::new(i, j, v))
            .collect::<Vec<_>>();
        SparseColMat::try_new_from_triplets(self.nrows(), self.ncols(), triplets.as_slice())
            .map_err(|e| other_error!(format!("failed to assemble sparse matrix: {e:?}")))
    }

    /// Export to [nalgebra_sparse] coordinate format, duplicates are kept as separate entries.
    pub fn to_coo(&self) -> Result<CooMatrix<f64>, GlmError> {
        CooMatrix::try_from_triplets(
            self.nrows(),
            self.ncols(),
            self.pattern.rows().to_vec(),
            self.pattern.cols().to_vec(),
            self.values.clone(),
        )
        .map_err(|e| other_error!(format!("failed to export sparse matrix: {e}")))
    }
}
