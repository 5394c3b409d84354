use std::collections::BTreeMap;

use faer::Col;
use nalgebra::DVector;

use super::{OdeSystem, ParameterKind};
use crate::error::{check_length, ConfigurationError, GlmError};
use crate::matrix::{SparseJacobian, SparsityPattern};

/// Maps user parameter values onto the stage evaluations of one integration phase.
///
/// The phase covers grid steps `offset .. offset + num_steps` of a global grid with
/// `num_times` points. A static parameter of size `n` is given as `n` values and broadcast; a
/// dynamic parameter is given as `num_times * n` values and the stage value at step `g` and
/// abscissa `c` is `(1 - c) p[g] + c p[g + 1]`.
///
/// The map is linear, so each parameter is represented by its constant Jacobian.
#[derive(Debug, Clone)]
pub struct ParameterMap {
    num_evaluations: usize,
    jacobians: BTreeMap<String, SparseJacobian>,
}

impl ParameterMap {
    pub fn new(
        system: &OdeSystem,
        num_times: usize,
        offset: usize,
        num_steps: usize,
        abscissa: &DVector<f64>,
    ) -> Self {
        let s = abscissa.len();
        let num_evaluations = num_steps * s;
        let jacobians = system
            .parameters()
            .map(|p| {
                let size = p.size();
                let mut rows = Vec::new();
                let mut cols = Vec::new();
                let mut values = Vec::new();
                for i in 0..num_steps {
                    let g = offset + i;
                    for (a, &c) in abscissa.iter().enumerate() {
                        let q = i * s + a;
                        for e in 0..size {
                            match p.kind() {
                                ParameterKind::Static => {
                                    rows.push(q * size + e);
                                    cols.push(e);
                                    values.push(1.0);
                                }
                                ParameterKind::Dynamic => {
                                    rows.extend([q * size + e, q * size + e]);
                                    cols.extend([g * size + e, (g + 1) * size + e]);
                                    values.extend([1.0 - c, c]);
                                }
                            }
                        }
                    }
                }
                let ncols = match p.kind() {
                    ParameterKind::Static => size,
                    ParameterKind::Dynamic => num_times * size,
                };
                let pattern = SparsityPattern::from_indices(
                    num_evaluations * size,
                    ncols,
                    rows.into_iter().zip(cols),
                );
                (
                    p.name().to_string(),
                    SparseJacobian::from_parts(pattern, values),
                )
            })
            .collect();
        Self {
            num_evaluations,
            jacobians,
        }
    }

    pub fn num_evaluations(&self) -> usize {
        self.num_evaluations
    }

    /// d(stage values) / d(parameter values)
    pub fn jacobian(&self, name: &str) -> Option<&SparseJacobian> {
        self.jacobians.get(name)
    }

    pub fn jacobians(&self) -> impl Iterator<Item = (&String, &SparseJacobian)> {
        self.jacobians.iter()
    }

    pub fn evaluate(
        &self,
        values: &BTreeMap<String, Col<f64>>,
    ) -> Result<BTreeMap<String, Col<f64>>, GlmError> {
        self.jacobians
            .iter()
            .map(|(name, jac)| {
                let value = values.get(name).ok_or_else(|| {
                    GlmError::from(ConfigurationError::MissingParameter(name.clone()))
                })?;
                check_length(name, jac.ncols(), value.nrows())?;
                Ok::<_, GlmError>((name.clone(), jac.mul(value)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OdeSystemBuilder;

    #[test]
    fn static_and_dynamic_parameters() {
        let system = OdeSystemBuilder::new()
            .state("y", &[1])
            .static_parameter("k", &[2])
            .dynamic_parameter("u", &[1])
            .build()
            .unwrap();
        let abscissa = DVector::from_vec(vec![0.0, 0.5]);
        // steps 1 and 2 of a grid with 4 points
        let map = ParameterMap::new(&system, 4, 1, 2, &abscissa);
        assert_eq!(map.num_evaluations(), 4);

        let mut values = BTreeMap::new();
        values.insert("k".to_string(), Col::from_fn(2, |i| (i + 1) as f64));
        values.insert("u".to_string(), Col::from_fn(4, |i| (i * i) as f64));
        let stage = map.evaluate(&values).unwrap();

        let k = &stage["k"];
        assert_eq!(k.nrows(), 8);
        for q in 0..4 {
            assert_eq!(k[2 * q], 1.0);
            assert_eq!(k[2 * q + 1], 2.0);
        }
        let u = &stage["u"];
        // u = [0, 1, 4, 9] at the grid points
        assert_eq!(u[0], 1.0);
        assert_eq!(u[1], 2.5);
        assert_eq!(u[2], 4.0);
        assert_eq!(u[3], 6.5);

        values.remove("u");
        let err = map.evaluate(&values).unwrap_err();
        assert!(matches!(
            err,
            GlmError::ConfigurationError(ConfigurationError::MissingParameter(_))
        ));
    }
}
