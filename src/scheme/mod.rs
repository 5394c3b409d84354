use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::error::{ConfigurationError, GlmError};
use crate::configuration_error;

pub mod bdf;
pub mod runge_kutta;

/// Names of the predefined schemes.
///
/// The string form of each variant (e.g. `"RK4"`, `"BackwardEuler"`) is the name accepted by
/// [Scheme::from_name] and by the `scheme` field of [crate::IntegratorConfig].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, EnumIter, Serialize, Deserialize,
)]
pub enum SchemeName {
    ForwardEuler,
    BackwardEuler,
    ExplicitMidpoint,
    ImplicitMidpoint,
    Trapezoidal,
    RK4,
    BDF2,
    BDF4,
}

impl SchemeName {
    pub fn scheme(self) -> Scheme {
        match self {
            SchemeName::ForwardEuler => Scheme::forward_euler(),
            SchemeName::BackwardEuler => Scheme::backward_euler(),
            SchemeName::ExplicitMidpoint => Scheme::explicit_midpoint(),
            SchemeName::ImplicitMidpoint => Scheme::implicit_midpoint(),
            SchemeName::Trapezoidal => Scheme::trapezoidal(),
            SchemeName::RK4 => Scheme::rk4(),
            SchemeName::BDF2 => Scheme::bdf2(),
            SchemeName::BDF4 => Scheme::bdf4(),
        }
    }
}

/// A rank-3 tensor of shape `(num_starting, num_points, num_step_vars)`.
///
/// Entry `(k, i, j)` is the weight of step variable `j` at starting time point `i` in the `k`-th
/// step variable handed to the main scheme.
#[derive(Debug, Clone, PartialEq)]
pub struct StartingCoefficients {
    shape: [usize; 3],
    data: Vec<f64>,
}

impl StartingCoefficients {
    /// `data` is stored row-major over `shape`.
    pub fn new(shape: &[usize], data: Vec<f64>) -> Result<Self, GlmError> {
        if shape.len() != 3 {
            return Err(configuration_error!(StartingCoefficientsRank, shape.len()));
        }
        let expected = shape.iter().product::<usize>();
        if expected != data.len() {
            return Err(GlmError::from(
                ConfigurationError::StartingCoefficientsLength {
                    expected,
                    found: data.len(),
                },
            ));
        }
        Ok(Self {
            shape: [shape[0], shape[1], shape[2]],
            data,
        })
    }

    /// Hands the last `n` starting points to the main scheme, most recent first
    /// (the step vector layout `[y_n, y_{n-1}, ...]` of the BDF schemes).
    pub(crate) fn most_recent_first(n: usize) -> Self {
        let mut data = vec![0.0; n * n];
        for k in 0..n {
            data[k * n + (n - 1 - k)] = 1.0;
        }
        Self {
            shape: [n, n, 1],
            data,
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn num_starting(&self) -> usize {
        self.shape[0]
    }

    pub fn num_points(&self) -> usize {
        self.shape[1]
    }

    pub fn num_step_vars(&self) -> usize {
        self.shape[2]
    }

    pub fn get(&self, k: usize, i: usize, j: usize) -> f64 {
        self.data[(k * self.shape[1] + i) * self.shape[2] + j]
    }
}

/// The lower-order integration that supplies the step-vector history of a multistep scheme.
#[derive(Debug, Clone, PartialEq)]
pub struct StartingMethod {
    scheme: SchemeName,
    coefficients: StartingCoefficients,
    num_steps: usize,
}

impl StartingMethod {
    pub fn new(scheme: SchemeName, coefficients: StartingCoefficients, num_steps: usize) -> Self {
        Self {
            scheme,
            coefficients,
            num_steps,
        }
    }

    pub fn scheme(&self) -> SchemeName {
        self.scheme
    }

    pub fn coefficients(&self) -> &StartingCoefficients {
        &self.coefficients
    }

    /// Number of time steps taken by the starting scheme.
    pub fn num_steps(&self) -> usize {
        self.num_steps
    }
}

/// A general linear method.
///
/// With `s` stages and `r` step variables, one step of size `h` from the step vector `y_old` is
///
/// ```text
/// Y     = A h F + U y_old      (s stage values)
/// y_new = B h F + V y_old      (r step variables)
/// ```
///
/// where `F` holds the ODE rate evaluated at each stage value. Runge-Kutta methods have `r = 1`,
/// `U = 1`, `V = 1` and `B = b^T`; linear multistep methods carry their history in `y`.
#[derive(Debug, Clone, PartialEq)]
pub struct Scheme {
    name: Option<SchemeName>,
    a: DMatrix<f64>,
    u: DMatrix<f64>,
    b: DMatrix<f64>,
    v: DMatrix<f64>,
    abscissa: DVector<f64>,
    starting_method: Option<StartingMethod>,
}

impl Scheme {
    /// Create a scheme from explicit coefficient matrices, checking that all shapes agree.
    pub fn new(
        a: DMatrix<f64>,
        u: DMatrix<f64>,
        b: DMatrix<f64>,
        v: DMatrix<f64>,
        abscissa: DVector<f64>,
        starting_method: Option<StartingMethod>,
    ) -> Result<Self, GlmError> {
        let scheme = Self {
            name: None,
            a,
            u,
            b,
            v,
            abscissa,
            starting_method,
        };
        scheme.validate()?;
        Ok(scheme)
    }

    pub(crate) fn new_unchecked(
        name: SchemeName,
        a: DMatrix<f64>,
        u: DMatrix<f64>,
        b: DMatrix<f64>,
        v: DMatrix<f64>,
        abscissa: DVector<f64>,
        starting_method: Option<StartingMethod>,
    ) -> Self {
        Self {
            name: Some(name),
            a,
            u,
            b,
            v,
            abscissa,
            starting_method,
        }
    }

    /// Look up a predefined scheme by name.
    pub fn from_name(name: &str) -> Result<Self, GlmError> {
        let name = name
            .parse::<SchemeName>()
            .map_err(|_| configuration_error!(UnknownScheme, name.to_string()))?;
        Ok(name.scheme())
    }

    fn validate(&self) -> Result<(), GlmError> {
        let s = self.a.nrows();
        let r = self.v.nrows();
        let check = |name: &'static str, m: &DMatrix<f64>, expected: (usize, usize)| {
            if m.shape() != expected {
                return Err(GlmError::from(ConfigurationError::SchemeMatrixShape {
                    name,
                    expected,
                    found: m.shape(),
                }));
            }
            Ok(())
        };
        check("A", &self.a, (s, s))?;
        check("U", &self.u, (s, r))?;
        check("B", &self.b, (r, s))?;
        check("V", &self.v, (r, r))?;
        if self.abscissa.len() != s {
            return Err(GlmError::from(ConfigurationError::AbscissaLength {
                expected: s,
                found: self.abscissa.len(),
            }));
        }
        if let Some(starting) = &self.starting_method {
            if starting.num_steps() == 0 {
                return Err(configuration_error!(
                    EmptyStartingMethod,
                    starting.scheme().to_string()
                ));
            }
            let starting_scheme = starting.scheme().scheme();
            if starting_scheme.starting_method().is_some() {
                return Err(configuration_error!(
                    NestedStartingMethod,
                    starting.scheme().to_string()
                ));
            }
            let coeffs = starting.coefficients();
            let expected_points = starting.num_steps() + 1;
            let expected_step_vars = starting_scheme.num_step_vars();
            if coeffs.num_points() != expected_points
                || coeffs.num_step_vars() != expected_step_vars
            {
                return Err(GlmError::from(
                    ConfigurationError::StartingCoefficientsShape {
                        expected_points,
                        expected_step_vars,
                        found_points: coeffs.num_points(),
                        found_step_vars: coeffs.num_step_vars(),
                    },
                ));
            }
            if coeffs.num_starting() != r {
                return Err(GlmError::from(ConfigurationError::StartingValuesCount {
                    expected: r,
                    found: coeffs.num_starting(),
                }));
            }
        }
        Ok(())
    }

    pub fn name(&self) -> Option<SchemeName> {
        self.name
    }

    /// Number of stages `s`.
    pub fn num_stages(&self) -> usize {
        self.a.nrows()
    }

    /// Number of step variables `r`.
    pub fn num_step_vars(&self) -> usize {
        self.v.nrows()
    }

    pub fn a(&self) -> &DMatrix<f64> {
        &self.a
    }

    pub fn u(&self) -> &DMatrix<f64> {
        &self.u
    }

    pub fn b(&self) -> &DMatrix<f64> {
        &self.b
    }

    pub fn v(&self) -> &DMatrix<f64> {
        &self.v
    }

    pub fn abscissa(&self) -> &DVector<f64> {
        &self.abscissa
    }

    pub fn starting_method(&self) -> Option<&StartingMethod> {
        self.starting_method.as_ref()
    }

    /// True if every stage depends only on earlier stages (A strictly lower triangular).
    pub fn is_explicit(&self) -> bool {
        let s = self.num_stages();
        (0..s).all(|i| (i..s).all(|j| self.a[(i, j)] == 0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn predefined_schemes_are_consistent() {
        for name in SchemeName::iter() {
            let scheme = name.scheme();
            scheme.validate().unwrap();
            assert_eq!(scheme.name(), Some(name));
        }
    }

    #[test]
    fn scheme_lookup_by_name() {
        let scheme = Scheme::from_name("RK4").unwrap();
        assert_eq!(scheme.num_stages(), 4);
        assert_eq!(scheme.num_step_vars(), 1);
        assert_eq!(Scheme::from_name("BDF2").unwrap(), Scheme::bdf2());
        let err = Scheme::from_name("RK45").unwrap_err();
        assert!(matches!(
            err,
            GlmError::ConfigurationError(ConfigurationError::UnknownScheme(_))
        ));
    }

    #[test]
    fn explicit_detection() {
        assert!(Scheme::forward_euler().is_explicit());
        assert!(Scheme::rk4().is_explicit());
        assert!(Scheme::explicit_midpoint().is_explicit());
        assert!(!Scheme::backward_euler().is_explicit());
        assert!(!Scheme::implicit_midpoint().is_explicit());
        assert!(!Scheme::bdf2().is_explicit());
    }

    #[test]
    fn inconsistent_shapes_are_rejected() {
        let a = DMatrix::from_element(2, 2, 0.0);
        let u = DMatrix::from_element(2, 1, 1.0);
        let b = DMatrix::from_element(1, 2, 0.5);
        let v = DMatrix::from_element(1, 1, 1.0);
        let c = DVector::from_vec(vec![0.0, 1.0]);
        assert!(Scheme::new(a.clone(), u.clone(), b.clone(), v.clone(), c.clone(), None).is_ok());

        let bad_u = DMatrix::from_element(1, 1, 1.0);
        let err = Scheme::new(a.clone(), bad_u, b.clone(), v.clone(), c.clone(), None).unwrap_err();
        assert!(matches!(
            err,
            GlmError::ConfigurationError(ConfigurationError::SchemeMatrixShape { name: "U", .. })
        ));

        let bad_b = DMatrix::from_element(2, 2, 0.5);
        assert!(Scheme::new(a.clone(), u.clone(), bad_b, v.clone(), c.clone(), None).is_err());

        let bad_c = DVector::from_vec(vec![0.0]);
        let err = Scheme::new(a, u, b, v, bad_c, None).unwrap_err();
        assert!(matches!(
            err,
            GlmError::ConfigurationError(ConfigurationError::AbscissaLength {
                expected: 2,
                found: 1
            })
        ));
    }

    #[test]
    fn starting_method_without_steps_is_rejected() {
        let bdf2 = Scheme::bdf2();
        let coeffs = StartingCoefficients::new(&[2, 1, 1], vec![1.0, 0.0]).unwrap();
        let starting = StartingMethod::new(SchemeName::RK4, coeffs, 0);
        let err = Scheme::new(
            bdf2.a().clone(),
            bdf2.u().clone(),
            bdf2.b().clone(),
            bdf2.v().clone(),
            bdf2.abscissa().clone(),
            Some(starting),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            GlmError::ConfigurationError(ConfigurationError::EmptyStartingMethod(_))
        ));
    }

    #[test]
    fn starting_coefficients_are_checked() {
        let err = StartingCoefficients::new(&[2, 2], vec![1.0, 0.0, 0.0, 1.0]).unwrap_err();
        assert!(matches!(
            err,
            GlmError::ConfigurationError(ConfigurationError::StartingCoefficientsRank(2))
        ));
        assert!(StartingCoefficients::new(&[2, 2, 1], vec![1.0; 3]).is_err());

        let bdf2 = Scheme::bdf2();
        // two starting points are needed for one RK4 step, three were given
        let coeffs = StartingCoefficients::new(&[2, 3, 1], vec![0.0; 6]).unwrap();
        let starting = StartingMethod::new(SchemeName::RK4, coeffs, 1);
        let err = Scheme::new(
            bdf2.a().clone(),
            bdf2.u().clone(),
            bdf2.b().clone(),
            bdf2.v().clone(),
            bdf2.abscissa().clone(),
            Some(starting),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            GlmError::ConfigurationError(ConfigurationError::StartingCoefficientsShape {
                expected_points: 2,
                found_points: 3,
                ..
            })
        ));

        let coeffs = StartingCoefficients::new(&[2, 2, 1], vec![0.0; 4]).unwrap();
        let starting = StartingMethod::new(SchemeName::BDF2, coeffs, 1);
        let err = Scheme::new(
            bdf2.a().clone(),
            bdf2.u().clone(),
            bdf2.b().clone(),
            bdf2.v().clone(),
            bdf2.abscissa().clone(),
            Some(starting),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            GlmError::ConfigurationError(ConfigurationError::NestedStartingMethod(_))
        ));
    }

    #[test]
    fn most_recent_first_coefficients() {
        let c = StartingCoefficients::most_recent_first(3);
        assert_eq!(c.shape(), [3, 3, 1]);
        assert_eq!(c.get(0, 2, 0), 1.0);
        assert_eq!(c.get(1, 1, 0), 1.0);
        assert_eq!(c.get(2, 0, 0), 1.0);
        assert_eq!(c.get(0, 0, 0), 0.0);
    }
}
