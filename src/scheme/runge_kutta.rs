use nalgebra::{DMatrix, DVector};

use super::{Scheme, SchemeName};
use crate::error::GlmError;

impl Scheme {
    /// Build a Runge-Kutta method from its Butcher tableau.
    ///
    /// ```text
    /// c1 | a11 a12
    /// c2 | a21 a22
    /// -------------
    ///    | b1  b2
    /// ```
    ///
    /// As a general linear method this has a single step variable, with `U = 1`, `B = b^T` and
    /// `V = 1`.
    pub fn runge_kutta(
        a: DMatrix<f64>,
        b: DVector<f64>,
        c: DVector<f64>,
    ) -> Result<Self, GlmError> {
        let s = a.nrows();
        Self::new(
            a,
            DMatrix::from_element(s, 1, 1.0),
            DMatrix::from_row_slice(1, b.len(), b.as_slice()),
            DMatrix::from_element(1, 1, 1.0),
            c,
            None,
        )
    }

    fn predefined_runge_kutta(name: SchemeName, s: usize, a: &[f64], b: &[f64], c: &[f64]) -> Self {
        Self::new_unchecked(
            name,
            DMatrix::from_row_slice(s, s, a),
            DMatrix::from_element(s, 1, 1.0),
            DMatrix::from_row_slice(1, s, b),
            DMatrix::from_element(1, 1, 1.0),
            DVector::from_row_slice(c),
            None,
        )
    }

    pub fn forward_euler() -> Self {
        Self::predefined_runge_kutta(SchemeName::ForwardEuler, 1, &[0.0], &[1.0], &[0.0])
    }

    pub fn backward_euler() -> Self {
        Self::predefined_runge_kutta(SchemeName::BackwardEuler, 1, &[1.0], &[1.0], &[1.0])
    }

    pub fn explicit_midpoint() -> Self {
        Self::predefined_runge_kutta(
            SchemeName::ExplicitMidpoint,
            2,
            &[0.0, 0.0, 0.5, 0.0],
            &[0.0, 1.0],
            &[0.0, 0.5],
        )
    }

    pub fn implicit_midpoint() -> Self {
        Self::predefined_runge_kutta(SchemeName::ImplicitMidpoint, 1, &[0.5], &[1.0], &[0.5])
    }

    /// Trapezoidal rule, the two stage Lobatto IIIA method.
    pub fn trapezoidal() -> Self {
        Self::predefined_runge_kutta(
            SchemeName::Trapezoidal,
            2,
            &[0.0, 0.0, 0.5, 0.5],
            &[0.5, 0.5],
            &[0.0, 1.0],
        )
    }

    /// The classical fourth order Runge-Kutta method.
    pub fn rk4() -> Self {
        #[rustfmt::skip]
        let a = [
            0.0, 0.0, 0.0, 0.0,
            0.5, 0.0, 0.0, 0.0,
            0.0, 0.5, 0.0, 0.0,
            0.0, 0.0, 1.0, 0.0,
        ];
        Self::predefined_runge_kutta(
            SchemeName::RK4,
            4,
            &a,
            &[1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
            &[0.0, 0.5, 0.5, 1.0],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigurationError;

    #[test]
    fn runge_kutta_from_tableau() {
        let a = DMatrix::from_row_slice(1, 1, &[0.0]);
        let b = DVector::from_vec(vec![1.0]);
        let c = DVector::from_vec(vec![0.0]);
        let scheme = Scheme::runge_kutta(a, b, c).unwrap();
        let fe = Scheme::forward_euler();
        assert_eq!(scheme.a(), fe.a());
        assert_eq!(scheme.u(), fe.u());
        assert_eq!(scheme.b(), fe.b());
        assert_eq!(scheme.v(), fe.v());
        assert_eq!(scheme.name(), None);
    }

    #[test]
    fn runge_kutta_weights_become_one_row_of_b() {
        let trap = Scheme::trapezoidal();
        let weights = DVector::from_vec(vec![0.5, 0.5]);
        let scheme =
            Scheme::runge_kutta(trap.a().clone(), weights, trap.abscissa().clone()).unwrap();
        assert_eq!(scheme.b().shape(), (1, 2));
        assert_eq!(scheme.b(), trap.b());

        let short = DVector::from_vec(vec![1.0]);
        let err =
            Scheme::runge_kutta(trap.a().clone(), short, trap.abscissa().clone()).unwrap_err();
        assert!(matches!(
            err,
            GlmError::ConfigurationError(ConfigurationError::SchemeMatrixShape { name: "B", .. })
        ));
    }

    #[test]
    fn runge_kutta_weights_are_consistent() {
        for scheme in [
            Scheme::forward_euler(),
            Scheme::backward_euler(),
            Scheme::explicit_midpoint(),
            Scheme::implicit_midpoint(),
            Scheme::trapezoidal(),
            Scheme::rk4(),
        ] {
            assert_eq!(scheme.num_step_vars(), 1);
            let sum_b: f64 = scheme.b().iter().sum();
            assert!((sum_b - 1.0).abs() < 1e-15);
            // row sums of A equal the abscissa
            for i in 0..scheme.num_stages() {
                let row_sum: f64 = scheme.a().row(i).iter().sum();
                assert!((row_sum - scheme.abscissa()[i]).abs() < 1e-15);
            }
        }
    }
}
