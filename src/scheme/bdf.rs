use nalgebra::{DMatrix, DVector};

use super::{Scheme, SchemeName, StartingCoefficients, StartingMethod};

impl Scheme {
    /// Second order backward differentiation formula.
    ///
    /// The step vector is `[y_n, y_{n-1}]`; the first step is taken with one step of RK4.
    pub fn bdf2() -> Self {
        let a = DMatrix::from_row_slice(1, 1, &[2.0 / 3.0]);
        let u = DMatrix::from_row_slice(1, 2, &[4.0 / 3.0, -1.0 / 3.0]);
        let b = DMatrix::from_row_slice(2, 1, &[2.0 / 3.0, 0.0]);
        #[rustfmt::skip]
        let v = DMatrix::from_row_slice(2, 2, &[
            4.0 / 3.0, -1.0 / 3.0,
            1.0, 0.0,
        ]);
        let starting = StartingMethod::new(
            SchemeName::RK4,
            StartingCoefficients::most_recent_first(2),
            1,
        );
        Self::new_unchecked(
            SchemeName::BDF2,
            a,
            u,
            b,
            v,
            DVector::from_element(1, 1.0),
            Some(starting),
        )
    }

    /// Fourth order backward differentiation formula, started with three steps of RK4.
    pub fn bdf4() -> Self {
        let a = DMatrix::from_row_slice(1, 1, &[12.0 / 25.0]);
        let u = DMatrix::from_row_slice(
            1,
            4,
            &[48.0 / 25.0, -36.0 / 25.0, 16.0 / 25.0, -3.0 / 25.0],
        );
        let b = DMatrix::from_row_slice(4, 1, &[12.0 / 25.0, 0.0, 0.0, 0.0]);
        #[rustfmt::skip]
        let v = DMatrix::from_row_slice(4, 4, &[
            48.0 / 25.0, -36.0 / 25.0, 16.0 / 25.0, -3.0 / 25.0,
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, 1.0, 0.0,
        ]);
        let starting = StartingMethod::new(
            SchemeName::RK4,
            StartingCoefficients::most_recent_first(4),
            3,
        );
        Self::new_unchecked(
            SchemeName::BDF4,
            a,
            u,
            b,
            v,
            DVector::from_element(1, 1.0),
            Some(starting),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bdf2_coefficients() {
        let s = Scheme::bdf2();
        assert_eq!((s.num_stages(), s.num_step_vars()), (1, 2));
        assert_eq!(s.a()[(0, 0)], 2.0 / 3.0);
        assert_eq!(s.u()[(0, 0)], 4.0 / 3.0);
        assert_eq!(s.u()[(0, 1)], -1.0 / 3.0);
        assert_eq!(s.b()[(0, 0)], 2.0 / 3.0);
        assert_eq!(s.b()[(1, 0)], 0.0);
        assert_eq!(s.v().row(0), s.u().row(0));
        assert_eq!(s.v()[(1, 0)], 1.0);
        assert_eq!(s.v()[(1, 1)], 0.0);
        let starting = s.starting_method().unwrap();
        assert_eq!(starting.scheme(), SchemeName::RK4);
        assert_eq!(starting.num_steps(), 1);
        assert_eq!(starting.coefficients().shape(), [2, 2, 1]);
    }

    #[test]
    fn bdf4_coefficients() {
        let s = Scheme::bdf4();
        assert_eq!((s.num_stages(), s.num_step_vars()), (1, 4));
        assert_eq!(s.a()[(0, 0)], 12.0 / 25.0);
        let expected = [48.0 / 25.0, -36.0 / 25.0, 16.0 / 25.0, -3.0 / 25.0];
        for (j, e) in expected.iter().enumerate() {
            assert_eq!(s.u()[(0, j)], *e);
            assert_eq!(s.v()[(0, j)], *e);
        }
        for i in 1..4 {
            for j in 0..4 {
                assert_eq!(s.v()[(i, j)], if j + 1 == i { 1.0 } else { 0.0 });
            }
            assert_eq!(s.b()[(i, 0)], 0.0);
        }
        // the coefficients of a consistent linear multistep method sum to one
        let sum: f64 = expected.iter().sum();
        assert!((sum - 1.0).abs() < 1e-15);
        let starting = s.starting_method().unwrap();
        assert_eq!(starting.num_steps(), 3);
        assert_eq!(starting.coefficients().shape(), [4, 4, 1]);
    }
}
