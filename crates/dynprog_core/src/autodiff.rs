use crate::traits::{Scalar, VectorField};
use nalgebra::DMatrix;
use num_traits::{One, Zero};
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Simple Dual Number for Forward Mode AD
/// val: real part
/// eps: infinitesimal part
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Dual {
    pub val: f64,
    pub eps: f64,
}

impl Dual {
    pub fn new(val: f64, eps: f64) -> Self {
        Self { val, eps }
    }

    /// A variable seeded with unit derivative.
    pub fn variable(val: f64) -> Self {
        Self::new(val, 1.0)
    }
}

impl Zero for Dual {
    fn zero() -> Self {
        Self::new(0.0, 0.0)
    }
    fn is_zero(&self) -> bool {
        self.val == 0.0 && self.eps == 0.0
    }
}

impl One for Dual {
    fn one() -> Self {
        Self::new(1.0, 0.0)
    }
}

impl Add for Dual {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.val + rhs.val, self.eps + rhs.eps)
    }
}

impl Sub for Dual {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.val - rhs.val, self.eps - rhs.eps)
    }
}

impl Mul for Dual {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(self.val * rhs.val, self.val * rhs.eps + self.eps * rhs.val)
    }
}

impl Div for Dual {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        let denom = rhs.val * rhs.val;
        Self::new(
            self.val / rhs.val,
            (self.eps * rhs.val - self.val * rhs.eps) / denom,
        )
    }
}

impl Neg for Dual {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.val, -self.eps)
    }
}

impl Scalar for Dual {
    fn constant(value: f64) -> Self {
        Self::new(value, 0.0)
    }

    fn exp(self) -> Self {
        let e = self.val.exp();
        Self::new(e, e * self.eps)
    }

    fn ln(self) -> Self {
        Self::new(self.val.ln(), self.eps / self.val)
    }

    fn sqrt(self) -> Self {
        let s = self.val.sqrt();
        Self::new(s, self.eps / (2.0 * s))
    }

    fn powf(self, n: f64) -> Self {
        let val_pow = self.val.powf(n);
        Self::new(val_pow, n * self.val.powf(n - 1.0) * self.eps)
    }
}

/// Jacobian of `system` at `x`, one forward pass per column.
pub fn jacobian<S>(system: &S, x: &[f64]) -> DMatrix<f64>
where
    S: VectorField<Dual>,
{
    let n = x.len();
    let mut jac = DMatrix::zeros(n, n);
    let mut dual_x: Vec<Dual> = x.iter().map(|&v| Dual::constant(v)).collect();
    let mut dual_out = vec![Dual::zero(); n];

    for j in 0..n {
        dual_x[j] = Dual::variable(x[j]);
        system.apply(&dual_x, &mut dual_out);
        for i in 0..n {
            jac[(i, j)] = dual_out[i].eps;
        }
        dual_x[j] = Dual::constant(x[j]);
    }

    jac
}

#[cfg(test)]
mod tests {
    use super::{jacobian, Dual};
    use crate::traits::{Scalar, VectorField};

    struct Quadratic;

    impl<T: Scalar> VectorField<T> for Quadratic {
        fn dimension(&self) -> usize {
            2
        }

        fn apply(&self, x: &[T], out: &mut [T]) {
            out[0] = x[0] * x[0] + x[1];
            out[1] = x[0].exp() * x[1].sqrt();
        }
    }

    #[test]
    fn dual_arithmetic_follows_chain_rule() {
        let x = Dual::variable(2.0);
        let y = x * x / (x + Dual::constant(1.0));
        // d/dx x^2/(x+1) = (x^2 + 2x)/(x+1)^2
        assert!((y.val - 4.0 / 3.0).abs() < 1e-14);
        assert!((y.eps - 8.0 / 9.0).abs() < 1e-14);

        let z = x.powf(1.5).ln();
        assert!((z.eps - 1.5 / 2.0).abs() < 1e-14);
    }

    #[test]
    fn jacobian_matches_hand_derivatives() {
        let x = [0.5, 4.0];
        let jac = jacobian(&Quadratic, &x);
        assert!((jac[(0, 0)] - 1.0).abs() < 1e-12);
        assert!((jac[(0, 1)] - 1.0).abs() < 1e-12);
        assert!((jac[(1, 0)] - 0.5_f64.exp() * 2.0).abs() < 1e-12);
        assert!((jac[(1, 1)] - 0.5_f64.exp() * 0.25).abs() < 1e-12);
    }
}
