use nalgebra::DMatrix;
use num_traits::{One, Zero};
use std::fmt::Debug;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// A trait for types that can be used as scalars in residual functions.
/// Implemented by `f64` and by the dual numbers used for Jacobians.
pub trait Scalar:
    Copy
    + Debug
    + Zero
    + One
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + 'static
{
    /// Lifts a constant into the scalar type.
    fn constant(value: f64) -> Self;

    fn exp(self) -> Self;
    fn ln(self) -> Self;
    fn sqrt(self) -> Self;
    fn powf(self, n: f64) -> Self;
}

impl Scalar for f64 {
    fn constant(value: f64) -> Self {
        value
    }

    fn exp(self) -> Self {
        f64::exp(self)
    }

    fn ln(self) -> Self {
        f64::ln(self)
    }

    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }

    fn powf(self, n: f64) -> Self {
        f64::powf(self, n)
    }
}

/// A square system of equations `F: R^n -> R^n` whose roots we look for.
pub trait VectorField<T: Scalar> {
    /// Returns the number of unknowns (and equations).
    fn dimension(&self) -> usize;

    /// Evaluates F(x) into `out`.
    fn apply(&self, x: &[T], out: &mut [T]);
}

/// Number of points on the endogenous and exogenous grids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Sizes {
    /// Endogenous grid size (`n1`): wealth, output, ...
    pub n_states: usize,
    /// Exogenous Markov grid size (`n2`).
    pub n_shocks: usize,
}

impl Sizes {
    pub fn flat_len(&self) -> usize {
        self.n_states * self.n_shocks
    }
}

/// A discrete-state dynamic program over (endogenous state, exogenous shock) pairs
/// where the control is the index of next period's endogenous state.
pub trait DiscreteDp {
    fn sizes(&self) -> Sizes;

    /// Discount factor β.
    fn discount(&self) -> f64;

    /// Row-stochastic `n_shocks × n_shocks` transition matrix of the shock.
    fn transition(&self) -> &DMatrix<f64>;

    /// One-period reward of moving from state `(i, j)` to endogenous index `k`.
    /// Infeasible moves return `f64::NEG_INFINITY`.
    fn reward(&self, i: usize, j: usize, k: usize) -> f64;
}
