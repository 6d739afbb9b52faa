//! Bellman right-hand side, Bellman operator, greedy policies and the
//! policy operator `T_σ`.
//!
//! Values and policies are `(n_states, n_shocks)` matrices. The right-hand side
//! `B[i, j, k] = r(i, j, k) + β Σ_{j'} v[k, j'] Q[j, j']` is available as an
//! explicit tensor, but the operators below reduce over `k` on the fly.

use crate::traits::{DiscreteDp, Sizes};
use anyhow::{bail, Result};
use nalgebra::DMatrix;

/// Materialized `B[i, j, k]` for a given value function.
#[derive(Debug, Clone)]
pub struct BellmanRhs {
    sizes: Sizes,
    data: Vec<f64>,
}

impl BellmanRhs {
    pub fn sizes(&self) -> Sizes {
        self.sizes
    }

    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        self.data[self.offset(i, j) + k]
    }

    /// All candidate values `B[i, j, ·]` for one state.
    pub fn choices(&self, i: usize, j: usize) -> &[f64] {
        let start = self.offset(i, j);
        &self.data[start..start + self.sizes.n_states]
    }

    /// Max and first argmax over the last axis.
    pub fn reduce(&self) -> (DMatrix<f64>, DMatrix<usize>) {
        let Sizes { n_states, n_shocks } = self.sizes;
        let mut value = DMatrix::zeros(n_states, n_shocks);
        let mut policy = DMatrix::from_element(n_states, n_shocks, 0usize);
        for i in 0..n_states {
            for j in 0..n_shocks {
                let (best, best_k) = argmax(self.choices(i, j).iter().copied());
                value[(i, j)] = best;
                policy[(i, j)] = best_k;
            }
        }
        (value, policy)
    }

    fn offset(&self, i: usize, j: usize) -> usize {
        (i * self.sizes.n_shocks + j) * self.sizes.n_states
    }
}

/// Returns the maximum and the index of its first occurrence.
/// An all `-∞` row yields `(-∞, 0)`.
fn argmax(values: impl Iterator<Item = f64>) -> (f64, usize) {
    let mut best = f64::NEG_INFINITY;
    let mut best_k = 0;
    for (k, val) in values.enumerate() {
        if val > best {
            best = val;
            best_k = k;
        }
    }
    (best, best_k)
}

pub(crate) fn check_value_shape(sizes: Sizes, v: &DMatrix<f64>) -> Result<()> {
    if v.nrows() != sizes.n_states || v.ncols() != sizes.n_shocks {
        bail!(
            "Value function shape mismatch. Expected {}x{}, got {}x{}.",
            sizes.n_states,
            sizes.n_shocks,
            v.nrows(),
            v.ncols()
        );
    }
    Ok(())
}

pub(crate) fn check_policy(sizes: Sizes, sigma: &DMatrix<usize>) -> Result<()> {
    if sigma.nrows() != sizes.n_states || sigma.ncols() != sizes.n_shocks {
        bail!(
            "Policy shape mismatch. Expected {}x{}, got {}x{}.",
            sizes.n_states,
            sizes.n_shocks,
            sigma.nrows(),
            sigma.ncols()
        );
    }
    if let Some(&bad) = sigma.iter().find(|&&k| k >= sizes.n_states) {
        bail!(
            "Policy index {} out of range for grid of size {}.",
            bad,
            sizes.n_states
        );
    }
    Ok(())
}

/// `EV[k, j] = Σ_{j'} v[k, j'] Q[j, j']`, i.e. `v Qᵀ`.
fn expected_continuation<M: DiscreteDp + ?Sized>(model: &M, v: &DMatrix<f64>) -> DMatrix<f64> {
    v * model.transition().transpose()
}

pub fn bellman_rhs<M: DiscreteDp + ?Sized>(model: &M, v: &DMatrix<f64>) -> Result<BellmanRhs> {
    let sizes = model.sizes();
    check_value_shape(sizes, v)?;
    let beta = model.discount();
    let ev = expected_continuation(model, v);

    let Sizes { n_states, n_shocks } = sizes;
    let mut data = Vec::with_capacity(n_states * n_shocks * n_states);
    for i in 0..n_states {
        for j in 0..n_shocks {
            for k in 0..n_states {
                data.push(model.reward(i, j, k) + beta * ev[(k, j)]);
            }
        }
    }
    Ok(BellmanRhs { sizes, data })
}

/// One application of the Bellman operator together with the greedy policy.
pub fn bellman_step<M: DiscreteDp + ?Sized>(
    model: &M,
    v: &DMatrix<f64>,
) -> Result<(DMatrix<f64>, DMatrix<usize>)> {
    let sizes = model.sizes();
    check_value_shape(sizes, v)?;
    let beta = model.discount();
    let ev = expected_continuation(model, v);

    let Sizes { n_states, n_shocks } = sizes;
    let mut value = DMatrix::zeros(n_states, n_shocks);
    let mut policy = DMatrix::from_element(n_states, n_shocks, 0usize);
    for j in 0..n_shocks {
        for i in 0..n_states {
            let (best, best_k) =
                argmax((0..n_states).map(|k| model.reward(i, j, k) + beta * ev[(k, j)]));
            value[(i, j)] = best;
            policy[(i, j)] = best_k;
        }
    }
    Ok((value, policy))
}

/// `T v = max_k B(v)[:, :, k]`.
pub fn bellman_operator<M: DiscreteDp + ?Sized>(
    model: &M,
    v: &DMatrix<f64>,
) -> Result<DMatrix<f64>> {
    bellman_step(model, v).map(|(value, _)| value)
}

/// `argmax_k B(v)[:, :, k]`, first maximal index on ties.
pub fn greedy_policy<M: DiscreteDp + ?Sized>(
    model: &M,
    v: &DMatrix<f64>,
) -> Result<DMatrix<usize>> {
    bellman_step(model, v).map(|(_, policy)| policy)
}

/// `r_σ[i, j] = r(i, j, σ(i, j))`.
pub fn policy_reward<M: DiscreteDp + ?Sized>(
    model: &M,
    sigma: &DMatrix<usize>,
) -> Result<DMatrix<f64>> {
    let sizes = model.sizes();
    check_policy(sizes, sigma)?;
    Ok(DMatrix::from_fn(sizes.n_states, sizes.n_shocks, |i, j| {
        model.reward(i, j, sigma[(i, j)])
    }))
}

/// `(T_σ v)[i, j] = r(i, j, σ(i, j)) + β Σ_{j'} v[σ(i, j), j'] Q[j, j']`.
pub fn policy_operator<M: DiscreteDp + ?Sized>(
    model: &M,
    sigma: &DMatrix<usize>,
    v: &DMatrix<f64>,
) -> Result<DMatrix<f64>> {
    let sizes = model.sizes();
    check_policy(sizes, sigma)?;
    check_value_shape(sizes, v)?;
    let beta = model.discount();
    let ev = expected_continuation(model, v);
    Ok(DMatrix::from_fn(sizes.n_states, sizes.n_shocks, |i, j| {
        let k = sigma[(i, j)];
        model.reward(i, j, k) + beta * ev[(k, j)]
    }))
}

/// Sup-norm distance between two arrays of the same shape.
pub fn sup_distance(a: &DMatrix<f64>, b: &DMatrix<f64>) -> f64 {
    debug_assert_eq!(a.shape(), b.shape(), "sup_distance shape mismatch");
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            if x == y {
                0.0
            } else {
                (x - y).abs()
            }
        })
        .fold(0.0, f64::max)
}
