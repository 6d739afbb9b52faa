//! Exact lifetime value of a fixed policy.
//!
//! Solves `v = r_σ + β P_σ v` on the flattened state space `s = i · n_shocks + j`,
//! where `P_σ(s, s') = 1{i' = σ(i, j)} Q(j, j')`.

use crate::bellman::{check_policy, check_value_shape, policy_reward};
use crate::solvers::Convergence;
use crate::traits::{DiscreteDp, Sizes};
use anyhow::{anyhow, bail, Context, Result};
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EvaluationMethod {
    /// LU factorization of the dense `I − β P_σ`.
    Dense,
    /// Stabilized biconjugate gradients on the sparse operator `v ↦ v − β P_σ v`.
    BiCgStab { tolerance: f64, max_iter: usize },
}

impl Default for EvaluationMethod {
    fn default() -> Self {
        EvaluationMethod::BiCgStab {
            tolerance: 1e-10,
            max_iter: 2_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PolicyEvaluation {
    pub value: DMatrix<f64>,
    /// Dense solves always report `converged` with zero iterations.
    pub convergence: Convergence,
}

/// Sparse `P_σ` over the flattened state space.
pub fn policy_transition<M: DiscreteDp + ?Sized>(
    model: &M,
    sigma: &DMatrix<usize>,
) -> Result<CsrMatrix<f64>> {
    let sizes = model.sizes();
    check_policy(sizes, sigma)?;
    let q = model.transition();
    let n = sizes.flat_len();
    let mut coo = CooMatrix::new(n, n);
    for i in 0..sizes.n_states {
        for j in 0..sizes.n_shocks {
            let k = sigma[(i, j)];
            for jp in 0..sizes.n_shocks {
                let prob = q[(j, jp)];
                if prob != 0.0 {
                    coo.push(flat_index(sizes, i, j), flat_index(sizes, k, jp), prob);
                }
            }
        }
    }
    Ok(CsrMatrix::from(&coo))
}

fn flat_index(sizes: Sizes, i: usize, j: usize) -> usize {
    i * sizes.n_shocks + j
}

fn flatten(sizes: Sizes, m: &DMatrix<f64>) -> DVector<f64> {
    DVector::from_fn(sizes.flat_len(), |s, _| {
        m[(s / sizes.n_shocks, s % sizes.n_shocks)]
    })
}

fn unflatten(sizes: Sizes, x: &DVector<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(sizes.n_states, sizes.n_shocks, |i, j| x[flat_index(sizes, i, j)])
}

/// Computes `v_σ`. `warm_start` seeds the iterative solver and is ignored by the dense one.
pub fn evaluate_policy<M: DiscreteDp + ?Sized>(
    model: &M,
    sigma: &DMatrix<usize>,
    method: EvaluationMethod,
    warm_start: Option<&DMatrix<f64>>,
) -> Result<PolicyEvaluation> {
    let sizes = model.sizes();
    let r_sigma = policy_reward(model, sigma)?;
    if let Some(pos) = r_sigma.iter().position(|r| !r.is_finite()) {
        let (i, j) = (pos % sizes.n_states, pos / sizes.n_states);
        bail!(
            "Policy selects an infeasible transition at state ({}, {}).",
            i,
            j
        );
    }
    let p_sigma = policy_transition(model, sigma)?;
    let beta = model.discount();
    let rhs = flatten(sizes, &r_sigma);

    match method {
        EvaluationMethod::Dense => {
            let n = sizes.flat_len();
            let mut a = DMatrix::<f64>::identity(n, n);
            for (row, col, &prob) in p_sigma.triplet_iter() {
                a[(row, col)] -= beta * prob;
            }
            let x = a
                .lu()
                .solve(&rhs)
                .ok_or_else(|| anyhow!("Policy evaluation system is singular."))
                .context("Dense policy evaluation failed.")?;
            Ok(PolicyEvaluation {
                value: unflatten(sizes, &x),
                convergence: Convergence::reached(0, 0.0),
            })
        }
        EvaluationMethod::BiCgStab {
            tolerance,
            max_iter,
        } => {
            if !(tolerance > 0.0) {
                bail!("BiCGSTAB tolerance must be positive.");
            }
            let x0 = match warm_start {
                Some(v) => {
                    check_value_shape(sizes, v)?;
                    flatten(sizes, v)
                }
                None => DVector::zeros(sizes.flat_len()),
            };
            let operator = |x: &DVector<f64>| x - (&p_sigma * x) * beta;
            let (x, convergence) = bicgstab(operator, &rhs, x0, tolerance, max_iter);
            if !convergence.converged {
                warn!(
                    iterations = convergence.iterations,
                    residual = convergence.error,
                    "BiCGSTAB policy evaluation did not converge; returning best iterate"
                );
            }
            Ok(PolicyEvaluation {
                value: unflatten(sizes, &x),
                convergence,
            })
        }
    }
}

/// Stabilized biconjugate gradient method for `A x = b` with `A` given as a map.
/// The reported error is the relative residual `‖b − A x‖ / ‖b‖`.
pub fn bicgstab<F>(
    apply: F,
    b: &DVector<f64>,
    x0: DVector<f64>,
    tolerance: f64,
    max_iter: usize,
) -> (DVector<f64>, Convergence)
where
    F: Fn(&DVector<f64>) -> DVector<f64>,
{
    let b_norm = b.norm();
    let scale = if b_norm > 0.0 { b_norm } else { 1.0 };

    let mut x = x0;
    let mut r = b - apply(&x);
    let mut rel = r.norm() / scale;
    if rel <= tolerance {
        return (x, Convergence::reached(0, rel));
    }

    let r_hat = r.clone();
    let (mut rho, mut alpha, mut omega) = (1.0, 1.0, 1.0);
    let mut v = DVector::zeros(b.len());
    let mut p = DVector::zeros(b.len());

    for iter in 1..=max_iter {
        let rho_next = r_hat.dot(&r);
        if rho_next == 0.0 || !rho_next.is_finite() {
            return (x, Convergence::exhausted(iter - 1, rel));
        }
        let beta = (rho_next / rho) * (alpha / omega);
        p = &r + (&p - &v * omega) * beta;
        v = apply(&p);
        let denom = r_hat.dot(&v);
        if denom == 0.0 || !denom.is_finite() {
            return (x, Convergence::exhausted(iter - 1, rel));
        }
        alpha = rho_next / denom;
        let s = &r - &v * alpha;
        let s_rel = s.norm() / scale;
        if s_rel <= tolerance {
            x += &p * alpha;
            return (x, Convergence::reached(iter, s_rel));
        }
        let t = apply(&s);
        let tt = t.dot(&t);
        if tt == 0.0 {
            x += &p * alpha;
            return (x, Convergence::exhausted(iter, s_rel));
        }
        omega = t.dot(&s) / tt;
        x += &p * alpha + &s * omega;
        r = &s - &t * omega;
        rel = r.norm() / scale;
        if rel <= tolerance {
            return (x, Convergence::reached(iter, rel));
        }
        if omega == 0.0 {
            return (x, Convergence::exhausted(iter, rel));
        }
        rho = rho_next;
    }

    (x, Convergence::exhausted(max_iter, rel))
}
