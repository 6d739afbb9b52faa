//! Value function iteration, Howard policy iteration and optimistic policy
//! iteration. All three target the same Bellman fixed point.

use crate::bellman::{bellman_operator, greedy_policy, policy_operator, sup_distance};
use crate::policy_eval::{evaluate_policy, EvaluationMethod};
use crate::traits::DiscreteDp;
use anyhow::{bail, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Outcome of an iterative routine. Hitting the iteration cap is reported here
/// rather than as an error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Convergence {
    pub converged: bool,
    pub iterations: usize,
    /// Last measured error (sup-norm change, residual, or changed policy entries).
    pub error: f64,
}

impl Convergence {
    pub fn reached(iterations: usize, error: f64) -> Self {
        Self {
            converged: true,
            iterations,
            error,
        }
    }

    pub fn exhausted(iterations: usize, error: f64) -> Self {
        Self {
            converged: false,
            iterations,
            error,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SolverSettings {
    pub tolerance: f64,
    pub max_iter: usize,
    /// Number of `T_σ` applications per optimistic policy iteration step.
    pub opi_steps: usize,
    /// How Howard policy iteration evaluates each policy.
    pub evaluation: EvaluationMethod,
    /// Emit a debug record every `log_every` iterations.
    pub log_every: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-5,
            max_iter: 10_000,
            opi_steps: 10,
            evaluation: EvaluationMethod::default(),
            log_every: 100,
        }
    }
}

impl SolverSettings {
    fn validate(&self) -> Result<()> {
        if !(self.tolerance > 0.0) {
            bail!("tolerance must be positive.");
        }
        if self.max_iter == 0 {
            bail!("max_iter must be greater than zero.");
        }
        if self.opi_steps == 0 {
            bail!("opi_steps must be greater than zero.");
        }
        if self.log_every == 0 {
            bail!("log_every must be greater than zero.");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Solution {
    pub value: DMatrix<f64>,
    pub policy: DMatrix<usize>,
    pub convergence: Convergence,
}

fn finish(method: &str, converged: bool, iterations: usize, error: f64) -> Convergence {
    if converged {
        debug!(method, iterations, error, "solver converged");
        Convergence::reached(iterations, error)
    } else {
        warn!(
            method,
            iterations, error, "iteration cap reached before convergence; returning last iterate"
        );
        Convergence::exhausted(iterations, error)
    }
}

/// Iterates `v ← T v` from zero until the sup-norm change is at most `tolerance`,
/// then extracts the greedy policy.
pub fn value_function_iteration<M: DiscreteDp + ?Sized>(
    model: &M,
    settings: &SolverSettings,
) -> Result<Solution> {
    settings.validate()?;
    let sizes = model.sizes();
    let mut v = DMatrix::zeros(sizes.n_states, sizes.n_shocks);
    let mut error = f64::INFINITY;
    let mut iterations = 0;

    while iterations < settings.max_iter {
        let v_new = bellman_operator(model, &v)?;
        error = sup_distance(&v_new, &v);
        v = v_new;
        iterations += 1;
        if iterations % settings.log_every == 0 {
            debug!(iterations, error, "value function iteration");
        }
        if error <= settings.tolerance {
            break;
        }
    }

    let convergence = finish("vfi", error <= settings.tolerance, iterations, error);
    let policy = greedy_policy(model, &v)?;
    Ok(Solution {
        value: v,
        policy,
        convergence,
    })
}

/// Alternates exact evaluation and greedy improvement from the zero policy
/// until the policy stops changing. The zero policy must be feasible.
pub fn howard_policy_iteration<M: DiscreteDp + ?Sized>(
    model: &M,
    settings: &SolverSettings,
) -> Result<Solution> {
    settings.validate()?;
    let sizes = model.sizes();
    let mut sigma = DMatrix::from_element(sizes.n_states, sizes.n_shocks, 0usize);
    let mut value = DMatrix::zeros(sizes.n_states, sizes.n_shocks);
    let mut changed = usize::MAX;
    let mut iterations = 0;

    while iterations < settings.max_iter {
        let evaluation = evaluate_policy(model, &sigma, settings.evaluation, Some(&value))?;
        value = evaluation.value;
        let improved = greedy_policy(model, &value)?;
        changed = improved
            .iter()
            .zip(sigma.iter())
            .filter(|(a, b)| a != b)
            .count();
        sigma = improved;
        iterations += 1;
        debug!(iterations, changed, "policy iteration");
        if changed == 0 {
            break;
        }
    }

    let convergence = finish("hpi", changed == 0, iterations, changed as f64);
    Ok(Solution {
        value,
        policy: sigma,
        convergence,
    })
}

/// Greedy step followed by `opi_steps` applications of `T_σ`, repeated until the
/// value changes by at most `tolerance` across one outer step.
pub fn optimistic_policy_iteration<M: DiscreteDp + ?Sized>(
    model: &M,
    settings: &SolverSettings,
) -> Result<Solution> {
    settings.validate()?;
    let sizes = model.sizes();
    let mut v = DMatrix::zeros(sizes.n_states, sizes.n_shocks);
    let mut error = f64::INFINITY;
    let mut iterations = 0;

    while iterations < settings.max_iter {
        let last = v.clone();
        let sigma = greedy_policy(model, &v)?;
        for _ in 0..settings.opi_steps {
            v = policy_operator(model, &sigma, &v)?;
        }
        error = sup_distance(&v, &last);
        iterations += 1;
        if iterations % settings.log_every == 0 {
            debug!(iterations, error, "optimistic policy iteration");
        }
        if error <= settings.tolerance {
            break;
        }
    }

    let convergence = finish("opi", error <= settings.tolerance, iterations, error);
    let policy = greedy_policy(model, &v)?;
    Ok(Solution {
        value: v,
        policy,
        convergence,
    })
}
