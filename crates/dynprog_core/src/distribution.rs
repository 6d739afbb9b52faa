//! Stationary distribution of the chain a policy induces on (state, shock) pairs.

use crate::bellman::check_policy;
use crate::grid::normalize_distribution;
use crate::solvers::Convergence;
use crate::traits::DiscreteDp;
use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DistributionSettings {
    /// L1 change between successive iterates.
    pub tolerance: f64,
    pub max_iter: usize,
}

impl Default for DistributionSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iter: 100_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StationaryDistribution {
    /// `psi[(i, j)]` is the mass at endogenous index `i` and shock `j`.
    pub psi: DMatrix<f64>,
    pub convergence: Convergence,
}

/// One step of `ψ'(k, j') = Σ_{σ(i, j) = k} ψ(i, j) Q(j, j')`.
fn push_forward(psi: &DMatrix<f64>, sigma: &DMatrix<usize>, q: &DMatrix<f64>) -> DMatrix<f64> {
    let mut next = DMatrix::zeros(psi.nrows(), psi.ncols());
    for j in 0..psi.ncols() {
        for i in 0..psi.nrows() {
            let mass = psi[(i, j)];
            if mass == 0.0 {
                continue;
            }
            let k = sigma[(i, j)];
            for jp in 0..psi.ncols() {
                next[(k, jp)] += mass * q[(j, jp)];
            }
        }
    }
    next
}

/// Power iteration from the uniform distribution.
pub fn stationary_distribution<M: DiscreteDp + ?Sized>(
    model: &M,
    sigma: &DMatrix<usize>,
    settings: &DistributionSettings,
) -> Result<StationaryDistribution> {
    if !(settings.tolerance > 0.0) {
        bail!("tolerance must be positive.");
    }
    if settings.max_iter == 0 {
        bail!("max_iter must be greater than zero.");
    }
    let sizes = model.sizes();
    check_policy(sizes, sigma)?;
    let q = model.transition();

    let n = sizes.flat_len() as f64;
    let mut psi = DMatrix::from_element(sizes.n_states, sizes.n_shocks, 1.0 / n);
    let mut error = f64::INFINITY;
    let mut iterations = 0;

    while iterations < settings.max_iter {
        let next = push_forward(&psi, sigma, q);
        error = (&next - &psi).iter().map(|d| d.abs()).sum();
        psi = next;
        iterations += 1;
        if error <= settings.tolerance {
            break;
        }
    }

    let convergence = if error <= settings.tolerance {
        Convergence::reached(iterations, error)
    } else {
        warn!(iterations, error, "stationary distribution did not converge");
        Convergence::exhausted(iterations, error)
    };

    let flat = DVector::from_column_slice(psi.as_slice());
    let normalized = normalize_distribution(flat)?;
    Ok(StationaryDistribution {
        psi: DMatrix::from_column_slice(sizes.n_states, sizes.n_shocks, normalized.as_slice()),
        convergence,
    })
}

/// Mass on each endogenous grid point, summed over shocks.
pub fn state_marginal(psi: &DMatrix<f64>) -> DVector<f64> {
    DVector::from_fn(psi.nrows(), |i, _| psi.row(i).sum())
}

/// `Σ ψ(i, j) grid[i]`, e.g. aggregate asset supply.
pub fn aggregate(grid: &DVector<f64>, psi: &DMatrix<f64>) -> Result<f64> {
    if grid.len() != psi.nrows() {
        bail!(
            "Grid length {} does not match distribution rows {}.",
            grid.len(),
            psi.nrows()
        );
    }
    Ok(state_marginal(psi).dot(grid))
}

#[cfg(test)]
mod tests {
    use super::{
        aggregate, push_forward, state_marginal, stationary_distribution, DistributionSettings,
    };
    use crate::bellman::tests::TinyModel;
    use crate::model::{SavingsConfig, SavingsModel};
    use crate::solvers::{howard_policy_iteration, SolverSettings};
    use crate::traits::DiscreteDp;
    use nalgebra::{DMatrix, DVector};

    #[test]
    fn distribution_is_invariant_and_normalized() {
        let model = TinyModel::new();
        let sigma = DMatrix::from_row_slice(3, 2, &[1, 0, 2, 1, 2, 0]);
        let dist = stationary_distribution(&model, &sigma, &DistributionSettings::default())
            .expect("distribution");
        assert!(dist.convergence.converged);
        assert!(dist.psi.iter().all(|&p| p >= 0.0));
        assert!((dist.psi.sum() - 1.0).abs() < 1e-12);
        let next = push_forward(&dist.psi, &sigma, model.transition());
        assert!((&next - &dist.psi).amax() < 1e-9);
    }

    #[test]
    fn household_wealth_distribution_has_unit_mass() {
        let config = SavingsConfig {
            w_size: 40,
            y_size: 3,
            ..SavingsConfig::default()
        };
        let model = SavingsModel::new(&config).expect("model");
        let solution = howard_policy_iteration(&model, &SolverSettings::default()).expect("hpi");
        let dist =
            stationary_distribution(&model, &solution.policy, &DistributionSettings::default())
                .expect("distribution");
        assert!(dist.psi.iter().all(|&p| p >= 0.0));
        assert!((dist.psi.sum() - 1.0).abs() < 1e-12);
        let marginal = state_marginal(&dist.psi);
        assert!((marginal.sum() - 1.0).abs() < 1e-12);
        let grid = &model.arrays.state_grid;
        let mean_wealth = aggregate(grid, &dist.psi).expect("aggregate");
        assert!(mean_wealth >= grid[0] && mean_wealth <= grid[grid.len() - 1]);
    }

    #[test]
    fn aggregate_checks_lengths() {
        let psi = DMatrix::from_element(2, 2, 0.25);
        assert!(aggregate(&DVector::from_vec(vec![1.0, 2.0, 3.0]), &psi).is_err());
        let total = aggregate(&DVector::from_vec(vec![1.0, 3.0]), &psi).expect("aggregate");
        assert!((total - 2.0).abs() < 1e-15);
    }
}
