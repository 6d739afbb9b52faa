//! Grids and finite Markov chains.
//!
//! Endogenous state spaces are evenly spaced grids; exogenous shocks are
//! discretized AR(1) processes produced by Tauchen's method.

use crate::error::ModelError;
use anyhow::{anyhow, bail, Result};
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use statrs::function::erf::erfc;
use std::f64::consts::SQRT_2;

const ROW_SUM_TOLERANCE: f64 = 1e-10;

/// `n` evenly spaced points on `[min, max]`.
pub fn linspace(min: f64, max: f64, n: usize) -> Result<DVector<f64>, ModelError> {
    if n == 0 {
        return Err(ModelError::EmptyGrid("linspace"));
    }
    if !min.is_finite() || !max.is_finite() || max < min {
        return Err(ModelError::invalid(
            "bounds",
            format!("expected finite min <= max, got [{min}, {max}]"),
        ));
    }
    if n == 1 {
        return Ok(DVector::from_element(1, min));
    }
    let step = (max - min) / (n - 1) as f64;
    Ok(DVector::from_fn(n, |i, _| {
        if i == n - 1 {
            max
        } else {
            min + step * i as f64
        }
    }))
}

fn std_norm_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / SQRT_2)
}

/// Checks that `q` is square, non-negative, and that each row sums to one.
pub fn check_stochastic(q: &DMatrix<f64>) -> Result<(), ModelError> {
    if q.nrows() != q.ncols() {
        return Err(ModelError::ShapeMismatch {
            what: "transition matrix",
            expected: "square".to_string(),
            actual: format!("{}x{}", q.nrows(), q.ncols()),
        });
    }
    for (row_idx, row) in q.row_iter().enumerate() {
        if let Some(bad) = row.iter().find(|v| !(**v >= 0.0) || !v.is_finite()) {
            return Err(ModelError::NotStochastic {
                row: row_idx,
                problem: format!("has invalid entry {bad}"),
            });
        }
        let sum: f64 = row.iter().sum();
        if (sum - 1.0).abs() > ROW_SUM_TOLERANCE {
            return Err(ModelError::NotStochastic {
                row: row_idx,
                problem: format!("sums to {sum}"),
            });
        }
    }
    Ok(())
}

/// A finite Markov chain with real-valued states.
#[derive(Debug, Clone)]
pub struct MarkovChain {
    pub state_values: DVector<f64>,
    pub transition: DMatrix<f64>,
}

impl MarkovChain {
    pub fn new(state_values: DVector<f64>, transition: DMatrix<f64>) -> Result<Self, ModelError> {
        check_stochastic(&transition)?;
        if state_values.len() != transition.nrows() {
            return Err(ModelError::ShapeMismatch {
                what: "state values",
                expected: transition.nrows().to_string(),
                actual: state_values.len().to_string(),
            });
        }
        Ok(Self {
            state_values,
            transition,
        })
    }

    pub fn len(&self) -> usize {
        self.state_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state_values.is_empty()
    }

    /// Solves `ψ (I - P + 1 1ᵀ) = 1ᵀ`, which has the stationary distribution as its
    /// unique solution when the chain is irreducible.
    pub fn stationary_distribution(&self) -> Result<DVector<f64>> {
        let n = self.len();
        let mut a = DMatrix::<f64>::identity(n, n) - &self.transition;
        a.add_scalar_mut(1.0);
        let rhs = DVector::from_element(n, 1.0);
        let psi = a
            .transpose()
            .lu()
            .solve(&rhs)
            .ok_or_else(|| anyhow!("Stationary distribution system is singular."))?;
        normalize_distribution(psi)
    }

    /// Simulates `len` periods starting from state index `init`.
    pub fn simulate<R: Rng>(&self, init: usize, len: usize, rng: &mut R) -> Result<Vec<usize>> {
        if init >= self.len() {
            bail!(
                "Initial state {} out of range for chain with {} states.",
                init,
                self.len()
            );
        }
        let mut path = Vec::with_capacity(len);
        let mut state = init;
        for _ in 0..len {
            path.push(state);
            state = draw_row(self.transition.row(state).iter().copied(), rng.gen::<f64>());
        }
        Ok(path)
    }
}

/// Index selected by inverse-CDF sampling of a probability row.
pub(crate) fn draw_row(row: impl Iterator<Item = f64>, u: f64) -> usize {
    let mut cumulative = 0.0;
    let mut last = 0;
    for (idx, p) in row.enumerate() {
        cumulative += p;
        last = idx;
        if u < cumulative {
            return idx;
        }
    }
    last
}

/// Clamps round-off negatives to zero and rescales to unit mass.
pub(crate) fn normalize_distribution(mut psi: DVector<f64>) -> Result<DVector<f64>> {
    for value in psi.iter_mut() {
        if *value < 0.0 {
            *value = 0.0;
        }
    }
    let total = psi.sum();
    if !(total > 0.0) || !total.is_finite() {
        bail!("Distribution has no positive mass (sum = {}).", total);
    }
    psi /= total;
    Ok(psi)
}

/// Tauchen discretization of `y' = μ + ρ y + σ ε`, `ε ~ N(0, 1)`.
///
/// The grid spans `n_std` unconditional standard deviations around the
/// unconditional mean; the end columns absorb the tails.
pub fn tauchen(
    n: usize,
    rho: f64,
    sigma: f64,
    mu: f64,
    n_std: f64,
) -> Result<MarkovChain, ModelError> {
    if n == 0 {
        return Err(ModelError::EmptyGrid("tauchen"));
    }
    if !(rho.abs() < 1.0) {
        return Err(ModelError::invalid("rho", format!("|rho| must be < 1, got {rho}")));
    }
    if !(sigma > 0.0) {
        return Err(ModelError::invalid("sigma", format!("must be positive, got {sigma}")));
    }
    if !(n_std > 0.0) {
        return Err(ModelError::invalid("n_std", format!("must be positive, got {n_std}")));
    }

    let mean = mu / (1.0 - rho);
    if n == 1 {
        return MarkovChain::new(
            DVector::from_element(1, mean),
            DMatrix::from_element(1, 1, 1.0),
        );
    }

    let y_std = sigma / (1.0 - rho * rho).sqrt();
    let y_max = n_std * y_std;
    let centered = linspace(-y_max, y_max, n)?;
    let half_step = 0.5 * (centered[1] - centered[0]);

    let mut q = DMatrix::<f64>::zeros(n, n);
    for i in 0..n {
        let cond_mean = rho * centered[i];
        q[(i, 0)] = std_norm_cdf((centered[0] - cond_mean + half_step) / sigma);
        q[(i, n - 1)] = 1.0 - std_norm_cdf((centered[n - 1] - cond_mean - half_step) / sigma);
        for j in 1..n - 1 {
            let z = centered[j] - cond_mean;
            q[(i, j)] =
                std_norm_cdf((z + half_step) / sigma) - std_norm_cdf((z - half_step) / sigma);
        }
        // Rounding in the tails can leave the row a few ulps off.
        let row_sum: f64 = q.row(i).sum();
        for j in 0..n {
            q[(i, j)] /= row_sum;
        }
    }

    MarkovChain::new(centered.add_scalar(mean), q)
}

#[cfg(test)]
mod tests {
    use super::{check_stochastic, linspace, tauchen, MarkovChain};
    use crate::error::ModelError;
    use nalgebra::{DMatrix, DVector};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn linspace_hits_both_endpoints() {
        let grid = linspace(0.01, 10.0, 150).expect("grid");
        assert_eq!(grid.len(), 150);
        assert_eq!(grid[0], 0.01);
        assert_eq!(grid[149], 10.0);
        assert!(grid.as_slice().windows(2).all(|w| w[1] > w[0]));
        assert_eq!(linspace(2.0, 3.0, 1).expect("grid")[0], 2.0);
        assert_eq!(linspace(0.0, 1.0, 0), Err(ModelError::EmptyGrid("linspace")));
    }

    #[test]
    fn tauchen_rows_are_stochastic() {
        for &(n, rho, sigma) in &[(3, 0.9, 0.1), (7, 0.5, 1.0), (25, 0.9, 1.0), (100, 0.95, 0.05)] {
            let chain = tauchen(n, rho, sigma, 0.0, 3.0).expect("tauchen");
            assert_eq!(chain.len(), n);
            check_stochastic(&chain.transition).expect("row-stochastic");
        }
    }

    #[test]
    fn tauchen_grid_is_symmetric_around_mean() {
        let chain = tauchen(5, 0.8, 0.2, 0.4, 2.0).expect("tauchen");
        let mean = 0.4 / (1.0 - 0.8);
        for i in 0..5 {
            let mirrored = chain.state_values[4 - i] - mean;
            assert!((chain.state_values[i] - mean + mirrored).abs() < 1e-12);
        }
    }

    #[test]
    fn tauchen_rejects_unit_root() {
        let err = tauchen(5, 1.0, 0.1, 0.0, 3.0).unwrap_err();
        assert!(matches!(err, ModelError::InvalidParameter { name: "rho", .. }));
    }

    #[test]
    fn check_stochastic_flags_bad_rows() {
        let q = DMatrix::from_row_slice(2, 2, &[0.5, 0.5, 0.7, 0.2]);
        assert!(matches!(
            check_stochastic(&q),
            Err(ModelError::NotStochastic { row: 1, .. })
        ));
        let q = DMatrix::from_row_slice(2, 2, &[1.2, -0.2, 0.0, 1.0]);
        assert!(matches!(
            check_stochastic(&q),
            Err(ModelError::NotStochastic { row: 0, .. })
        ));
    }

    #[test]
    fn stationary_distribution_of_two_state_chain() {
        let q = DMatrix::from_row_slice(2, 2, &[0.9, 0.1, 0.4, 0.6]);
        let chain = MarkovChain::new(DVector::from_vec(vec![0.0, 1.0]), q).expect("chain");
        let psi = chain.stationary_distribution().expect("stationary");
        assert!((psi[0] - 0.8).abs() < 1e-12);
        assert!((psi[1] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn simulated_frequencies_approach_stationary_distribution() {
        let q = DMatrix::from_row_slice(2, 2, &[0.9, 0.1, 0.4, 0.6]);
        let chain = MarkovChain::new(DVector::from_vec(vec![0.0, 1.0]), q).expect("chain");
        let mut rng = StdRng::seed_from_u64(42);
        let path = chain.simulate(1, 100_000, &mut rng).expect("simulate");
        assert_eq!(path.len(), 100_000);
        assert_eq!(path[0], 1);
        let share = path.iter().filter(|&&s| s == 0).count() as f64 / path.len() as f64;
        assert!((share - 0.8).abs() < 0.01, "share in state 0 was {share}");
    }

    #[test]
    fn simulate_rejects_out_of_range_start() {
        let chain = tauchen(3, 0.5, 0.1, 0.0, 3.0).expect("tauchen");
        let mut rng = StdRng::seed_from_u64(0);
        assert!(chain.simulate(3, 10, &mut rng).is_err());
    }
}
