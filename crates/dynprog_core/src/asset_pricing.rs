//! Price-dividend ratio of a Lucas tree whose log dividend growth follows a
//! finite Markov chain.

use crate::error::ModelError;
use crate::grid::{tauchen, MarkovChain};
use anyhow::{anyhow, bail, Context, Result};
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LucasConfig {
    pub beta: f64,
    /// Coefficient of relative risk aversion.
    pub gamma: f64,
    pub n: usize,
    pub rho: f64,
    pub sigma: f64,
}

impl Default for LucasConfig {
    fn default() -> Self {
        Self {
            beta: 0.96,
            gamma: 2.0,
            n: 25,
            rho: 0.9,
            sigma: 0.02,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LucasTree {
    pub beta: f64,
    pub gamma: f64,
    /// Chain over log dividend growth.
    pub growth: MarkovChain,
}

impl LucasTree {
    pub fn new(config: &LucasConfig) -> Result<Self, ModelError> {
        if !(config.beta > 0.0 && config.beta < 1.0) {
            return Err(ModelError::invalid(
                "beta",
                format!("discount factor must lie in (0, 1), got {}", config.beta),
            ));
        }
        let growth = tauchen(config.n, config.rho, config.sigma, 0.0, 3.0)?;
        Ok(Self {
            beta: config.beta,
            gamma: config.gamma,
            growth,
        })
    }

    pub fn price_dividend_ratio(&self) -> Result<DVector<f64>> {
        price_dividend_ratio(&self.growth, self.beta, self.gamma)
    }
}

/// Largest eigenvalue modulus.
pub fn spectral_radius(matrix: &DMatrix<f64>) -> f64 {
    matrix
        .complex_eigenvalues()
        .iter()
        .map(|lambda: &Complex<f64>| lambda.norm())
        .fold(0.0, f64::max)
}

/// Solves `v = K 1 + K v` with `K(x, y) = β P(x, y) exp(y)^{1 − γ}`.
pub fn price_dividend_ratio(chain: &MarkovChain, beta: f64, gamma: f64) -> Result<DVector<f64>> {
    let n = chain.len();
    if n == 0 {
        bail!("Markov chain has no states.");
    }
    let growth = chain.state_values.map(|y| y.exp().powf(1.0 - gamma));
    let k = DMatrix::from_fn(n, n, |x, y| beta * chain.transition[(x, y)] * growth[y]);

    let radius = spectral_radius(&k);
    debug!(radius, "Lucas tree kernel spectral radius");
    if radius >= 1.0 {
        bail!(
            "Spectral radius of the pricing kernel is {:.6}; no finite price-dividend ratio.",
            radius
        );
    }

    let rhs = &k * DVector::from_element(n, 1.0);
    let system = DMatrix::<f64>::identity(n, n) - &k;
    system
        .lu()
        .solve(&rhs)
        .ok_or_else(|| anyhow!("I − K is singular."))
        .context("Failed to solve for the price-dividend ratio.")
}
