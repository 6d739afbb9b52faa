//! McCall job search with a beta-binomial wage offer distribution.
//!
//! An unemployed worker receives compensation `c`, draws a wage offer and
//! either accepts it forever or waits. The reservation wage solves
//! `w̄ = (1 − β) c + β Σ max(w, w̄) q(w)`.

use crate::equilibrium::{bisect, BisectionSettings};
use crate::error::ModelError;
use crate::grid::linspace;
use crate::solvers::Convergence;
use anyhow::{bail, Result};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use statrs::function::beta::ln_beta;
use statrs::function::factorial::ln_binomial;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct McCallConfig {
    /// Unemployment compensation.
    pub c: f64,
    pub beta: f64,
    /// Number of trials of the beta-binomial; there are `n + 1` wage offers.
    pub n: u64,
    pub a: f64,
    pub b: f64,
    pub w_min: f64,
    pub w_max: f64,
}

impl Default for McCallConfig {
    fn default() -> Self {
        Self {
            c: 25.0,
            beta: 0.99,
            n: 50,
            a: 200.0,
            b: 100.0,
            w_min: 10.0,
            w_max: 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct McCallSettings {
    pub tolerance: f64,
    pub max_iter: usize,
}

impl Default for McCallSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            max_iter: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct McCallModel {
    pub c: f64,
    pub beta: f64,
    pub wages: DVector<f64>,
    /// Offer probabilities, aligned with `wages`.
    pub probs: DVector<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct ReservationWage {
    /// Value of rejecting an offer, `h`.
    pub continuation_value: f64,
    pub reservation_wage: f64,
    pub convergence: Convergence,
}

/// Beta-binomial pmf `C(n, k) B(k + a, n − k + b) / B(a, b)` for `k = 0..=n`.
pub fn beta_binomial_pmf(n: u64, a: f64, b: f64) -> Result<DVector<f64>, ModelError> {
    if !(a > 0.0) || !(b > 0.0) {
        return Err(ModelError::invalid(
            "a, b",
            format!("beta-binomial shape parameters must be positive, got ({a}, {b})"),
        ));
    }
    let log_norm = ln_beta(a, b);
    Ok(DVector::from_fn(n as usize + 1, |k, _| {
        let k = k as u64;
        (ln_binomial(n, k) + ln_beta(k as f64 + a, (n - k) as f64 + b) - log_norm).exp()
    }))
}

impl McCallModel {
    pub fn new(config: &McCallConfig) -> Result<Self, ModelError> {
        if !(config.beta > 0.0 && config.beta < 1.0) {
            return Err(ModelError::invalid(
                "beta",
                format!("discount factor must lie in (0, 1), got {}", config.beta),
            ));
        }
        let wages = linspace(config.w_min, config.w_max, config.n as usize + 1)?;
        let probs = beta_binomial_pmf(config.n, config.a, config.b)?;
        Ok(Self {
            c: config.c,
            beta: config.beta,
            wages,
            probs,
        })
    }

    fn expected_max(&self, floor: f64, scale: f64) -> f64 {
        self.wages
            .iter()
            .zip(self.probs.iter())
            .map(|(&w, &q)| (w * scale).max(floor) * q)
            .sum()
    }

    /// Successive approximation of `h = c + β Σ max(w / (1 − β), h) q(w)`.
    pub fn continuation_value(&self, settings: &McCallSettings) -> Result<ReservationWage> {
        if !(settings.tolerance > 0.0) {
            bail!("tolerance must be positive.");
        }
        if settings.max_iter == 0 {
            bail!("max_iter must be greater than zero.");
        }
        let scale = 1.0 / (1.0 - self.beta);
        let mut h = self.wages.dot(&self.probs) * scale;
        let mut error = f64::INFINITY;
        let mut iterations = 0;
        while iterations < settings.max_iter {
            let h_new = self.c + self.beta * self.expected_max(h, scale);
            error = (h_new - h).abs();
            h = h_new;
            iterations += 1;
            if error <= settings.tolerance {
                break;
            }
        }

        let convergence = if error <= settings.tolerance {
            debug!(iterations, error, "continuation value converged");
            Convergence::reached(iterations, error)
        } else {
            warn!(iterations, error, "continuation value iteration cap reached");
            Convergence::exhausted(iterations, error)
        };
        Ok(ReservationWage {
            continuation_value: h,
            reservation_wage: (1.0 - self.beta) * h,
            convergence,
        })
    }

    /// Root of `w̄ − (1 − β) c − β Σ max(w, w̄) q(w)`.
    pub fn reservation_wage_bisection(
        &self,
        settings: &BisectionSettings,
    ) -> Result<ReservationWage> {
        let gap = |w_bar: f64| {
            w_bar - (1.0 - self.beta) * self.c - self.beta * self.expected_max(w_bar, 1.0)
        };
        // The gap equals (1 − β) (upper − c) > 0 above every offer.
        let upper = self.wages.max().max(self.c) + 1.0;
        let root = bisect(gap, 0.0, upper, settings)?;
        Ok(ReservationWage {
            continuation_value: root.root / (1.0 - self.beta),
            reservation_wage: root.root,
            convergence: root.convergence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{beta_binomial_pmf, McCallConfig, McCallModel, McCallSettings};
    use crate::equilibrium::BisectionSettings;

    #[test]
    fn offer_distribution_sums_to_one() {
        let q = beta_binomial_pmf(50, 200.0, 100.0).expect("pmf");
        assert_eq!(q.len(), 51);
        assert!((q.sum() - 1.0).abs() < 1e-10);
        assert!(q.iter().all(|&p| p >= 0.0));
        // Mean of the beta-binomial is n a / (a + b).
        let mean: f64 = q.iter().enumerate().map(|(k, p)| k as f64 * p).sum();
        assert!((mean - 50.0 * 200.0 / 300.0).abs() < 1e-8);
    }

    #[test]
    fn fixed_point_and_bisection_agree() {
        let model = McCallModel::new(&McCallConfig::default()).expect("model");
        let iterated = model
            .continuation_value(&McCallSettings::default())
            .expect("fixed point");
        let bisected = model
            .reservation_wage_bisection(&BisectionSettings::default())
            .expect("bisection");
        assert!(iterated.convergence.converged);
        assert!(bisected.convergence.converged);
        assert!((iterated.reservation_wage - bisected.reservation_wage).abs() < 1e-6);
        assert!(iterated.reservation_wage > 10.0 && iterated.reservation_wage < 60.0);
    }

    #[test]
    fn reservation_wage_rises_with_compensation() {
        let wages: Vec<f64> = [10.0, 25.0, 40.0]
            .iter()
            .map(|&c| {
                let model = McCallModel::new(&McCallConfig {
                    c,
                    ..McCallConfig::default()
                })
                .expect("model");
                model
                    .reservation_wage_bisection(&BisectionSettings::default())
                    .expect("bisection")
                    .reservation_wage
            })
            .collect();
        assert!(wages[0] < wages[1] && wages[1] < wages[2]);
    }

    #[test]
    fn compensation_above_all_offers_is_the_reservation_wage() {
        let model = McCallModel::new(&McCallConfig {
            c: 80.0,
            ..McCallConfig::default()
        })
        .expect("model");
        let result = model
            .reservation_wage_bisection(&BisectionSettings::default())
            .expect("bisection");
        assert!((result.reservation_wage - 80.0).abs() < 1e-8);
    }
}
