//! Cake eating with a continuous consumption choice.
//!
//! The value function lives on a grid. Off the grid it is rebuilt from the
//! consumption equivalent `u⁻¹((1 − β) v(x))`, which is interpolated linearly
//! and extrapolated linearly toward zero wealth. For CRRA utility the exact
//! consumption equivalent is linear in `x`, so the discretized fixed point
//! coincides with the true one at the nodes. Each Bellman step maximizes
//! `u(c) + β v̂(x − c)` over `c ∈ (0, x]` by golden section search.

use crate::error::ModelError;
use crate::grid::linspace;
use crate::solvers::Convergence;
use crate::utility::Utility;
use anyhow::{bail, Result};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const MIN_CONSUMPTION: f64 = 1e-10;
const SEARCH_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CakeConfig {
    pub beta: f64,
    pub gamma: f64,
    pub x_grid_min: f64,
    pub x_grid_max: f64,
    pub x_grid_size: usize,
}

impl Default for CakeConfig {
    fn default() -> Self {
        Self {
            beta: 0.96,
            gamma: 1.5,
            x_grid_min: 1e-3,
            x_grid_max: 2.5,
            x_grid_size: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CakeSettings {
    pub tolerance: f64,
    pub max_iter: usize,
    pub log_every: usize,
}

impl Default for CakeSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-4,
            max_iter: 1_000,
            log_every: 25,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CakeModel {
    pub beta: f64,
    pub gamma: f64,
    pub utility: Utility,
    pub grid: DVector<f64>,
}

#[derive(Debug, Clone)]
pub struct CakeSolution {
    pub value: DVector<f64>,
    /// Optimal consumption at each grid point.
    pub consumption: DVector<f64>,
    pub convergence: Convergence,
}

/// Piecewise-linear interpolation of `values` over the increasing `grid`,
/// continued linearly past both ends.
pub fn interpolate(grid: &DVector<f64>, values: &DVector<f64>, x: f64) -> f64 {
    let n = grid.len();
    if n == 1 {
        return values[0];
    }
    let hi = grid.as_slice().partition_point(|&g| g < x).clamp(1, n - 1);
    let lo = hi - 1;
    let weight = (x - grid[lo]) / (grid[hi] - grid[lo]);
    values[lo] + weight * (values[hi] - values[lo])
}

/// Maximizes `f` over `[a, b]`; returns `(argmax, max)`. Exact for unimodal `f`.
pub fn golden_section_max<F>(f: F, mut a: f64, mut b: f64, tolerance: f64) -> (f64, f64)
where
    F: Fn(f64) -> f64,
{
    let upper = b;
    let inv_phi = (5.0_f64.sqrt() - 1.0) / 2.0;
    let mut c = b - inv_phi * (b - a);
    let mut d = a + inv_phi * (b - a);
    let mut fc = f(c);
    let mut fd = f(d);
    while b - a > tolerance {
        if fc > fd {
            b = d;
            d = c;
            fd = fc;
            c = b - inv_phi * (b - a);
            fc = f(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + inv_phi * (b - a);
            fd = f(d);
        }
    }
    let mid = 0.5 * (a + b);
    let f_mid = f(mid);
    // Corner solutions sit on the upper end.
    let f_upper = f(upper);
    if f_upper > f_mid {
        (upper, f_upper)
    } else {
        (mid, f_mid)
    }
}

impl CakeModel {
    pub fn new(config: &CakeConfig) -> Result<Self, ModelError> {
        if !(config.beta > 0.0 && config.beta < 1.0) {
            return Err(ModelError::invalid(
                "beta",
                format!("discount factor must lie in (0, 1), got {}", config.beta),
            ));
        }
        if !(config.gamma > 0.0) {
            return Err(ModelError::invalid(
                "gamma",
                format!("must be positive, got {}", config.gamma),
            ));
        }
        if !(config.x_grid_min > 0.0) {
            return Err(ModelError::invalid(
                "x_grid_min",
                format!("must be positive, got {}", config.x_grid_min),
            ));
        }
        let grid = linspace(config.x_grid_min, config.x_grid_max, config.x_grid_size)?;
        Ok(Self {
            beta: config.beta,
            gamma: config.gamma,
            utility: Utility::Crra {
                gamma: config.gamma,
            },
            grid,
        })
    }

    /// Closed-form value function.
    pub fn analytic_value(&self, x: f64) -> f64 {
        let (beta, gamma) = (self.beta, self.gamma);
        if (gamma - 1.0).abs() < 1e-12 {
            let constant = ((1.0 - beta).ln() + beta / (1.0 - beta) * beta.ln()) / (1.0 - beta);
            return x.ln() / (1.0 - beta) + constant;
        }
        let theta = 1.0 - beta.powf(1.0 / gamma);
        theta.powf(-gamma) * x.powf(1.0 - gamma) / (1.0 - gamma)
    }

    /// Closed-form consumption policy `(1 − β^{1/γ}) x`.
    pub fn analytic_consumption(&self, x: f64) -> f64 {
        (1.0 - self.beta.powf(1.0 / self.gamma)) * x
    }

    /// `u⁻¹((1 − β) v)`; zero where `v = −∞`.
    pub fn consumption_equivalent(&self, v: &DVector<f64>) -> DVector<f64> {
        v.map(|value| self.utility.inverse((1.0 - self.beta) * value))
    }

    fn value_of_equivalent(&self, w: f64) -> f64 {
        self.utility.eval(w) / (1.0 - self.beta)
    }

    fn maximize_at(&self, equivalent: &DVector<f64>, x: f64) -> (f64, f64) {
        let objective = |c: f64| {
            let w = interpolate(&self.grid, equivalent, x - c);
            self.utility.eval(c) + self.beta * self.value_of_equivalent(w)
        };
        golden_section_max(objective, MIN_CONSUMPTION, x, SEARCH_TOLERANCE)
    }

    fn check_len(&self, v: &DVector<f64>) -> Result<()> {
        if v.len() != self.grid.len() {
            bail!(
                "Value function length {} does not match grid size {}.",
                v.len(),
                self.grid.len()
            );
        }
        Ok(())
    }

    pub fn bellman_operator(&self, v: &DVector<f64>) -> Result<DVector<f64>> {
        self.check_len(v)?;
        let equivalent = self.consumption_equivalent(v);
        Ok(DVector::from_fn(self.grid.len(), |i, _| {
            self.maximize_at(&equivalent, self.grid[i]).1
        }))
    }

    pub fn consumption_policy(&self, v: &DVector<f64>) -> Result<DVector<f64>> {
        self.check_len(v)?;
        let equivalent = self.consumption_equivalent(v);
        Ok(DVector::from_fn(self.grid.len(), |i, _| {
            self.maximize_at(&equivalent, self.grid[i]).0
        }))
    }
}

/// Value function iteration from `u(x) / (1 − β)`.
pub fn solve_cake_eating(model: &CakeModel, settings: &CakeSettings) -> Result<CakeSolution> {
    if !(settings.tolerance > 0.0) {
        bail!("tolerance must be positive.");
    }
    if settings.max_iter == 0 {
        bail!("max_iter must be greater than zero.");
    }
    let mut v = model.grid.map(|x| model.value_of_equivalent(x));
    let mut error = f64::INFINITY;
    let mut iterations = 0;

    while iterations < settings.max_iter {
        let v_new = model.bellman_operator(&v)?;
        error = (&v_new - &v).amax();
        v = v_new;
        iterations += 1;
        if settings.log_every > 0 && iterations % settings.log_every == 0 {
            debug!(iterations, error, "cake eating value iteration");
        }
        if error <= settings.tolerance {
            break;
        }
    }

    let convergence = if error <= settings.tolerance {
        Convergence::reached(iterations, error)
    } else {
        warn!(iterations, error, "cake eating iteration cap reached");
        Convergence::exhausted(iterations, error)
    };
    let consumption = model.consumption_policy(&v)?;
    Ok(CakeSolution {
        value: v,
        consumption,
        convergence,
    })
}

#[cfg(test)]
mod tests {
    use super::{
        golden_section_max, interpolate, solve_cake_eating, CakeConfig, CakeModel, CakeSettings,
    };
    use nalgebra::DVector;

    #[test]
    fn interpolation_is_linear_and_extends_past_the_ends() {
        let grid = DVector::from_vec(vec![1.0, 2.0, 4.0]);
        let values = DVector::from_vec(vec![1.0, 3.0, 4.0]);
        assert!((interpolate(&grid, &values, 1.5) - 2.0).abs() < 1e-15);
        assert!((interpolate(&grid, &values, 3.0) - 3.5).abs() < 1e-15);
        assert_eq!(interpolate(&grid, &values, 2.0), 3.0);
        assert_eq!(interpolate(&grid, &values, 1.0), 1.0);
        // Below the grid the first segment continues, toward zero here.
        assert!((interpolate(&grid, &values, 0.5) - 0.0).abs() < 1e-15);
        assert!((interpolate(&grid, &values, 6.0) - 5.0).abs() < 1e-15);
    }

    #[test]
    fn analytic_value_is_a_fixed_point_of_the_discretized_operator() {
        let model = CakeModel::new(&CakeConfig::default()).expect("model");
        let v_star = model.grid.map(|x| model.analytic_value(x));
        let tv = model.bellman_operator(&v_star).expect("T v*");
        for (a, b) in tv.iter().zip(v_star.iter()) {
            assert!(((a - b) / b).abs() < 1e-9, "{a} vs {b}");
        }
    }

    #[test]
    fn golden_section_finds_interior_and_corner_maxima() {
        let (x, fx) = golden_section_max(|x| -(x - 0.3).powi(2), 0.0, 1.0, 1e-10);
        assert!((x - 0.3).abs() < 1e-8);
        assert!(fx.abs() < 1e-15);
        let (x, _) = golden_section_max(|x| x, 0.0, 2.0, 1e-10);
        assert_eq!(x, 2.0);
    }

    #[test]
    fn analytic_solution_satisfies_bellman_equation() {
        let model = CakeModel::new(&CakeConfig::default()).expect("model");
        let x: f64 = 1.3;
        let c = model.analytic_consumption(x);
        let rhs = model.utility.eval(c) + model.beta * model.analytic_value(x - c);
        assert!((rhs - model.analytic_value(x)).abs() < 1e-9 * model.analytic_value(x).abs());
    }

    #[test]
    fn numerical_solution_matches_analytic_solution() {
        let model = CakeModel::new(&CakeConfig::default()).expect("model");
        let solution = solve_cake_eating(&model, &CakeSettings::default()).expect("solve");
        assert!(solution.convergence.converged);

        let mut max_policy_error: f64 = 0.0;
        let mut max_value_rel_error: f64 = 0.0;
        for (i, &x) in model.grid.iter().enumerate() {
            let c_star = model.analytic_consumption(x);
            max_policy_error = max_policy_error.max((solution.consumption[i] - c_star).abs());
            let v_star = model.analytic_value(x);
            max_value_rel_error =
                max_value_rel_error.max(((solution.value[i] - v_star) / v_star).abs());
        }
        assert!(max_policy_error < 1e-3, "policy error {max_policy_error}");
        assert!(max_value_rel_error < 1e-4, "value error {max_value_rel_error}");
        // The bottom of the grid is where a flat or chord approximation fails.
        let bottom = model.analytic_value(model.grid[0]);
        assert!(((solution.value[0] - bottom) / bottom).abs() < 1e-4);
    }

    #[test]
    fn rejects_non_positive_grid() {
        let config = CakeConfig {
            x_grid_min: 0.0,
            ..CakeConfig::default()
        };
        assert!(CakeModel::new(&config).is_err());
    }
}
