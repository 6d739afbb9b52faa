//! Model builders.
//!
//! Each builder takes an immutable config and returns the three groupings a
//! solver needs: scalar constants, grid sizes, and numeric arrays.

use crate::error::ModelError;
use crate::grid::{linspace, tauchen};
use crate::traits::{DiscreteDp, Sizes};
use crate::utility::Utility;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Grids and shock transition shared by all grid models.
#[derive(Debug, Clone)]
pub struct ModelArrays {
    /// Endogenous grid (wealth, output, ...).
    pub state_grid: DVector<f64>,
    /// Exogenous shock values.
    pub shock_grid: DVector<f64>,
    /// Row-stochastic shock transition `Q`.
    pub transition: DMatrix<f64>,
}

fn check_discount(beta: f64) -> Result<(), ModelError> {
    if beta > 0.0 && beta < 1.0 {
        Ok(())
    } else {
        Err(ModelError::invalid(
            "beta",
            format!("discount factor must lie in (0, 1), got {beta}"),
        ))
    }
}

fn check_size(name: &'static str, n: usize) -> Result<(), ModelError> {
    if n == 0 {
        return Err(ModelError::EmptyGrid(name));
    }
    Ok(())
}

// --- Optimal savings ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SavingsConfig {
    /// Gross interest rate R.
    pub gross_return: f64,
    pub beta: f64,
    pub utility: Utility,
    /// Scales labor income; 1.0 gives the plain savings problem.
    pub wage: f64,
    pub w_min: f64,
    pub w_max: f64,
    pub w_size: usize,
    /// Persistence of log income.
    pub rho: f64,
    /// Volatility of log income.
    pub nu: f64,
    pub y_size: usize,
}

impl Default for SavingsConfig {
    fn default() -> Self {
        Self {
            gross_return: 1.01,
            beta: 0.98,
            utility: Utility::Crra { gamma: 2.5 },
            wage: 1.0,
            w_min: 0.01,
            w_max: 10.0,
            w_size: 150,
            rho: 0.9,
            nu: 0.1,
            y_size: 100,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SavingsConstants {
    pub gross_return: f64,
    pub beta: f64,
    pub wage: f64,
    pub utility: Utility,
}

/// Household choosing next-period wealth `w'` given wealth `w` and income `y`:
/// consumption is `R w + wage · y − w'`.
#[derive(Debug, Clone)]
pub struct SavingsModel {
    pub constants: SavingsConstants,
    pub sizes: Sizes,
    pub arrays: ModelArrays,
}

impl SavingsModel {
    pub fn new(config: &SavingsConfig) -> Result<Self, ModelError> {
        check_discount(config.beta)?;
        check_size("wealth", config.w_size)?;
        check_size("income", config.y_size)?;
        if !(config.gross_return > 0.0) {
            return Err(ModelError::invalid(
                "gross_return",
                format!("must be positive, got {}", config.gross_return),
            ));
        }
        if !(config.wage >= 0.0) {
            return Err(ModelError::invalid(
                "wage",
                format!("must be non-negative, got {}", config.wage),
            ));
        }
        if let Utility::Crra { gamma } = config.utility {
            if !(gamma > 0.0) {
                return Err(ModelError::invalid(
                    "gamma",
                    format!("must be positive, got {gamma}"),
                ));
            }
        }

        let state_grid = linspace(config.w_min, config.w_max, config.w_size)?;
        let income = tauchen(config.y_size, config.rho, config.nu, 0.0, 3.0)?;
        let shock_grid = income.state_values.map(f64::exp);

        Ok(Self {
            constants: SavingsConstants {
                gross_return: config.gross_return,
                beta: config.beta,
                wage: config.wage,
                utility: config.utility,
            },
            sizes: Sizes {
                n_states: config.w_size,
                n_shocks: config.y_size,
            },
            arrays: ModelArrays {
                state_grid,
                shock_grid,
                transition: income.transition,
            },
        })
    }

    pub fn consumption(&self, i: usize, j: usize, k: usize) -> f64 {
        let grid = &self.arrays.state_grid;
        self.constants.gross_return * grid[i] + self.constants.wage * self.arrays.shock_grid[j]
            - grid[k]
    }
}

impl DiscreteDp for SavingsModel {
    fn sizes(&self) -> Sizes {
        self.sizes
    }

    fn discount(&self) -> f64 {
        self.constants.beta
    }

    fn transition(&self) -> &DMatrix<f64> {
        &self.arrays.transition
    }

    fn reward(&self, i: usize, j: usize, k: usize) -> f64 {
        self.constants.utility.eval(self.consumption(i, j, k))
    }
}

// --- Optimal investment ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InvestmentConfig {
    /// Interest rate; β = 1/(1+r).
    pub r: f64,
    pub a0: f64,
    pub a1: f64,
    /// Adjustment cost coefficient.
    pub gamma: f64,
    /// Unit cost.
    pub c: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub y_size: usize,
    pub rho: f64,
    pub nu: f64,
    pub z_size: usize,
}

impl Default for InvestmentConfig {
    fn default() -> Self {
        Self {
            r: 0.04,
            a0: 10.0,
            a1: 1.0,
            gamma: 25.0,
            c: 1.0,
            y_min: 0.0,
            y_max: 20.0,
            y_size: 100,
            rho: 0.9,
            nu: 1.0,
            z_size: 25,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InvestmentConstants {
    pub beta: f64,
    pub a0: f64,
    pub a1: f64,
    pub gamma: f64,
    pub c: f64,
}

/// Monopolist choosing next-period output `y'` under a quadratic adjustment cost
/// and inverse demand `a0 − a1 y + z`.
#[derive(Debug, Clone)]
pub struct InvestmentModel {
    pub constants: InvestmentConstants,
    pub sizes: Sizes,
    pub arrays: ModelArrays,
}

impl InvestmentModel {
    pub fn new(config: &InvestmentConfig) -> Result<Self, ModelError> {
        if !(config.r > 0.0) {
            return Err(ModelError::invalid(
                "r",
                format!("interest rate must be positive, got {}", config.r),
            ));
        }
        let beta = 1.0 / (1.0 + config.r);
        check_discount(beta)?;
        check_size("output", config.y_size)?;
        check_size("demand shock", config.z_size)?;
        if !(config.gamma >= 0.0) {
            return Err(ModelError::invalid(
                "gamma",
                format!("adjustment cost must be non-negative, got {}", config.gamma),
            ));
        }

        let state_grid = linspace(config.y_min, config.y_max, config.y_size)?;
        let demand = tauchen(config.z_size, config.rho, config.nu, 0.0, 3.0)?;

        Ok(Self {
            constants: InvestmentConstants {
                beta,
                a0: config.a0,
                a1: config.a1,
                gamma: config.gamma,
                c: config.c,
            },
            sizes: Sizes {
                n_states: config.y_size,
                n_shocks: config.z_size,
            },
            arrays: ModelArrays {
                state_grid,
                shock_grid: demand.state_values,
                transition: demand.transition,
            },
        })
    }
}

impl DiscreteDp for InvestmentModel {
    fn sizes(&self) -> Sizes {
        self.sizes
    }

    fn discount(&self) -> f64 {
        self.constants.beta
    }

    fn transition(&self) -> &DMatrix<f64> {
        &self.arrays.transition
    }

    fn reward(&self, i: usize, j: usize, k: usize) -> f64 {
        let p = &self.constants;
        let y = self.arrays.state_grid[i];
        let y_next = self.arrays.state_grid[k];
        let z = self.arrays.shock_grid[j];
        (p.a0 - p.a1 * y + z - p.c) * y - p.gamma * (y_next - y).powi(2)
    }
}
