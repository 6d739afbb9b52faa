use serde::{Deserialize, Serialize};

/// Period utility of consumption.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Utility {
    Log,
    /// `c^(1-γ) / (1-γ)`; `γ == 1` is treated as log.
    Crra { gamma: f64 },
}

impl Utility {
    /// Utility of consuming `c`. Non-positive consumption is infeasible and maps to `-∞`.
    pub fn eval(&self, c: f64) -> f64 {
        if c <= 0.0 {
            return f64::NEG_INFINITY;
        }
        match *self {
            Utility::Log => c.ln(),
            Utility::Crra { gamma } if (gamma - 1.0).abs() < 1e-12 => c.ln(),
            Utility::Crra { gamma } => c.powf(1.0 - gamma) / (1.0 - gamma),
        }
    }

    /// Consumption level delivering utility `u`, so `eval(inverse(u)) == u`.
    /// `inverse(-∞)` is zero for log and for `γ > 1`.
    pub fn inverse(&self, u: f64) -> f64 {
        match *self {
            Utility::Log => u.exp(),
            Utility::Crra { gamma } if (gamma - 1.0).abs() < 1e-12 => u.exp(),
            Utility::Crra { gamma } => ((1.0 - gamma) * u).max(0.0).powf(1.0 / (1.0 - gamma)),
        }
    }
}
