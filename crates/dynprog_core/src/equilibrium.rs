use crate::autodiff::{jacobian, Dual};
use crate::solvers::Convergence;
use crate::traits::{Scalar, VectorField};
use anyhow::{anyhow, bail, Context, Result};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NewtonSettings {
    pub max_steps: usize,
    pub damping: f64,
    pub tolerance: f64,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            max_steps: 25,
            damping: 1.0,
            tolerance: 1e-9,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewtonResult {
    pub state: DVector<f64>,
    /// `max |e(p)|` at `state`.
    pub residual_norm: f64,
    pub iterations: usize,
    pub convergence: Convergence,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BisectionSettings {
    /// Half-width of the final bracket.
    pub tolerance: f64,
    pub max_iter: usize,
}

impl Default for BisectionSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iter: 200,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Root {
    pub root: f64,
    pub convergence: Convergence,
}

/// Excess demand `e(p) = exp(−A p) + c − b ⊙ sqrt(p)` for `n` goods.
#[derive(Debug, Clone)]
pub struct ExcessDemand {
    pub a: DMatrix<f64>,
    pub b: DVector<f64>,
    pub c: DVector<f64>,
}

impl ExcessDemand {
    pub fn new(a: DMatrix<f64>, b: DVector<f64>, c: DVector<f64>) -> Result<Self> {
        let n = a.nrows();
        if n == 0 {
            bail!("Excess demand system has zero dimension.");
        }
        if a.ncols() != n || b.len() != n || c.len() != n {
            bail!(
                "Excess demand shape mismatch. A is {}x{}, b has {} entries, c has {}.",
                a.nrows(),
                a.ncols(),
                b.len(),
                c.len()
            );
        }
        Ok(Self { a, b, c })
    }

    /// Uniform `[0, 1)` entries with columns rescaled to sum to one; `b = c = 1`.
    pub fn random(dim: usize, seed: u64) -> Result<Self> {
        if dim == 0 {
            bail!("Excess demand system has zero dimension.");
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let uniform = Uniform::new(0.0, 1.0);
        let mut a = DMatrix::from_fn(dim, dim, |_, _| uniform.sample(&mut rng));
        for mut column in a.column_iter_mut() {
            let total = column.sum();
            if total > 0.0 {
                column /= total;
            }
        }
        Self::new(
            a,
            DVector::from_element(dim, 1.0),
            DVector::from_element(dim, 1.0),
        )
    }
}

impl<T: Scalar> VectorField<T> for ExcessDemand {
    fn dimension(&self) -> usize {
        self.a.nrows()
    }

    fn apply(&self, p: &[T], out: &mut [T]) {
        let n = self.a.nrows();
        for i in 0..n {
            let mut ap = T::zero();
            for j in 0..n {
                ap = ap + T::constant(self.a[(i, j)]) * p[j];
            }
            out[i] = (-ap).exp() + T::constant(self.c[i]) - T::constant(self.b[i]) * p[i].sqrt();
        }
    }
}

fn max_abs(values: &[f64]) -> f64 {
    values.iter().fold(0.0, |acc, v| acc.max(v.abs()))
}

/// Newton's method `p ← p − damping · J(p)⁻¹ e(p)` with the Jacobian from dual numbers.
pub fn newton<S>(
    system: &S,
    initial_guess: &[f64],
    settings: &NewtonSettings,
) -> Result<NewtonResult>
where
    S: VectorField<f64> + VectorField<Dual>,
{
    let dim = <S as VectorField<f64>>::dimension(system);
    if dim == 0 {
        bail!("System has zero dimension.");
    }
    if initial_guess.len() != dim {
        bail!(
            "Initial guess dimension mismatch. Expected {}, got {}.",
            dim,
            initial_guess.len()
        );
    }
    if settings.max_steps == 0 {
        bail!("max_steps must be greater than zero.");
    }
    if !(settings.damping > 0.0) {
        bail!("damping must be positive.");
    }
    if !(settings.tolerance > 0.0) {
        bail!("tolerance must be positive.");
    }

    let mut state = initial_guess.to_vec();
    let mut residual = vec![0.0; dim];
    <S as VectorField<f64>>::apply(system, &state, &mut residual);
    let mut residual_norm = max_abs(&residual);
    let mut iterations = 0usize;

    while residual_norm > settings.tolerance && iterations < settings.max_steps {
        if !residual_norm.is_finite() {
            bail!(
                "Residual is not finite after {} Newton steps; the iterate left the domain.",
                iterations
            );
        }
        let jac = jacobian(system, &state);
        let delta = jac
            .lu()
            .solve(&DVector::from_column_slice(&residual))
            .ok_or_else(|| anyhow!("Jacobian is singular."))
            .context("Failed to solve linear system during Newton iteration.")?;

        for (x, d) in state.iter_mut().zip(delta.iter()) {
            *x -= settings.damping * d;
        }
        iterations += 1;
        <S as VectorField<f64>>::apply(system, &state, &mut residual);
        residual_norm = max_abs(&residual);
        debug!(iterations, residual_norm, "newton step");
    }

    let convergence = if residual_norm <= settings.tolerance {
        Convergence::reached(iterations, residual_norm)
    } else {
        warn!(
            iterations,
            residual_norm, "Newton solver hit max_steps before reaching tolerance"
        );
        Convergence::exhausted(iterations, residual_norm)
    };

    Ok(NewtonResult {
        state: DVector::from_vec(state),
        residual_norm,
        iterations,
        convergence,
    })
}

/// Bisection on `[lo, hi]`. `f(lo)` and `f(hi)` must not share a sign.
pub fn bisect<F>(f: F, lo: f64, hi: f64, settings: &BisectionSettings) -> Result<Root>
where
    F: Fn(f64) -> f64,
{
    if !(lo < hi) {
        bail!("Bisection bracket [{}, {}] is empty.", lo, hi);
    }
    if !(settings.tolerance > 0.0) {
        bail!("tolerance must be positive.");
    }
    let (mut lo, mut hi) = (lo, hi);
    let f_lo = f(lo);
    let f_hi = f(hi);
    if f_lo == 0.0 {
        return Ok(Root {
            root: lo,
            convergence: Convergence::reached(0, 0.0),
        });
    }
    if f_hi == 0.0 {
        return Ok(Root {
            root: hi,
            convergence: Convergence::reached(0, 0.0),
        });
    }
    if f_lo.signum() == f_hi.signum() {
        bail!(
            "No sign change on [{}, {}]: f(lo) = {}, f(hi) = {}.",
            lo,
            hi,
            f_lo,
            f_hi
        );
    }

    let lo_negative = f_lo < 0.0;
    let mut iterations = 0;
    while iterations < settings.max_iter {
        let mid = 0.5 * (lo + hi);
        let f_mid = f(mid);
        iterations += 1;
        if f_mid == 0.0 {
            return Ok(Root {
                root: mid,
                convergence: Convergence::reached(iterations, 0.0),
            });
        }
        if (f_mid < 0.0) == lo_negative {
            lo = mid;
        } else {
            hi = mid;
        }
        let half_width = 0.5 * (hi - lo);
        if half_width <= settings.tolerance {
            return Ok(Root {
                root: 0.5 * (lo + hi),
                convergence: Convergence::reached(iterations, half_width),
            });
        }
    }

    let half_width = 0.5 * (hi - lo);
    warn!(iterations, half_width, "bisection hit max_iter");
    Ok(Root {
        root: 0.5 * (lo + hi),
        convergence: Convergence::exhausted(iterations, half_width),
    })
}

#[cfg(test)]
mod tests {
    use super::{bisect, newton, BisectionSettings, ExcessDemand, NewtonSettings};
    use crate::autodiff::jacobian;
    use crate::traits::VectorField;
    use nalgebra::{DMatrix, DVector};

    fn assert_err_contains<T: std::fmt::Debug>(result: anyhow::Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err:#}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    fn scalar_market() -> ExcessDemand {
        ExcessDemand::new(
            DMatrix::from_element(1, 1, 1.0),
            DVector::from_element(1, 1.0),
            DVector::from_element(1, 1.0),
        )
        .expect("system")
    }

    #[test]
    fn newton_and_bisection_agree_for_single_good() {
        let market = scalar_market();
        let result = newton(&market, &[1.0], &NewtonSettings::default()).expect("newton");
        assert!(result.convergence.converged);
        assert!(result.residual_norm <= 1e-9);

        let e = |p: f64| (-p).exp() + 1.0 - p.sqrt();
        let root = bisect(e, 0.0, 4.0, &BisectionSettings::default()).expect("bisect");
        assert!(root.convergence.converged);
        assert!((root.root - result.state[0]).abs() < 1e-8);
    }

    #[test]
    fn newton_clears_random_market() {
        let market = ExcessDemand::random(40, 123).expect("system");
        for column in market.a.column_iter() {
            assert!((column.sum() - 1.0).abs() < 1e-12);
        }
        let settings = NewtonSettings {
            max_steps: 50,
            ..NewtonSettings::default()
        };
        let p0 = vec![1.0; 40];
        let result = newton(&market, &p0, &settings).expect("newton");
        assert!(result.convergence.converged);
        let mut residual = vec![0.0; 40];
        VectorField::<f64>::apply(&market, result.state.as_slice(), &mut residual);
        assert!(residual.iter().all(|r| r.abs() <= 1e-9));
        assert!(result.state.iter().all(|&p| p > 0.0));
    }

    #[test]
    fn dual_jacobian_matches_closed_form() {
        let market = ExcessDemand::random(4, 7).expect("system");
        let p = [0.5, 1.0, 1.5, 2.0];
        let jac = jacobian(&market, &p);
        let p_vec = DVector::from_column_slice(&p);
        let ap = &market.a * &p_vec;
        for i in 0..4 {
            for j in 0..4 {
                let mut expected = -(-ap[i]).exp() * market.a[(i, j)];
                if i == j {
                    expected -= market.b[i] / (2.0 * p[i].sqrt());
                }
                assert!((jac[(i, j)] - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn newton_reports_step_cap() {
        let market = ExcessDemand::random(10, 1).expect("system");
        let settings = NewtonSettings {
            max_steps: 1,
            tolerance: 1e-14,
            ..NewtonSettings::default()
        };
        let result = newton(&market, &[1.0; 10], &settings).expect("newton");
        assert!(!result.convergence.converged);
        assert_eq!(result.iterations, 1);
    }

    #[test]
    fn newton_rejects_bad_input() {
        let market = scalar_market();
        assert_err_contains(
            newton(&market, &[1.0, 2.0], &NewtonSettings::default()),
            "dimension mismatch",
        );
        let settings = NewtonSettings {
            damping: 0.0,
            ..NewtonSettings::default()
        };
        assert_err_contains(newton(&market, &[1.0], &settings), "damping");
    }

    #[test]
    fn bisection_requires_sign_change() {
        assert_err_contains(
            bisect(|x| x * x + 1.0, -1.0, 1.0, &BisectionSettings::default()),
            "No sign change",
        );
        let root = bisect(|x| x - 0.25, 0.0, 1.0, &BisectionSettings::default()).expect("root");
        assert!((root.root - 0.25).abs() < 1e-10);
    }
}
