/// The `dynprog_core` crate solves infinite-horizon discrete-state dynamic programs.
/// Values and policies are `(n_states, n_shocks)` matrices over an endogenous grid
/// and a finite Markov chain of exogenous shocks.
///
/// Key components:
/// - **Traits**: `DiscreteDp` (model abstraction), `Scalar` and `VectorField` (root finding).
/// - **Grid / Model**: Tauchen discretization, Markov chains, the savings and investment models.
/// - **Bellman**: right-hand side, Bellman operator, greedy policy and `T_σ`.
/// - **Policy evaluation**: dense LU or BiCGSTAB on the sparse `I − β P_σ`.
/// - **Solvers**: value function iteration, Howard and optimistic policy iteration.
/// - **Applications**: cake eating, McCall job search, Lucas asset pricing, and a
///   Newton solver for excess demand with Jacobians from dual numbers.
pub mod asset_pricing;
pub mod autodiff;
pub mod bellman;
pub mod cake;
pub mod distribution;
pub mod equilibrium;
pub mod error;
pub mod grid;
pub mod job_search;
pub mod model;
pub mod policy_eval;
pub mod solvers;
pub mod traits;
pub mod utility;
