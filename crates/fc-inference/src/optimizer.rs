//! Optimization algorithms.
//!
//! Thin wrapper around argmin's L-BFGS with box bounds enforced by clamping.
//! The wrapper is a pure function of `(objective, start, bounds)`: no state is
//! retained between calls, so concurrent invocations are safe by construction.

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use fc_core::Result;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Objective value substituted when an evaluation fails (out-of-domain
/// density, non-finite intermediate). Large enough that the line search backs
/// off, finite so the solver keeps going.
const EVAL_FAILURE_COST: f64 = 1e30;

/// Configuration for the L-BFGS-B optimizer.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Maximum number of iterations.
    pub max_iter: u64,
    /// Convergence tolerance for the gradient norm.
    pub tol: f64,
    /// Number of corrections used to approximate the inverse Hessian.
    pub m: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iter: 1000, tol: 1e-6, m: 10 }
    }
}

/// Result of one minimization run.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Best-fit parameters (clamped into bounds).
    pub parameters: Vec<f64>,
    /// Objective value at the minimum.
    pub fval: f64,
    /// Number of solver iterations.
    pub n_iter: u64,
    /// Number of objective (cost) evaluations.
    pub n_fev: usize,
    /// Number of gradient evaluations.
    pub n_gev: usize,
    /// Convergence status.
    pub converged: bool,
    /// Termination message.
    pub message: String,
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizationResult(fval={:.6}, n_iter={}, n_fev={}, n_gev={}, converged={})",
            self.fval, self.n_iter, self.n_fev, self.n_gev, self.converged
        )
    }
}

/// Objective function trait for optimization.
pub trait ObjectiveFunction: Send + Sync {
    /// Evaluate the objective at the given parameters.
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Gradient at the given parameters (central differences if not overridden).
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let n = params.len();
        let mut grad = vec![0.0; n];

        for i in 0..n {
            // Adaptive step: eps ~ sqrt(machine epsilon) * max(|x_i|, 1).
            let eps = 1e-8 * params[i].abs().max(1.0);

            let mut params_plus = params.to_vec();
            params_plus[i] += eps;
            let f_plus = self.eval(&params_plus)?;

            let mut params_minus = params.to_vec();
            params_minus[i] -= eps;
            let f_minus = self.eval(&params_minus)?;

            grad[i] = (f_plus - f_minus) / (2.0 * eps);
        }

        Ok(grad)
    }
}

fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params.iter().zip(bounds.iter()).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

#[derive(Default)]
struct FuncCounts {
    cost: AtomicUsize,
    grad: AtomicUsize,
}

/// Adapter making an [`ObjectiveFunction`] usable by argmin.
struct ArgminProblem<'a> {
    objective: &'a dyn ObjectiveFunction,
    bounds: &'a [(f64, f64)],
    counts: Arc<FuncCounts>,
}

impl CostFunction for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.counts.cost.fetch_add(1, Ordering::Relaxed);
        let clamped = clamp_params(params, self.bounds);
        // Evaluation failures are "worse points", not fatal: the line search
        // retreats from them instead of aborting the whole run.
        match self.objective.eval(&clamped) {
            Ok(v) if v.is_finite() => Ok(v),
            Ok(_) => Ok(EVAL_FAILURE_COST),
            Err(_) => Ok(EVAL_FAILURE_COST),
        }
    }
}

impl Gradient for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(
        &self,
        params: &Self::Param,
    ) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        self.counts.grad.fetch_add(1, Ordering::Relaxed);
        let clamped = clamp_params(params, self.bounds);
        let mut g = self
            .objective
            .gradient(&clamped)
            .map_err(|e| argmin::core::Error::msg(e.to_string()))?;

        // Projected gradient: at an active bound, a component pushing further
        // outside is zeroed, so the solver can converge on the boundary
        // instead of repeatedly stepping into the clamped flat region.
        const EPS: f64 = 1e-12;
        for (i, (&x, &(lo, hi))) in clamped.iter().zip(self.bounds.iter()).enumerate() {
            if x <= lo + EPS && g[i] > 0.0 {
                g[i] = 0.0;
            }
            if x >= hi - EPS && g[i] < 0.0 {
                g[i] = 0.0;
            }
        }

        Ok(g)
    }
}

/// L-BFGS-B optimizer with box constraints.
pub struct LbfgsbOptimizer {
    config: OptimizerConfig,
}

impl LbfgsbOptimizer {
    /// Create a new optimizer with the given configuration.
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Minimize `objective` from `init_params` within `bounds`.
    ///
    /// Deterministic given identical inputs; the start point is always the
    /// supplied vector (clamped), never randomized.
    pub fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init_params: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        if init_params.len() != bounds.len() {
            return Err(fc_core::Error::Validation(format!(
                "parameter and bounds length mismatch: {} != {}",
                init_params.len(),
                bounds.len()
            )));
        }

        let init_clamped = clamp_params(init_params, bounds);
        let counts = Arc::new(FuncCounts::default());
        let problem = ArgminProblem { objective, bounds, counts: counts.clone() };

        let linesearch = MoreThuenteLineSearch::new();
        // Argmin's default cost tolerance is ~machine epsilon, which is too
        // strict for NLL scales and leads to spurious max-iter terminations.
        let tol_cost =
            if self.config.tol == 0.0 { 0.0 } else { (0.1 * self.config.tol).max(1e-12) };
        let solver = LBFGS::new(linesearch, self.config.m)
            .with_tolerance_grad(self.config.tol)
            .map_err(|e| {
                fc_core::Error::Validation(format!("invalid optimizer configuration (tol): {e}"))
            })?
            .with_tolerance_cost(tol_cost)
            .map_err(|e| {
                fc_core::Error::Validation(format!(
                    "invalid optimizer configuration (tol_cost): {e}"
                ))
            })?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.param(init_clamped).max_iters(self.config.max_iter))
            .run()
            .map_err(|e| fc_core::Error::Computation(format!("optimization failed: {e}")))?;

        let state = res.state();
        let best_params_unclamped = state
            .get_best_param()
            .ok_or_else(|| fc_core::Error::Computation("no best parameters found".to_string()))?
            .clone();
        let best_params = clamp_params(&best_params_unclamped, bounds);
        let fval = state.get_best_cost();
        let n_iter = state.get_iter();
        let n_fev = counts.cost.load(Ordering::Relaxed);
        let n_gev = counts.grad.load(Ordering::Relaxed);

        let termination = state.get_termination_status();
        let converged = matches!(
            termination,
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
                | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
        );
        let message = termination.to_string();

        Ok(OptimizationResult {
            parameters: best_params,
            fval,
            n_iter,
            n_fev,
            n_gev,
            converged,
            message,
        })
    }
}

impl Default for LbfgsbOptimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}
