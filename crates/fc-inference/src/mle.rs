//! Maximum likelihood estimation.

use crate::optimizer::{LbfgsbOptimizer, ObjectiveFunction, OptimizationResult, OptimizerConfig};
use fc_core::traits::LogDensityModel;
use fc_core::{FitResult, Result};
use nalgebra::DMatrix;

/// Adapter exposing a model's NLL as an optimizer objective.
struct NllObjective<'a, M: LogDensityModel + ?Sized> {
    model: &'a M,
}

impl<M: LogDensityModel + ?Sized> ObjectiveFunction for NllObjective<'_, M> {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        self.model.nll(params)
    }

    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        self.model.grad_nll(params)
    }
}

/// Maximum likelihood estimator.
///
/// Fits statistical models by minimizing the negative log-likelihood. Holds
/// only optimizer configuration; every fit is a pure function of the model
/// and the supplied start point, so one estimator can serve concurrent fits.
#[derive(Debug, Clone)]
pub struct MaximumLikelihoodEstimator {
    config: OptimizerConfig,
}

impl MaximumLikelihoodEstimator {
    /// Create a new estimator with default optimizer configuration.
    pub fn new() -> Self {
        Self { config: OptimizerConfig::default() }
    }

    /// Create an estimator with a custom optimizer configuration.
    pub fn with_config(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Access the optimizer configuration.
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Minimize the NLL from the model's suggested initial point.
    pub fn fit_minimum(&self, model: &impl LogDensityModel) -> Result<OptimizationResult> {
        let init = model.parameter_init();
        self.fit_minimum_from(model, &init)
    }

    /// Minimize the NLL from an explicit starting point (warm start).
    ///
    /// Warm starts matter for scans: consecutive points are highly
    /// correlated, and restarting from `parameter_init()` is slow.
    pub fn fit_minimum_from(
        &self,
        model: &impl LogDensityModel,
        initial_params: &[f64],
    ) -> Result<OptimizationResult> {
        self.fit_minimum_with_bounds(model, initial_params, &model.parameter_bounds())
    }

    /// Minimize the NLL with explicit bounds overriding the model's.
    ///
    /// This is how a parameter is held fixed during a constrained fit: clamp
    /// its bounds to a single value. No model copy, no mutable parameter flag.
    pub fn fit_minimum_with_bounds(
        &self,
        model: &impl LogDensityModel,
        initial_params: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        if initial_params.len() != model.dim() {
            return Err(fc_core::Error::Validation(format!(
                "fit_minimum_with_bounds: initial_params length {} != model.dim() {}",
                initial_params.len(),
                model.dim()
            )));
        }
        if bounds.len() != model.dim() {
            return Err(fc_core::Error::Validation(format!(
                "fit_minimum_with_bounds: bounds length {} != model.dim() {}",
                bounds.len(),
                model.dim()
            )));
        }
        let objective = NllObjective { model };
        let optimizer = LbfgsbOptimizer::new(self.config.clone());
        optimizer.minimize(&objective, initial_params, bounds)
    }

    /// Full fit: minimize, then estimate uncertainties from the Hessian.
    ///
    /// The covariance is the inverse Hessian of the NLL at the minimum; if
    /// inversion fails (or produces invalid variances) the result falls back
    /// to the diagonal approximation with a warning.
    pub fn fit(&self, model: &impl LogDensityModel) -> Result<FitResult> {
        let result = self.fit_minimum(model)?;
        let n = result.parameters.len();

        let hessian = self.compute_hessian(model, &result.parameters)?;
        let diag_uncertainties = diagonal_uncertainties(&hessian, n);

        let fr = match invert_hessian(&hessian, n) {
            Some(covariance) => {
                let mut all_variances_ok = true;
                let mut uncertainties = Vec::with_capacity(n);
                for i in 0..n {
                    let var = covariance[(i, i)];
                    if var.is_finite() && var > 0.0 {
                        uncertainties.push(var.sqrt());
                    } else {
                        all_variances_ok = false;
                        uncertainties.push(diag_uncertainties[i]);
                    }
                }

                if all_variances_ok {
                    let cov_flat: Vec<f64> = covariance.iter().copied().collect();
                    FitResult::with_covariance(
                        result.parameters,
                        uncertainties,
                        cov_flat,
                        result.fval,
                        result.converged,
                        result.n_fev,
                        result.n_gev,
                    )
                } else {
                    log::warn!("invalid covariance diagonal; omitting covariance matrix");
                    FitResult::new(
                        result.parameters,
                        uncertainties,
                        result.fval,
                        result.converged,
                        result.n_fev,
                        result.n_gev,
                    )
                }
            }
            None => {
                log::warn!("Hessian inversion failed, using diagonal approximation");
                FitResult::new(
                    result.parameters,
                    diag_uncertainties,
                    result.fval,
                    result.converged,
                    result.n_fev,
                    result.n_gev,
                )
            }
        };

        Ok(fr)
    }

    /// Hessian of the NLL by central differences of the analytic gradient.
    fn compute_hessian(
        &self,
        model: &impl LogDensityModel,
        params: &[f64],
    ) -> Result<DMatrix<f64>> {
        let n = params.len();
        let mut hessian = DMatrix::zeros(n, n);

        for i in 0..n {
            let eps = 1e-5 * params[i].abs().max(1.0);

            let mut p_plus = params.to_vec();
            p_plus[i] += eps;
            let g_plus = model.grad_nll(&p_plus)?;

            let mut p_minus = params.to_vec();
            p_minus[i] -= eps;
            let g_minus = model.grad_nll(&p_minus)?;

            for j in 0..n {
                hessian[(i, j)] = (g_plus[j] - g_minus[j]) / (2.0 * eps);
            }
        }

        // Symmetrize (finite differences of the gradient are not exactly so).
        for i in 0..n {
            for j in (i + 1)..n {
                let avg = 0.5 * (hessian[(i, j)] + hessian[(j, i)]);
                hessian[(i, j)] = avg;
                hessian[(j, i)] = avg;
            }
        }

        Ok(hessian)
    }
}

impl Default for MaximumLikelihoodEstimator {
    fn default() -> Self {
        Self::new()
    }
}

fn diagonal_uncertainties(hessian: &DMatrix<f64>, n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let h = hessian[(i, i)];
            if h.is_finite() && h > 0.0 { (1.0 / h).sqrt() } else { f64::NAN }
        })
        .collect()
}

fn invert_hessian(hessian: &DMatrix<f64>, n: usize) -> Option<DMatrix<f64>> {
    if n == 0 {
        return None;
    }
    hessian.clone().try_inverse()
}
