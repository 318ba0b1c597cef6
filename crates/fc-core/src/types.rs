//! Common data types.

use serde::{Deserialize, Serialize};

/// Result of a maximum-likelihood fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Best-fit parameter values.
    pub parameters: Vec<f64>,

    /// Parameter uncertainties (sqrt of covariance diagonal, or a diagonal
    /// Hessian approximation when inversion failed).
    pub uncertainties: Vec<f64>,

    /// Covariance matrix (row-major, N×N). `None` if Hessian inversion failed.
    pub covariance: Option<Vec<f64>>,

    /// Negative log-likelihood at the minimum.
    pub nll: f64,

    /// Whether the minimizer reported convergence.
    pub converged: bool,

    /// Number of objective evaluations.
    pub n_fev: usize,

    /// Number of gradient evaluations.
    pub n_gev: usize,
}

impl FitResult {
    /// Create a fit result without a covariance matrix.
    pub fn new(
        parameters: Vec<f64>,
        uncertainties: Vec<f64>,
        nll: f64,
        converged: bool,
        n_fev: usize,
        n_gev: usize,
    ) -> Self {
        Self { parameters, uncertainties, covariance: None, nll, converged, n_fev, n_gev }
    }

    /// Create a fit result with a covariance matrix.
    pub fn with_covariance(
        parameters: Vec<f64>,
        uncertainties: Vec<f64>,
        covariance: Vec<f64>,
        nll: f64,
        converged: bool,
        n_fev: usize,
        n_gev: usize,
    ) -> Self {
        Self {
            parameters,
            uncertainties,
            covariance: Some(covariance),
            nll,
            converged,
            n_fev,
            n_gev,
        }
    }

    /// Correlation matrix element `(i, j)`. `None` if covariance is
    /// unavailable, indices are out of range, or an uncertainty is non-positive.
    pub fn correlation(&self, i: usize, j: usize) -> Option<f64> {
        let cov = self.covariance.as_ref()?;
        let n = self.parameters.len();
        if i >= n || j >= n {
            return None;
        }
        let sigma_i = self.uncertainties[i];
        let sigma_j = self.uncertainties[j];
        if sigma_i <= 0.0 || sigma_j <= 0.0 {
            return None;
        }
        Some(cov[i * n + j] / (sigma_i * sigma_j))
    }
}
