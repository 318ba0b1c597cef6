//! Profile-likelihood-ratio test statistic.
//!
//! For a tested parameter-of-interest value `v`:
//!
//! `q(v) = 2 * (NLL(v, θ̂̂) − NLL(v̂, θ̂))`
//!
//! where the first term is the constrained fit (POI pinned to `v`, nuisances
//! profiled) and the second the unconstrained fit. `q ≥ 0` whenever both fits
//! reach their true optima; under Wilks' theorem it is asymptotically χ²(1),
//! but the scan driver calibrates it with toys instead of relying on that
//! approximation.

use crate::mle::MaximumLikelihoodEstimator;
use fc_core::traits::{LogDensityModel, PoiModel};
use fc_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Tolerance on a negative profile likelihood ratio. A small negative value
/// is warm-start noise and is clipped to zero; anything below this threshold
/// signals a failed or pathological minimization and is surfaced as an error.
pub(crate) const Q_NEGATIVE_TOLERANCE: f64 = 1e-4;

/// A computed profile-likelihood-ratio statistic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QValue {
    /// Test statistic `q = 2 (NLL_constrained − NLL_unconstrained)`, clipped
    /// at zero.
    pub q: f64,
    /// Best-fit POI value from the unconstrained fit.
    pub poi_hat: f64,
    /// NLL at the constrained minimum.
    pub nll_constrained: f64,
    /// NLL at the unconstrained minimum.
    pub nll_unconstrained: f64,
}

fn poi_index(model: &(impl PoiModel + ?Sized)) -> Result<usize> {
    model.poi_index().ok_or_else(|| Error::Validation("no POI defined".to_string()))
}

/// Turn `2·(NLL_c − NLL_u)` into a validated `q`.
pub(crate) fn clip_q(two_delta_nll: f64) -> Result<f64> {
    if !two_delta_nll.is_finite() {
        return Err(Error::Computation(format!(
            "profile likelihood ratio is not finite: {two_delta_nll}"
        )));
    }
    if two_delta_nll < -Q_NEGATIVE_TOLERANCE {
        return Err(Error::Computation(format!(
            "negative profile likelihood ratio beyond tolerance: q = {two_delta_nll} \
             (constrained fit found a better optimum than the unconstrained fit)"
        )));
    }
    Ok(two_delta_nll.max(0.0))
}

/// Compute `q(v)` for a dataset, starting both fits from the model's
/// suggested initial point.
pub fn profile_q<M>(mle: &MaximumLikelihoodEstimator, model: &M, poi_value: f64) -> Result<QValue>
where
    M: LogDensityModel + PoiModel,
{
    let init = model.parameter_init();
    profile_q_from(mle, model, poi_value, &init)
}

/// Compute `q(v)` with an explicit start for the unconstrained fit.
///
/// The constrained fit is warm-started from the unconstrained optimum with
/// the POI bound clamped to `(v, v)`. The model is never mutated, so repeated
/// calls with identical inputs are bit-identical and the caller's parameter
/// snapshots are untouched.
pub fn profile_q_from<M>(
    mle: &MaximumLikelihoodEstimator,
    model: &M,
    poi_value: f64,
    init_free: &[f64],
) -> Result<QValue>
where
    M: LogDensityModel + PoiModel,
{
    let poi = poi_index(model)?;
    let bounds = model.parameter_bounds();
    if poi >= bounds.len() {
        return Err(Error::Validation(format!(
            "POI index out of bounds: poi={poi}, dim={}",
            bounds.len()
        )));
    }

    let free = mle.fit_minimum_from(model, init_free)?;
    if !free.converged {
        return Err(Error::Convergence(format!(
            "unconstrained fit did not converge: {}",
            free.message
        )));
    }

    let mut bounds_fixed = bounds;
    bounds_fixed[poi] = (poi_value, poi_value);
    let mut init_fixed = free.parameters.clone();
    init_fixed[poi] = poi_value;

    let fixed = mle.fit_minimum_with_bounds(model, &init_fixed, &bounds_fixed)?;
    if !fixed.converged {
        return Err(Error::Convergence(format!(
            "constrained fit at POI = {poi_value} did not converge: {}",
            fixed.message
        )));
    }

    let q = clip_q(2.0 * (fixed.fval - free.fval))?;
    Ok(QValue {
        q,
        poi_hat: free.parameters[poi],
        nll_constrained: fixed.fval,
        nll_unconstrained: free.fval,
    })
}
