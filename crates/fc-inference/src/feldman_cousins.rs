//! Toy-calibrated Feldman-Cousins confidence scan.
//!
//! For each candidate POI value `v` the driver computes the observed profile
//! likelihood ratio `q_obs(v)`, then generates an ensemble of extended toy
//! datasets at `v`, recomputes the statistic on each, and reports the
//! empirical tail probability `p(v) = #{q_toy > q_obs} / n_toys`. The
//! acceptance region at confidence level `1 − α` is the set of scanned values
//! with `p > α`.
//!
//! Notes / current scope:
//! - Toys fluctuate the event-level dataset only; toy generation happens at
//!   an explicit base parameter snapshot (the observed free fit, POI moved to
//!   `v`), so no nuisance drift can leak between iterations.
//! - Randomness is deterministic via per-toy seeding, independent of
//!   threading; rerunning a scan with the same seed reproduces it exactly.

use crate::mle::MaximumLikelihoodEstimator;
use crate::optimizer::OptimizationResult;
use crate::test_statistic::clip_q;
use fc_core::traits::{FixedParamModel, LogDensityModel, PoiModel, ToySampleModel};
use fc_core::{Error, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Seed stride between scan points, so per-toy seeds never collide across
/// points for any realistic toy count.
const POINT_SEED_STRIDE: u64 = 1_000_000_000;

/// Policy applied when the observed-data fit for a scan point fails
/// (non-convergence or a numerical anomaly in `q_obs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Abort the whole scan (default).
    Abort,
    /// Drop the point from the result, with a warning.
    Skip,
    /// Re-fit cold from the model's initial point up to the given number of
    /// extra attempts, then abort.
    Retry {
        /// Maximum number of additional cold-start attempts.
        max_attempts: usize,
    },
}

/// Configuration for a Feldman-Cousins scan.
#[derive(Debug, Clone)]
pub struct FcScanConfig {
    /// First scanned POI value (inclusive).
    pub start: f64,
    /// End of the scan range (exclusive).
    pub stop: f64,
    /// Step between candidates (must be > 0).
    pub step: f64,
    /// Number of toys per scan point (must be > 0).
    pub n_toys: usize,
    /// Base random seed for toy generation.
    pub seed: u64,
    /// Significance level `α`; the acceptance region keeps `p > α`.
    pub alpha: f64,
    /// Names of nuisance parameters to freeze at their observed best-fit
    /// values before scanning. Which parameters are profiled versus fixed is
    /// a policy decision owned by the caller, never hardwired here.
    pub freeze: Vec<String>,
    /// Failure policy for observed-data fits.
    pub on_failure: FailurePolicy,
    /// Scanned value at which to keep the full toy statistic sample, for
    /// diagnostic visualization of the null distribution.
    pub reference_point: Option<f64>,
}

impl FcScanConfig {
    /// Create a configuration with the given grid and toy count; remaining
    /// fields get workable defaults (`seed = 0`, `alpha = 0.32`, nothing
    /// frozen, abort on failure, no reference point).
    pub fn new(start: f64, stop: f64, step: f64, n_toys: usize) -> Self {
        Self {
            start,
            stop,
            step,
            n_toys,
            seed: 0,
            alpha: 0.32,
            freeze: Vec::new(),
            on_failure: FailurePolicy::Abort,
            reference_point: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.n_toys == 0 {
            return Err(Error::Validation(
                "n_toys must be > 0 (p-value undefined for an empty ensemble)".into(),
            ));
        }
        if !self.step.is_finite() || self.step <= 0.0 {
            return Err(Error::Validation(format!("step must be finite and > 0, got {}", self.step)));
        }
        if !self.start.is_finite() || !self.stop.is_finite() {
            return Err(Error::Validation(format!(
                "scan range must be finite, got [{}, {})",
                self.start, self.stop
            )));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(Error::Validation(format!("alpha must be in (0, 1), got {}", self.alpha)));
        }
        Ok(())
    }

    /// The scanned candidate values: `start, start + step, …` while `< stop`,
    /// in increasing order. `start >= stop` yields an empty grid.
    pub fn grid(&self) -> Vec<f64> {
        let mut values = Vec::new();
        if self.start >= self.stop {
            return values;
        }
        let mut i = 0u64;
        loop {
            let v = self.start + (i as f64) * self.step;
            if v >= self.stop {
                break;
            }
            values.push(v);
            i += 1;
        }
        values
    }
}

/// One scanned point: immutable once computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanPoint {
    /// Tested POI value.
    pub value: f64,
    /// Observed test statistic `q_obs(value)`.
    pub q_obs: f64,
    /// Empirical p-value, exactly `n_exceeding / n_toys`.
    pub p_value: f64,
    /// Number of toys with `q_toy > q_obs` (strict).
    pub n_exceeding: usize,
    /// Number of requested toys.
    pub n_toys: usize,
    /// Toys whose generation or fits errored (excluded from `n_exceeding`,
    /// still counted in the denominator).
    pub n_error: usize,
    /// Toys whose fits ran but did not both report convergence.
    pub n_nonconverged: usize,
    /// Toys whose extended generation produced zero events.
    pub n_empty_toys: usize,
}

/// Toy statistic sample kept at the reference scan point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NullDistribution {
    /// Reference POI value.
    pub value: f64,
    /// Observed statistic at the reference value.
    pub q_obs: f64,
    /// Toy statistics in toy-index order (failed toys omitted).
    pub q_toys: Vec<f64>,
}

/// Result of a Feldman-Cousins scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FcScan {
    /// POI index in the model's parameter order.
    pub poi_index: usize,
    /// Unconstrained best-fit POI on observed data (after freezing).
    pub poi_hat: f64,
    /// NLL at the unconstrained minimum.
    pub nll_hat: f64,
    /// Scanned points, strictly increasing in `value`.
    pub points: Vec<ScanPoint>,
    /// Toy statistic sample at the reference point, if one was configured
    /// and scanned.
    pub reference: Option<NullDistribution>,
    /// Set when `poi_hat` fell outside the scan range: the scan then may not
    /// bracket the true interval.
    pub poi_hat_outside_scan: bool,
}

impl FcScan {
    /// Scanned values whose p-value exceeds `alpha` (the acceptance region at
    /// confidence level `1 − alpha`).
    pub fn acceptance_region(&self, alpha: f64) -> Vec<f64> {
        self.points.iter().filter(|p| p.p_value > alpha).map(|p| p.value).collect()
    }

    /// Envelope `(low, high)` of the acceptance region, if non-empty.
    pub fn interval(&self, alpha: f64) -> Option<(f64, f64)> {
        let accepted = self.acceptance_region(alpha);
        match (accepted.first(), accepted.last()) {
            (Some(&lo), Some(&hi)) => Some((lo, hi)),
            _ => None,
        }
    }
}

/// Per-ensemble counters, merged by associative reduction across toys.
#[derive(Debug, Clone, Copy, Default)]
struct ToyCounts {
    n_exceeding: usize,
    n_valid: usize,
    n_error: usize,
    n_nonconverged: usize,
    n_empty: usize,
}

impl ToyCounts {
    fn merge(a: Self, b: Self) -> Self {
        Self {
            n_exceeding: a.n_exceeding + b.n_exceeding,
            n_valid: a.n_valid + b.n_valid,
            n_error: a.n_error + b.n_error,
            n_nonconverged: a.n_nonconverged + b.n_nonconverged,
            n_empty: a.n_empty + b.n_empty,
        }
    }
}

/// Outcome of one toy iteration.
struct ToyOutcome {
    q: Option<f64>,
    converged: bool,
    empty: bool,
}

impl ToyOutcome {
    fn failed(empty: bool) -> Self {
        Self { q: None, converged: false, empty }
    }
}

fn run_toy<M>(
    mle: &MaximumLikelihoodEstimator,
    model: &M,
    poi: usize,
    poi_value: f64,
    gen_params: &[f64],
    bounds_fixed: &[(f64, f64)],
    toy_seed: u64,
) -> ToyOutcome
where
    M: LogDensityModel + ToySampleModel,
{
    let draw = match model.sample_toy(gen_params, toy_seed) {
        Ok(d) => d,
        Err(_) => return ToyOutcome::failed(false),
    };
    let empty = draw.n_events == 0;

    let free = match mle.fit_minimum_from(&draw.model, gen_params) {
        Ok(f) => f,
        Err(_) => return ToyOutcome::failed(empty),
    };

    let mut init_fixed = free.parameters.clone();
    init_fixed[poi] = poi_value;
    let fixed = match mle.fit_minimum_with_bounds(&draw.model, &init_fixed, bounds_fixed) {
        Ok(f) => f,
        Err(_) => return ToyOutcome::failed(empty),
    };

    let q = match clip_q(2.0 * (fixed.fval - free.fval)) {
        Ok(q) => q,
        Err(_) => return ToyOutcome::failed(empty),
    };

    ToyOutcome { q: Some(q), converged: free.converged && fixed.converged, empty }
}

/// Count strict exceedances over the toy ensemble (no sample kept).
#[allow(clippy::too_many_arguments)]
fn count_exceeding_ensemble<M>(
    mle: &MaximumLikelihoodEstimator,
    model: &M,
    poi: usize,
    poi_value: f64,
    q_obs: f64,
    gen_params: &[f64],
    bounds_fixed: &[(f64, f64)],
    n_toys: usize,
    seed: u64,
) -> ToyCounts
where
    M: LogDensityModel + ToySampleModel + Sync,
{
    (0..n_toys)
        .into_par_iter()
        .map(|toy_idx| {
            let toy_seed = seed.wrapping_add(toy_idx as u64);
            let out =
                run_toy(mle, model, poi, poi_value, gen_params, bounds_fixed, toy_seed);
            match out.q {
                Some(q) => ToyCounts {
                    n_exceeding: usize::from(q > q_obs),
                    n_valid: 1,
                    n_error: 0,
                    n_nonconverged: usize::from(!out.converged),
                    n_empty: usize::from(out.empty),
                },
                None => ToyCounts {
                    n_error: 1,
                    n_empty: usize::from(out.empty),
                    ..ToyCounts::default()
                },
            }
        })
        .reduce(ToyCounts::default, ToyCounts::merge)
}

/// Like [`count_exceeding_ensemble`], additionally collecting the toy
/// statistics in toy-index order (for the reference-point diagnostic).
#[allow(clippy::too_many_arguments)]
fn collect_q_ensemble<M>(
    mle: &MaximumLikelihoodEstimator,
    model: &M,
    poi: usize,
    poi_value: f64,
    q_obs: f64,
    gen_params: &[f64],
    bounds_fixed: &[(f64, f64)],
    n_toys: usize,
    seed: u64,
) -> (ToyCounts, Vec<f64>)
where
    M: LogDensityModel + ToySampleModel + Sync,
{
    let outcomes: Vec<ToyOutcome> = (0..n_toys)
        .into_par_iter()
        .map(|toy_idx| {
            let toy_seed = seed.wrapping_add(toy_idx as u64);
            run_toy(mle, model, poi, poi_value, gen_params, bounds_fixed, toy_seed)
        })
        .collect();

    let mut counts = ToyCounts::default();
    let mut q_toys = Vec::with_capacity(n_toys);
    for out in outcomes {
        counts.n_empty += usize::from(out.empty);
        match out.q {
            Some(q) => {
                counts.n_valid += 1;
                counts.n_exceeding += usize::from(q > q_obs);
                counts.n_nonconverged += usize::from(!out.converged);
                q_toys.push(q);
            }
            None => counts.n_error += 1,
        }
    }
    (counts, q_toys)
}

/// Constrained observed-data fit for one scan point, applying the failure
/// policy. `Ok(None)` means the point is skipped.
fn observed_constrained_fit<M>(
    mle: &MaximumLikelihoodEstimator,
    model: &M,
    poi: usize,
    poi_value: f64,
    warm: &[f64],
    bounds_fixed: &[(f64, f64)],
    policy: FailurePolicy,
) -> Result<Option<OptimizationResult>>
where
    M: LogDensityModel,
{
    let mut init = warm.to_vec();
    init[poi] = poi_value;

    let mut attempt = mle.fit_minimum_with_bounds(model, &init, bounds_fixed);
    if let Ok(fit) = &attempt {
        if !fit.converged {
            attempt = Err(Error::Convergence(format!(
                "constrained fit at POI = {poi_value} did not converge: {}",
                fit.message
            )));
        }
    }

    if attempt.is_err() {
        if let FailurePolicy::Retry { max_attempts } = policy {
            // Deterministic retries: cold start from the model's initial point.
            let mut cold = model.parameter_init();
            cold[poi] = poi_value;
            for _ in 0..max_attempts {
                match mle.fit_minimum_with_bounds(model, &cold, bounds_fixed) {
                    Ok(fit) if fit.converged => {
                        attempt = Ok(fit);
                        break;
                    }
                    Ok(fit) => {
                        attempt = Err(Error::Convergence(format!(
                            "constrained fit at POI = {poi_value} did not converge after retry: {}",
                            fit.message
                        )));
                    }
                    Err(e) => attempt = Err(e),
                }
            }
        }
    }

    match attempt {
        Ok(fit) => Ok(Some(fit)),
        Err(e) => match policy {
            FailurePolicy::Skip => {
                log::warn!("skipping scan point at POI = {poi_value}: {e}");
                Ok(None)
            }
            _ => Err(e),
        },
    }
}

/// Run the Feldman-Cousins scan.
///
/// The returned points are ordered by increasing `value`; every p-value is an
/// exact `k / n_toys` in `[0, 1]`.
pub fn scan<M>(
    mle: &MaximumLikelihoodEstimator,
    model: &M,
    config: &FcScanConfig,
) -> Result<FcScan>
where
    M: LogDensityModel + PoiModel + FixedParamModel + ToySampleModel + Sync,
{
    config.validate()?;

    let poi = model
        .poi_index()
        .ok_or_else(|| Error::Validation("no POI defined".to_string()))?;

    // Every scanned value must lie inside the POI's declared domain.
    let values = config.grid();
    let (poi_lo, poi_hi) = model.parameter_bounds()[poi];
    if let (Some(&first), Some(&last)) = (values.first(), values.last()) {
        if first < poi_lo || last > poi_hi {
            return Err(Error::Validation(format!(
                "scan range [{first}, {last}] leaves the POI domain [{poi_lo}, {poi_hi}]"
            )));
        }
    }

    // Base fit on observed data: all parameters free. Its parameter vector is
    // the base configuration every later step starts from.
    let base = mle.fit_minimum(model)?;
    if !base.converged {
        return Err(Error::Convergence(format!(
            "observed-data free fit did not converge: {}",
            base.message
        )));
    }

    // Freeze policy: pin the configured nuisances at their base-fit values.
    let names = model.parameter_names();
    let mut frozen: Option<M> = None;
    for name in &config.freeze {
        let idx = names.iter().position(|n| n == name).ok_or_else(|| {
            Error::Validation(format!("freeze list names unknown parameter '{name}'"))
        })?;
        if idx == poi {
            return Err(Error::Validation(format!(
                "cannot freeze the parameter of interest '{name}'"
            )));
        }
        frozen = Some(match frozen.take() {
            Some(m) => m.with_fixed_param(idx, base.parameters[idx]),
            None => model.with_fixed_param(idx, base.parameters[idx]),
        });
    }

    let scan_model_owned;
    let scan_model: &M = match frozen {
        Some(m) => {
            scan_model_owned = m;
            &scan_model_owned
        }
        None => model,
    };

    // Observed unconstrained fit on the frozen model (instant when nothing
    // was frozen: it starts at the base optimum).
    let free_obs = mle.fit_minimum_from(scan_model, &base.parameters)?;
    if !free_obs.converged {
        return Err(Error::Convergence(format!(
            "observed-data free fit (after freezing) did not converge: {}",
            free_obs.message
        )));
    }
    let nll_hat = free_obs.fval;
    let poi_hat = free_obs.parameters[poi];

    let poi_hat_outside_scan = !values.is_empty()
        && !(poi_hat >= config.start && poi_hat < config.stop);
    if poi_hat_outside_scan {
        log::warn!(
            "best-fit POI {poi_hat} lies outside the scan range [{}, {}); \
             the scan may not bracket the true interval",
            config.start,
            config.stop
        );
    }

    let bounds = scan_model.parameter_bounds();
    let base_params = base.parameters.clone();

    let mut points = Vec::with_capacity(values.len());
    let mut reference = None;
    let mut warm = free_obs.parameters.clone();

    for (point_idx, &v) in values.iter().enumerate() {
        let mut bounds_fixed = bounds.clone();
        bounds_fixed[poi] = (v, v);

        let fixed = match observed_constrained_fit(
            mle,
            scan_model,
            poi,
            v,
            &warm,
            &bounds_fixed,
            config.on_failure,
        )? {
            Some(fit) => fit,
            None => continue,
        };

        let q_obs = match clip_q(2.0 * (fixed.fval - nll_hat)) {
            Ok(q) => q,
            Err(e) => match config.on_failure {
                FailurePolicy::Skip => {
                    log::warn!("skipping scan point at POI = {v}: {e}");
                    continue;
                }
                _ => return Err(e),
            },
        };

        // Carry forward for the next point's warm start.
        warm = fixed.parameters.clone();

        // Generation snapshot: the explicit base configuration with the POI
        // moved to the tested value. Toys always generate from this snapshot,
        // never from whatever a previous fit left behind.
        let mut gen_params = base_params.clone();
        gen_params[poi] = v;

        let point_seed = config.seed.wrapping_add((point_idx as u64).wrapping_mul(POINT_SEED_STRIDE));

        let is_reference = config
            .reference_point
            .is_some_and(|r| (v - r).abs() <= 1e-9 * r.abs().max(1.0));

        let counts = if is_reference {
            let (counts, q_toys) = collect_q_ensemble(
                mle,
                scan_model,
                poi,
                v,
                q_obs,
                &gen_params,
                &bounds_fixed,
                config.n_toys,
                point_seed,
            );
            reference = Some(NullDistribution { value: v, q_obs, q_toys });
            counts
        } else {
            count_exceeding_ensemble(
                mle,
                scan_model,
                poi,
                v,
                q_obs,
                &gen_params,
                &bounds_fixed,
                config.n_toys,
                point_seed,
            )
        };

        if counts.n_valid == 0 {
            return Err(Error::Computation(format!(
                "all {} toys failed at POI = {v}; p-value would be meaningless",
                config.n_toys
            )));
        }

        // Exact k/N with the requested ensemble size as denominator; errored
        // toys cannot exceed, they only degrade precision, and the counters
        // on the point keep that visible.
        let p_value = counts.n_exceeding as f64 / config.n_toys as f64;

        points.push(ScanPoint {
            value: v,
            q_obs,
            p_value,
            n_exceeding: counts.n_exceeding,
            n_toys: config.n_toys,
            n_error: counts.n_error,
            n_nonconverged: counts.n_nonconverged,
            n_empty_toys: counts.n_empty,
        });
    }

    Ok(FcScan { poi_index: poi, poi_hat, nll_hat, points, reference, poi_hat_outside_scan })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fc_core::traits::ToyDraw;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Poisson};

    // Single-bin counting experiment: expected yield nu = mu * s + b, one
    // observed count. Small enough that every fit is instant, rich enough to
    // exercise the whole scan contract.
    #[derive(Clone)]
    struct CountingModel {
        n_obs: f64,
        s: f64,
        b: f64,
        // When set, gradient evaluations fail; used to force fit failures.
        poisoned: bool,
    }

    impl CountingModel {
        fn new(n_obs: f64, s: f64, b: f64) -> Self {
            Self { n_obs, s, b, poisoned: false }
        }

        fn expected(&self, mu: f64) -> f64 {
            self.s * mu + self.b
        }
    }

    impl LogDensityModel for CountingModel {
        fn dim(&self) -> usize {
            1
        }

        fn parameter_names(&self) -> Vec<String> {
            vec!["mu".into()]
        }

        fn parameter_bounds(&self) -> Vec<(f64, f64)> {
            vec![(0.0, 10.0)]
        }

        fn parameter_init(&self) -> Vec<f64> {
            vec![1.0]
        }

        fn nll(&self, params: &[f64]) -> Result<f64> {
            let nu = self.expected(params[0]);
            if nu <= 0.0 {
                return Err(Error::Computation(format!("non-positive yield {nu}")));
            }
            Ok(nu - self.n_obs * nu.ln())
        }

        fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
            if self.poisoned {
                return Err(Error::Computation("poisoned gradient".into()));
            }
            let nu = self.expected(params[0]);
            if nu <= 0.0 {
                return Err(Error::Computation(format!("non-positive yield {nu}")));
            }
            Ok(vec![self.s - self.n_obs * self.s / nu])
        }
    }

    impl PoiModel for CountingModel {
        fn poi_index(&self) -> Option<usize> {
            Some(0)
        }
    }

    impl FixedParamModel for CountingModel {
        fn with_fixed_param(&self, _param_idx: usize, _value: f64) -> Self {
            self.clone()
        }
    }

    impl ToySampleModel for CountingModel {
        fn sample_toy(&self, params: &[f64], seed: u64) -> Result<ToyDraw<Self>> {
            let nu = self.expected(params[0]);
            let mut rng = StdRng::seed_from_u64(seed);
            let n = if nu > 0.0 {
                let pois = Poisson::new(nu)
                    .map_err(|e| Error::Computation(format!("Poisson({nu}): {e}")))?;
                pois.sample(&mut rng) as usize
            } else {
                0
            };
            let mut toy = self.clone();
            toy.n_obs = n as f64;
            Ok(ToyDraw { model: toy, n_events: n })
        }
    }

    fn default_config() -> FcScanConfig {
        let mut config = FcScanConfig::new(0.5, 2.6, 0.5, 40);
        config.seed = 42;
        config
    }

    #[test]
    fn test_scan_points_match_grid_and_are_increasing() {
        let model = CountingModel::new(60.0, 20.0, 40.0);
        let mle = MaximumLikelihoodEstimator::new();
        let result = scan(&mle, &model, &default_config()).unwrap();

        let expected = [0.5, 1.0, 1.5, 2.0, 2.5];
        assert_eq!(result.points.len(), expected.len());
        for (point, want) in result.points.iter().zip(expected) {
            assert!((point.value - want).abs() < 1e-12);
        }
        for pair in result.points.windows(2) {
            assert!(pair[0].value < pair[1].value);
        }
    }

    #[test]
    fn test_p_values_are_exact_toy_fractions() {
        let model = CountingModel::new(60.0, 20.0, 40.0);
        let mle = MaximumLikelihoodEstimator::new();
        let config = default_config();
        let result = scan(&mle, &model, &config).unwrap();

        for point in &result.points {
            assert!(point.p_value >= 0.0 && point.p_value <= 1.0);
            assert_eq!(point.n_toys, config.n_toys);
            assert!(point.n_exceeding <= point.n_toys);
            let reconstructed = point.n_exceeding as f64 / point.n_toys as f64;
            assert_eq!(point.p_value.to_bits(), reconstructed.to_bits());
        }
    }

    #[test]
    fn test_scan_is_reproducible_given_seed() {
        let model = CountingModel::new(60.0, 20.0, 40.0);
        let mle = MaximumLikelihoodEstimator::new();
        let config = default_config();

        let a = scan(&mle, &model, &config).unwrap();
        let b = scan(&mle, &model, &config).unwrap();

        assert_eq!(a.points.len(), b.points.len());
        for (pa, pb) in a.points.iter().zip(b.points.iter()) {
            assert_eq!(pa.q_obs.to_bits(), pb.q_obs.to_bits());
            assert_eq!(pa.p_value.to_bits(), pb.p_value.to_bits());
            assert_eq!(pa.n_exceeding, pb.n_exceeding);
        }
    }

    #[test]
    fn test_zero_toys_is_invalid_configuration() {
        let model = CountingModel::new(60.0, 20.0, 40.0);
        let mle = MaximumLikelihoodEstimator::new();
        let mut config = default_config();
        config.n_toys = 0;

        match scan(&mle, &model, &config) {
            Err(Error::Validation(_)) => {}
            other => panic!("expected Validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_range_yields_empty_scan() {
        let model = CountingModel::new(60.0, 20.0, 40.0);
        let mle = MaximumLikelihoodEstimator::new();
        let mut config = default_config();
        config.start = 2.0;
        config.stop = 2.0;

        let result = scan(&mle, &model, &config).unwrap();
        assert!(result.points.is_empty());
        assert!(result.reference.is_none());
    }

    #[test]
    fn test_reference_point_collects_null_distribution() {
        let model = CountingModel::new(60.0, 20.0, 40.0);
        let mle = MaximumLikelihoodEstimator::new();
        let mut config = default_config();
        config.reference_point = Some(1.0);

        let result = scan(&mle, &model, &config).unwrap();
        let reference = result.reference.expect("reference sample should be kept");
        assert!((reference.value - 1.0).abs() < 1e-12);
        assert!(!reference.q_toys.is_empty());
        assert!(reference.q_toys.len() <= config.n_toys);
        assert!(reference.q_toys.iter().all(|q| *q >= 0.0));

        // The reference point's counters must agree with the kept sample.
        let point = result.points.iter().find(|p| (p.value - 1.0).abs() < 1e-12).unwrap();
        let n_exceeding = reference.q_toys.iter().filter(|q| **q > point.q_obs).count();
        assert_eq!(point.n_exceeding, n_exceeding);
    }

    #[test]
    fn test_best_fit_point_has_highest_p_value() {
        // n_obs = 60 with s = 20, b = 40 puts mu_hat at 1.0; the null
        // hypothesis is least rejected there.
        let model = CountingModel::new(60.0, 20.0, 40.0);
        let mle = MaximumLikelihoodEstimator::new();
        let result = scan(&mle, &model, &default_config()).unwrap();

        assert!((result.poi_hat - 1.0).abs() < 1e-4);
        let best = result
            .points
            .iter()
            .max_by(|a, b| a.p_value.partial_cmp(&b.p_value).unwrap())
            .unwrap();
        assert!((best.value - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_poi_hat_outside_scan_is_flagged() {
        let model = CountingModel::new(60.0, 20.0, 40.0);
        let mle = MaximumLikelihoodEstimator::new();
        let mut config = default_config();
        // mu_hat ~ 1.0 sits below this window.
        config.start = 2.0;
        config.stop = 3.1;

        let result = scan(&mle, &model, &config).unwrap();
        assert!(result.poi_hat_outside_scan);
    }

    // Model whose gradient fails inside a region of POI values. The scan's
    // constrained fit at a value inside that region evaluates exactly there
    // (bounds clamping), while free fits stay near the best-fit value.
    #[derive(Clone)]
    struct PoisonRegion {
        inner: CountingModel,
        center: f64,
        halfwidth: f64,
    }

    impl PoisonRegion {
        fn poisoned_at(&self, mu: f64) -> bool {
            (mu - self.center).abs() < self.halfwidth
        }
    }

    impl LogDensityModel for PoisonRegion {
        fn dim(&self) -> usize {
            self.inner.dim()
        }
        fn parameter_names(&self) -> Vec<String> {
            self.inner.parameter_names()
        }
        fn parameter_bounds(&self) -> Vec<(f64, f64)> {
            self.inner.parameter_bounds()
        }
        fn parameter_init(&self) -> Vec<f64> {
            self.inner.parameter_init()
        }
        fn nll(&self, params: &[f64]) -> Result<f64> {
            self.inner.nll(params)
        }
        fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
            if self.poisoned_at(params[0]) {
                return Err(Error::Computation("gradient evaluation failed".into()));
            }
            self.inner.grad_nll(params)
        }
    }

    impl PoiModel for PoisonRegion {
        fn poi_index(&self) -> Option<usize> {
            self.inner.poi_index()
        }
    }

    impl FixedParamModel for PoisonRegion {
        fn with_fixed_param(&self, param_idx: usize, value: f64) -> Self {
            Self { inner: self.inner.with_fixed_param(param_idx, value), ..self.clone() }
        }
    }

    impl ToySampleModel for PoisonRegion {
        fn sample_toy(&self, params: &[f64], seed: u64) -> Result<ToyDraw<Self>> {
            let draw = self.inner.sample_toy(params, seed)?;
            Ok(ToyDraw { model: Self { inner: draw.model, ..self.clone() }, n_events: draw.n_events })
        }
    }

    fn poisoned_model() -> PoisonRegion {
        PoisonRegion {
            inner: CountingModel::new(60.0, 20.0, 40.0),
            center: 2.5,
            halfwidth: 0.2,
        }
    }

    #[test]
    fn test_forced_constrained_failure_aborts_by_default() {
        // The constrained fit at POI = 2.5 must fail; under Abort the scan
        // surfaces an error instead of emitting a corrupted q.
        let mle = MaximumLikelihoodEstimator::new();
        let result = scan(&mle, &poisoned_model(), &default_config());
        assert!(result.is_err());
    }

    #[test]
    fn test_skip_policy_drops_failing_point_only() {
        let mle = MaximumLikelihoodEstimator::new();
        let mut config = default_config();
        config.on_failure = FailurePolicy::Skip;

        let result = scan(&mle, &poisoned_model(), &config).unwrap();

        let values: Vec<f64> = result.points.iter().map(|p| p.value).collect();
        assert_eq!(values.len(), 4);
        assert!(values.iter().all(|v| (v - 2.5).abs() > 1e-9));
        for pair in result.points.windows(2) {
            assert!(pair[0].value < pair[1].value);
        }
    }

    #[test]
    fn test_retry_policy_exhausts_then_aborts() {
        // Cold restarts are pinned at the same poisoned value, so every
        // attempt fails and the scan aborts after exhausting the budget.
        let mle = MaximumLikelihoodEstimator::new();
        let mut config = default_config();
        config.on_failure = FailurePolicy::Retry { max_attempts: 2 };

        assert!(scan(&mle, &poisoned_model(), &config).is_err());
    }

    #[test]
    fn test_nonconverging_base_fit_is_a_scan_error() {
        // Best fit sits at mu = 3.0, three units from the init; one iteration
        // with a tight tolerance cannot converge. That is severe regardless
        // of the per-point failure policy.
        let model = CountingModel::new(100.0, 20.0, 40.0);
        let mle = MaximumLikelihoodEstimator::with_config(crate::optimizer::OptimizerConfig {
            max_iter: 1,
            tol: 1e-12,
            m: 10,
        });
        let mut config = default_config();
        config.on_failure = FailurePolicy::Skip;

        match scan(&mle, &model, &config) {
            Err(Error::Convergence(_)) => {}
            other => panic!("expected Convergence error, got {other:?}"),
        }
    }

    #[test]
    fn test_freeze_list_rejects_unknown_and_poi_names() {
        let model = CountingModel::new(60.0, 20.0, 40.0);
        let mle = MaximumLikelihoodEstimator::new();

        let mut config = default_config();
        config.freeze = vec!["no_such_parameter".into()];
        assert!(matches!(scan(&mle, &model, &config), Err(Error::Validation(_))));

        config.freeze = vec!["mu".into()];
        assert!(matches!(scan(&mle, &model, &config), Err(Error::Validation(_))));
    }

    #[test]
    fn test_scan_range_outside_poi_domain_is_invalid() {
        let model = CountingModel::new(60.0, 20.0, 40.0);
        let mle = MaximumLikelihoodEstimator::new();
        let mut config = default_config();
        // POI domain is [0, 10].
        config.start = -1.0;
        config.stop = 1.0;

        assert!(matches!(scan(&mle, &model, &config), Err(Error::Validation(_))));
    }

    #[test]
    fn test_grid_half_open_semantics() {
        let config = FcScanConfig::new(124.0, 125.5, 0.5, 10);
        let grid = config.grid();
        assert_eq!(grid.len(), 3);
        assert!((grid[0] - 124.0).abs() < 1e-12);
        assert!((grid[2] - 125.0).abs() < 1e-12);

        let config = FcScanConfig::new(124.0, 126.0, 0.5, 10);
        assert_eq!(config.grid().len(), 4);
    }
}
