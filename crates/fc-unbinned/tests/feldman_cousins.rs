//! End-to-end Feldman-Cousins scan on a Gaussian signal over an exponential
//! background: the resonance-mass scenario the workspace exists for.

use fc_inference::feldman_cousins::{self, FcScanConfig};
use fc_inference::mle::MaximumLikelihoodEstimator;
use fc_unbinned::{
    EventStore, ObservableSpec, Parameter, Process, UnbinnedChannel, UnbinnedModel, YieldExpr,
};
use fc_unbinned::{ExponentialPdf, GaussianPdf, UnbinnedPdf};
use statrs::distribution::{ContinuousCDF, Normal};
use std::sync::Arc;

const MASS_LO: f64 = 100.0;
const MASS_HI: f64 = 180.0;
const INJECTED_MASS: f64 = 125.0;
const MASS_RESOLUTION: f64 = 1.0;
const BKG_SLOPE: f64 = -0.05;
const N_SIG: usize = 60;
const N_BKG: usize = 240;

/// Deterministic observed dataset: signal events at Gaussian quantiles around
/// the injected mass, background events at bounded-exponential quantiles.
/// Quantile placement centers the fitted mass on the injected value without
/// any sampling noise.
fn observed_masses() -> Vec<f64> {
    let normal = Normal::new(INJECTED_MASS, MASS_RESOLUTION).unwrap();
    let mut xs = Vec::with_capacity(N_SIG + N_BKG);
    for i in 0..N_SIG {
        let u = (i as f64 + 0.5) / N_SIG as f64;
        xs.push(normal.inverse_cdf(u).clamp(MASS_LO, MASS_HI));
    }
    let ea = (BKG_SLOPE * MASS_LO).exp();
    let eb = (BKG_SLOPE * MASS_HI).exp();
    for i in 0..N_BKG {
        let u = (i as f64 + 0.5) / N_BKG as f64;
        let x = (ea + u * (eb - ea)).ln() / BKG_SLOPE;
        xs.push(x.clamp(MASS_LO, MASS_HI));
    }
    xs
}

/// Gaussian peak on an exponential background, extended, with the
/// hypothesized mass as the parameter of interest.
fn mass_model() -> UnbinnedModel {
    let obs = ObservableSpec::new("mass", (MASS_LO, MASS_HI));
    let store = Arc::new(
        EventStore::from_columns(vec![obs], vec![("mass".to_string(), observed_masses())]).unwrap(),
    );

    // Parameters: [mass_hyp, resolution (fixed), bkg_slope, norm_s, norm_b]
    let parameters = vec![
        Parameter { name: "mass_hyp".into(), init: 125.0, bounds: (120.0, 130.0), constraint: None },
        Parameter {
            name: "resolution".into(),
            init: MASS_RESOLUTION,
            bounds: (MASS_RESOLUTION, MASS_RESOLUTION),
            constraint: None,
        },
        Parameter { name: "bkg_slope".into(), init: -0.04, bounds: (-0.2, 0.01), constraint: None },
        Parameter { name: "norm_s".into(), init: 40.0, bounds: (0.0, 200.0), constraint: None },
        Parameter { name: "norm_b".into(), init: 200.0, bounds: (0.0, 1000.0), constraint: None },
    ];

    let signal: Arc<dyn UnbinnedPdf> = Arc::new(GaussianPdf::new("mass"));
    let background: Arc<dyn UnbinnedPdf> = Arc::new(ExponentialPdf::new("mass"));

    let channel = UnbinnedChannel {
        name: "hgg".into(),
        include_in_fit: true,
        data: store,
        processes: vec![
            Process {
                name: "signal".into(),
                pdf: signal,
                shape_param_indices: vec![0, 1],
                yield_expr: YieldExpr::Parameter { index: 3 },
            },
            Process {
                name: "background".into(),
                pdf: background,
                shape_param_indices: vec![2],
                yield_expr: YieldExpr::Parameter { index: 4 },
            },
        ],
    };

    UnbinnedModel::new(parameters, vec![channel], Some(0)).unwrap()
}

fn scan_config() -> FcScanConfig {
    let mut config = FcScanConfig::new(124.0, 126.0, 0.5, 50);
    config.seed = 20240817;
    config.freeze = vec!["bkg_slope".into(), "norm_b".into()];
    config.reference_point = Some(125.0);
    config
}

#[test]
fn test_mass_scan_end_to_end() {
    let model = mass_model();
    let mle = MaximumLikelihoodEstimator::new();
    let config = scan_config();

    let result = feldman_cousins::scan(&mle, &model, &config).unwrap();

    // Four points, increasing, on the configured grid.
    let values: Vec<f64> = result.points.iter().map(|p| p.value).collect();
    assert_eq!(values.len(), 4);
    for (got, want) in values.iter().zip([124.0, 124.5, 125.0, 125.5]) {
        assert!((got - want).abs() < 1e-12, "grid mismatch: {got} vs {want}");
    }

    // Valid exact-fraction p-values everywhere.
    for point in &result.points {
        assert!(point.p_value >= 0.0 && point.p_value <= 1.0);
        assert_eq!(point.n_toys, config.n_toys);
        let k = point.n_exceeding as f64;
        assert_eq!(point.p_value, k / config.n_toys as f64);
        assert!(point.q_obs >= 0.0);
    }

    // The fitted mass sits on the injected value, inside the scan window.
    assert!((result.poi_hat - INJECTED_MASS).abs() < 0.1, "poi_hat = {}", result.poi_hat);
    assert!(!result.poi_hat_outside_scan);

    // The null hypothesis is least rejected at the injected mass.
    let best = result
        .points
        .iter()
        .max_by(|a, b| a.p_value.partial_cmp(&b.p_value).unwrap())
        .unwrap();
    assert!(
        (best.value - INJECTED_MASS).abs() < 1e-12,
        "highest p-value at {} (p = {}), expected {INJECTED_MASS}",
        best.value,
        best.p_value
    );

    // Off-peak hypotheses are strongly rejected relative to the peak.
    let q_at = |v: f64| {
        result.points.iter().find(|p| (p.value - v).abs() < 1e-12).unwrap().q_obs
    };
    assert!(q_at(124.0) > q_at(125.0));
    assert!(q_at(125.5) > q_at(125.0));

    // Reference-point diagnostic sample.
    let reference = result.reference.as_ref().expect("null distribution at 125.0");
    assert!((reference.value - 125.0).abs() < 1e-12);
    assert!(!reference.q_toys.is_empty());
    assert!(reference.q_toys.len() <= config.n_toys);
    assert!(reference.q_toys.iter().all(|q| *q >= 0.0 && q.is_finite()));
}

#[test]
fn test_mass_scan_is_reproducible() {
    let model = mass_model();
    let mle = MaximumLikelihoodEstimator::new();
    let config = scan_config();

    let a = feldman_cousins::scan(&mle, &model, &config).unwrap();
    let b = feldman_cousins::scan(&mle, &model, &config).unwrap();

    assert_eq!(a.points.len(), b.points.len());
    for (pa, pb) in a.points.iter().zip(b.points.iter()) {
        assert_eq!(pa.value.to_bits(), pb.value.to_bits());
        assert_eq!(pa.q_obs.to_bits(), pb.q_obs.to_bits());
        assert_eq!(pa.p_value.to_bits(), pb.p_value.to_bits());
        assert_eq!(pa.n_exceeding, pb.n_exceeding);
        assert_eq!(pa.n_error, pb.n_error);
    }

    let qa = &a.reference.as_ref().unwrap().q_toys;
    let qb = &b.reference.as_ref().unwrap().q_toys;
    assert_eq!(qa.len(), qb.len());
    for (x, y) in qa.iter().zip(qb.iter()) {
        assert_eq!(x.to_bits(), y.to_bits());
    }
}

#[test]
fn test_scan_result_serializes_for_reporting() {
    let model = mass_model();
    let mle = MaximumLikelihoodEstimator::new();
    let mut config = scan_config();
    // A cheaper scan is enough to exercise the reporting boundary.
    config.n_toys = 10;
    config.reference_point = None;

    let result = feldman_cousins::scan(&mle, &model, &config).unwrap();

    let json = serde_json::to_string(&result).unwrap();
    let back: fc_inference::feldman_cousins::FcScan = serde_json::from_str(&json).unwrap();

    assert_eq!(back.points.len(), result.points.len());
    assert_eq!(back.poi_index, result.poi_index);
    for (pa, pb) in result.points.iter().zip(back.points.iter()) {
        assert_eq!(pa.value.to_bits(), pb.value.to_bits());
        assert_eq!(pa.p_value.to_bits(), pb.p_value.to_bits());
    }
}

#[test]
fn test_acceptance_region_keeps_the_injected_mass() {
    let model = mass_model();
    let mle = MaximumLikelihoodEstimator::new();
    let config = scan_config();

    let result = feldman_cousins::scan(&mle, &model, &config).unwrap();

    // With the peak dead on 125.0 and a coarse grid, the 68% acceptance
    // region is exactly the injected point: neighbours are ~15 units of q
    // away, far beyond any toy fluctuation.
    let accepted = result.acceptance_region(config.alpha);
    assert!(accepted.contains(&125.0), "acceptance region {accepted:?} lost the injected mass");
    let interval = result.interval(config.alpha).unwrap();
    assert!(interval.0 <= 125.0 && 125.0 <= interval.1);
}
