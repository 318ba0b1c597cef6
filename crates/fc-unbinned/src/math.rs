//! Small numerical helpers shared by the PDFs and the mixture model.

use statrs::function::erf::erfc;

const LOG_SQRT_2PI: f64 = 0.918_938_533_204_672_7;

/// Numerically stable `log(Σ exp(x_i))`.
pub fn logsumexp(xs: &[f64]) -> f64 {
    let m = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !m.is_finite() {
        return m;
    }
    let sum: f64 = xs.iter().map(|&x| (x - m).exp()).sum();
    m + sum.ln()
}

/// `log(exp(hi) - exp(lo))` for `hi > lo`.
pub fn log_diff_exp(hi: f64, lo: f64) -> f64 {
    debug_assert!(hi > lo);
    hi + (-(lo - hi).exp()).ln_1p()
}

/// Standard normal density `φ(z)`.
pub fn standard_normal_pdf(z: f64) -> f64 {
    (-0.5 * z * z - LOG_SQRT_2PI).exp()
}

/// Standard normal log-density `log φ(z)`.
pub fn standard_normal_logpdf(z: f64) -> f64 {
    -0.5 * z * z - LOG_SQRT_2PI
}

/// Standard normal CDF `Φ(z)` via the complementary error function.
pub fn standard_normal_cdf(z: f64) -> f64 {
    0.5 * erfc(-z / std::f64::consts::SQRT_2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logsumexp_matches_naive() {
        let xs: [f64; 3] = [0.3, -1.2, 2.0];
        let naive: f64 = xs.iter().map(|x| x.exp()).sum::<f64>().ln();
        assert!((logsumexp(&xs) - naive).abs() < 1e-12);
    }

    #[test]
    fn test_logsumexp_large_magnitudes() {
        let xs = [1000.0, 1000.0];
        assert!((logsumexp(&xs) - (1000.0 + 2.0f64.ln())).abs() < 1e-9);
    }

    #[test]
    fn test_normal_cdf_symmetry() {
        assert!((standard_normal_cdf(0.0) - 0.5).abs() < 1e-15);
        let z = 1.7;
        assert!((standard_normal_cdf(z) + standard_normal_cdf(-z) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_log_diff_exp() {
        let got = log_diff_exp(2.0, 1.0);
        let expect = (2.0f64.exp() - 1.0f64.exp()).ln();
        assert!((got - expect).abs() < 1e-12);
    }
}
