use crate::event_store::EventStore;
use crate::math::{standard_normal_cdf, standard_normal_logpdf, standard_normal_pdf};
use crate::pdf::{u01, UnbinnedPdf};
use fc_core::{Error, Result};
use statrs::distribution::{ContinuousCDF, Normal};

/// Truncated Gaussian PDF `N(μ, σ)` normalized on the observable bounds.
///
/// Shape parameters: `[mu, sigma]`. The canonical signal peak for a
/// resonance-mass observable.
#[derive(Debug, Clone)]
pub struct GaussianPdf {
    observables: [String; 1],
}

impl GaussianPdf {
    /// Create a new Gaussian PDF over the given observable.
    pub fn new(observable: impl Into<String>) -> Self {
        Self { observables: [observable.into()] }
    }

    fn check_params(&self, params: &[f64]) -> Result<(f64, f64)> {
        if params.len() != 2 {
            return Err(Error::Validation(format!(
                "GaussianPdf expects 2 params (mu, sigma), got {}",
                params.len()
            )));
        }
        let mu = params[0];
        let sigma = params[1];
        if !mu.is_finite() || !sigma.is_finite() || sigma <= 0.0 {
            return Err(Error::Validation(format!(
                "GaussianPdf parameters must be finite with sigma > 0, got mu={mu}, sigma={sigma}"
            )));
        }
        Ok((mu, sigma))
    }
}

impl UnbinnedPdf for GaussianPdf {
    fn n_params(&self) -> usize {
        2
    }

    fn observables(&self) -> &[String] {
        &self.observables
    }

    fn log_prob_batch(&self, events: &EventStore, params: &[f64], out: &mut [f64]) -> Result<()> {
        let mut tmp_grad = vec![0.0f64; events.n_events() * self.n_params()];
        self.log_prob_grad_batch(events, params, out, &mut tmp_grad)
    }

    fn log_prob_grad_batch(
        &self,
        events: &EventStore,
        params: &[f64],
        out_logp: &mut [f64],
        out_grad: &mut [f64],
    ) -> Result<()> {
        let (mu, sigma) = self.check_params(params)?;

        let n = events.n_events();
        if out_logp.len() != n {
            return Err(Error::Validation(format!(
                "GaussianPdf out_logp length mismatch: expected {n}, got {}",
                out_logp.len()
            )));
        }
        let expected_grad_len = n * self.n_params();
        if out_grad.len() != expected_grad_len {
            return Err(Error::Validation(format!(
                "GaussianPdf out_grad length mismatch: expected {expected_grad_len}, got {}",
                out_grad.len()
            )));
        }

        let obs = self.observables[0].as_str();
        let xs = events
            .column(obs)
            .ok_or_else(|| Error::Validation(format!("missing column '{obs}'")))?;
        let (a, b) = events
            .bounds(obs)
            .ok_or_else(|| Error::Validation(format!("missing bounds for '{obs}'")))?;

        let inv_sigma = 1.0 / sigma;
        let z_a = (a - mu) * inv_sigma;
        let z_b = (b - mu) * inv_sigma;

        // Normalization constant Z = Phi(z_b) - Phi(z_a).
        let mut z = standard_normal_cdf(z_b) - standard_normal_cdf(z_a);
        if !z.is_finite() || z <= 0.0 {
            // Underflow/degenerate: keep the cost finite; this corresponds to
            // extreme truncation far from the support.
            z = f64::MIN_POSITIVE;
        }
        let log_z = z.ln();

        let phi_a = standard_normal_pdf(z_a);
        let phi_b = standard_normal_pdf(z_b);
        let dlogz_dmu = (phi_a - phi_b) * inv_sigma / z;
        let dlogz_dsigma = (z_a * phi_a - z_b * phi_b) * inv_sigma / z;

        for (i, &x) in xs.iter().enumerate() {
            let z_x = (x - mu) * inv_sigma;
            out_logp[i] = standard_normal_logpdf(z_x) - sigma.ln() - log_z;

            // d/dmu logp = (z/σ) - d/dmu logZ
            let dmu = z_x * inv_sigma - dlogz_dmu;
            // d/dsigma logp = ((z^2 - 1)/σ) - d/dsigma logZ
            let ds = (z_x * z_x - 1.0) * inv_sigma - dlogz_dsigma;

            let base = i * 2;
            out_grad[base] = dmu;
            out_grad[base + 1] = ds;
        }

        Ok(())
    }

    fn sample(
        &self,
        params: &[f64],
        n_events: usize,
        support: &[(f64, f64)],
        rng: &mut dyn rand::RngCore,
    ) -> Result<Vec<f64>> {
        let (mu, sigma) = self.check_params(params)?;
        if support.len() != 1 {
            return Err(Error::Validation(format!(
                "GaussianPdf sample expects 1D support, got {}D",
                support.len()
            )));
        }
        let (a, b) = support[0];
        if !a.is_finite() || !b.is_finite() || a >= b {
            return Err(Error::Validation(format!(
                "GaussianPdf sample requires finite support with low < high, got ({a}, {b})"
            )));
        }

        // Inverse-CDF sampling of the truncated normal: map u ∈ (0,1) onto
        // (Phi(a), Phi(b)) and invert. Robust for any truncation window.
        let normal = Normal::new(mu, sigma)
            .map_err(|e| Error::Computation(format!("Normal({mu}, {sigma}): {e}")))?;
        let p_a = normal.cdf(a);
        let p_b = normal.cdf(b);
        let width = p_b - p_a;
        if !width.is_finite() || width <= 0.0 {
            return Err(Error::Computation(format!(
                "GaussianPdf sample: degenerate truncation window on ({a}, {b})"
            )));
        }

        let mut xs = Vec::with_capacity(n_events);
        for _ in 0..n_events {
            let u = u01(rng);
            let x = normal.inverse_cdf(p_a + u * width);
            xs.push(x.clamp(a, b));
        }
        Ok(xs)
    }
}
