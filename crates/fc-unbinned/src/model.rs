//! Unbinned mixture model (extended likelihood) with yields and constraints.

use crate::event_store::EventStore;
use crate::math::logsumexp;
use crate::pdf::UnbinnedPdf;
use fc_core::traits::{FixedParamModel, LogDensityModel, PoiModel};
use fc_core::{Error, Result};
use std::sync::Arc;

/// A model parameter.
///
/// Parameters are immutable model structure: the current point of a fit or a
/// scan lives in plain `Vec<f64>` snapshots, never inside the model. A
/// parameter is fixed by clamping its bounds to a single value.
#[derive(Debug, Clone)]
pub struct Parameter {
    /// Stable parameter name.
    pub name: String,
    /// Suggested initial value.
    pub init: f64,
    /// Bounds `(low, high)` (box constraints for the optimizer).
    pub bounds: (f64, f64),
    /// Optional constraint term (nuisance parameter prior).
    pub constraint: Option<Constraint>,
}

/// Constraint (penalty) term for nuisance parameters.
#[derive(Debug, Clone)]
pub enum Constraint {
    /// Gaussian constraint.
    Gaussian {
        /// Constraint mean.
        mean: f64,
        /// Constraint sigma (standard deviation), must be finite and > 0.
        sigma: f64,
    },
}

impl Constraint {
    fn nll_and_grad(&self, x: f64) -> Result<(f64, f64)> {
        match *self {
            Constraint::Gaussian { mean, sigma } => {
                if !sigma.is_finite() || sigma <= 0.0 {
                    return Err(Error::Validation(format!(
                        "Gaussian constraint requires sigma > 0, got {sigma}"
                    )));
                }
                let z = (x - mean) / sigma;
                let nll = 0.5 * z * z + (sigma.ln() + 0.5 * (2.0 * std::f64::consts::PI).ln());
                Ok((nll, z / sigma))
            }
        }
    }
}

/// How a process yield depends on model parameters.
#[derive(Debug, Clone)]
pub enum YieldExpr {
    /// Fixed number of expected events.
    Fixed(f64),
    /// A free yield parameter `ν` (directly optimized).
    Parameter {
        /// Index in the global parameter vector.
        index: usize,
    },
    /// `base_yield × scale_param` (signal-strength pattern).
    Scaled {
        /// Base expected yield (non-negative).
        base_yield: f64,
        /// Index of the scale parameter in the global parameter vector.
        scale_index: usize,
    },
}

impl YieldExpr {
    fn validate_param_indices(&self, n_params: usize) -> Result<()> {
        match *self {
            YieldExpr::Fixed(_) => Ok(()),
            YieldExpr::Parameter { index } => {
                if index >= n_params {
                    return Err(Error::Validation(format!(
                        "yield parameter index out of range: {index} >= {n_params}"
                    )));
                }
                Ok(())
            }
            YieldExpr::Scaled { scale_index, .. } => {
                if scale_index >= n_params {
                    return Err(Error::Validation(format!(
                        "yield scale_index out of range: {scale_index} >= {n_params}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Expected yield at the given parameter snapshot.
    pub fn value(&self, params: &[f64]) -> Result<f64> {
        let mut sparse = Vec::new();
        self.value_and_sparse_grad(params, &mut sparse)
    }

    fn value_and_sparse_grad(&self, params: &[f64], out: &mut Vec<(usize, f64)>) -> Result<f64> {
        match *self {
            YieldExpr::Fixed(v) => {
                if !v.is_finite() || v < 0.0 {
                    return Err(Error::Validation(format!(
                        "fixed yield must be finite and >= 0, got {v}"
                    )));
                }
                Ok(v)
            }
            YieldExpr::Parameter { index } => {
                let v = *params.get(index).ok_or_else(|| {
                    Error::Validation(format!("yield parameter index out of range: {index}"))
                })?;
                if !v.is_finite() || v < 0.0 {
                    return Err(Error::Validation(format!(
                        "yield parameter must be finite and >= 0, got {v} at index {index}"
                    )));
                }
                out.push((index, 1.0));
                Ok(v)
            }
            YieldExpr::Scaled { base_yield, scale_index } => {
                if !base_yield.is_finite() || base_yield < 0.0 {
                    return Err(Error::Validation(format!(
                        "base_yield must be finite and >= 0, got {base_yield}"
                    )));
                }
                let s = *params.get(scale_index).ok_or_else(|| {
                    Error::Validation(format!("scale_index out of range: {scale_index}"))
                })?;
                if !s.is_finite() || s < 0.0 {
                    return Err(Error::Validation(format!(
                        "scale parameter must be finite and >= 0, got {s} at index {scale_index}"
                    )));
                }
                out.push((scale_index, base_yield));
                Ok(base_yield * s)
            }
        }
    }
}

/// One physics process (signal/background) in an unbinned channel.
#[derive(Clone)]
pub struct Process {
    /// Process name (stable).
    pub name: String,
    /// Shape model for this process.
    pub pdf: Arc<dyn UnbinnedPdf>,
    /// Global parameter indices used as the PDF shape parameters.
    ///
    /// Length must equal `pdf.n_params()`.
    pub shape_param_indices: Vec<usize>,
    /// Yield model.
    pub yield_expr: YieldExpr,
}

/// An unbinned channel containing observed events and a mixture of processes.
#[derive(Clone)]
pub struct UnbinnedChannel {
    /// Channel name.
    pub name: String,
    /// Whether this channel contributes to the likelihood (vs validation-only).
    pub include_in_fit: bool,
    /// Observed (or toy) events.
    pub data: Arc<EventStore>,
    /// Processes (signal + backgrounds).
    pub processes: Vec<Process>,
}

/// An extended unbinned model (mixture + constraints).
///
/// The negative log-likelihood is the extended form
/// `NLL = ν_tot − Σ_i log Σ_p ν_p p_p(x_i) + constraints`.
#[derive(Clone)]
pub struct UnbinnedModel {
    parameters: Vec<Parameter>,
    poi_index: Option<usize>,
    channels: Vec<UnbinnedChannel>,
}

impl UnbinnedModel {
    /// Create a new unbinned model.
    pub fn new(
        parameters: Vec<Parameter>,
        channels: Vec<UnbinnedChannel>,
        poi_index: Option<usize>,
    ) -> Result<Self> {
        if parameters.is_empty() {
            return Err(Error::Validation("UnbinnedModel requires at least one parameter".into()));
        }
        if channels.is_empty() {
            return Err(Error::Validation("UnbinnedModel requires at least one channel".into()));
        }
        if let Some(poi) = poi_index {
            if poi >= parameters.len() {
                return Err(Error::Validation(format!(
                    "poi_index out of range: {poi} >= {}",
                    parameters.len()
                )));
            }
        }

        for p in &parameters {
            if !p.init.is_finite() {
                return Err(Error::Validation(format!("parameter '{}' init is not finite", p.name)));
            }
            if p.bounds.0.is_nan() || p.bounds.1.is_nan() || p.bounds.0 > p.bounds.1 {
                return Err(Error::Validation(format!(
                    "parameter '{}' has invalid bounds {:?}",
                    p.name, p.bounds
                )));
            }
            if p.init < p.bounds.0 || p.init > p.bounds.1 {
                return Err(Error::Validation(format!(
                    "parameter '{}' init {} outside bounds {:?}",
                    p.name, p.init, p.bounds
                )));
            }
            if let Some(Constraint::Gaussian { sigma, .. }) = &p.constraint {
                if !sigma.is_finite() || *sigma <= 0.0 {
                    return Err(Error::Validation(format!(
                        "parameter '{}' has invalid Gaussian constraint sigma {sigma}",
                        p.name
                    )));
                }
            }
        }

        for ch in &channels {
            for proc in &ch.processes {
                if proc.shape_param_indices.len() != proc.pdf.n_params() {
                    return Err(Error::Validation(format!(
                        "process '{}' shape_param_indices length {} != pdf.n_params() {}",
                        proc.name,
                        proc.shape_param_indices.len(),
                        proc.pdf.n_params()
                    )));
                }
                for &idx in &proc.shape_param_indices {
                    if idx >= parameters.len() {
                        return Err(Error::Validation(format!(
                            "process '{}' references out-of-range shape parameter index {idx}",
                            proc.name
                        )));
                    }
                }
                proc.yield_expr.validate_param_indices(parameters.len())?;
            }
        }

        Ok(Self { parameters, poi_index, channels })
    }

    /// Access parameters.
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Access channels.
    pub fn channels(&self) -> &[UnbinnedChannel] {
        &self.channels
    }

    /// Return a copy of the model with channel `channel_idx`'s data replaced.
    ///
    /// This is how toy datasets are swapped in: the returned model is fitted
    /// exactly like the original, and the original is untouched.
    pub fn with_channel_data(&self, channel_idx: usize, data: Arc<EventStore>) -> Result<Self> {
        let mut m = self.clone();
        let ch = m.channels.get_mut(channel_idx).ok_or_else(|| {
            Error::Validation(format!("channel index out of range: {channel_idx}"))
        })?;
        ch.data = data;
        Ok(m)
    }

    fn validate_params_len(&self, len: usize) -> Result<()> {
        if len != self.parameters.len() {
            return Err(Error::Validation(format!(
                "parameter length mismatch: expected {}, got {}",
                self.parameters.len(),
                len
            )));
        }
        Ok(())
    }

    fn nll_and_grad_internal(
        &self,
        params: &[f64],
        want_grad: bool,
    ) -> Result<(f64, Option<Vec<f64>>)> {
        self.validate_params_len(params.len())?;

        let mut nll = 0.0f64;
        let mut grad = if want_grad { Some(vec![0.0f64; params.len()]) } else { None };

        for ch in &self.channels {
            if !ch.include_in_fit {
                continue;
            }

            let n_events = ch.data.n_events();
            let n_proc = ch.processes.len();
            if n_proc == 0 {
                return Err(Error::Validation(format!("channel '{}' has no processes", ch.name)));
            }

            // Per-process yields with sparse yield gradients, and per-event
            // log-density (+ gradient) buffers.
            let mut yields = vec![0.0f64; n_proc];
            let mut dyields: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n_proc];
            let mut logps: Vec<Vec<f64>> = Vec::with_capacity(n_proc);
            let mut dlogps: Vec<Vec<f64>> = Vec::with_capacity(n_proc);

            for (pidx, proc) in ch.processes.iter().enumerate() {
                let mut sparse = Vec::new();
                yields[pidx] = proc.yield_expr.value_and_sparse_grad(params, &mut sparse)?;
                dyields[pidx] = sparse;

                let shape_params: Vec<f64> =
                    proc.shape_param_indices.iter().map(|&idx| params[idx]).collect();

                let mut lp = vec![0.0f64; n_events];
                if want_grad {
                    let mut dlp = vec![0.0f64; n_events * proc.pdf.n_params()];
                    proc.pdf.log_prob_grad_batch(&ch.data, &shape_params, &mut lp, &mut dlp)?;
                    logps.push(lp);
                    dlogps.push(dlp);
                } else {
                    proc.pdf.log_prob_batch(&ch.data, &shape_params, &mut lp)?;
                    logps.push(lp);
                }
            }

            let nu_tot: f64 = yields.iter().sum();
            nll += nu_tot;

            // Packed offsets for the shape-gradient accumulator.
            let mut shape_offsets = vec![0usize; n_proc];
            let mut total_shape = 0usize;
            for (p, proc) in ch.processes.iter().enumerate() {
                shape_offsets[p] = total_shape;
                total_shape += proc.pdf.n_params();
            }

            let mut sum_logf = 0.0f64;
            let mut sum_r_over_nu = vec![0.0f64; n_proc];
            let mut sum_r_dlogp = vec![0.0f64; total_shape];
            let mut terms = vec![0.0f64; n_proc];

            for i in 0..n_events {
                for p in 0..n_proc {
                    let nu = yields[p];
                    terms[p] = if nu > 0.0 { nu.ln() + logps[p][i] } else { f64::NEG_INFINITY };
                }
                let logf = logsumexp(&terms);
                sum_logf += logf;

                // Zero total density (all yields zero): the NLL is infinite
                // and responsibilities are undefined; leave the yield-gradient
                // terms from nu_tot to push the optimizer back out.
                if grad.is_none() || !logf.is_finite() {
                    continue;
                }
                for p in 0..n_proc {
                    let nu = yields[p];
                    if nu <= 0.0 {
                        continue;
                    }
                    // Responsibility of process p for event i.
                    let r = (terms[p] - logf).exp();
                    sum_r_over_nu[p] += r / nu;

                    let nsp = ch.processes[p].pdf.n_params();
                    if nsp == 0 {
                        continue;
                    }
                    let off = shape_offsets[p];
                    let base = i * nsp;
                    for j in 0..nsp {
                        sum_r_dlogp[off + j] += r * dlogps[p][base + j];
                    }
                }
            }

            nll -= sum_logf;

            if let Some(g) = grad.as_mut() {
                // Yield params: +dnu from nu_tot, -dnu * Σ_i r/nu from events.
                for (dy_p, &sum_r_p) in dyields.iter().zip(&sum_r_over_nu) {
                    for &(idx, dnu) in dy_p {
                        g[idx] += dnu;
                        g[idx] -= dnu * sum_r_p;
                    }
                }
                // Shape params: -Σ_i r * dlogp/dθ.
                for (proc, &off) in ch.processes.iter().zip(&shape_offsets) {
                    if proc.pdf.n_params() == 0 {
                        continue;
                    }
                    for (j, &global_idx) in proc.shape_param_indices.iter().enumerate() {
                        g[global_idx] -= sum_r_dlogp[off + j];
                    }
                }
            }
        }

        // Constraint terms.
        for (idx, p) in self.parameters.iter().enumerate() {
            let Some(c) = &p.constraint else { continue };
            let (cnll, cgrad) = c.nll_and_grad(params[idx])?;
            nll += cnll;
            if let Some(g) = grad.as_mut() {
                g[idx] += cgrad;
            }
        }

        Ok((nll, grad))
    }
}

impl LogDensityModel for UnbinnedModel {
    fn dim(&self) -> usize {
        self.parameters.len()
    }

    fn parameter_names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }

    fn parameter_bounds(&self) -> Vec<(f64, f64)> {
        self.parameters.iter().map(|p| p.bounds).collect()
    }

    fn parameter_init(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.init).collect()
    }

    fn nll(&self, params: &[f64]) -> Result<f64> {
        let (nll, _) = self.nll_and_grad_internal(params, false)?;
        Ok(nll)
    }

    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
        let (_, grad) = self.nll_and_grad_internal(params, true)?;
        Ok(grad.unwrap_or_default())
    }
}

impl PoiModel for UnbinnedModel {
    fn poi_index(&self) -> Option<usize> {
        self.poi_index
    }
}

impl FixedParamModel for UnbinnedModel {
    fn with_fixed_param(&self, param_idx: usize, value: f64) -> Self {
        let mut m = self.clone();
        if let Some(p) = m.parameters.get_mut(param_idx) {
            p.init = value;
            p.bounds = (value, value);
        }
        m
    }
}
