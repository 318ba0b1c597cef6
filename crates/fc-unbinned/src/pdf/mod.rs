//! Unbinned probability density functions (PDFs).

use crate::event_store::EventStore;
use fc_core::Result;

mod exponential;
mod gaussian;

pub use exponential::ExponentialPdf;
pub use gaussian::GaussianPdf;

/// Trait for normalized PDFs used in event-level likelihoods.
///
/// Implementations define a **proper density** on the observable support
/// described by [`EventStore::bounds`], and can draw events from it, which is
/// what makes extended toy generation possible without coupling the scan
/// driver to any concrete shape.
pub trait UnbinnedPdf: Send + Sync {
    /// Number of shape parameters for this PDF.
    fn n_params(&self) -> usize;

    /// Observable names required by this PDF (stable order; 1D PDFs return a
    /// slice of length 1).
    fn observables(&self) -> &[String];

    /// Evaluate `log p(x | params)` for all events in the store.
    ///
    /// `out` must have length `events.n_events()`.
    fn log_prob_batch(&self, events: &EventStore, params: &[f64], out: &mut [f64]) -> Result<()>;

    /// Evaluate `log p(x | params)` and its gradient w.r.t. the shape
    /// parameters.
    ///
    /// - `out_logp` must have length `events.n_events()`.
    /// - `out_grad` must have length `events.n_events() * self.n_params()`,
    ///   laid out row-major `[event0_param0, event0_param1, event1_param0, ...]`.
    fn log_prob_grad_batch(
        &self,
        events: &EventStore,
        params: &[f64],
        out_logp: &mut [f64],
        out_grad: &mut [f64],
    ) -> Result<()>;

    /// Draw `n_events` values from the density restricted to `support`.
    ///
    /// `support` has one `(low, high)` pair per observable. Sampling must be
    /// fully determined by `rng`; implementations keep no internal state.
    fn sample(
        &self,
        params: &[f64],
        n_events: usize,
        support: &[(f64, f64)],
        rng: &mut dyn rand::RngCore,
    ) -> Result<Vec<f64>>;
}

/// Uniform(0,1) from a raw RngCore (open interval).
#[inline]
pub(crate) fn u01(rng: &mut dyn rand::RngCore) -> f64 {
    (rng.next_u64() as f64 + 0.5) * (1.0 / 18446744073709551616.0_f64)
}
