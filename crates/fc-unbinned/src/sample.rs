//! Extended toy generation for unbinned mixture models.
//!
//! Generation is "extended": each process draws its event count from
//! `Poisson(ν_p)` at the supplied parameter snapshot, then draws that many
//! events from its PDF restricted to the observable support. The union of all
//! process draws becomes the toy dataset. Everything is deterministic given
//! the seed, independent of threading.

use crate::event_store::EventStore;
use crate::model::UnbinnedModel;
use fc_core::traits::{ToyDraw, ToySampleModel};
use fc_core::{Error, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Poisson};
use std::sync::Arc;

impl ToySampleModel for UnbinnedModel {
    fn sample_toy(&self, params: &[f64], seed: u64) -> Result<ToyDraw<Self>> {
        if params.len() != self.parameters().len() {
            return Err(Error::Validation(format!(
                "sample_toy: parameter length mismatch: expected {}, got {}",
                self.parameters().len(),
                params.len()
            )));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut toy = self.clone();
        let mut n_total = 0usize;

        for channel_idx in 0..self.channels().len() {
            let ch = &self.channels()[channel_idx];
            if !ch.include_in_fit {
                // Validation-only channels keep their original data.
                continue;
            }

            let specs = ch.data.observable_specs();
            if specs.len() != 1 {
                return Err(Error::Validation(format!(
                    "sample_toy supports single-observable channels, channel '{}' has {}",
                    ch.name,
                    specs.len()
                )));
            }
            let mut column: Vec<f64> = Vec::new();

            for proc in &ch.processes {
                let nu = proc.yield_expr.value(params)?;
                let n_p = if nu > 0.0 {
                    let pois = Poisson::new(nu).map_err(|e| {
                        Error::Computation(format!(
                            "Poisson({nu}) for process '{}': {e}",
                            proc.name
                        ))
                    })?;
                    pois.sample(&mut rng) as usize
                } else {
                    // Poisson(0) is deterministically 0.
                    0
                };
                if n_p == 0 {
                    continue;
                }

                let shape_params: Vec<f64> =
                    proc.shape_param_indices.iter().map(|&idx| params[idx]).collect();
                let support: Vec<(f64, f64)> = proc
                    .pdf
                    .observables()
                    .iter()
                    .map(|obs| {
                        ch.data.bounds(obs).ok_or_else(|| {
                            Error::Validation(format!(
                                "missing bounds for observable '{obs}' in channel '{}'",
                                ch.name
                            ))
                        })
                    })
                    .collect::<Result<_>>()?;

                let xs = proc.pdf.sample(&shape_params, n_p, &support, &mut rng)?;
                column.extend_from_slice(&xs);
            }

            n_total += column.len();
            let obs_name = specs[0].name.clone();
            let store = EventStore::from_columns(specs, vec![(obs_name, column)])?;
            toy = toy.with_channel_data(channel_idx, Arc::new(store))?;
        }

        Ok(ToyDraw { model: toy, n_events: n_total })
    }
}
