//! Columnar event storage for unbinned likelihood evaluation.

use fc_core::{Error, Result};
use std::collections::{BTreeMap, HashMap};

/// Observable specification for ingesting event-level data.
#[derive(Debug, Clone)]
pub struct ObservableSpec {
    /// Column name in the resulting [`EventStore`].
    pub name: String,
    /// Support bounds `(low, high)` for this observable.
    ///
    /// Bounds are used for PDF normalization and for toy sampling; they must
    /// be finite with `low < high`.
    pub bounds: (f64, f64),
}

impl ObservableSpec {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, bounds: (f64, f64)) -> Self {
        Self { name: name.into(), bounds }
    }
}

/// Columnar event storage (structure-of-arrays).
///
/// An `EventStore` is an order-irrelevant collection of observable values.
/// The observed store is built once at startup; toy stores are ephemeral,
/// one per toy draw.
#[derive(Debug, Clone)]
pub struct EventStore {
    n_events: usize,
    column_names: Vec<String>,
    columns: Vec<Vec<f64>>,
    name_to_index: HashMap<String, usize>,
    bounds: HashMap<String, (f64, f64)>,
}

impl EventStore {
    /// Create an [`EventStore`] from materialized columns.
    ///
    /// `observables` defines which columns are required and provides the
    /// support bounds. Extra columns are accepted but ignored. An empty
    /// column set (zero events) is valid; it arises naturally from extended
    /// toy generation when every process yield fluctuates to zero.
    pub fn from_columns(
        observables: Vec<ObservableSpec>,
        columns: impl IntoIterator<Item = (String, Vec<f64>)>,
    ) -> Result<Self> {
        if observables.is_empty() {
            return Err(Error::Validation("EventStore requires at least one observable".into()));
        }

        let mut by_name: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for (name, col) in columns {
            by_name.insert(name, col);
        }

        let mut column_names = Vec::with_capacity(observables.len());
        let mut cols = Vec::with_capacity(observables.len());
        let mut bounds = HashMap::with_capacity(observables.len());

        let mut n_events: Option<usize> = None;
        for obs in &observables {
            let (lo, hi) = obs.bounds;
            if !lo.is_finite() || !hi.is_finite() || lo >= hi {
                return Err(Error::Validation(format!(
                    "invalid bounds for observable '{}': expected finite low < high, got ({lo}, {hi})",
                    obs.name
                )));
            }
            let col = by_name.remove(&obs.name).ok_or_else(|| {
                Error::Validation(format!("missing observable column '{}'", obs.name))
            })?;
            let n = col.len();
            if let Some(ne) = n_events {
                if n != ne {
                    return Err(Error::Validation(format!(
                        "column length mismatch for '{}': expected {}, got {}",
                        obs.name, ne, n
                    )));
                }
            } else {
                n_events = Some(n);
            }
            if col.iter().any(|x| !x.is_finite()) {
                return Err(Error::Validation(format!(
                    "observable '{}' contains non-finite values",
                    obs.name
                )));
            }
            if col.iter().any(|&x| x < lo || x > hi) {
                return Err(Error::Validation(format!(
                    "observable '{}' contains values outside bounds ({lo}, {hi})",
                    obs.name
                )));
            }
            column_names.push(obs.name.clone());
            cols.push(col);
            bounds.insert(obs.name.clone(), obs.bounds);
        }

        let n_events = n_events.unwrap_or(0);
        let name_to_index =
            column_names.iter().enumerate().map(|(i, n)| (n.clone(), i)).collect::<HashMap<_, _>>();

        Ok(Self { n_events, column_names, columns: cols, name_to_index, bounds })
    }

    /// Number of events.
    pub fn n_events(&self) -> usize {
        self.n_events
    }

    /// Names of stored columns (stable order).
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Get a column by name.
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        let idx = self.name_to_index.get(name).copied()?;
        self.columns.get(idx).map(|c| c.as_slice())
    }

    /// Bounds for an observable, if defined.
    pub fn bounds(&self, name: &str) -> Option<(f64, f64)> {
        self.bounds.get(name).copied()
    }

    /// The observable specifications this store was built with, in column
    /// order. Used to rebuild stores of the same shape (toy generation).
    pub fn observable_specs(&self) -> Vec<ObservableSpec> {
        self.column_names
            .iter()
            .map(|name| ObservableSpec { name: name.clone(), bounds: self.bounds[name] })
            .collect()
    }
}
