//! # fc-inference
//!
//! Frequentist inference for the fcscan workspace.
//!
//! This crate provides:
//! - A generic L-BFGS-B optimizer wrapper ([`optimizer`]).
//! - Maximum-likelihood estimation over [`fc_core::traits::LogDensityModel`]
//!   implementations ([`mle`]).
//! - The profile-likelihood-ratio test statistic ([`test_statistic`]).
//! - The toy-calibrated Feldman-Cousins confidence scan ([`feldman_cousins`]).
//!
//! ## Architecture
//!
//! Everything here is written against the `fc-core` capability traits, not
//! against a concrete density implementation; `fc-unbinned` plugs in from the
//! outside. Parameter state is always an explicit `Vec<f64>` snapshot, so
//! toy evaluation parallelizes without shared mutable state.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Toy-calibrated Feldman-Cousins scan driver.
pub mod feldman_cousins;
/// Maximum-likelihood estimation via L-BFGS-B.
pub mod mle;
/// Generic numerical optimizer (L-BFGS-B backend).
pub mod optimizer;
/// Profile-likelihood-ratio test statistic.
pub mod test_statistic;

pub use feldman_cousins::{
    FailurePolicy, FcScan, FcScanConfig, NullDistribution, ScanPoint,
};
pub use mle::MaximumLikelihoodEstimator;
pub use optimizer::{LbfgsbOptimizer, ObjectiveFunction, OptimizationResult, OptimizerConfig};
pub use test_statistic::{profile_q, profile_q_from, QValue};
