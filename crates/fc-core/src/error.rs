//! Error types for the fcscan workspace.

use thiserror::Error;

/// Workspace error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration or model structure.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A required minimization did not converge.
    #[error("Convergence failure: {0}")]
    Convergence(String),

    /// Numerical anomaly (non-finite objective, negative test statistic
    /// beyond tolerance, degenerate normalization).
    #[error("Computation error: {0}")]
    Computation(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
