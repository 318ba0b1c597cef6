//! # fc-core
//!
//! Shared foundation for the fcscan workspace.
//!
//! This crate provides:
//! - The workspace [`Error`] type and [`Result`] alias.
//! - Fit result records ([`FitResult`]).
//! - Model capability traits ([`traits`]) that let the inference layer stay
//!   independent of concrete density implementations.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use types::FitResult;
