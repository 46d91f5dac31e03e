//! Estimation errors.
//!
//! All fallible operations of the crate report one of three kinds of failure.
//! Errors are raised at the call which detects them and are never recovered internally.

use snafu::prelude::*;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EstimateError {
    /// A matrix which must be inverted is singular or has non-finite elements.
    #[snafu(display("numerical failure: {what}"))]
    Numerical { what: &'static str },
    /// State, observation or ensemble dimensions do not agree.
    #[snafu(display("dimension mismatch for {what}: expected {expected} found {found}"))]
    Shape {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    /// Invalid ensemble size, covariance or time grid.
    #[snafu(display("invalid configuration: {what}"))]
    Configuration { what: String },
}

pub type Result<T, E = EstimateError> = std::result::Result<T, E>;
