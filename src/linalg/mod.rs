//! Linear algebra support for the estimators.

pub mod cholesky;
