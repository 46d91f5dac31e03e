//! Ensemble+Estimate, ensemble Kalman filtering for data assimilation.
//!
//! Data assimilation estimates the hidden state of a dynamic system by combining a model of the system with sparse,
//! noisy observations of it. For non-linear and chaotic systems the belief about the state can be represented by an
//! ensemble of samples which are each propagated through the model. The ensemble Kalman filter (EnKF) corrects the
//! ensemble with each observation using a Kalman gain computed from the ensemble's own statistics.
//!
//! The library implements the stochastic (perturbed observation) EnKF and a twin experiment driver which runs the
//! forecast/analysis cycle for any model exposing a vector field and any observation model exposing a function and its
//! Jacobian. The Lorenz63 system is provided as the reference chaotic model.
//!
//! System models and observation models are represented by traits. State representations are defined by structs.
//! Estimators implement the models for their state representation and provide numerical implementation of the operations.
//! Matrix and vector dimensions are generic using nalgebra, fixed sizes and `Dynamic` sizes are both supported.
//!
//! All random draws are made from an injected random source so results are reproducible for a seeded source.
//!
//! # Licensing
//!
//! The library is distributed under the MIT license.

pub mod assimilation;
pub mod error;
pub mod estimators;
pub mod integrators;
pub mod linalg;
pub mod lorenz;
pub mod models;
pub mod noise;

pub use error::{EstimateError, Result};
