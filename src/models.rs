#![allow(non_snake_case)]

//! Bayesian estimation models.
//!
//! State representations are modeled as structs.
//! System models, continuous time vector fields and observation models, are defined as traits
//! so the estimators and the assimilation driver are generic over the system being estimated.

use na::storage::Storage;
use na::{allocator::Allocator, DefaultAllocator, Dim, MatrixMN, MatrixN, RealField, VectorN, U1};
use nalgebra as na;

use crate::error::Result;

/// Kalman State.
///
/// Linear representation as a state vector and the state covariance (symmetric positive semi-definite) matrix.
#[derive(PartialEq, Clone)]
pub struct KalmanState<N: RealField, D: Dim>
where
    DefaultAllocator: Allocator<N, D, D> + Allocator<N, D>,
{
    /// State vector
    pub x: VectorN<N, D>,
    /// State covariance matrix (symmetric positive semi-definite)
    pub X: MatrixN<N, D>,
}

impl<N: RealField, D: Dim> KalmanState<N, D>
where
    DefaultAllocator: Allocator<N, D, D> + Allocator<N, D>,
{
    pub fn new_zero(d: D) -> KalmanState<N, D> {
        KalmanState {
            x: VectorN::zeros_generic(d, U1),
            X: MatrixN::zeros_generic(d, d),
        }
    }
}

/// A state estimator.
pub trait Estimator<N: RealField, D: Dim>
where
    DefaultAllocator: Allocator<N, D>,
{
    /// The estimator's estimate of the system's state.
    fn state(&self) -> Result<VectorN<N, D>>;
}

/// A Kalman estimator.
///
/// The estimator's belief can be summarised by the linear Kalman state representation x,X.
pub trait KalmanEstimator<N: RealField, D: Dim>: Estimator<N, D>
where
    DefaultAllocator: Allocator<N, D, D> + Allocator<N, D>,
{
    /// The estimator's estimate of the system's KalmanState.
    fn kalman_state(&self) -> Result<KalmanState<N, D>>;
}

/// A continuous time system model.
///
/// The vector field gives the time derivative of the state. Model parameters are carried by the implementing value.
pub trait VectorField<N: RealField, D: Dim>
where
    DefaultAllocator: Allocator<N, D>,
{
    fn derivative(&self, x: &VectorN<N, D>) -> VectorN<N, D>;
}

impl<N: RealField, D: Dim, F> VectorField<N, D> for F
where
    F: Fn(&VectorN<N, D>) -> VectorN<N, D>,
    DefaultAllocator: Allocator<N, D>,
{
    fn derivative(&self, x: &VectorN<N, D>) -> VectorN<N, D> {
        self(x)
    }
}

/// A functional observation model.
///
/// The observation function h and its linearisation, the Jacobian Hx evaluated at a state.
pub trait ObserveModel<N: RealField, D: Dim, ZD: Dim>
where
    DefaultAllocator: Allocator<N, ZD, D> + Allocator<N, D> + Allocator<N, ZD>,
{
    /// Observation of the state: h(x)
    fn observe(&self, x: &VectorN<N, D>) -> VectorN<N, ZD>;
    /// Jacobian of the observation function at x
    fn jacobian(&self, x: &VectorN<N, D>) -> MatrixMN<N, ZD, D>;
}

/// Identity observation model.
///
/// The whole state is observed directly, h(x) = x and Hx = I.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct IdentityObserveModel;

impl<N: RealField, D: Dim> ObserveModel<N, D, D> for IdentityObserveModel
where
    DefaultAllocator: Allocator<N, D, D> + Allocator<N, D>,
{
    fn observe(&self, x: &VectorN<N, D>) -> VectorN<N, D> {
        x.clone()
    }

    fn jacobian(&self, x: &VectorN<N, D>) -> MatrixN<N, D> {
        let d = x.data.shape().0;
        MatrixN::identity_generic(d, d)
    }
}

/// Observation model from a function and its Jacobian.
pub struct FunctionObserveModel<N: RealField, D: Dim, ZD: Dim>
where
    DefaultAllocator: Allocator<N, ZD, D> + Allocator<N, D> + Allocator<N, ZD>,
{
    /// Observation function
    pub h: fn(&VectorN<N, D>) -> VectorN<N, ZD>,
    /// Jacobian of the observation function
    pub Hx: fn(&VectorN<N, D>) -> MatrixMN<N, ZD, D>,
}

impl<N: RealField, D: Dim, ZD: Dim> ObserveModel<N, D, ZD> for FunctionObserveModel<N, D, ZD>
where
    DefaultAllocator: Allocator<N, ZD, D> + Allocator<N, D> + Allocator<N, ZD>,
{
    fn observe(&self, x: &VectorN<N, D>) -> VectorN<N, ZD> {
        (self.h)(x)
    }

    fn jacobian(&self, x: &VectorN<N, D>) -> MatrixMN<N, ZD, D> {
        (self.Hx)(x)
    }
}
