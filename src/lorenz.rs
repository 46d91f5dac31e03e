//! The Lorenz 1963 convection model.
//!
//! A three dimensional chaotic system, the standard test bed for data assimilation.

use na::{RealField, Vector3, U3};
use nalgebra as na;

use crate::models::VectorField;

/// Lorenz63 model parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Lorenz63<N: RealField> {
    /// Prandtl number
    pub sigma: N,
    /// Geometric factor
    pub beta: N,
    /// Rayleigh number
    pub rho: N,
}

impl<N: RealField> Lorenz63<N> {
    pub fn new(sigma: N, beta: N, rho: N) -> Self {
        Lorenz63 { sigma, beta, rho }
    }
}

/// The classic chaotic parameters sigma=10, beta=8/3, rho=28.
impl<N: RealField> Default for Lorenz63<N> {
    fn default() -> Self {
        Lorenz63 {
            sigma: na::convert(10.0),
            beta: na::convert(8.0 / 3.0),
            rho: na::convert(28.0),
        }
    }
}

impl<N: RealField> VectorField<N, U3> for Lorenz63<N> {
    fn derivative(&self, x: &Vector3<N>) -> Vector3<N> {
        Vector3::new(
            self.sigma * (x[1] - x[0]),
            x[0] * (self.rho - x[2]) - x[1],
            x[0] * x[1] - self.beta * x[2],
        )
    }
}
