#![allow(non_snake_case)]

//! Bayesian estimation noise models.
//!
//! Linear Noise models are represented as structs.
//! Additive Gaussian noise can be sampled from each representation using an injected random source,
//! draws are made in element order so a seeded source gives reproducible samples.

use na::storage::Storage;
use na::{allocator::Allocator, DefaultAllocator, Dim, MatrixMN, MatrixN, RealField, VectorN, U1};
use nalgebra as na;
use rand_core::RngCore;
use rand_distr::{Distribution, StandardNormal};

use crate::error::{ConfigurationSnafu, Result, ShapeSnafu};
use crate::linalg::cholesky;

/// Additive noise.
///
/// Noise represented as the noise variance vector.
#[derive(Clone)]
pub struct UncorrelatedNoise<N: RealField, QD: Dim>
where
    DefaultAllocator: Allocator<N, QD>,
{
    /// Noise variance
    pub q: VectorN<N, QD>,
}

/// Additive noise.
///
/// Noise represented as the noise covariance matrix.
#[derive(Clone)]
pub struct CorrelatedNoise<N: RealField, D: Dim>
where
    DefaultAllocator: Allocator<N, D, D>,
{
    /// Noise covariance
    pub Q: MatrixN<N, D>,
}

/// Additive noise.
///
/// Noise represented as the noise variance vector and a noise coupling matrix.
/// The noise covariance is G.q.G'.
#[derive(Clone)]
pub struct CoupledNoise<N: RealField, D: Dim, QD: Dim>
where
    DefaultAllocator: Allocator<N, D, QD> + Allocator<N, QD>,
{
    /// Noise variance
    pub q: VectorN<N, QD>,
    /// Noise coupling
    pub G: MatrixMN<N, D, QD>,
}

/// Draw a vector of independent standard normal variates.
pub fn standard_normal<N: RealField, D: Dim>(d: D, rng: &mut dyn RngCore) -> VectorN<N, D>
where
    DefaultAllocator: Allocator<N, D>,
{
    VectorN::from_fn_generic(d, U1, |_, _| {
        let v: f64 = StandardNormal.sample(&mut *rng);
        na::convert(v)
    })
}

impl<N: RealField, QD: Dim> UncorrelatedNoise<N, QD>
where
    DefaultAllocator: Allocator<N, QD>,
{
    /// Sample the noise, each element with standard deviation sqrt(q).
    pub fn sample(&self, rng: &mut dyn RngCore) -> VectorN<N, QD> {
        let mut s = standard_normal(self.q.data.shape().0, rng);
        s.component_mul_assign(&self.q.map(|q| q.sqrt()));
        s
    }
}

impl<N: RealField, D: Dim> CorrelatedNoise<N, D>
where
    DefaultAllocator: Allocator<N, D, D> + Allocator<N, D>,
{
    /// Creates a CorrelatedNoise from an UncorrelatedNoise.
    pub fn from_uncorrelated(uncorrelated: &UncorrelatedNoise<N, D>) -> Self {
        CorrelatedNoise {
            Q: MatrixN::from_diagonal(&uncorrelated.q),
        }
    }

    /// Noise with covariance variance.I
    pub fn scaled_identity(d: D, variance: N) -> Self {
        CorrelatedNoise {
            Q: MatrixN::from_diagonal_element_generic(d, d, variance),
        }
    }

    /// The uncorrelated part of the noise, the diagonal of Q.
    pub fn diagonal(&self) -> UncorrelatedNoise<N, D> {
        UncorrelatedNoise { q: self.Q.diagonal() }
    }
}

impl<N: RealField, D: Dim> CoupledNoise<N, D, D>
where
    DefaultAllocator: Allocator<N, D, D> + Allocator<N, D>,
{
    /// Creates a CoupledNoise from an CorrelatedNoise.
    /// The CorrelatedNoise must be PSD.
    /// The resulting 'q' is always a vector of 1s.
    pub fn from_correlated(correlated: &CorrelatedNoise<N, D>) -> Result<Self> {
        if correlated.Q.nrows() != correlated.Q.ncols() {
            return ShapeSnafu {
                what: "noise covariance columns",
                expected: correlated.Q.nrows(),
                found: correlated.Q.ncols(),
            }
            .fail();
        }
        let mut uc = correlated.Q.clone();
        let rcond = cholesky::upper_factor_psd(&mut uc);
        if rcond < N::zero() {
            return ConfigurationSnafu {
                what: "noise covariance is not PSD",
            }
            .fail();
        }

        Ok(CoupledNoise {
            q: VectorN::repeat_generic(uc.data.shape().0, U1, N::one()),
            G: uc,
        })
    }
}

impl<N: RealField, D: Dim, QD: Dim> CoupledNoise<N, D, QD>
where
    DefaultAllocator: Allocator<N, D, QD> + Allocator<N, QD> + Allocator<N, D>,
{
    /// Sample the noise, G.sqrt(q).e with e standard normal.
    pub fn sample(&self, rng: &mut dyn RngCore) -> VectorN<N, D> {
        let mut e = standard_normal(self.q.data.shape().0, rng);
        e.component_mul_assign(&self.q.map(|q| q.sqrt()));
        &self.G * e
    }
}
