#![allow(non_snake_case)]

//! Ensemble Kalman filter state estimation.
//!
//! A discrete Bayesian estimator that represents the belief of the system's state as an ensemble of samples.
//! The mean and covariance of the samples give the Kalman state representation [`KalmanState`].
//!
//! The observation update is the stochastic (perturbed observation) ensemble Kalman filter.
//! A single Kalman gain is computed by linearising the observation model at the ensemble mean.
//! Each member is then corrected with its own innovation, the difference between a perturbed observation
//! and the non-linear observation of that member. The perturbations give the analysis ensemble the correct spread.
//!
//! [`KalmanState`]: ../../models/struct.KalmanState.html

use log::trace;
use na::storage::Storage;
use na::{allocator::Allocator, DefaultAllocator, Dim, MatrixN, RealField, VectorN, U1};
use nalgebra as na;
use rand_core::RngCore;
use snafu::OptionExt;

use crate::error::{ConfigurationSnafu, NumericalSnafu, Result, ShapeSnafu};
use crate::integrators::rk4_step;
use crate::models::{Estimator, KalmanEstimator, KalmanState, ObserveModel, VectorField};
use crate::noise::{CorrelatedNoise, CoupledNoise};

/// Ensemble members.
pub type Samples<N, D> = Vec<VectorN<N, D>>;

/// Ensemble State.
///
/// The members are ordered, the order fixes the order in which random draws are assigned to members.
pub struct EnsembleState<N: RealField, D: Dim>
where
    DefaultAllocator: Allocator<N, D>,
{
    /// Ensemble members
    pub s: Samples<N, D>,
}

impl<N: RealField, D: Dim> EnsembleState<N, D>
where
    DefaultAllocator: Allocator<N, D, D> + Allocator<N, D>,
{
    /// Creates an ensemble from its members.
    ///
    /// At least two members are required for the ensemble covariance to be defined.
    pub fn new(s: Samples<N, D>) -> Result<Self> {
        check_members(&s, 2)?;
        Ok(EnsembleState { s })
    }

    /// Creates an ensemble of `size` members sampled about a Kalman state.
    ///
    /// Each member is the state x plus an independent draw from N(0, X), drawn in member order.
    pub fn from_kalman_state(state: &KalmanState<N, D>, size: usize, rng: &mut dyn RngCore) -> Result<Self> {
        if size < 2 {
            return ConfigurationSnafu {
                what: format!("ensemble size {} is less than 2", size),
            }
            .fail();
        }
        let noise = CoupledNoise::from_correlated(&CorrelatedNoise { Q: state.X.clone() })?;
        let s = (0..size).map(|_| &state.x + noise.sample(rng)).collect();
        Ok(EnsembleState { s })
    }

    /// Number of ensemble members.
    pub fn len(&self) -> usize {
        self.s.len()
    }

    pub fn is_empty(&self) -> bool {
        self.s.is_empty()
    }

    /// Forecast every member one step with the model plus additive noise.
    ///
    /// Members are integrated with a RK4 step of `dt` and each receives an independent draw of the noise,
    /// drawn in member order.
    pub fn predict<F, QD>(&mut self, f: &F, dt: N, noise: &CoupledNoise<N, D, QD>, rng: &mut dyn RngCore)
    where
        F: VectorField<N, D> + ?Sized,
        QD: Dim,
        DefaultAllocator: Allocator<N, D, QD> + Allocator<N, QD>,
    {
        for x in self.s.iter_mut() {
            *x = rk4_step(f, x, dt) + noise.sample(rng);
        }
    }

    /// Observation update of the ensemble.
    ///
    /// `B` is the forecast covariance used for the Kalman gain, usually the covariance of this ensemble.
    /// The members are replaced by the analysis ensemble and its Kalman state is returned.
    pub fn observe<ZD, H>(
        &mut self,
        z: &VectorN<N, ZD>,
        h: &H,
        noise: &CorrelatedNoise<N, ZD>,
        B: &MatrixN<N, D>,
        rng: &mut dyn RngCore,
    ) -> Result<KalmanState<N, D>>
    where
        ZD: Dim,
        H: ObserveModel<N, D, ZD> + ?Sized,
        DefaultAllocator: Allocator<N, ZD, ZD> + Allocator<N, ZD, D> + Allocator<N, D, ZD> + Allocator<N, ZD>,
    {
        let (analysis, X) = analysis_step(&self.s, z, h, noise, B, rng)?;
        self.s = analysis;
        Ok(KalmanState { x: mean(&self.s)?, X })
    }
}

impl<N: RealField, D: Dim> Estimator<N, D> for EnsembleState<N, D>
where
    DefaultAllocator: Allocator<N, D, D> + Allocator<N, D>,
{
    fn state(&self) -> Result<VectorN<N, D>> {
        mean(&self.s)
    }
}

impl<N: RealField, D: Dim> KalmanEstimator<N, D> for EnsembleState<N, D>
where
    DefaultAllocator: Allocator<N, D, D> + Allocator<N, D>,
{
    fn kalman_state(&self) -> Result<KalmanState<N, D>> {
        let x = mean(&self.s)?;
        let X = sample_covariance(&self.s, &x)?;
        Ok(KalmanState { x, X })
    }
}

/// Check there are enough members and they all have the dimension of the first.
fn check_members<N: RealField, D: Dim>(s: &[VectorN<N, D>], min: usize) -> Result<()>
where
    DefaultAllocator: Allocator<N, D>,
{
    if s.len() < min {
        return ConfigurationSnafu {
            what: format!("ensemble of {} members, at least {} required", s.len(), min),
        }
        .fail();
    }
    let n = s[0].nrows();
    for x in s.iter() {
        if x.nrows() != n {
            return ShapeSnafu {
                what: "ensemble member",
                expected: n,
                found: x.nrows(),
            }
            .fail();
        }
    }
    Ok(())
}

fn check_shape(what: &'static str, expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return ShapeSnafu { what, expected, found }.fail();
    }
    Ok(())
}

/// Mean of the ensemble members.
pub fn mean<N: RealField, D: Dim>(s: &[VectorN<N, D>]) -> Result<VectorN<N, D>>
where
    DefaultAllocator: Allocator<N, D>,
{
    check_members(s, 1)?;
    let mut x = VectorN::zeros_generic(s[0].data.shape().0, U1);
    for si in s.iter() {
        x += si;
    }
    let count: N = na::convert(s.len() as f64);
    Ok(x / count)
}

/// Sample covariance of the ensemble members about their mean `x`.
///
/// Unbiased estimate, the divisor is the number of members less one. The result is exactly symmetric.
pub fn sample_covariance<N: RealField, D: Dim>(s: &[VectorN<N, D>], x: &VectorN<N, D>) -> Result<MatrixN<N, D>>
where
    DefaultAllocator: Allocator<N, D, D> + Allocator<N, D>,
{
    check_members(s, 2)?;
    check_shape("ensemble mean", s[0].nrows(), x.nrows())?;

    let d = x.data.shape().0;
    let mut X = MatrixN::zeros_generic(d, d);
    for si in s.iter() {
        let dx = si - x;
        X.ger(N::one(), &dx, &dx, N::one());
    }
    let divisor: N = na::convert((s.len() - 1) as f64);
    Ok(X / divisor)
}

/// Stochastic ensemble Kalman filter update of the ensemble members.
///
/// The Kalman gain K = B.Hx'.(Hx.B.Hx' + R)^-1 uses the Jacobian Hx evaluated once at the ensemble mean.
/// Each member i, in order, is then corrected with its own perturbed observation z + v_i, v_i ~ N(0, R):
///
///  a_i = x_i + K.(z + v_i - h(x_i))
///
/// Valid for any number of members, including a single member with a given B.
pub fn analysis_update<N, D, ZD, H>(
    s: &[VectorN<N, D>],
    z: &VectorN<N, ZD>,
    h: &H,
    noise: &CorrelatedNoise<N, ZD>,
    B: &MatrixN<N, D>,
    rng: &mut dyn RngCore,
) -> Result<Samples<N, D>>
where
    N: RealField,
    D: Dim,
    ZD: Dim,
    H: ObserveModel<N, D, ZD> + ?Sized,
    DefaultAllocator: Allocator<N, D, D>
        + Allocator<N, ZD, ZD>
        + Allocator<N, ZD, D>
        + Allocator<N, D, ZD>
        + Allocator<N, D>
        + Allocator<N, ZD>,
{
    let x = mean(s)?;
    let n = x.nrows();
    check_shape("forecast covariance rows", n, B.nrows())?;
    check_shape("forecast covariance columns", n, B.ncols())?;
    check_shape("observation noise", z.nrows(), noise.Q.nrows())?;
    check_shape("observation noise columns", z.nrows(), noise.Q.ncols())?;

    // Linearise the observation model at the mean
    let Hx = h.jacobian(&x);
    check_shape("observation Jacobian rows", z.nrows(), Hx.nrows())?;
    check_shape("observation Jacobian columns", n, Hx.ncols())?;

    let BHt = B * Hx.transpose();
    // S = Hx.B.Hx' + R
    let S = &Hx * &BHt + &noise.Q;
    // v - v is NaN for infinite and NaN elements
    if !S.iter().all(|&v| v - v == N::zero()) {
        return NumericalSnafu {
            what: "innovation covariance is not finite",
        }
        .fail();
    }

    // Inverse innovation covariance
    let SI = S
        .cholesky()
        .context(NumericalSnafu {
            what: "innovation covariance is singular",
        })?
        .inverse();
    // Kalman gain, B*Hx'*SI
    let K = &BHt * SI;

    let perturbation = CoupledNoise::from_correlated(noise)?;
    let mut analysis = Vec::with_capacity(s.len());
    for si in s.iter() {
        let zi = z + perturbation.sample(rng);
        let hi = h.observe(si);
        check_shape("observation", z.nrows(), hi.nrows())?;
        analysis.push(si + &K * (zi - hi));
    }
    trace!("analysis update of {} members", analysis.len());

    Ok(analysis)
}

/// Stochastic ensemble Kalman filter analysis step.
///
/// Updates the forecast ensemble with [`analysis_update`] and returns the analysis ensemble with its sample covariance.
/// At least two members are required.
///
/// ```
/// use ensemble_estimate::estimators::ensemble::analysis_step;
/// use ensemble_estimate::models::IdentityObserveModel;
/// use ensemble_estimate::noise::CorrelatedNoise;
/// use nalgebra::{Matrix3, Vector3, U3};
/// use rand_pcg::Pcg64;
/// use rand::SeedableRng;
///
/// let mut rng = Pcg64::seed_from_u64(7);
/// let forecast = vec![Vector3::new(1.0, 0.0, 0.0), Vector3::new(1.2, 0.1, -0.1), Vector3::new(0.9, -0.2, 0.1)];
/// let R = CorrelatedNoise::scaled_identity(U3, 0.01);
/// let B = Matrix3::from_diagonal_element(0.1);
///
/// let (analysis, P) = analysis_step(&forecast, &Vector3::new(1.1, 0.0, 0.0), &IdentityObserveModel, &R, &B, &mut rng).unwrap();
/// assert_eq!(analysis.len(), 3);
/// assert_eq!(P, P.transpose());
/// ```
pub fn analysis_step<N, D, ZD, H>(
    s: &[VectorN<N, D>],
    z: &VectorN<N, ZD>,
    h: &H,
    noise: &CorrelatedNoise<N, ZD>,
    B: &MatrixN<N, D>,
    rng: &mut dyn RngCore,
) -> Result<(Samples<N, D>, MatrixN<N, D>)>
where
    N: RealField,
    D: Dim,
    ZD: Dim,
    H: ObserveModel<N, D, ZD> + ?Sized,
    DefaultAllocator: Allocator<N, D, D>
        + Allocator<N, ZD, ZD>
        + Allocator<N, ZD, D>
        + Allocator<N, D, ZD>
        + Allocator<N, D>
        + Allocator<N, ZD>,
{
    check_members(s, 2)?;
    let analysis = analysis_update(s, z, h, noise, B, rng)?;
    let x = mean(&analysis)?;
    let X = sample_covariance(&analysis, &x)?;
    Ok((analysis, X))
}
