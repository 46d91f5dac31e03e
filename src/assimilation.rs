#![allow(non_snake_case)]

//! Twin experiment data assimilation.
//!
//! A known truth is generated by integrating the model from a true initial condition. Noisy observations of the truth
//! are sampled at scheduled steps. An ensemble Kalman filter, started from a biased background guess, never sees the
//! truth and assimilates the observations in a forecast/analysis cycle:
//!
//! - Forecast, every step: each member is integrated and receives process noise, the ensemble covariance becomes B.
//! - Analysis, only at scheduled steps: the ensemble is corrected with the scheduled observation.
//!
//! An uncorrected background trajectory from the same guess is integrated alongside as a baseline.
//!
//! All randomness comes from the injected random source. Draws are made in a fixed order: observation noise while
//! generating the truth, the initial ensemble, then for each step the process noise and any perturbed observations,
//! in member order. A seeded source therefore gives bit identical results.

use log::{debug, info, trace};
use na::{allocator::Allocator, DefaultAllocator, Dim, MatrixN, Vector3, VectorN, U3};
use nalgebra as na;
use rand_core::RngCore;

use crate::error::{ConfigurationSnafu, Result, ShapeSnafu};
use crate::estimators::ensemble::{EnsembleState, Samples};
use crate::integrators::{integrate, rk4_step};
use crate::lorenz::Lorenz63;
use crate::models::{KalmanEstimator, KalmanState, ObserveModel, VectorField};
use crate::noise::{CorrelatedNoise, CoupledNoise};

/// Tolerance on the ratios of model times converted to counts.
const TIME_TOLERANCE: f64 = 1e-9;

/// Configuration of a twin experiment.
#[derive(Clone)]
pub struct AssimilationConfig<D: Dim, ZD: Dim, F>
where
    DefaultAllocator: Allocator<f64, D, D> + Allocator<f64, D> + Allocator<f64, ZD, ZD>,
{
    /// System model, including its parameters
    pub model: F,
    /// Integration time step
    pub dt: f64,
    /// Length of the experiment in model time
    pub horizon: f64,
    /// True initial condition
    pub true_initial: VectorN<f64, D>,
    /// Background guess of the initial condition
    pub background_initial: VectorN<f64, D>,
    /// Covariance of the initial ensemble about the background guess
    pub background_noise: CorrelatedNoise<f64, D>,
    /// Process noise added to every member each step, may be zero
    pub process_noise: CorrelatedNoise<f64, D>,
    /// Observation noise R
    pub observe_noise: CorrelatedNoise<f64, ZD>,
    /// Model time between observations
    pub observation_interval: f64,
    /// Model time of the last observation
    pub observation_horizon: f64,
    /// Number of ensemble members
    pub ensemble_size: usize,
}

impl AssimilationConfig<U3, U3, Lorenz63<f64>> {
    /// The reference Lorenz63 twin experiment.
    ///
    /// Truth from (1,0,0), background guess (2,3,4) with standard deviation 0.1, no process noise,
    /// observations of the whole state with standard deviation 0.15 every 0.2 time units up to time 2,
    /// an ensemble of 10 members and dt 0.01 over 10 time units.
    pub fn lorenz63_twin() -> Self {
        let sig_m: f64 = 0.15;
        let sig_b: f64 = 0.1;
        AssimilationConfig {
            model: Lorenz63::default(),
            dt: 0.01,
            horizon: 10.,
            true_initial: Vector3::new(1., 0., 0.),
            background_initial: Vector3::new(2., 3., 4.),
            background_noise: CorrelatedNoise::scaled_identity(U3, sig_b * sig_b),
            process_noise: CorrelatedNoise::scaled_identity(U3, 0.),
            observe_noise: CorrelatedNoise::scaled_identity(U3, sig_m * sig_m),
            observation_interval: 0.2,
            observation_horizon: 2.,
            ensemble_size: 10,
        }
    }
}

impl<D: Dim, ZD: Dim, F> AssimilationConfig<D, ZD, F>
where
    DefaultAllocator: Allocator<f64, D, D> + Allocator<f64, D> + Allocator<f64, ZD, ZD> + Allocator<f64, ZD>,
{
    /// Number of integration steps nt, the time grid has nt+1 instants.
    ///
    /// The whole steps which fit in the horizon, the grid never extends past it.
    pub fn steps(&self) -> Result<usize> {
        if !(self.dt > 0. && self.dt.is_finite()) {
            return ConfigurationSnafu {
                what: format!("time step {} must be positive", self.dt),
            }
            .fail();
        }
        if !(self.horizon > 0. && self.horizon.is_finite()) {
            return ConfigurationSnafu {
                what: format!("horizon {} must be positive", self.horizon),
            }
            .fail();
        }
        let steps = (self.horizon / self.dt + TIME_TOLERANCE).floor();
        if steps < 1. {
            return ConfigurationSnafu {
                what: format!("horizon {} is shorter than a step", self.horizon),
            }
            .fail();
        }
        Ok(steps as usize)
    }

    /// The uniform time grid.
    pub fn times(&self) -> Result<Vec<f64>> {
        let steps = self.steps()?;
        Ok((0..=steps).map(|k| k as f64 * self.dt).collect())
    }

    /// Step indices of the scheduled observations.
    ///
    /// Evenly spaced every observation interval starting at that interval, up to and never past the observation
    /// horizon, converted to the nearest step. Strictly increasing and within the time grid.
    pub fn observation_schedule(&self) -> Result<Vec<usize>> {
        let steps = self.steps()?;
        if !(self.observation_interval > 0. && self.observation_interval.is_finite()) {
            return ConfigurationSnafu {
                what: format!("observation interval {} must be positive", self.observation_interval),
            }
            .fail();
        }
        if !(self.observation_horizon >= 0. && self.observation_horizon.is_finite()) {
            return ConfigurationSnafu {
                what: format!("observation horizon {} must not be negative", self.observation_horizon),
            }
            .fail();
        }

        let count = (self.observation_horizon / self.observation_interval + TIME_TOLERANCE).floor() as usize;
        let mut schedule: Vec<usize> = Vec::with_capacity(count);
        for j in 1..=count {
            let step = (j as f64 * self.observation_interval / self.dt).round() as usize;
            if step > steps {
                return ConfigurationSnafu {
                    what: format!("observation at step {} is beyond the last step {}", step, steps),
                }
                .fail();
            }
            if let Some(&last) = schedule.last() {
                if step <= last {
                    return ConfigurationSnafu {
                        what: format!("observation interval {} is shorter than a step", self.observation_interval),
                    }
                    .fail();
                }
            }
            if step == 0 {
                return ConfigurationSnafu {
                    what: "observation scheduled at the initial instant",
                }
                .fail();
            }
            schedule.push(step);
        }
        Ok(schedule)
    }

    /// Check the configuration is consistent.
    pub fn validate(&self) -> Result<()> {
        if self.ensemble_size < 2 {
            return ConfigurationSnafu {
                what: format!("ensemble size {} is less than 2", self.ensemble_size),
            }
            .fail();
        }
        let n = self.true_initial.nrows();
        check_dim("background initial condition", n, self.background_initial.nrows())?;
        check_dim("background noise", n, self.background_noise.Q.nrows())?;
        check_dim("background noise columns", n, self.background_noise.Q.ncols())?;
        check_dim("process noise", n, self.process_noise.Q.nrows())?;
        check_dim("process noise columns", n, self.process_noise.Q.ncols())?;
        let m = self.observe_noise.Q.nrows();
        check_dim("observation noise columns", m, self.observe_noise.Q.ncols())?;

        // All covariances must be PSD to be sampled
        CoupledNoise::from_correlated(&self.background_noise)?;
        CoupledNoise::from_correlated(&self.process_noise)?;
        CoupledNoise::from_correlated(&self.observe_noise)?;
        self.observation_schedule()?;
        Ok(())
    }
}

fn check_dim(what: &'static str, expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return ShapeSnafu { what, expected, found }.fail();
    }
    Ok(())
}

/// Observations sampled from the truth.
#[derive(Clone)]
pub struct TwinObservations<ZD: Dim>
where
    DefaultAllocator: Allocator<f64, ZD>,
{
    /// Step index of each observation
    pub steps: Vec<usize>,
    /// Model time of each observation
    pub times: Vec<f64>,
    /// Observation values
    pub values: Vec<VectorN<f64, ZD>>,
}

/// Trajectories of a twin experiment.
///
/// All trajectories are on the time grid and have nt+1 states.
pub struct AssimilationResult<D: Dim, ZD: Dim>
where
    DefaultAllocator: Allocator<f64, D> + Allocator<f64, ZD>,
{
    /// Time grid
    pub times: Vec<f64>,
    /// True trajectory
    pub truth: Samples<f64, D>,
    /// Uncorrected background trajectory
    pub background: Samples<f64, D>,
    /// Ensemble mean after each forecast, or after the analysis at observation steps
    pub analysis_mean: Samples<f64, D>,
    /// Ensemble spread sqrt(trace(X)/n) of the recorded estimate
    pub spread: Vec<f64>,
    /// Observations assimilated
    pub observations: TwinObservations<ZD>,
}

impl<D: Dim, ZD: Dim> AssimilationResult<D, ZD>
where
    DefaultAllocator: Allocator<f64, D> + Allocator<f64, ZD>,
{
    /// Root mean square error of the analysis mean against the truth.
    pub fn rmse(&self) -> Result<f64> {
        rmse(&self.analysis_mean, &self.truth)
    }

    /// Root mean square error of the uncorrected background against the truth.
    pub fn background_rmse(&self) -> Result<f64> {
        rmse(&self.background, &self.truth)
    }
}

/// Root mean square error between two trajectories, over all instants and all state elements.
pub fn rmse<D: Dim>(a: &[VectorN<f64, D>], b: &[VectorN<f64, D>]) -> Result<f64>
where
    DefaultAllocator: Allocator<f64, D>,
{
    check_dim("trajectory length", a.len(), b.len())?;
    if a.is_empty() {
        return ConfigurationSnafu {
            what: "empty trajectory",
        }
        .fail();
    }
    let mut sum = 0.;
    let mut count = 0;
    for (ai, bi) in a.iter().zip(b.iter()) {
        check_dim("trajectory state", ai.nrows(), bi.nrows())?;
        sum += (ai - bi).norm_squared();
        count += ai.nrows();
    }
    Ok((sum / count as f64).sqrt())
}

/// Generate the truth trajectory and the scheduled observations of it.
///
/// The truth is integrated without state noise. Each observation is the observed true state plus independent noise
/// with standard deviation sqrt(diagonal(R)).
pub fn twin_experiment<D, ZD, F, H>(
    config: &AssimilationConfig<D, ZD, F>,
    h: &H,
    rng: &mut dyn RngCore,
) -> Result<(Samples<f64, D>, TwinObservations<ZD>)>
where
    D: Dim,
    ZD: Dim,
    F: VectorField<f64, D>,
    H: ObserveModel<f64, D, ZD> + ?Sized,
    DefaultAllocator: Allocator<f64, D, D> + Allocator<f64, D> + Allocator<f64, ZD, ZD> + Allocator<f64, ZD, D> + Allocator<f64, ZD>,
{
    config.validate()?;
    let steps = config.steps()?;
    let schedule = config.observation_schedule()?;
    let truth = integrate(&config.model, &config.true_initial, config.dt, steps);

    let noise = config.observe_noise.diagonal();
    let mut values = Vec::with_capacity(schedule.len());
    for &k in schedule.iter() {
        let observed = h.observe(&truth[k]);
        check_dim("observation", noise.q.nrows(), observed.nrows())?;
        values.push(observed + noise.sample(rng));
    }

    let times = schedule.iter().map(|&k| k as f64 * config.dt).collect();
    Ok((
        truth,
        TwinObservations {
            steps: schedule,
            times,
            values,
        },
    ))
}

/// Run the forecast/analysis cycle over the given observations.
///
/// Returns the uncorrected background trajectory, the recorded ensemble mean trajectory and the spread of the
/// recorded estimate. A failed analysis aborts the run.
pub fn assimilate<D, ZD, F, H>(
    config: &AssimilationConfig<D, ZD, F>,
    h: &H,
    observations: &TwinObservations<ZD>,
    rng: &mut dyn RngCore,
) -> Result<(Samples<f64, D>, Samples<f64, D>, Vec<f64>)>
where
    D: Dim,
    ZD: Dim,
    F: VectorField<f64, D>,
    H: ObserveModel<f64, D, ZD> + ?Sized,
    DefaultAllocator: Allocator<f64, D, D> + Allocator<f64, D> + Allocator<f64, ZD, ZD> + Allocator<f64, ZD, D> + Allocator<f64, D, ZD> + Allocator<f64, ZD>,
{
    config.validate()?;
    let steps = config.steps()?;
    check_dim("observation steps", observations.values.len(), observations.steps.len())?;

    let process = CoupledNoise::from_correlated(&config.process_noise)?;
    let background_state = KalmanState {
        x: config.background_initial.clone(),
        X: config.background_noise.Q.clone(),
    };
    let mut ensemble = EnsembleState::from_kalman_state(&background_state, config.ensemble_size, rng)?;
    // B is seeded from the background noise then always overwritten from the ensemble
    let mut B: MatrixN<f64, D> = background_state.X.clone();

    let mut background = Vec::with_capacity(steps + 1);
    let mut analysis_mean = Vec::with_capacity(steps + 1);
    let mut spread = Vec::with_capacity(steps + 1);
    background.push(config.background_initial.clone());
    analysis_mean.push(config.background_initial.clone());
    spread.push(spread_of(&B));

    let mut next = 0;
    for k in 0..steps {
        // Forecast
        let next_background = rk4_step(&config.model, &background[k], config.dt);
        background.push(next_background);
        ensemble.predict(&config.model, config.dt, &process, rng);
        let forecast = ensemble.kalman_state()?;
        B = forecast.X;
        let mut estimate = forecast.x;
        trace!("forecast step {} spread {:.4}", k + 1, spread_of(&B));

        // Analysis
        if next < observations.steps.len() && k + 1 == observations.steps[next] {
            let z = &observations.values[next];
            let predicted = h.observe(&estimate);
            let analysis = ensemble.observe(z, h, &config.observe_noise, &B, rng)?;
            let innovation = (z - predicted).norm();
            B = analysis.X;
            estimate = analysis.x;
            debug!(
                "analysis {} at step {} t={:.3} innovation {:.4} spread {:.4}",
                next,
                k + 1,
                (k + 1) as f64 * config.dt,
                innovation,
                spread_of(&B)
            );
            next += 1;
        }

        analysis_mean.push(estimate);
        spread.push(spread_of(&B));
    }

    if next < observations.steps.len() {
        return ConfigurationSnafu {
            what: format!("{} observations beyond the last step", observations.steps.len() - next),
        }
        .fail();
    }
    Ok((background, analysis_mean, spread))
}

/// Run a complete twin experiment.
///
/// Generates the truth and observations then assimilates them, drawing all randomness from `rng`.
pub fn run_assimilation<D, ZD, F, H>(
    config: &AssimilationConfig<D, ZD, F>,
    h: &H,
    rng: &mut dyn RngCore,
) -> Result<AssimilationResult<D, ZD>>
where
    D: Dim,
    ZD: Dim,
    F: VectorField<f64, D>,
    H: ObserveModel<f64, D, ZD> + ?Sized,
    DefaultAllocator: Allocator<f64, D, D> + Allocator<f64, D> + Allocator<f64, ZD, ZD> + Allocator<f64, ZD, D> + Allocator<f64, D, ZD> + Allocator<f64, ZD>,
{
    let times = config.times()?;
    info!(
        "twin experiment: {} steps of {}, {} members",
        times.len() - 1,
        config.dt,
        config.ensemble_size
    );

    let (truth, observations) = twin_experiment(config, h, rng)?;
    info!("{} observations up to t={}", observations.steps.len(), config.observation_horizon);

    let (background, analysis_mean, spread) = assimilate(config, h, &observations, rng)?;
    let result = AssimilationResult {
        times,
        truth,
        background,
        analysis_mean,
        spread,
        observations,
    };
    info!(
        "analysis rmse {:.4}, background rmse {:.4}",
        result.rmse()?,
        result.background_rmse()?
    );
    Ok(result)
}

/// Root mean variance of a covariance, sqrt(trace(X)/n).
fn spread_of<D: Dim>(X: &MatrixN<f64, D>) -> f64
where
    DefaultAllocator: Allocator<f64, D, D>,
{
    let n = X.nrows();
    if n == 0 {
        0.
    } else {
        (X.trace() / n as f64).sqrt()
    }
}
